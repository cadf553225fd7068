//! Question planners
//!
//! A planner turns one question into ordered sub-questions, each bound to
//! exactly one tool. The default planner routes on year references found
//! in the question text.
//!
//! Routing policy:
//! - explicit years (`2019`, `FY2020`) route to their tools
//! - a four-digit number only counts as a year with an `fy` prefix, after a
//!   word like `in` or `for`, inside a range or list of years, or when it is
//!   close to a configured year; "2000 cities" is a quantity
//! - ranges (`2019-2021`, `from 2019 to 2021`, `between 2019 and 2021`)
//!   cover every configured year they span
//! - `since 2020` covers 2020 onwards, `before 2021` everything earlier
//! - `last year` / `latest` / `most recent` pick the newest tool,
//!   `earliest` / `first year` the oldest
//! - years referenced but not configured produce no sub-questions
//! - no year reference at all fans out to every tool

use crate::models::SubQuestion;
use crate::tools::QueryTool;
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;

pub mod llm;
pub use llm::LlmPlanner;

/// Trait for sub-question generation
#[async_trait]
pub trait QuestionPlanner: Send + Sync {
    async fn plan(&self, question: &str, tools: &[QueryTool]) -> Result<Vec<SubQuestion>>;
}

/// Where a question points in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YearRoute {
    /// Configured years the question refers to, ascending.
    Years(Vec<i32>),
    /// The question refers to years, none of which are configured.
    Unavailable(Vec<i32>),
    /// No year reference at all.
    Unspecified,
}

const NEWEST_PHRASES: &[&str] = &[
    "last year",
    "latest",
    "most recent",
    "current year",
    "this year",
    "recent year",
];

const OLDEST_PHRASES: &[&str] = &["earliest", "first year", "oldest"];

const RANGE_CONNECTORS: &[&str] = &["-", "–", "to", "through", "thru", "until"];

/// Words that make the number after them a year.
const YEAR_CONTEXT_WORDS: &[&str] = &[
    "in", "for", "during", "since", "after", "before", "between", "from", "of", "by", "fiscal",
    "year", "fy", "until", "through", "thru", "to", "vs", "versus",
];

/// Words joining a year to the next one in a list or range.
const YEAR_JOINERS: &[&str] = &["and", "or", "vs", "versus", "-", "–", "to", "through", "thru", "until"];

const MONTHS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep",
    "sept", "oct", "nov", "dec",
];

/// A bare number at most this far from a configured year reads as a year.
const NEAR_CONFIGURED_YEARS: i32 = 3;

/// Resolve the years a question refers to against the configured ones.
pub fn route_years(question: &str, available: &[i32]) -> YearRoute {
    let lowered = question.to_lowercase();
    let tokens = tokenize(&lowered);
    let mentions = year_mentions(&tokens, available);

    let mut referenced: BTreeSet<i32> = BTreeSet::new();
    let mut wanted: BTreeSet<i32> = BTreeSet::new();
    let mut has_reference = false;

    for (i, mention) in mentions.iter().enumerate() {
        let Some(year) = *mention else {
            continue;
        };
        has_reference = true;
        referenced.insert(year);

        let previous = i.checked_sub(1).map(|p| tokens[p].as_str());
        let next = tokens.get(i + 1).map(String::as_str);
        let after_next = mentions.get(i + 2).copied().flatten();

        match (previous, next, after_next) {
            (_, Some(connector), Some(end)) if RANGE_CONNECTORS.contains(&connector) => {
                span(&mut wanted, available, year, end);
            }
            (Some("between"), Some("and"), Some(end)) => {
                span(&mut wanted, available, year, end);
            }
            (Some("since"), _, _) | (Some("after"), _, _) => {
                let inclusive = previous == Some("since");
                wanted.extend(
                    available
                        .iter()
                        .filter(|&&y| if inclusive { y >= year } else { y > year }),
                );
            }
            (Some("before"), _, _) => {
                wanted.extend(available.iter().filter(|&&y| y < year));
            }
            _ => {
                if available.contains(&year) {
                    wanted.insert(year);
                }
            }
        }
    }

    if NEWEST_PHRASES.iter().any(|p| lowered.contains(p)) {
        has_reference = true;
        wanted.extend(available.iter().max());
    }
    if OLDEST_PHRASES.iter().any(|p| lowered.contains(p)) {
        has_reference = true;
        wanted.extend(available.iter().min());
    }

    if !has_reference {
        YearRoute::Unspecified
    } else if wanted.is_empty() {
        YearRoute::Unavailable(referenced.into_iter().collect())
    } else {
        YearRoute::Years(wanted.into_iter().collect())
    }
}

fn span(wanted: &mut BTreeSet<i32>, available: &[i32], a: i32, b: i32) {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    wanted.extend(available.iter().filter(|&&y| y >= lo && y <= hi));
}

/// The year each token refers to, if it is read as a year at all.
fn year_mentions(tokens: &[String], available: &[i32]) -> Vec<Option<i32>> {
    let mut mentions: Vec<Option<i32>> = Vec::with_capacity(tokens.len());

    for (i, token) in tokens.iter().enumerate() {
        let year = parse_year(token).filter(|&year| {
            token.starts_with("fy")
                || available.iter().any(|&y| (y - year).abs() <= NEAR_CONFIGURED_YEARS)
                || in_year_context(tokens, &mentions, i)
        });
        mentions.push(year);
    }

    mentions
}

/// `mentions` holds the decisions for every token before `i`.
fn in_year_context(tokens: &[String], mentions: &[Option<i32>], i: usize) -> bool {
    let before = |back: usize| i.checked_sub(back).map(|p| tokens[p].as_str());
    let is_day = |t: &str| t.len() <= 2 && t.chars().all(|c| c.is_ascii_digit());

    if let Some(word) = before(1) {
        if YEAR_CONTEXT_WORDS.contains(&word) || MONTHS.contains(&word) {
            return true;
        }
        let joins_year = i.checked_sub(2).and_then(|p| mentions[p]).is_some();
        if YEAR_JOINERS.contains(&word) && joins_year {
            return true;
        }
        // "december 31, 2019"
        if is_day(word) && before(2).is_some_and(|month| MONTHS.contains(&month)) {
            return true;
        }
    }

    let next = tokens.get(i + 1).map(String::as_str);
    let range_end = tokens.get(i + 2).and_then(|t| parse_year(t));
    next.is_some_and(|connector| RANGE_CONNECTORS.contains(&connector)) && range_end.is_some()
}

/// Alphanumeric runs plus dashes as standalone tokens.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if c.is_alphanumeric() {
            current.push(c);
            continue;
        }
        if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        if c == '-' || c == '–' {
            tokens.push(c.to_string());
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// `2019`, `fy2019`; only 19xx and 20xx count as years.
fn parse_year(token: &str) -> Option<i32> {
    let digits = token.strip_prefix("fy").unwrap_or(token);
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !(digits.starts_with("19") || digits.starts_with("20")) {
        return None;
    }
    digits.parse().ok()
}

/// Deterministic planner driven by `route_years`.
pub struct RuleBasedPlanner;

impl RuleBasedPlanner {
    pub fn plan_sync(question: &str, tools: &[QueryTool]) -> Vec<SubQuestion> {
        let question = question.trim();
        let available: Vec<i32> = tools.iter().map(|t| t.year()).collect();

        let years = match route_years(question, &available) {
            YearRoute::Years(years) => years,
            YearRoute::Unavailable(_) => return Vec::new(),
            YearRoute::Unspecified => available.clone(),
        };

        let single_explicit =
            years.len() == 1 && question.contains(&years[0].to_string());

        years
            .iter()
            .filter_map(|year| tools.iter().find(|t| t.year() == *year))
            .enumerate()
            .map(|(i, tool)| {
                let text = if single_explicit {
                    question.to_string()
                } else {
                    format!("{} (fiscal year {})", question, tool.year())
                };
                SubQuestion::new(i as u32 + 1, text, tool.name())
            })
            .collect()
    }
}

#[async_trait]
impl QuestionPlanner for RuleBasedPlanner {
    async fn plan(&self, question: &str, tools: &[QueryTool]) -> Result<Vec<SubQuestion>> {
        Ok(Self::plan_sync(question, tools))
    }
}
