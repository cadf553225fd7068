//! Source fingerprints for cache validation

use crate::index::chunker::Chunker;
use crate::models::Document;
use crate::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;

#[derive(Serialize)]
struct FingerprintInput<'a> {
    document_count: usize,
    chunk_size: usize,
    chunk_overlap: usize,
    embedding_model: &'a str,
    documents: &'a [Document],
}

/// SHA-256 over the documents plus everything that shapes the index.
///
/// Streams the JSON encoding straight into the hasher.
pub fn compute_fingerprint(documents: &[Document], chunker: &Chunker, embedding_model: &str) -> Result<String> {
    let input = FingerprintInput {
        document_count: documents.len(),
        chunk_size: chunker.chunk_size(),
        chunk_overlap: chunker.overlap(),
        embedding_model,
        documents,
    };

    let mut hasher = Sha256::new();
    serde_json::to_writer(&mut HashWriter(&mut hasher), &input)?;

    Ok(hex::encode(hasher.finalize()))
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
