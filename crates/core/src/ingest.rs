use crate::chunking::{chunk_text, ChunkingConfig};
use crate::extractor::PdfExtractor;
use crate::IngestError;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

const DOCUMENT_ID_PATTERN: &str = r"^[a-z0-9][a-z0-9_-]*$";

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Turns a free-form name into a document id: trimmed, spaces to `_`,
/// lowercase, with anything outside `[a-z0-9_-]` dropped.
pub fn slugify(name: &str) -> String {
    let trimmed = name.trim();
    let trimmed = trimmed
        .strip_suffix(".pdf")
        .or_else(|| trimmed.strip_suffix(".PDF"))
        .unwrap_or(trimmed);

    let slug: String = trimmed
        .chars()
        .filter_map(|ch| match ch {
            ch if ch.is_whitespace() => Some('_'),
            ch if ch.is_ascii_alphanumeric() => Some(ch.to_ascii_lowercase()),
            '_' | '-' => Some(ch),
            _ => None,
        })
        .collect();
    slug.trim_start_matches(['_', '-']).to_string()
}

pub fn is_valid_document_id(id: &str) -> bool {
    Regex::new(DOCUMENT_ID_PATTERN)
        .map(|pattern| pattern.is_match(id))
        .unwrap_or(false)
}

/// Extracts and chunks one document. Zero chunks means there was no usable
/// text, which is reported as [`IngestError::EmptyText`].
pub fn prepare_chunks(
    document_id: &str,
    bytes: &[u8],
    extractor: &dyn PdfExtractor,
    config: ChunkingConfig,
) -> Result<Vec<String>, IngestError> {
    let text = extractor.extract_text(bytes)?;
    let chunks = chunk_text(&text, config)?;

    if chunks.is_empty() {
        return Err(IngestError::EmptyText(document_id.to_string()));
    }

    debug!(
        document_id,
        text_chars = text.chars().count(),
        chunk_count = chunks.len(),
        "document chunked"
    );
    Ok(chunks)
}
