//! Recursive character chunker.
//!
//! Text is cut at the coarsest boundary that yields pieces no longer than
//! `chunk_size` characters: paragraphs first, then lines, sentences, words, and
//! finally single characters. Adjacent pieces are then merged back into chunks,
//! carrying up to `chunk_overlap` characters of trailing context into the next
//! chunk. Sizes are measured in `char`s, never bytes.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Splits `text` into overlapping chunks. Blank input yields no chunks.
///
/// The output only depends on `text` and `config`.
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    config.validate()?;

    let mut chunks = Vec::new();
    if text.trim().is_empty() {
        return Ok(chunks);
    }

    split_recursive(text, &SEPARATORS, config, &mut chunks);
    Ok(chunks)
}

fn split_recursive(text: &str, separators: &[&str], config: ChunkingConfig, out: &mut Vec<String>) {
    let position = separators
        .iter()
        .position(|separator| separator.is_empty() || text.contains(separator))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let finer = separators.get(position + 1..).unwrap_or(&[]);

    let pieces: Vec<&str> = if separator.is_empty() {
        split_chars(text)
    } else {
        text.split_inclusive(separator).collect()
    };

    let mut fitting = Vec::new();
    for piece in pieces {
        if char_len(piece) <= config.chunk_size {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            merge_pieces(&fitting, config, out);
            fitting.clear();
        }

        if finer.is_empty() {
            merge_pieces(&split_chars(piece), config, out);
        } else {
            split_recursive(piece, finer, config, out);
        }
    }

    if !fitting.is_empty() {
        merge_pieces(&fitting, config, out);
    }
}

fn merge_pieces(pieces: &[&str], config: ChunkingConfig, out: &mut Vec<String>) {
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);

        if total + len > config.chunk_size && !window.is_empty() {
            push_chunk(&window, out);

            while total > config.chunk_overlap || (total > 0 && total + len > config.chunk_size) {
                match window.pop_front() {
                    Some((_, dropped)) => total -= dropped,
                    None => break,
                }
            }
        }

        window.push_back((piece, len));
        total += len;
    }

    if !window.is_empty() {
        push_chunk(&window, out);
    }
}

fn push_chunk(window: &VecDeque<(&str, usize)>, out: &mut Vec<String>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn split_chars(text: &str) -> Vec<&str> {
    text.char_indices()
        .map(|(index, ch)| &text[index..index + ch.len_utf8()])
        .collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
