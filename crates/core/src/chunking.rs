use crate::error::IngestError;
use crate::models::{RagConfig, TextChunk};
use sha2::{Digest, Sha256};

/// Boundary separators in order of preference: paragraph, line, sentence, word.
const SEPARATORS: [&[&str]; 4] = [&["\n\n"], &["\n"], &[". ", "? ", "! "], &[" ", "\t"]];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            chunk_overlap: 1_000,
        }
    }
}

impl From<&RagConfig> for ChunkingConfig {
    fn from(value: &RagConfig) -> Self {
        Self {
            chunk_size: value.chunk_size,
            chunk_overlap: value.chunk_overlap,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
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

/// Splits `text` into chunks of at most `chunk_size` characters.
///
/// Each chunk after the first starts exactly `chunk_overlap` characters before
/// the end of its predecessor. Chunk ends are placed on the latest natural
/// separator inside the window, falling back to a hard cut.
pub fn split_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    if chars.is_empty() {
        return Ok(pieces);
    }

    let mut start = 0usize;
    loop {
        if chars.len() - start <= config.chunk_size {
            pieces.push(chars[start..].iter().collect());
            break;
        }

        let lower = start + config.chunk_overlap;
        let upper = start + config.chunk_size;
        let end = SEPARATORS
            .iter()
            .find_map(|group| last_boundary(&chars, lower, upper, group))
            .unwrap_or(upper);

        pieces.push(chars[start..end].iter().collect());
        start = end - config.chunk_overlap;
    }

    Ok(pieces)
}

/// Latest position `end` with `lower < end <= upper` that directly follows one of `separators`.
fn last_boundary(chars: &[char], lower: usize, upper: usize, separators: &[&str]) -> Option<usize> {
    let patterns: Vec<Vec<char>> = separators
        .iter()
        .map(|separator| separator.chars().collect())
        .collect();

    (lower + 1..=upper).rev().find(|&end| {
        patterns
            .iter()
            .any(|pattern| end >= pattern.len() && chars[end - pattern.len()..end] == pattern[..])
    })
}

pub fn build_chunks(text: &str, config: ChunkingConfig) -> Result<Vec<TextChunk>, IngestError> {
    let chunks = split_text(text, config)?
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            let index = index as u64;
            TextChunk {
                chunk_id: make_chunk_id(index, &text),
                index,
                text,
            }
        })
        .collect();

    Ok(chunks)
}

fn make_chunk_id(index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
