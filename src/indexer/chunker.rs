use serde::{Deserialize, Serialize};

use crate::config::ChunkingConfig;
use crate::error::{RagError, Result};

/// Raw document as handed over by the storage gateway.
#[derive(Debug, Clone)]
pub struct Document {
    pub source_id: String,
    pub raw_bytes: Vec<u8>,
}

impl Document {
    pub fn new(source_id: impl Into<String>, raw_bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source_id: source_id.into(),
            raw_bytes: raw_bytes.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_id: String,
    pub chunk_index: usize,
    /// Character offset of the chunk's first character in the decoded document.
    #[serde(default)]
    pub start_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Break candidates, strongest first. The chunk ends right after the separator.
const SEPARATORS: [&str; 9] = ["\n\n", "\n", "。", "？", "！", ". ", "? ", "! ", " "];

/// Splits documents into overlapping windows of at most `chunk_size` characters.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than zero".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Decodes the document and splits it. Fails only when the bytes are not UTF-8.
    pub fn split(&self, document: &Document) -> Result<Vec<Chunk>> {
        let text = std::str::from_utf8(&document.raw_bytes).map_err(|e| RagError::Decode {
            source_id: document.source_id.clone(),
            source: e,
        })?;
        Ok(self.split_text(&document.source_id, text))
    }

    pub fn split_text(&self, source_id: &str, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        // Byte offset of every char, plus the end of the text.
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_len = offsets.len() - 1;

        let make_chunk = |start: usize, end: usize, chunk_index: usize| Chunk {
            text: text[offsets[start]..offsets[end]].to_string(),
            metadata: ChunkMetadata {
                source_id: source_id.to_string(),
                chunk_index,
                start_offset: start,
            },
        };

        if char_len <= self.chunk_size {
            return vec![make_chunk(0, char_len, 0)];
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let max_end = (start + self.chunk_size).min(char_len);
            let end = if max_end < char_len {
                find_break_point(text, &offsets, start + self.chunk_overlap + 1, max_end)
            } else {
                max_end
            };

            chunks.push(make_chunk(start, end, chunks.len()));
            if end >= char_len {
                break;
            }

            // `end > start + overlap`, so the window always moves forward.
            start = end - self.chunk_overlap;
        }

        chunks
    }
}

/// Finds the last separator ending inside `[min_end, max_end]` (char positions)
/// and returns the char position right after it, or `max_end` for a hard cut.
fn find_break_point(text: &str, offsets: &[usize], min_end: usize, max_end: usize) -> usize {
    if min_end >= max_end {
        return max_end;
    }
    let base = offsets[min_end];
    let segment = &text[base..offsets[max_end]];

    for sentinel in SEPARATORS {
        if let Some(pos) = segment.rfind(sentinel) {
            let byte_end = base + pos + sentinel.len();
            if let Ok(char_end) = offsets.binary_search(&byte_end) {
                return char_end;
            }
        }
    }
    max_end
}
