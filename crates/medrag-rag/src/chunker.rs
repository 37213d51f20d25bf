//! Overlapping fixed-size document chunking
//!
//! Text is whitespace-normalized first, then walked in windows of at most
//! `chunk_size` chars. Each chunk after the first starts `chunk_overlap`
//! chars before the end of its predecessor, so dropping that prefix and
//! concatenating reconstructs the normalized text exactly.
//!
//! Inside a window the cut prefers, in order: a paragraph break, the end of
//! a sentence, any whitespace. Candidates are only taken from the back half
//! of the window and strictly past the overlap, so every step makes
//! progress. Without a candidate the window is cut hard at `chunk_size`.

use regex::Regex;
use std::sync::LazyLock;

use medrag_core::{Chunk, ChunkingConfig, Document, Result};

static INLINE_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\n]+").expect("valid regex"));
static SPACES_AROUND_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" ?\n ?").expect("valid regex"));
static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Splits documents into overlapping chunks
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    /// Create a chunker; fails with `InvalidConfig` unless `0 <= overlap < size`
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Split one document. Same input always yields the same chunks.
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = normalize_whitespace(&document.text);
        let chars: Vec<char> = text.chars().collect();
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let hard_end = (start + size).min(chars.len());
            let end = if hard_end == chars.len() {
                hard_end
            } else {
                let min_end = start + (overlap + 1).max(size / 2);
                find_boundary(&chars, min_end, hard_end).unwrap_or(hard_end)
            };

            let sequence = chunks.len();
            let mut metadata = document.source_metadata();
            metadata.insert("chunk_index".to_string(), sequence.to_string());

            chunks.push(Chunk {
                document_id: document.id.clone(),
                sequence,
                text: chars[start..end].iter().collect(),
                overlap: if sequence == 0 { 0 } else { overlap },
                metadata,
            });

            if end == chars.len() {
                break;
            }
            start = end - overlap;
        }

        chunks
    }
}

/// Chunk a document with explicit parameters
pub fn chunk(document: &Document, size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    let chunker = Chunker::new(ChunkingConfig::new(size, overlap)?)?;
    Ok(chunker.chunk(document))
}

/// Concatenate chunks of one document, dropping each chunk's overlap prefix
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    for chunk in chunks {
        text.extend(chunk.text.chars().skip(chunk.overlap));
    }
    text
}

/// Canonical whitespace form used before chunking.
///
/// CRLF/CR become LF, other whitespace runs collapse to one space, spaces
/// next to a newline are dropped, blank-line runs collapse to one blank line.
pub fn normalize_whitespace(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = INLINE_WHITESPACE.replace_all(&text, " ");
    let text = SPACES_AROUND_NEWLINE.replace_all(&text, "\n");
    let text = EXCESS_NEWLINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Strength of a cut placed before `chars[end]`
fn boundary_level(chars: &[char], end: usize) -> u8 {
    let before = chars[end - 1];
    if end >= 2 && before == '\n' && chars[end - 2] == '\n' {
        return 3;
    }
    if end >= 2 && before.is_whitespace() && matches!(chars[end - 2], '.' | '!' | '?') {
        return 2;
    }
    if before.is_whitespace() || chars.get(end).is_none_or(|c| c.is_whitespace()) {
        return 1;
    }
    0
}

/// Latest strongest cut in `min_end..=hard_end`
fn find_boundary(chars: &[char], min_end: usize, hard_end: usize) -> Option<usize> {
    let mut best: Option<(u8, usize)> = None;
    for end in (min_end..=hard_end).rev() {
        let level = boundary_level(chars, end);
        if level == 0 {
            continue;
        }
        if best.is_none_or(|(best_level, _)| level > best_level) {
            best = Some((level, end));
            if level == 3 {
                break;
            }
        }
    }
    best.map(|(_, end)| end)
}
