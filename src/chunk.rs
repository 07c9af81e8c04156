//! Sliding-window text chunker.
//!
//! Each [`Section`] of a document is split into word windows bounded by
//! `max_tokens` (approximated as four characters per token), with the last
//! `overlap_tokens` worth of words repeated at the start of the next window.
//! Windows never span sections, so every chunk carries a single section title.
//!
//! Chunk indices are contiguous from 0 across the whole document. Each chunk
//! receives a deterministic UUID derived from its document ID, the document's
//! content hash and its index, plus a SHA-256 hash of its text. Re-chunking
//! unchanged bytes yields the same ids; any content change yields new ones.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Document, Section};

/// Approximate chars-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Namespace for chunk ids (UUIDv5 of `"{document_id}:{content_hash}:{index}"`).
const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x1b7e_55a2_0c3d_4f8e_a9b1_7c2d_6e4f_3a10);

/// Split a document's sections into chunks.
pub fn chunk_document(doc: &Document, sections: &[Section], config: &ChunkingConfig) -> Vec<Chunk> {
    let max_chars = (config.max_tokens * CHARS_PER_TOKEN).max(1);
    let overlap_chars = config.overlap_tokens * CHARS_PER_TOKEN;

    let mut chunks = Vec::new();
    for section in sections {
        for window in split_windows(&section.text, max_chars, overlap_chars) {
            let index = chunks.len() as i64;
            chunks.push(make_chunk(doc, index, section.title.clone(), window));
        }
    }
    chunks
}

/// Chunk id for one version of a document.
pub fn chunk_id(document_id: &str, content_hash: &str, index: i64) -> String {
    Uuid::new_v5(
        &CHUNK_NAMESPACE,
        format!("{}:{}:{}", document_id, content_hash, index).as_bytes(),
    )
    .to_string()
}

/// Word windows of at most `max_chars` characters.
fn split_windows(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let words: Vec<String> = text
        .split_whitespace()
        .flat_map(|w| hard_split(w, max_chars))
        .collect();
    let lens: Vec<usize> = words.iter().map(|w| w.chars().count()).collect();

    let mut windows = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let mut end = start;
        let mut len = 0;
        while end < words.len() {
            let next = if end == start {
                lens[end]
            } else {
                len + 1 + lens[end]
            };
            if next > max_chars && end > start {
                break;
            }
            len = next;
            end += 1;
        }
        windows.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }

        // Step back over trailing words for the overlap, always advancing by one.
        let mut back = end;
        let mut overlap = 0;
        while back > start + 1 {
            let w = lens[back - 1];
            let next = if overlap == 0 { w } else { overlap + 1 + w };
            if next > overlap_chars {
                break;
            }
            overlap = next;
            back -= 1;
        }
        start = back;
    }
    windows
}

fn hard_split(word: &str, max_chars: usize) -> Vec<String> {
    if word.chars().count() <= max_chars {
        return vec![word.to_string()];
    }
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(max_chars)
        .map(|piece| piece.iter().collect())
        .collect()
}

fn make_chunk(doc: &Document, index: i64, section_title: Option<String>, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id(&doc.id, &doc.content_hash, index),
        document_id: doc.id.clone(),
        document_path: doc.path.clone(),
        doc_type: doc.doc_type,
        chunk_index: index,
        section_title,
        text,
        hash,
    }
}
