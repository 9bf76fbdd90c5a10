// Text Processing Service
// Normalization, word/sentence helpers and overlapping word-window chunking

use regex::Regex;
use std::sync::OnceLock;

use crate::models::TextChunk;

/// Windows shorter than this many words are dropped as low-signal fragments.
pub const MIN_CHUNK_WORDS: usize = 50;

/// Normalize punctuation and whitespace before analysis.
/// Smart quotes become ASCII so contraction checks see "don't" either way.
pub fn normalize_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let s: String = text
        .chars()
        .map(|c| match c {
            '\u{201c}' | '\u{201d}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{2014}' | '\u{2013}' => '-',
            '\u{3000}' | '\u{00A0}' => ' ',
            other => other,
        })
        .collect();

    // Collapse horizontal whitespace and strip each line
    let s = s.replace("\r\n", "\n").replace('\r', "\n");
    let s = horizontal_ws_re().replace_all(&s, " ");
    s.lines().map(str::trim).collect::<Vec<_>>().join("\n").trim().to_string()
}

fn horizontal_ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\S\n]+").expect("static pattern"))
}

/// Length used by the minimum-input gate (Unicode scalar count of the trimmed text).
pub fn char_len(text: &str) -> usize {
    text.trim().chars().count()
}

/// Whitespace-delimited words.
pub fn words(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// Word count without allocating the word list.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Period-delimited segments, empty pieces included.
pub fn split_on_periods(text: &str) -> Vec<&str> {
    text.split('.').collect()
}

// ============ Chunker ============

/// Splits text into overlapping word windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    min_words: usize,
}

impl Chunker {
    /// An overlap of `chunk_size` or more is clamped to `chunk_size - 1` so the stride stays positive.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
            min_words: MIN_CHUNK_WORDS.min(chunk_size),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Lazily yield chunks in source order.
    pub fn chunk<'a>(&self, text: &'a str) -> Chunks<'a> {
        let words = words(text);
        let single = if words.len() <= self.chunk_size && !words.is_empty() {
            Some(text)
        } else {
            None
        };
        Chunks {
            words,
            single,
            position: 0,
            chunker: *self,
            finished: false,
        }
    }
}

/// Finite, non-restartable chunk sequence produced by [`Chunker::chunk`].
#[derive(Debug)]
pub struct Chunks<'a> {
    words: Vec<&'a str>,
    single: Option<&'a str>,
    position: usize,
    chunker: Chunker,
    finished: bool,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = TextChunk;

    fn next(&mut self) -> Option<TextChunk> {
        if self.finished {
            return None;
        }

        // Short input: the whole text, untouched
        if let Some(text) = self.single.take() {
            self.finished = true;
            return Some(TextChunk {
                text: text.to_string(),
                start_word_index: 0,
                word_count: self.words.len(),
            });
        }

        while self.position < self.words.len() {
            let start = self.position;
            let end = (start + self.chunker.chunk_size).min(self.words.len());
            self.position += self.chunker.stride();

            if end - start >= self.chunker.min_words {
                return Some(TextChunk {
                    text: self.words[start..end].join(" "),
                    start_word_index: start,
                    word_count: end - start,
                });
            }
        }

        self.finished = true;
        None
    }
}
