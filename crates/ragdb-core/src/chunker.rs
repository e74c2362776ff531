//! Document chunking.
//!
//! All sizes are measured in characters (Unicode scalar values). Chunking is a
//! pure function of `(text, content_type, ChunkingConfig)`: the same input
//! always yields the same spans, so re-ingesting unchanged documents reproduces
//! the same chunk ids.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RagError, Result};
use crate::types::{Chunk, ContentType, Document, TextSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkStrategy {
    Fixed,
    #[default]
    Semantic,
    #[serde(alias = "code_aware", alias = "code")]
    CodeAware,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Semantic => "semantic",
            Self::CodeAware => "code-aware",
        }
    }
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub strategy: ChunkStrategy,
    pub max_size: usize,
    pub overlap: usize,
    /// A trailing chunk shorter than this is merged into its predecessor.
    pub min_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { strategy: ChunkStrategy::Semantic, max_size: 1000, overlap: 200, min_size: 100 }
    }
}

impl ChunkingConfig {
    pub fn fixed(max_size: usize, overlap: usize) -> Self {
        Self { strategy: ChunkStrategy::Fixed, max_size, overlap, ..Self::default() }.clamp_min()
    }

    pub fn semantic(max_size: usize, overlap: usize) -> Self {
        Self { strategy: ChunkStrategy::Semantic, max_size, overlap, ..Self::default() }.clamp_min()
    }

    pub fn code_aware(max_size: usize, overlap: usize) -> Self {
        Self { strategy: ChunkStrategy::CodeAware, max_size, overlap, ..Self::default() }.clamp_min()
    }

    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    // Keep the default minimum valid for small windows.
    fn clamp_min(mut self) -> Self {
        self.min_size = self.min_size.min(self.max_size / 10);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(RagError::config("chunking.max_size must be > 0"));
        }
        if self.max_size <= self.overlap {
            return Err(RagError::config(format!(
                "chunking.max_size ({}) must be greater than chunking.overlap ({})",
                self.max_size, self.overlap
            )));
        }
        if self.min_size > self.max_size {
            return Err(RagError::config(format!(
                "chunking.min_size ({}) must not exceed chunking.max_size ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Character range `[start, end)` into the source text.
type Range = (usize, usize);

/// A validated chunker. Invalid size/overlap combinations never get this far.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split `text` into spans. Empty or whitespace-only text yields no spans.
    pub fn chunk_text(&self, text: &str, content_type: &ContentType) -> Vec<TextSpan> {
        self.split(text, content_type).1
    }

    /// Chunk a document, attaching inherited and chunk-local metadata.
    pub fn chunk(&self, doc: &Document) -> Vec<Chunk> {
        let (used, spans) = self.split(&doc.text, &doc.content_type);
        spans
            .into_iter()
            .enumerate()
            .map(|(ordinal, span)| {
                let mut metadata = doc.metadata.clone();
                metadata.entry("content_type".to_string()).or_insert_with(|| doc.content_type.as_str().into());
                metadata.entry("chunk_strategy".to_string()).or_insert_with(|| used.as_str().into());
                Chunk {
                    id: Chunk::chunk_id(&doc.id, ordinal),
                    doc_id: doc.id.clone(),
                    ordinal,
                    text: span.text,
                    start_char: span.start_char,
                    end_char: span.end_char,
                    start_byte: span.start_byte,
                    end_byte: span.end_byte,
                    metadata,
                }
            })
            .collect()
    }

    fn split(&self, text: &str, content_type: &ContentType) -> (ChunkStrategy, Vec<TextSpan>) {
        let source = CharIndex::new(text);
        if text.trim().is_empty() {
            return (self.config.strategy, Vec::new());
        }
        let (used, ranges) = match self.config.strategy {
            ChunkStrategy::Fixed => (ChunkStrategy::Fixed, self.fixed(0, source.len())),
            ChunkStrategy::Semantic => (ChunkStrategy::Semantic, self.semantic(&source)),
            ChunkStrategy::CodeAware => {
                let blocks = if content_type.is_code() { code_blocks(&source) } else { None };
                match blocks {
                    Some(blocks) => (ChunkStrategy::CodeAware, self.pack(&source, &blocks, false)),
                    None => (ChunkStrategy::Semantic, self.semantic(&source)),
                }
            }
        };
        let ranges = merge_short_tail(ranges, self.config.min_size);
        let spans = ranges
            .into_iter()
            .filter(|&(s, e)| e > s && !source.is_blank(s, e))
            .map(|(s, e)| source.span(s, e))
            .collect();
        (used, spans)
    }

    /// Sliding window; consecutive windows share exactly `overlap` characters.
    fn fixed(&self, start: usize, end: usize) -> Vec<Range> {
        let mut out = Vec::new();
        if start >= end {
            return out;
        }
        let step = self.config.max_size - self.config.overlap;
        let mut s = start;
        loop {
            let e = (s + self.config.max_size).min(end);
            out.push((s, e));
            if e == end {
                break;
            }
            s += step;
        }
        out
    }

    fn semantic(&self, source: &CharIndex<'_>) -> Vec<Range> {
        let sentences = sentence_units(source);
        self.pack(source, &sentences, true)
    }

    /// Greedily pack consecutive units into chunks of at most `max_size`
    /// (trimmed). Oversized units are force-split with the fixed window. With
    /// `carry_overlap`, a new chunk starts with the trailing units of the
    /// previous one that fit within `overlap`.
    fn pack(&self, source: &CharIndex<'_>, units: &[Range], carry_overlap: bool) -> Vec<Range> {
        let max = self.config.max_size;
        let mut out: Vec<Range> = Vec::new();
        let mut current: Vec<Range> = Vec::new();

        for &unit in units {
            let (us, ue) = source.trim(unit.0, unit.1);
            if ue - us > max {
                if let Some(r) = flush(source, &current) {
                    out.push(r);
                }
                current.clear();
                out.extend(self.fixed(us, ue));
                continue;
            }
            if let Some(first_start) = current.first().map(|r| r.0) {
                if source.trimmed_len(first_start, unit.1) > max {
                    if let Some(r) = flush(source, &current) {
                        out.push(r);
                    }
                    let keep_from =
                        if carry_overlap { self.overlap_start(source, &current, unit.1) } else { current.len() };
                    current.drain(..keep_from);
                }
            }
            current.push(unit);
        }
        if let Some(r) = flush(source, &current) {
            out.push(r);
        }
        out
    }

    /// Index of the first unit of the longest proper suffix of `current` that
    /// fits in `overlap` and still leaves room for the unit ending at `next_end`.
    fn overlap_start(&self, source: &CharIndex<'_>, current: &[Range], next_end: usize) -> usize {
        let Some(last) = current.last() else {
            return 0;
        };
        let mut keep_from = current.len();
        for j in (1..current.len()).rev() {
            let fits_overlap = source.trimmed_len(current[j].0, last.1) <= self.config.overlap;
            let fits_next = source.trimmed_len(current[j].0, next_end) <= self.config.max_size;
            if fits_overlap && fits_next {
                keep_from = j;
            } else {
                break;
            }
        }
        keep_from
    }
}

fn flush(source: &CharIndex<'_>, units: &[Range]) -> Option<Range> {
    let (first, last) = (units.first()?, units.last()?);
    let (s, e) = source.trim(first.0, last.1);
    (e > s).then_some((s, e))
}

fn merge_short_tail(mut ranges: Vec<Range>, min_size: usize) -> Vec<Range> {
    if ranges.len() >= 2 {
        if let Some(&(s, e)) = ranges.last() {
            if e - s < min_size {
                ranges.pop();
                if let Some(prev) = ranges.last_mut() {
                    prev.1 = prev.1.max(e);
                }
            }
        }
    }
    ranges
}

/// Sentences tile the text: each unit runs from the start of a sentence to the
/// start of the next (trailing whitespace included), so no text is lost.
fn sentence_units(source: &CharIndex<'_>) -> Vec<Range> {
    let chars = &source.chars;
    let n = chars.len();
    let mut bounds = vec![0usize];
    let mut i = 0;
    while i < n {
        let c = chars[i];
        if matches!(c, '.' | '!' | '?' | '。' | '！' | '？') {
            let mut j = i + 1;
            while j < n && matches!(chars[j], '"' | '\'' | ')' | ']' | '”' | '’') {
                j += 1;
            }
            if j < n && chars[j].is_whitespace() {
                while j < n && chars[j].is_whitespace() {
                    j += 1;
                }
                push_bound(&mut bounds, j, n);
                i = j;
                continue;
            }
        } else if c == '\n' {
            let mut j = i;
            let mut newlines = 0;
            while j < n && chars[j].is_whitespace() {
                if chars[j] == '\n' {
                    newlines += 1;
                }
                j += 1;
            }
            if newlines >= 2 {
                push_bound(&mut bounds, j, n);
            }
            i = j.max(i + 1);
            continue;
        }
        i += 1;
    }
    bounds.push(n);
    bounds.windows(2).filter(|w| w[1] > w[0]).map(|w| (w[0], w[1])).collect()
}

fn push_bound(bounds: &mut Vec<usize>, at: usize, n: usize) {
    if at < n && bounds.last().is_some_and(|&b| at > b) {
        bounds.push(at);
    }
}

const CODE_MARKERS: &[&str] = &[
    "fn ", "pub fn ", "pub(crate) fn ", "async fn ", "pub async fn ", "const fn ", "pub const fn ",
    "unsafe fn ", "impl ", "impl<", "struct ", "pub struct ", "pub(crate) struct ", "enum ",
    "pub enum ", "trait ", "pub trait ", "mod ", "pub mod ", "macro_rules! ", "class ",
    "def ", "async def ", "function ", "async function ", "export function ",
    "export async function ", "export default ", "export class ", "export interface ", "func ",
    "interface ", "public class ", "public interface ", "public static ", "abstract class ",
];

/// Attribute, decorator and doc-comment lines stay with the item below them.
const CODE_PREFIXES: &[&str] = &["#[", "@", "///", "/**", " *"];

/// Top-level structural blocks; the first block is any preamble. `None` when
/// no line opens a structural item.
fn code_blocks(source: &CharIndex<'_>) -> Option<Vec<Range>> {
    let chars = &source.chars;
    let mut line_starts = vec![0usize];
    for (i, &c) in chars.iter().enumerate() {
        if c == '\n' && i + 1 < chars.len() {
            line_starts.push(i + 1);
        }
    }
    let line_text = |idx: usize| -> String {
        let start = line_starts[idx];
        let end = line_starts.get(idx + 1).copied().unwrap_or(chars.len());
        chars[start..end].iter().collect()
    };

    let mut bounds = vec![0usize];
    let mut found = false;
    for idx in 0..line_starts.len() {
        let line = line_text(idx);
        if !CODE_MARKERS.iter().any(|m| line.starts_with(m)) {
            continue;
        }
        found = true;
        let mut start_line = idx;
        while start_line > 0 {
            let prev = line_text(start_line - 1);
            if CODE_PREFIXES.iter().any(|p| prev.starts_with(p)) {
                start_line -= 1;
            } else {
                break;
            }
        }
        let at = line_starts[start_line];
        if bounds.last().is_some_and(|&b| at > b) {
            bounds.push(at);
        }
    }
    if !found {
        return None;
    }
    bounds.push(chars.len());
    Some(bounds.windows(2).filter(|w| w[1] > w[0]).map(|w| (w[0], w[1])).collect())
}

/// Character view over a string with a char -> byte offset table.
struct CharIndex<'a> {
    text: &'a str,
    chars: Vec<char>,
    bytes: Vec<usize>,
}

impl<'a> CharIndex<'a> {
    fn new(text: &'a str) -> Self {
        let mut chars = Vec::with_capacity(text.len());
        let mut bytes = Vec::with_capacity(text.len() + 1);
        for (b, c) in text.char_indices() {
            bytes.push(b);
            chars.push(c);
        }
        bytes.push(text.len());
        Self { text, chars, bytes }
    }

    fn len(&self) -> usize {
        self.chars.len()
    }

    fn is_blank(&self, s: usize, e: usize) -> bool {
        self.chars[s..e].iter().all(|c| c.is_whitespace())
    }

    fn trim(&self, mut s: usize, mut e: usize) -> Range {
        while s < e && self.chars[s].is_whitespace() {
            s += 1;
        }
        while e > s && self.chars[e - 1].is_whitespace() {
            e -= 1;
        }
        (s, e)
    }

    fn trimmed_len(&self, s: usize, e: usize) -> usize {
        let (s, e) = self.trim(s, e);
        e - s
    }

    fn span(&self, s: usize, e: usize) -> TextSpan {
        let (start_byte, end_byte) = (self.bytes[s], self.bytes[e]);
        TextSpan { text: self.text[start_byte..end_byte].to_string(), start_char: s, end_char: e, start_byte, end_byte }
    }
}
