use ragdb_core::chunker::{ChunkStrategy, Chunker, ChunkingConfig};
use ragdb_core::error::RagError;
use ragdb_core::types::{ContentType, Document};

fn letters(n: usize) -> String {
    (0..n).map(|i| char::from(b'a' + (i % 26) as u8)).collect()
}

#[test]
fn fixed_window_shares_exact_overlap() {
    let chunker = Chunker::new(ChunkingConfig::fixed(1000, 200)).expect("config");
    let text = letters(3000);
    let spans = chunker.chunk_text(&text, &ContentType::Text);

    assert_eq!(spans.len(), 4);
    for pair in spans.windows(2) {
        assert_eq!(pair[0].end_char - pair[1].start_char, 200, "consecutive chunks overlap by 200 chars");
    }
    assert!(spans.iter().all(|s| s.char_len() <= 1000));
    assert_eq!(spans.last().map(|s| s.end_char), Some(3000));
}

#[test]
fn empty_and_blank_text_yield_no_chunks() {
    let chunker = Chunker::new(ChunkingConfig::default()).expect("config");
    assert!(chunker.chunk_text("", &ContentType::Text).is_empty());
    assert!(chunker.chunk_text("  \n\t  \n", &ContentType::Text).is_empty());
    assert!(chunker.chunk(&Document::new("d", "")).is_empty());
}

#[test]
fn overlap_not_below_max_is_configuration_error() {
    let err = Chunker::new(ChunkingConfig::fixed(100, 100)).expect_err("must reject");
    assert!(matches!(err, RagError::Configuration(_)));
    let err = Chunker::new(ChunkingConfig::semantic(100, 150)).expect_err("must reject");
    assert!(err.is_configuration());
    assert!(Chunker::new(ChunkingConfig::fixed(0, 0)).is_err());
}

#[test]
fn chunking_is_deterministic() {
    let text = "First sentence here. Second one follows! Does a third exist? Yes.\n\nNew paragraph with more words. "
        .repeat(40);
    let doc = Document::new("doc-1", text).with_content_type("markdown");
    let chunker = Chunker::new(ChunkingConfig::semantic(300, 60)).expect("config");
    assert_eq!(chunker.chunk(&doc), chunker.chunk(&doc));
}

#[test]
fn semantic_packs_whole_sentences_within_max() {
    let text = "The quick brown fox jumps over the lazy dog today. ".repeat(20);
    let chunker = Chunker::new(ChunkingConfig::semantic(120, 0).with_min_size(0)).expect("config");
    let spans = chunker.chunk_text(&text, &ContentType::Text);

    assert!(spans.len() > 1);
    for span in &spans {
        assert!(span.char_len() <= 120, "chunk too long: {}", span.char_len());
        assert!(span.text.ends_with('.'), "chunk should end on a sentence boundary: {:?}", span.text);
    }
}

#[test]
fn semantic_overlap_repeats_trailing_sentences() {
    let text = "Alpha sentence number one. Bravo sentence number two. Charlie sentence three. Delta sentence four.";
    let chunker = Chunker::new(ChunkingConfig::semantic(60, 30).with_min_size(0)).expect("config");
    let spans = chunker.chunk_text(text, &ContentType::Text);

    assert!(spans.len() >= 2);
    for pair in spans.windows(2) {
        assert!(pair[1].start_char < pair[0].end_char, "next chunk starts inside the previous one");
    }
}

#[test]
fn semantic_force_splits_oversized_sentence() {
    let text = letters(500);
    let chunker = Chunker::new(ChunkingConfig::semantic(100, 20)).expect("config");
    let spans = chunker.chunk_text(&text, &ContentType::Text);

    assert!(spans.len() >= 5);
    assert!(spans.iter().all(|s| s.char_len() <= 100));
    assert_eq!(spans.first().map(|s| s.start_char), Some(0));
    assert_eq!(spans.last().map(|s| s.end_char), Some(500));
}

#[test]
fn code_aware_splits_on_top_level_items() {
    let source = "\
/// Adds numbers.
fn add(a: i32, b: i32) -> i32 {
    a + b
}

fn sub(a: i32, b: i32) -> i32 {
    a - b - 0 - 0 - 0 - 0
}

#[inline]
pub fn mul(a: i32, b: i32) -> i32 {
    a * b * 1 * 1 * 1
}
";
    let doc = Document::new("lib.rs", source).with_content_type("code");
    let chunker = Chunker::new(ChunkingConfig::code_aware(80, 0).with_min_size(0)).expect("config");
    let chunks = chunker.chunk(&doc);

    assert_eq!(chunks.len(), 3);
    assert!(chunks[0].text.starts_with("/// Adds numbers."));
    assert!(chunks[1].text.starts_with("fn sub"));
    assert!(chunks[2].text.starts_with("#[inline]"));
    assert_eq!(chunks[0].metadata.get("chunk_strategy"), Some(&serde_json::json!("code-aware")));
}

#[test]
fn single_item_file_stays_code_aware() {
    let source = "fn main() {\n    println!(\"one\");\n}\n";
    let doc = Document::new("main.rs", source).with_content_type("code");
    let chunker = Chunker::new(ChunkingConfig::code_aware(200, 0).with_min_size(0)).expect("config");
    let chunks = chunker.chunk(&doc);

    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].text.starts_with("fn main()"));
    assert_eq!(chunks[0].metadata.get("chunk_strategy"), Some(&serde_json::json!("code-aware")));
}

#[test]
fn code_aware_falls_back_to_semantic_for_prose() {
    let doc = Document::new("notes", "Plain prose. Nothing structural here. ".repeat(10));
    let chunker = Chunker::new(ChunkingConfig::code_aware(100, 10)).expect("config");
    let chunks = chunker.chunk(&doc);

    assert!(!chunks.is_empty());
    assert_eq!(chunker.config().strategy, ChunkStrategy::CodeAware);
    assert!(chunks.iter().all(|c| c.metadata.get("chunk_strategy") == Some(&serde_json::json!("semantic"))));
}

#[test]
fn short_tail_merges_into_previous_chunk() {
    let chunker = Chunker::new(ChunkingConfig::fixed(100, 0).with_min_size(30)).expect("config");
    let spans = chunker.chunk_text(&letters(220), &ContentType::Text);

    assert_eq!(spans.len(), 2);
    assert_eq!(spans[1].start_char, 100);
    assert_eq!(spans[1].end_char, 220);
}

#[test]
fn offsets_address_source_text() {
    let text = "Héllo wörld, ça va? Ünïcödé text keeps byte offsets honest. Ok.";
    let chunker = Chunker::new(ChunkingConfig::fixed(20, 5).with_min_size(0)).expect("config");
    for span in chunker.chunk_text(text, &ContentType::Text) {
        assert_eq!(&text[span.start_byte..span.end_byte], span.text);
        assert_eq!(span.text.chars().count(), span.char_len());
    }
}

#[test]
fn chunks_inherit_document_metadata_and_ids() {
    let doc = Document::new("report", "One sentence. Two sentences.")
        .with_metadata("category", "finance")
        .with_metadata("year", 2024);
    let chunker = Chunker::new(ChunkingConfig::default()).expect("config");
    let chunks = chunker.chunk(&doc);

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].id, "report:0");
    assert_eq!(chunks[0].doc_id, "report");
    assert_eq!(chunks[0].metadata.get("category"), Some(&serde_json::json!("finance")));
    assert_eq!(chunks[0].metadata.get("year"), Some(&serde_json::json!(2024)));
    assert_eq!(chunks[0].metadata.get("content_type"), Some(&serde_json::json!("text")));
}
