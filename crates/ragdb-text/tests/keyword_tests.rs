use tempfile::TempDir;

use ragdb_core::traits::KeywordIndex;
use ragdb_core::types::Chunk;
use ragdb_text::TantivyKeywordIndex;

fn chunk(doc: &str, ordinal: usize, text: &str) -> Chunk {
    Chunk {
        id: Chunk::chunk_id(doc, ordinal),
        doc_id: doc.to_string(),
        ordinal,
        text: text.to_string(),
        start_char: 0,
        end_char: text.chars().count(),
        start_byte: 0,
        end_byte: text.len(),
        metadata: Default::default(),
    }
}

#[test]
fn indexes_and_ranks_by_term_frequency() {
    let idx = TantivyKeywordIndex::in_memory().unwrap();
    idx.index(&[
        chunk("a", 0, "Paris is the capital of France. Paris is large."),
        chunk("b", 0, "Berlin is the capital of Germany."),
        chunk("c", 0, "Bananas are yellow fruit."),
    ])
    .unwrap();

    let hits = idx.search("Paris", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.id, "a:0");
    assert_eq!(hits[0].chunk.text, "Paris is the capital of France. Paris is large.");

    let hits = idx.search("capital", 10).unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].score >= hits[1].score);
}

#[test]
fn reindexing_same_id_replaces_document() {
    let idx = TantivyKeywordIndex::in_memory().unwrap();
    idx.index(&[chunk("a", 0, "old wording about rivers")]).unwrap();
    idx.index(&[chunk("a", 0, "new wording about mountains")]).unwrap();

    assert_eq!(idx.num_docs(), 1);
    assert!(idx.search("rivers", 5).unwrap().is_empty());
    assert_eq!(idx.search("mountains", 5).unwrap().len(), 1);
}

#[test]
fn delete_removes_hits_and_ignores_unknown_ids() {
    let idx = TantivyKeywordIndex::in_memory().unwrap();
    idx.index(&[chunk("a", 0, "solar panels"), chunk("a", 1, "solar batteries")]).unwrap();
    idx.delete(&["a:0".to_string(), "missing:9".to_string()]).unwrap();

    let hits = idx.search("solar", 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.id, "a:1");
}

#[test]
fn malformed_query_and_zero_k_do_not_error() {
    let idx = TantivyKeywordIndex::in_memory().unwrap();
    idx.index(&[chunk("a", 0, "water filtration basics")]).unwrap();
    assert!(idx.search("water", 0).unwrap().is_empty());
    assert!(idx.search("   ", 5).unwrap().is_empty());
    assert!(idx.search("water AND (", 5).is_ok());
}

#[test]
fn on_disk_index_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let idx = TantivyKeywordIndex::open(tmp.path()).unwrap();
        idx.index(&[chunk("doc", 0, "compost heap temperature")]).unwrap();
    }
    let idx = TantivyKeywordIndex::open(tmp.path()).unwrap();
    assert_eq!(idx.search("compost", 3).unwrap().len(), 1);
}
