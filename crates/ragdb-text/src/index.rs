use parking_lot::Mutex;
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use ragdb_core::error::{RagError, Result};
use ragdb_core::traits::KeywordIndex;
use ragdb_core::types::{Chunk, ChunkId, KeywordHit};

use crate::schema::{build_schema, register_tokenizer};

const WRITER_MEMORY: usize = 20_000_000;

fn tv(e: impl std::fmt::Display) -> RagError {
    RagError::backend("tantivy", e)
}

/// Tantivy BM25 index over chunk text, one per vector index.
pub struct TantivyKeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id_field: Field,
    doc_id_field: Field,
    text_field: Field,
    payload_field: Field,
}

impl TantivyKeywordIndex {
    pub fn in_memory() -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    /// Open the index stored in `dir`, creating it when absent.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let directory = MmapDirectory::open(dir).map_err(tv)?;
        let index = Index::open_or_create(directory, build_schema()).map_err(tv)?;
        Self::from_index(index)
    }

    fn from_index(index: Index) -> Result<Self> {
        register_tokenizer(&index);
        let schema = index.schema();
        let field = |name: &str| schema.get_field(name).map_err(tv);
        let (id_field, doc_id_field, text_field, payload_field) =
            (field("id")?, field("doc_id")?, field("text")?, field("payload")?);
        let writer: IndexWriter = index.writer_with_num_threads(1, WRITER_MEMORY).map_err(tv)?;
        let reader: IndexReader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(tv)?;
        Ok(Self { index, reader, writer: Mutex::new(writer), id_field, doc_id_field, text_field, payload_field })
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    fn commit(&self, writer: &mut IndexWriter) -> Result<()> {
        writer.commit().map_err(tv)?;
        self.reader.reload().map_err(tv)
    }
}

impl KeywordIndex for TantivyKeywordIndex {
    fn index(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        for c in chunks {
            writer.delete_term(Term::from_field_text(self.id_field, &c.id));
            writer
                .add_document(doc!(
                    self.id_field => c.id.clone(),
                    self.doc_id_field => c.doc_id.clone(),
                    self.text_field => c.text.clone(),
                    self.payload_field => serde_json::to_string(c)?,
                ))
                .map_err(tv)?;
        }
        self.commit(&mut writer)?;
        tracing::debug!(chunks = chunks.len(), "keyword index updated");
        Ok(())
    }

    fn delete(&self, chunk_ids: &[ChunkId]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        for id in chunk_ids {
            writer.delete_term(Term::from_field_text(self.id_field, id));
        }
        self.commit(&mut writer)
    }

    fn search(&self, query: &str, k: usize) -> Result<Vec<KeywordHit>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let k = k.min(searcher.num_docs() as usize);
        if k == 0 {
            return Ok(Vec::new());
        }
        let parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        // Free-form user text: syntax errors degrade to best-effort terms.
        let (q, _errors) = parser.parse_query_lenient(query);
        let top_docs = searcher.search(&q, &TopDocs::with_limit(k)).map_err(tv)?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr).map_err(tv)?;
            let Some(payload) = doc.get_first(self.payload_field).and_then(|v| v.as_str()) else {
                continue;
            };
            let chunk: Chunk = serde_json::from_str(payload)?;
            hits.push(KeywordHit { chunk, score });
        }
        Ok(hits)
    }
}
