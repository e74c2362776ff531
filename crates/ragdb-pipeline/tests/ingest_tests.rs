mod common;

use std::sync::Arc;

use ragdb_core::cancel::CancellationToken;
use ragdb_core::config::{IndexSettings, RagSettings};
use ragdb_core::error::RagError;
use ragdb_core::query::Query;
use ragdb_core::traits::VectorStoreAdapter as _;
use ragdb_core::types::{Document, DocumentStatus, HealthStatus};

use common::*;

#[tokio::test]
async fn long_document_yields_four_overlapping_chunks() {
    let pipeline = pipeline(&["docs"]).await;
    let text = words("w", 3000);
    let report = pipeline.ingest(Document::new("long", text.clone()), None, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.index, "docs");
    assert_eq!(report.version, 1);
    assert_eq!(report.chunks.len(), 4);
    assert_eq!(report.status(), DocumentStatus::Complete);
    assert!(report.chunks.iter().all(|c| c.embedded && c.stored && c.error.is_none()));

    let lineage = pipeline.document_status("long").unwrap();
    assert_eq!(lineage.version, 1);
    assert_eq!(lineage.chunk_count(), 4);
    assert_eq!(lineage.content_hash, blake3::hash(text.as_bytes()).to_hex().to_string());
}

#[tokio::test]
async fn reingestion_supersedes_previous_chunks() {
    let pipeline = pipeline(&["docs"]).await;
    let cancel = CancellationToken::new();
    pipeline.ingest(Document::new("doc", words("old", 3000)), None, &cancel).await.unwrap();

    let report = pipeline.ingest(Document::new("doc", words("new", 900)), None, &cancel).await.unwrap();
    assert_eq!(report.version, 2);
    assert_eq!(report.chunks.len(), 1);
    assert_eq!(report.superseded, 3);

    let lineage = pipeline.document_status("doc").unwrap();
    assert_eq!(lineage.chunks_by_index["docs"], vec!["doc:0".to_string()]);

    let target = pipeline.registry().get("docs").unwrap();
    let query_vec = pipeline.embedder().embed_query("old1 old2", &cancel).await.unwrap();
    let remaining = target.store.search("docs", &query_vec, 100, None).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].chunk.text, words("new", 900));
}

#[tokio::test]
async fn content_type_routing_picks_the_index() {
    let mut settings = settings();
    settings.ingestion.routing.insert("code".to_string(), "code".to_string());
    let pipeline = pipeline_with(settings, &["docs", "code"]).await;
    let cancel = CancellationToken::new();

    let code = pipeline
        .ingest(Document::new("lib", "fn main() { println!(\"hi\"); }").with_content_type("code"), None, &cancel)
        .await
        .unwrap();
    assert_eq!(code.index, "code");
    let prose = pipeline.ingest(Document::new("readme", "plain prose"), None, &cancel).await.unwrap();
    assert_eq!(prose.index, "docs");
    let explicit = pipeline.ingest(Document::new("forced", "plain prose"), Some("code"), &cancel).await.unwrap();
    assert_eq!(explicit.index, "code");
}

#[tokio::test]
async fn unknown_index_and_empty_id_are_rejected() {
    let pipeline = pipeline(&["docs"]).await;
    let cancel = CancellationToken::new();
    let err = pipeline.ingest(Document::new("a", "text"), Some("missing"), &cancel).await.unwrap_err();
    assert!(matches!(err, RagError::NotFound(_)));
    let err = pipeline.ingest(Document::new("  ", "text"), None, &cancel).await.unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn empty_document_is_complete_with_no_chunks() {
    let pipeline = pipeline(&["docs"]).await;
    let report = pipeline.ingest(Document::new("blank", "   \n"), None, &CancellationToken::new()).await.unwrap();
    assert!(report.chunks.is_empty());
    assert_eq!(report.status(), DocumentStatus::Complete);
}

#[tokio::test]
async fn failed_upsert_batch_reports_partial_document() {
    let mut settings = settings();
    settings.ingestion.upsert_batch_size = 1;
    let pipeline = pipeline_with(settings, &[]).await;
    let mut store = FaultyStore::new();
    store.fail_upsert_for = Some("doc:1".to_string());
    let store = Arc::new(store);
    pipeline.register_index(spec("docs"), memory_backend(), store.clone(), None).await.unwrap();

    let cancel = CancellationToken::new();
    let report = pipeline.ingest(Document::new("doc", words("w", 3000)), None, &cancel).await.unwrap();
    assert_eq!(report.status(), DocumentStatus::Partial);
    assert_eq!(report.stored_count(), 3);
    let failed = report.chunks.iter().find(|c| !c.stored).unwrap();
    assert_eq!(failed.chunk_id, "doc:1");
    assert!(failed.embedded);
    assert!(failed.error.as_deref().unwrap_or_default().contains("rejected"));
    // Four single-record batches, the failing one retried once.
    assert_eq!(store.upsert_calls(), 5);

    assert_eq!(report.clone().into_result().unwrap_err(), RagError::PartialFailure { succeeded: 3, failed: 1 });
    let lineage = pipeline.document_status("doc").unwrap();
    assert_eq!(lineage.status, DocumentStatus::Partial);
    assert_eq!(lineage.chunk_count(), 3);
}

#[tokio::test]
async fn unavailable_backend_writes_nothing() {
    let pipeline = pipeline(&[]).await;
    let store = Arc::new(FaultyStore::new());
    store.set_health(HealthStatus::Unavailable("disk offline".to_string()));
    pipeline.register_index(spec("docs"), memory_backend(), store.clone(), None).await.unwrap();

    let err = pipeline.ingest(Document::new("doc", "some text"), None, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, RagError::Provider(ref m) if m.contains("disk offline")));
    assert_eq!(store.upsert_calls(), 0);
    assert!(pipeline.document_status("doc").is_err());
}

#[tokio::test]
async fn cancelled_ingest_returns_cancelled() {
    let pipeline = pipeline(&["docs"]).await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = pipeline.ingest(Document::new("doc", "text"), None, &cancel).await.unwrap_err();
    assert_eq!(err, RagError::Cancelled);
    assert!(pipeline.document_status("doc").is_err());
}

#[tokio::test]
async fn cancel_mid_upsert_keeps_stored_batches_in_lineage() {
    let mut settings = settings();
    settings.ingestion.upsert_batch_size = 1;
    let pipeline = pipeline_with(settings, &[]).await;
    let cancel = CancellationToken::new();
    let mut store = FaultyStore::new();
    store.cancel_after_upsert = Some(cancel.clone());
    let store = Arc::new(store);
    pipeline.register_index(spec("docs"), memory_backend(), store.clone(), None).await.unwrap();

    let err = pipeline.ingest(Document::new("doc", words("w", 3000)), None, &cancel).await.unwrap_err();
    assert_eq!(err, RagError::Cancelled);
    assert_eq!(store.upsert_calls(), 1);

    let lineage = pipeline.document_status("doc").unwrap();
    assert_eq!(lineage.status, DocumentStatus::Partial);
    assert_eq!(lineage.chunks_by_index["docs"], vec!["doc:0".to_string()]);
    assert_eq!(lineage.version_in("docs"), Some(1));

    assert_eq!(pipeline.delete_document("doc").await.unwrap(), 1);
    assert_eq!(store.inner.len("docs"), 0);
}

#[tokio::test]
async fn lineage_tracks_the_version_each_index_serves() {
    let pipeline = pipeline(&["alpha", "beta"]).await;
    let cancel = CancellationToken::new();
    pipeline.ingest(Document::new("d", "apples orchard harvest"), Some("alpha"), &cancel).await.unwrap();
    let second = pipeline.ingest(Document::new("d", "pears orchard harvest"), Some("beta"), &cancel).await.unwrap();
    assert_eq!(second.version, 2);
    assert_eq!(second.superseded, 0);

    let lineage = pipeline.document_status("d").unwrap();
    assert_eq!(lineage.version, 2);
    assert_eq!(lineage.version_in("alpha"), Some(1));
    assert_eq!(lineage.version_in("beta"), Some(2));

    pipeline.ingest(Document::new("d", "pears orchard harvest"), Some("alpha"), &cancel).await.unwrap();
    let lineage = pipeline.document_status("d").unwrap();
    assert_eq!(lineage.version_in("alpha"), Some(3));
    assert_eq!(lineage.version_in("beta"), Some(2));
}

#[tokio::test]
async fn delete_document_removes_chunks_from_every_index() {
    let pipeline = pipeline(&["notes", "archive"]).await;
    let cancel = CancellationToken::new();
    let unique = "zebra quartz xylophone";
    pipeline.ingest(Document::new("rare", unique), Some("notes"), &cancel).await.unwrap();
    pipeline.ingest(Document::new("rare", unique), Some("archive"), &cancel).await.unwrap();
    pipeline.ingest(Document::new("other", "ordinary garden vegetables"), Some("notes"), &cancel).await.unwrap();

    let lineage = pipeline.document_status("rare").unwrap();
    assert_eq!(lineage.version, 2);
    assert_eq!(lineage.chunks_by_index.len(), 2);

    let before = pipeline.query(&Query::new(unique).with_threshold(0.99), &cancel).await.unwrap();
    assert_eq!(before.len(), 1);

    assert_eq!(pipeline.delete_document("rare").await.unwrap(), 2);
    let after = pipeline.query(&Query::new(unique).with_threshold(0.99), &cancel).await.unwrap();
    assert!(after.is_empty());
    assert!(!after.from_cache);

    let hybrid = pipeline
        .query(&Query::new(unique).with_hybrid(ragdb_core::types::HybridWeights::new(0.0, 1.0).unwrap()), &cancel)
        .await
        .unwrap();
    assert!(hybrid.hits.iter().all(|h| h.chunk.doc_id != "rare"));

    assert!(matches!(pipeline.document_status("rare"), Err(RagError::NotFound(_))));
    assert!(matches!(pipeline.delete_document("rare").await, Err(RagError::NotFound(_))));
    assert!(pipeline.document_status("other").is_ok());
}

#[tokio::test]
async fn ingest_many_keeps_input_order() {
    let pipeline = pipeline(&["docs"]).await;
    let docs: Vec<Document> = (0..6).map(|i| Document::new(format!("d{i}"), format!("document number {i}"))).collect();
    let results = pipeline.ingest_many(docs, &CancellationToken::new()).await;
    assert_eq!(results.len(), 6);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.as_ref().unwrap().doc_id, format!("d{i}"));
    }
    assert_eq!(pipeline.documents().len(), 6);
}

#[tokio::test]
async fn reopened_pipeline_keeps_catalog_and_vectors() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings: RagSettings = settings();
    settings.storage.data_dir = dir.path().to_string_lossy().to_string();
    settings.indexes = vec![IndexSettings {
        name: "docs".to_string(),
        backend: memory_backend().with_connection(serde_json::json!({ "path": "vectors/docs.json" })),
    }];
    let cancel = CancellationToken::new();

    {
        let pipeline = ragdb_pipeline::RagPipeline::open(settings.clone()).await.unwrap();
        pipeline.ingest(Document::new("kept", "lighthouse keeper logbook"), None, &cancel).await.unwrap();
    }

    let reopened = ragdb_pipeline::RagPipeline::open(settings).await.unwrap();
    assert_eq!(reopened.list_indexes().len(), 1);
    assert_eq!(reopened.document_status("kept").unwrap().version, 1);
    let result = reopened.query(&Query::new("lighthouse keeper logbook").with_threshold(0.9), &cancel).await.unwrap();
    assert_eq!(result.chunk_ids(), vec!["kept:0"]);
    assert!(dir.path().join("catalog.json").exists());
}
