use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ragdb_core::cache::{CacheStore, EmbeddingCache, TtlLruCache};
use ragdb_core::cancel::CancellationToken;
use ragdb_core::config::{EmbeddingSettings, RetrySettings};
use ragdb_core::error::{RagError, Result};
use ragdb_core::traits::EmbedProvider;
use ragdb_core::types::{IndexSpec, Metric};
use ragdb_embed::{open_provider, EmbedOutcome, EmbeddingService, HashEmbedder};

const DIM: usize = 16;

/// Hash embedder that counts calls and fails batches containing "poison".
struct ScriptedProvider {
    inner: HashEmbedder,
    calls: AtomicUsize,
    texts_seen: AtomicUsize,
    fail_first: usize,
    delay: Duration,
    out_dim: usize,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self {
            inner: HashEmbedder::new(DIM).unwrap(),
            calls: AtomicUsize::new(0),
            texts_seen: AtomicUsize::new(0),
            fail_first: 0,
            delay: Duration::ZERO,
            out_dim: DIM,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbedProvider for ScriptedProvider {
    fn embedder_id(&self) -> &str {
        "scripted:d16"
    }
    fn dim(&self) -> usize {
        DIM
    }
    fn max_len(&self) -> usize {
        512
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts_seen.fetch_add(texts.len(), Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if n < self.fail_first {
            return Err(RagError::Provider("transient".into()));
        }
        if texts.iter().any(|t| t.contains("poison")) {
            return Err(RagError::Provider("rejected input".into()));
        }
        Ok(texts.iter().map(|t| {
            let mut v = self.inner.embed_one(t);
            v.resize(self.out_dim, 0.0);
            v
        }).collect())
    }
}

struct BrokenCache;

impl CacheStore<String, Arc<Vec<f32>>> for BrokenCache {
    fn get(&self, _key: &String) -> Option<Arc<Vec<f32>>> {
        None
    }
    fn put(&self, _key: String, _value: Arc<Vec<f32>>) -> Result<()> {
        Err(RagError::Io("disk full".into()))
    }
    fn invalidate_all(&self) {}
}

fn settings(batch_size: usize) -> EmbeddingSettings {
    EmbeddingSettings {
        dimensionality: DIM,
        batch_size,
        max_concurrency: 2,
        timeout_ms: 1_000,
        retry: RetrySettings { max_attempts: 3, initial_backoff_ms: 1, max_backoff_ms: 5 },
        ..EmbeddingSettings::default()
    }
}

fn cache() -> Arc<EmbeddingCache> {
    Arc::new(TtlLruCache::new(1_000, Duration::from_secs(60)))
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn outputs_align_with_inputs_on_miss_and_hit_paths() {
    let provider = Arc::new(ScriptedProvider::new());
    let svc = EmbeddingService::new(provider.clone(), cache(), settings(2)).unwrap();
    let inputs = texts(&["alpha", "bravo", "charlie", "delta", "echo"]);
    let token = CancellationToken::new();

    let first = svc.embed_texts(&inputs, None, &token).await.unwrap();
    let calls_after_first = provider.calls();
    assert_eq!(calls_after_first, 3, "five misses in batches of two");

    let second = svc.embed_texts(&inputs, None, &token).await.unwrap();
    assert_eq!(provider.calls(), calls_after_first, "second call is served from cache");

    let reference = HashEmbedder::new(DIM).unwrap();
    for (i, text) in inputs.iter().enumerate() {
        let expected = reference.embed_one(text);
        assert_eq!(first[i].vector(), Some(expected.as_slice()));
        assert_eq!(second[i], first[i]);
    }
}

#[tokio::test]
async fn duplicate_texts_are_embedded_once() {
    let provider = Arc::new(ScriptedProvider::new());
    let svc = EmbeddingService::new(provider.clone(), cache(), settings(8)).unwrap();
    let inputs = texts(&["same", "same", "other", "same"]);
    let out = svc.embed_texts(&inputs, None, &CancellationToken::new()).await.unwrap();

    assert_eq!(provider.texts_seen.load(Ordering::SeqCst), 2);
    assert_eq!(out[0], out[1]);
    assert_eq!(out[0], out[3]);
    assert_ne!(out[0], out[2]);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let provider = Arc::new(ScriptedProvider { fail_first: 2, ..ScriptedProvider::new() });
    let svc = EmbeddingService::new(provider.clone(), cache(), settings(8)).unwrap();
    let out = svc.embed_texts(&texts(&["one", "two"]), None, &CancellationToken::new()).await.unwrap();

    assert!(out.iter().all(EmbedOutcome::is_embedded));
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn exhausted_batch_fails_only_its_chunks() {
    let provider = Arc::new(ScriptedProvider::new());
    let svc = EmbeddingService::new(provider.clone(), cache(), settings(2)).unwrap();
    let inputs = texts(&["fine one", "fine two", "poison pill", "fine three"]);
    let out = svc.embed_texts(&inputs, None, &CancellationToken::new()).await.unwrap();

    assert!(out[0].is_embedded());
    assert!(out[1].is_embedded());
    assert!(matches!(out[2], EmbedOutcome::Failed(RagError::Provider(_))));
    assert!(matches!(out[3], EmbedOutcome::Failed(RagError::Provider(_))), "same batch as the poisoned text");
    // 1 call for the good batch + 3 attempts for the poisoned one.
    assert_eq!(provider.calls(), 4);
}

#[tokio::test]
async fn target_dimension_mismatch_is_an_error() {
    let svc = EmbeddingService::new(Arc::new(ScriptedProvider::new()), cache(), settings(4)).unwrap();
    let spec = IndexSpec::new("wide", DIM * 2, Metric::Cosine).unwrap();
    let err = svc.embed_texts(&texts(&["x"]), Some(&spec), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { expected: 32, actual: 16, .. }));
}

#[tokio::test]
async fn provider_returning_wrong_width_is_an_error() {
    let provider = Arc::new(ScriptedProvider { out_dim: DIM - 1, ..ScriptedProvider::new() });
    let svc = EmbeddingService::new(provider, cache(), settings(4)).unwrap();
    let err = svc.embed_texts(&texts(&["x"]), None, &CancellationToken::new()).await.unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn configured_dimension_must_match_provider() {
    let mut cfg = settings(4);
    cfg.dimensionality = 384;
    assert!(EmbeddingService::new(Arc::new(ScriptedProvider::new()), cache(), cfg).is_err());
}

#[tokio::test]
async fn cache_write_failure_does_not_fail_embedding() {
    let svc = EmbeddingService::new(Arc::new(ScriptedProvider::new()), Arc::new(BrokenCache), settings(4)).unwrap();
    let out = svc.embed_query("still works", &CancellationToken::new()).await.unwrap();
    assert_eq!(out.len(), DIM);
}

#[tokio::test]
async fn cancellation_aborts_in_flight_calls() {
    let provider = Arc::new(ScriptedProvider { delay: Duration::from_secs(30), ..ScriptedProvider::new() });
    let svc = EmbeddingService::new(provider, cache(), settings(4)).unwrap();
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        child.cancel();
    });
    let err = svc.embed_texts(&texts(&["slow"]), None, &token).await.unwrap_err();
    assert_eq!(err, RagError::Cancelled);
}

#[tokio::test]
async fn hash_provider_is_deterministic_and_normalized() {
    let provider = open_provider(&EmbeddingSettings { dimensionality: 64, ..EmbeddingSettings::default() }).unwrap();
    assert_eq!(provider.embedder_id(), "hash:d64");
    let out = provider.embed_batch(&texts(&["Hello world", "hello WORLD!"])).await.unwrap();
    let norm: f32 = out[0].iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-4);
    assert_eq!(out[0], out[1], "case and punctuation are ignored");
}

#[test]
fn unknown_provider_is_configuration_error() {
    let err = open_provider(&EmbeddingSettings { provider: "cloud".into(), ..EmbeddingSettings::default() });
    assert!(matches!(err, Err(RagError::Configuration(_))));
}
