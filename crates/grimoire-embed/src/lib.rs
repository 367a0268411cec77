//! Process-wide embedding service: deterministic text -> 384-dim vector,
//! backed by a locally-loaded `fastembed` model rather than a remote API.
//!
//! The first call to [`EmbeddingService::instance`] pays the one-time cost
//! of loading the model; every later call returns the same instance. This
//! mirrors the lazy-singleton shape of an HTTP-backed classifier cache,
//! generalized to an offline model.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use grimoire_domain::error::{Error, Result};

pub const DIMENSION: usize = 384;
const CACHE_MAX_ENTRIES: usize = 10_000;

static INSTANCE: OnceLock<OnceCell<Arc<EmbeddingService>>> = OnceLock::new();

fn cell() -> &'static OnceCell<Arc<EmbeddingService>> {
    INSTANCE.get_or_init(OnceCell::new)
}

/// Lazily initializes (on first call) and returns the process-wide
/// embedding service singleton.
pub async fn instance() -> Result<Arc<EmbeddingService>> {
    cell()
        .get_or_try_init(|| async {
            tracing::info!("loading embedding model all-MiniLM-L6-v2");
            let model = tokio::task::spawn_blocking(|| {
                TextEmbedding::try_new(
                    InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false),
                )
            })
            .await
            .map_err(|err| Error::Other(format!("embedding model init task panicked: {err}")))?
            .map_err(|err| Error::Other(format!("failed to load embedding model: {err}")))?;
            Ok::<_, Error>(Arc::new(EmbeddingService {
                model: Mutex::new(model),
                cache: Mutex::new(HashMap::new()),
            }))
        })
        .await
        .cloned()
}

struct CachedEmbedding {
    vector: Vec<f32>,
}

/// A deterministic, offline, 384-dim text embedding service.
pub struct EmbeddingService {
    model: Mutex<TextEmbedding>,
    cache: Mutex<HashMap<u64, CachedEmbedding>>,
}

impl EmbeddingService {
    /// Embeds a single piece of text. Empty strings and arbitrary Unicode
    /// are accepted; the same input always yields a bit-identical vector.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = hash_text(text);
        if let Some(cached) = self.cache.lock().get(&key) {
            return Ok(cached.vector.clone());
        }
        let mut vectors = self
            .model
            .lock()
            .embed(vec![text.to_string()], None)
            .map_err(|err| Error::Other(format!("embedding failed: {err}")))?;
        let vector = vectors.pop().ok_or_else(|| Error::Other("embedding model returned no vector".into()))?;

        let mut cache = self.cache.lock();
        if cache.len() >= CACHE_MAX_ENTRIES {
            cache.clear();
        }
        cache.insert(key, CachedEmbedding { vector: vector.clone() });
        Ok(vector)
    }

    /// Embeds each element of `texts` independently, preserving order.
    /// An empty input yields an empty output.
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

fn hash_text(text: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
