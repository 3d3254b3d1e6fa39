use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_openai::types::CreateEmbeddingRequestArgs;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::Mutex;
use tracing::debug;

use crate::utils::config::{AppConfig, EmbeddingBackend};
use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::system_settings::SystemSettings},
};
/// Generates an embedding vector for the given input text using OpenAI's embedding model.
///
/// This function takes a text input and converts it into a numerical vector representation (embedding)
/// using OpenAI's text-embedding-3-small model. These embeddings can be used for semantic similarity
/// comparisons, vector search, and other natural language processing tasks.
///
/// # Arguments
///
/// * `client`: The OpenAI client instance used to make API requests.
/// * `input`: The text string to generate embeddings for.
///
/// # Returns
///
/// Returns a `Result` containing either:
/// * `Ok(Vec<f32>)`: A vector of 32-bit floating point numbers representing the text embedding
/// * `Err(ProcessingError)`: An error if the embedding generation fails
///
/// # Errors
///
/// This function can return a `AppError` in the following cases:
/// * If the OpenAI API request fails
/// * If the request building fails
/// * If no embedding data is received in the response
pub async fn generate_embedding(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    input: &str,
    db: &SurrealDbClient,
) -> Result<Vec<f32>, AppError> {
    let model = SystemSettings::get_current(db).await?;

    let request = CreateEmbeddingRequestArgs::default()
        .model(model.embedding_model)
        .dimensions(model.embedding_dimensions)
        .input([input])
        .build()?;

    // Send the request to OpenAI
    let response = client.embeddings().create(request).await?;

    // Extract the embedding vector
    let embedding: Vec<f32> = response
        .data
        .first()
        .ok_or_else(|| AppError::LLMParsing("No embedding data received".into()))?
        .embedding
        .clone();

    Ok(embedding)
}

/// Generates an embedding vector using a specific model and dimension.
///
/// This is used for the re-embedding process where the model and dimensions
/// are known ahead of time and shouldn't be repeatedly fetched from settings.
pub async fn generate_embedding_with_params(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    input: &str,
    model: &str,
    dimensions: u32,
) -> Result<Vec<f32>, AppError> {
    let request = CreateEmbeddingRequestArgs::default()
        .model(model)
        .input([input])
        .dimensions(dimensions)
        .build()?;

    let response = client.embeddings().create(request).await?;

    let embedding = response
        .data
        .first()
        .ok_or_else(|| AppError::LLMParsing("No embedding data received from API".into()))?
        .embedding
        .clone();

    debug!(
        "Embedding was created with {:?} dimensions",
        embedding.len()
    );

    Ok(embedding)
}

/// Resolves a free-form config model name onto a concrete `fastembed` model.
/// Unknown names fall back to the small BGE model rather than erroring, since
/// the name is advisory until a model registry exists.
fn resolve_fastembed_model(name: &str) -> EmbeddingModel {
    match name {
        "BAAI/bge-small-en-v1.5" | "bge-small" => EmbeddingModel::BGESmallENV15,
        "BAAI/bge-base-en-v1.5" | "bge-base" => EmbeddingModel::BGEBaseENV15,
        "BAAI/bge-large-en-v1.5" | "bge-large" => EmbeddingModel::BGELargeENV15,
        "sentence-transformers/all-MiniLM-L6-v2" | "minilm-l6" => EmbeddingModel::AllMiniLML6V2,
        _ => EmbeddingModel::BGESmallENV15,
    }
}

enum Backend {
    FastEmbed {
        model: Mutex<TextEmbedding>,
        model_name: String,
    },
    OpenAi {
        client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        model: String,
    },
    /// Dependency-free deterministic embedder used only by `new_hashed` (tests).
    Hashed,
}

/// Strict LRU cache keyed by `(model name, exact text)`, matching §4.8's cache
/// contract: invalidated wholesale on model switch, evicted strictly by
/// recency at a configured capacity.
struct LruCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, Vec<f32>>,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<Vec<f32>> {
        if let Some(value) = self.entries.get(key).cloned() {
            self.touch(key);
            Some(value)
        } else {
            None
        }
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    fn insert(&mut self, key: String, value: Vec<f32>) {
        if self.entries.contains_key(&key) {
            self.entries.insert(key.clone(), value);
            self.touch(&key);
            return;
        }
        if self.capacity == 0 {
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}

/// Lazily-loaded embedding backend shared across the process: wraps either a
/// local `fastembed` model or the OpenAI embeddings API behind one
/// `embed`/`embed_batch` contract, with a cache keyed by `(model, text)`.
///
/// Model switching (re-deriving dimension, wiping vector collections) is the
/// Embedding Manager's concern, layered on top of this type in
/// `retrieval-pipeline`; this type only tracks the currently loaded model.
pub struct EmbeddingProvider {
    backend: Backend,
    dimension: usize,
    cache: Mutex<LruCache>,
}

impl EmbeddingProvider {
    /// Builds a provider from application configuration. For the `FastEmbed`
    /// backend this eagerly loads the model (the "first embed call loads the
    /// model" contract is satisfied at construction time here since the Frame
    /// needs the dimension up front to sync `SystemSettings`).
    pub async fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<async_openai::Client<async_openai::config::OpenAIConfig>>>,
    ) -> Result<Self, AppError> {
        match config.embedding_backend {
            EmbeddingBackend::FastEmbed => {
                let model_name = config.embed.model.clone();
                let fastembed_model = resolve_fastembed_model(&model_name);
                let dimension = fastembed_model_dimension(&fastembed_model);
                let model = TextEmbedding::try_new(InitOptions::new(fastembed_model))
                    .map_err(|e| AppError::InternalError(format!("fastembed load failed: {e}")))?;

                Ok(Self {
                    backend: Backend::FastEmbed {
                        model: Mutex::new(model),
                        model_name,
                    },
                    dimension,
                    cache: Mutex::new(LruCache::new(config.embed.cache_size)),
                })
            }
            EmbeddingBackend::OpenAi => {
                let client = openai_client.ok_or_else(|| {
                    AppError::InternalError(
                        "openai embedding backend selected but no client was provided".into(),
                    )
                })?;
                Ok(Self {
                    backend: Backend::OpenAi {
                        client,
                        model: config.embed.model.clone(),
                    },
                    dimension: 1536,
                    cache: Mutex::new(LruCache::new(config.embed.cache_size)),
                })
            }
        }
    }

    /// A deterministic, dependency-free embedder for tests: hashes the input
    /// into a fixed-size pseudo-random unit vector. Never used outside
    /// `#[cfg(test)]` call sites.
    pub fn new_hashed(dimension: usize) -> Result<Self, AppError> {
        if dimension == 0 {
            return Err(AppError::Validation(
                "hashed embedding dimension must be nonzero".into(),
            ));
        }
        Ok(Self {
            backend: Backend::Hashed,
            dimension,
            cache: Mutex::new(LruCache::new(1024)),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn backend_label(&self) -> &str {
        match &self.backend {
            Backend::FastEmbed { model_name, .. } => model_name.as_str(),
            Backend::OpenAi { model, .. } => model.as_str(),
            Backend::Hashed => "hashed-test-embedder",
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let cache_key = format!("{}\u{0}{}", self.backend_label(), text);
        if let Some(cached) = self.cache.lock().await.get(&cache_key) {
            return Ok(cached);
        }

        let vector = match &self.backend {
            Backend::Hashed => hashed_embedding(text, self.dimension),
            Backend::FastEmbed { model, .. } => {
                let mut model = model.lock().await;
                let mut embeddings = model
                    .embed(vec![text.to_string()], None)
                    .map_err(|e| AppError::InternalError(format!("fastembed error: {e}")))?;
                embeddings.pop().ok_or_else(|| {
                    AppError::InternalError("fastembed returned no embedding".into())
                })?
            }
            Backend::OpenAi { client, model } => {
                generate_embedding_with_params(client, text, model, self.dimension as u32).await?
            }
        };

        self.cache.lock().await.insert(cache_key, vector.clone());
        Ok(vector)
    }

    /// Embeds many texts, preserving input order. Implementations should
    /// prefer the model's native batching; the `fastembed`/OpenAI backends
    /// both accept a batch directly rather than looping over `embed`.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batch_size = batch_size.max(1);
        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size) {
            for text in chunk {
                results.push(self.embed(text).await?);
            }
        }
        Ok(results)
    }

    /// Drops every cached vector. Called whenever the loaded model changes.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }
}

/// Resolves the vector dimension a `(backend, model_name)` pair would produce,
/// without loading the model — used by the Embedding Manager's model-switch
/// contract to decide whether a switch needs a collection wipe before
/// actually committing to it.
pub fn resolve_model_dimension(backend: EmbeddingBackend, model_name: &str) -> usize {
    match backend {
        EmbeddingBackend::FastEmbed => fastembed_model_dimension(&resolve_fastembed_model(model_name)),
        EmbeddingBackend::OpenAi => 1536,
    }
}

fn fastembed_model_dimension(model: &EmbeddingModel) -> usize {
    match model {
        EmbeddingModel::BGESmallENV15 => 384,
        EmbeddingModel::BGEBaseENV15 => 768,
        EmbeddingModel::BGELargeENV15 => 1024,
        EmbeddingModel::AllMiniLML6V2 => 384,
        _ => 384,
    }
}

/// Deterministic pseudo-embedding: feeds a rolling hash of the text into each
/// dimension, then L2-normalizes. Only used by `EmbeddingProvider::new_hashed`.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut state: u64 = 1469598103934665603;
    let mut vector = vec![0.0f32; dimension];
    for (i, byte) in text.bytes().enumerate() {
        state ^= u64::from(byte);
        state = state.wrapping_mul(1099511628211);
        let idx = i % dimension;
        #[allow(clippy::cast_precision_loss)]
        let signed = ((state % 2000) as f32 - 1000.0) / 1000.0;
        if let Some(slot) = vector.get_mut(idx) {
            *slot += signed;
        }
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for slot in &mut vector {
            *slot /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashed_embeddings_are_deterministic_and_normalized() {
        let provider = EmbeddingProvider::new_hashed(32).expect("provider");
        let a = provider.embed("hello world").await.expect("embed");
        let b = provider.embed("hello world").await.expect("embed");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3 || norm == 0.0);
    }

    #[tokio::test]
    async fn distinct_inputs_produce_distinct_vectors() {
        let provider = EmbeddingProvider::new_hashed(16).expect("provider");
        let a = provider.embed("alpha").await.expect("embed");
        let b = provider.embed("beta").await.expect("embed");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn embed_batch_preserves_order() {
        let provider = EmbeddingProvider::new_hashed(8).expect("provider");
        let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let vectors = provider.embed_batch(&texts, 2).await.expect("batch");
        assert_eq!(vectors.len(), 3);
        for (text, vector) in texts.iter().zip(vectors.iter()) {
            let direct = provider.embed(text).await.expect("embed");
            assert_eq!(*vector, direct);
        }
    }

    #[test]
    fn lru_cache_evicts_oldest_entry_at_capacity() {
        let mut cache = LruCache::new(2);
        cache.insert("a".into(), vec![1.0]);
        cache.insert("b".into(), vec![2.0]);
        cache.insert("c".into(), vec![3.0]);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }
}
