use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

/// Which embedding backend the Embedding Manager should load lazily on first use.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    FastEmbed,
    OpenAi,
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        EmbeddingBackend::FastEmbed
    }
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Auto,
    Cpu,
    Cuda,
    Mps,
}

impl Default for DeviceKind {
    fn default() -> Self {
        DeviceKind::Auto
    }
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkMethod {
    Fixed,
    Sentence,
    Semantic,
}

impl Default for ChunkMethod {
    fn default() -> Self {
        ChunkMethod::Sentence
    }
}

/// Governs which OCR workers a `ROUTE_BY_QUALITY` image route resolves to (§4.5).
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OcrMode {
    Auto,
    PaddleOnly,
    QwenOnly,
}

impl Default for OcrMode {
    fn default() -> Self {
        OcrMode::Auto
    }
}

/// Selects how PDF text is pulled out during intake (§4.3/§4.6 extraction contract).
/// `Classic` trusts the embedded text layer only; `LlmFirst` falls back to the
/// vision-LLM worker pool when the text layer is empty or clearly garbled.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PdfIngestMode {
    Classic,
    LlmFirst,
}

impl Default for PdfIngestMode {
    fn default() -> Self {
        PdfIngestMode::LlmFirst
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct EmbedConfig {
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default)]
    pub device: DeviceKind,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_true")]
    pub normalize: bool,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model: default_embed_model(),
            device: DeviceKind::default(),
            batch_size: default_embed_batch_size(),
            cache_size: default_embed_cache_size(),
            normalize: true,
        }
    }
}

fn default_embed_model() -> String {
    "BAAI/bge-small-en-v1.5".to_string()
}
fn default_embed_batch_size() -> usize {
    32
}
fn default_embed_cache_size() -> usize {
    10_000
}
fn default_true() -> bool {
    true
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct ParseConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub chunk_method: ChunkMethod,
    #[serde(default = "default_spacy_model")]
    pub spacy_model: String,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            chunk_method: ChunkMethod::default(),
            spacy_model: default_spacy_model(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    64
}
fn default_spacy_model() -> String {
    "en_core_web_sm".to_string()
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct SearchConfig {
    #[serde(default = "default_semantic_weight")]
    pub default_semantic_weight: f32,
    #[serde(default = "default_keyword_weight")]
    pub default_keyword_weight: f32,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_semantic_weight: default_semantic_weight(),
            default_keyword_weight: default_keyword_weight(),
            rrf_k: default_rrf_k(),
        }
    }
}

fn default_semantic_weight() -> f32 {
    0.7
}
fn default_keyword_weight() -> f32 {
    0.3
}
fn default_rrf_k() -> u32 {
    60
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct AnomalyConfig {
    #[serde(default = "default_z_score_threshold")]
    pub z_score_threshold: f64,
    #[serde(default = "default_min_cluster_distance")]
    pub min_cluster_distance: f64,
    #[serde(default = "default_entropy_threshold_suspicious")]
    pub entropy_threshold_suspicious: f64,
    #[serde(default = "default_entropy_threshold_high")]
    pub entropy_threshold_high: f64,
    #[serde(default = "default_lsb_sample_size")]
    pub lsb_sample_size: usize,
    #[serde(default = "default_chi_square_threshold")]
    pub chi_square_threshold: f64,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            z_score_threshold: default_z_score_threshold(),
            min_cluster_distance: default_min_cluster_distance(),
            entropy_threshold_suspicious: default_entropy_threshold_suspicious(),
            entropy_threshold_high: default_entropy_threshold_high(),
            lsb_sample_size: default_lsb_sample_size(),
            chi_square_threshold: default_chi_square_threshold(),
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

fn default_z_score_threshold() -> f64 {
    3.0
}
fn default_min_cluster_distance() -> f64 {
    0.7
}
fn default_entropy_threshold_suspicious() -> f64 {
    7.2
}
fn default_entropy_threshold_high() -> f64 {
    7.8
}
fn default_lsb_sample_size() -> usize {
    4096
}
fn default_chi_square_threshold() -> f64 {
    0.95
}
fn default_max_file_size_mb() -> u64 {
    500
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct WorkerConfig {
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: default_lease_ttl_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            job_timeout_secs: default_job_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_lease_ttl_secs() -> u64 {
    30
}
fn default_heartbeat_interval_secs() -> u64 {
    10
}
fn default_job_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> i32 {
    3
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    /// Filesystem root for canonical ingested storage (`storage_path` in the spec's
    /// configuration table). Falls back to `data_dir` when unset.
    #[serde(default)]
    pub storage_path: Option<String>,
    /// Scratch directory for in-progress uploads before they move to canonical storage.
    #[serde(default = "default_temp_path")]
    pub temp_path: String,
    #[serde(default)]
    pub ocr_mode: OcrMode,
    #[serde(default)]
    pub pdf_ingest_mode: PdfIngestMode,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default)]
    pub embed: EmbedConfig,
    #[serde(default)]
    pub parse: ParseConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Maximum number of files accepted in a single intake batch (§4.3).
    #[serde(default = "default_ingest_max_files")]
    pub ingest_max_files: usize,
    /// Maximum accepted size, in bytes, of a single uploaded file's raw content.
    #[serde(default = "default_ingest_max_content_bytes")]
    pub ingest_max_content_bytes: usize,
    /// Maximum accepted size, in bytes, of the free-text `context` field on an intake request.
    #[serde(default = "default_ingest_max_context_bytes")]
    pub ingest_max_context_bytes: usize,
    /// Maximum accepted size, in bytes, of the `category` field on an intake request.
    #[serde(default = "default_ingest_max_category_bytes")]
    pub ingest_max_category_bytes: usize,
    /// Maximum accepted size, in bytes, of the whole multipart request body.
    #[serde(default = "default_ingest_max_body_bytes")]
    pub ingest_max_body_bytes: usize,
    /// Whether the shared `fastembed` reranker pool is loaded at all.
    #[serde(default = "default_true")]
    pub reranking_enabled: bool,
    /// Number of concurrent reranker engines kept warm in the pool.
    #[serde(default = "default_reranking_pool_size")]
    pub reranking_pool_size: usize,
    /// Override for where `fastembed` caches downloaded model weights.
    #[serde(default)]
    pub fastembed_cache_dir: Option<String>,
    #[serde(default)]
    pub fastembed_show_download_progress: bool,
    /// Max input token length the reranker truncates documents to.
    #[serde(default)]
    pub fastembed_max_length: Option<usize>,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_temp_path() -> String {
    "./data/tmp".to_string()
}

fn default_ingest_max_files() -> usize {
    50
}

fn default_ingest_max_content_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_ingest_max_context_bytes() -> usize {
    16 * 1024
}

fn default_ingest_max_category_bytes() -> usize {
    256
}

fn default_ingest_max_body_bytes() -> usize {
    512 * 1024 * 1024
}

fn default_reranking_pool_size() -> usize {
    2
}

impl AppConfig {
    /// Resolved canonical storage root, falling back to `data_dir` when `storage_path` is unset.
    pub fn storage_root(&self) -> &str {
        self.storage_path.as_deref().unwrap_or(&self.data_dir)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            surrealdb_address: "memory".to_string(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: "test".to_string(),
            surrealdb_database: "test".to_string(),
            data_dir: default_data_dir(),
            http_port: 8080,
            openai_base_url: default_base_url(),
            storage: StorageKind::Local,
            storage_path: None,
            temp_path: default_temp_path(),
            ocr_mode: OcrMode::default(),
            pdf_ingest_mode: PdfIngestMode::default(),
            embedding_backend: EmbeddingBackend::default(),
            embed: EmbedConfig::default(),
            parse: ParseConfig::default(),
            search: SearchConfig::default(),
            anomaly: AnomalyConfig::default(),
            worker: WorkerConfig::default(),
            ingest_max_files: default_ingest_max_files(),
            ingest_max_content_bytes: default_ingest_max_content_bytes(),
            ingest_max_context_bytes: default_ingest_max_context_bytes(),
            ingest_max_category_bytes: default_ingest_max_category_bytes(),
            ingest_max_body_bytes: default_ingest_max_body_bytes(),
            reranking_enabled: true,
            reranking_pool_size: default_reranking_pool_size(),
            fastembed_cache_dir: None,
            fastembed_show_download_progress: false,
            fastembed_max_length: None,
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    config.try_deserialize()
}
