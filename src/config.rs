//! Configuration passed into the indexer, retrieval engine, rating engine
//! and orchestrator at construction time.

use crate::error::CreditError;
use crate::rating::RatingThresholds;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Fragment sizing, in characters.
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    /// Extra characters the overlap may grow by to avoid starting mid-token.
    pub overlap_tolerance: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
            overlap_tolerance: 50,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(CreditError::ConfigError("chunk_size must be positive".into()));
        }
        if self.chunk_size <= 2 * (self.overlap + self.overlap_tolerance) {
            return Err(CreditError::ConfigError(format!(
                "chunk_size {} must exceed twice overlap + tolerance ({})",
                self.chunk_size,
                2 * (self.overlap + self.overlap_tolerance)
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Fragments returned per template query.
    pub top_k: usize,
    /// Hits scoring below this are dropped.
    pub min_similarity: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_similarity: 0.0,
        }
    }
}

/// Independent timeout per external call.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub market_data: Duration,
    pub news: Duration,
    pub embedding: Duration,
    pub language_model: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            market_data: Duration::from_secs(15),
            news: Duration::from_secs(15),
            embedding: Duration::from_secs(10),
            language_model: Duration::from_secs(60),
        }
    }
}

/// Character budgets for each section of the synthesis prompt.
#[derive(Debug, Clone)]
pub struct ContextLimits {
    pub news_chars: usize,
    pub section_chars: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            news_chars: 1000,
            section_chars: 1500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub timeouts: TimeoutConfig,
    pub context_limits: ContextLimits,
    pub news_window_days: i64,
    pub max_news_items: usize,
    /// Concurrent embedding calls per ingested document.
    pub embed_workers: usize,
    pub rating: RatingThresholds,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            timeouts: TimeoutConfig::default(),
            context_limits: ContextLimits::default(),
            news_window_days: 30,
            max_news_items: 5,
            embed_workers: 4,
            rating: RatingThresholds::default(),
        }
    }
}

impl AnalysisConfig {
    /// Defaults overridden by `CHUNK_SIZE`, `CHUNK_OVERLAP`, `TOP_K`,
    /// `MIN_SIMILARITY`, `NEWS_WINDOW_DAYS`, `EMBED_WORKERS` and
    /// `RATING_LADDER_PATH`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        config.chunking.chunk_size = env_or("CHUNK_SIZE", config.chunking.chunk_size)?;
        config.chunking.overlap = env_or("CHUNK_OVERLAP", config.chunking.overlap)?;
        config.retrieval.top_k = env_or("TOP_K", config.retrieval.top_k)?;
        config.retrieval.min_similarity =
            env_or("MIN_SIMILARITY", config.retrieval.min_similarity)?;
        config.news_window_days = env_or("NEWS_WINDOW_DAYS", config.news_window_days)?;
        config.embed_workers = env_or("EMBED_WORKERS", config.embed_workers)?;
        if config.embed_workers == 0 {
            return Err(CreditError::ConfigError("EMBED_WORKERS must be positive".into()));
        }

        if let Ok(path) = env::var("RATING_LADDER_PATH") {
            config.rating = RatingThresholds::from_json_file(&path)?;
        }

        config.chunking.validate()?;
        Ok(config)
    }
}

/// Credentials, endpoints and paths for the service binary.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub lakehouse_path: PathBuf,
    pub fragment_store_path: PathBuf,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub tavily_api_key: Option<String>,
    pub financial_api_base_url: Option<String>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => parse_value("PORT", &raw)?,
            Err(_) => 8080,
        };

        Ok(Self {
            port,
            database_url: non_empty_var("DATABASE_URL"),
            lakehouse_path: env::var("LAKEHOUSE_PATH")
                .unwrap_or_else(|_| "data/lakehouse/credit_analysis.jsonl".to_string())
                .into(),
            fragment_store_path: env::var("FRAGMENT_STORE_PATH")
                .unwrap_or_else(|_| "data/fragments/credit_documents.json".to_string())
                .into(),
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            embedding_dimension: env_or("EMBEDDING_DIMENSION", 384)?,
            tavily_api_key: non_empty_var("TAVILY_API_KEY"),
            financial_api_base_url: non_empty_var("FINANCIAL_API_BASE_URL")
                .or_else(|| non_empty_var("TOOLS_API_BASE_URL")),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| CreditError::ConfigError(format!("{} has invalid value '{}'", key, raw)))
}
