use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Redis
    pub redis_url: String,

    // Embedding provider (OpenAI-compatible)
    pub embed_api_key: String,
    pub embed_base_url: String,
    pub embed_model: String,
    pub embedding_dimension: usize,

    // Vector index
    pub index_path: String,

    // Web server
    pub api_host: String,
    pub api_port: u16,

    // Recommendation parameters
    pub top_k: usize,
    pub cache_expiry_hours: u64,
    pub snapshot_reload_hours: u64,
    pub nightly_interval_hours: u64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            redis_url: required_env("REDIS_URL"),
            embed_api_key: required_env("EMBED_API_KEY"),
            embed_base_url: env::var("EMBED_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            embed_model: env::var("EMBED_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            embedding_dimension: parsed_env("EMBEDDING_DIMENSION", 384),
            index_path: env::var("INDEX_PATH").unwrap_or_else(|_| "models/index.bin".to_string()),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .expect("API_PORT must be a number"),
            top_k: parsed_env("TOP_K", 50),
            cache_expiry_hours: parsed_env("CACHE_EXPIRY_HOURS", 24),
            snapshot_reload_hours: parsed_env("SNAPSHOT_RELOAD_HOURS", 1),
            nightly_interval_hours: parsed_env("NIGHTLY_INTERVAL_HOURS", 24),
        }
    }

    pub fn cache_expiry_secs(&self) -> u64 {
        self.cache_expiry_hours * 3600
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}
