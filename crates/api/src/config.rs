/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// Redis connection URL.
    pub redis_url: String,
    /// Converter executable invoked per job.
    pub converter_command: String,
    /// Extra arguments prepended before the document path.
    pub converter_args: Vec<String>,
    /// Field-extraction API endpoint.
    pub extractor_url: String,
    /// Bearer token for the extraction API, if it requires one.
    pub extractor_api_key: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var             | Default                            |
    /// |---------------------|------------------------------------|
    /// | `HOST`              | `0.0.0.0`                          |
    /// | `PORT`              | `8000`                             |
    /// | `CORS_ORIGINS`      | `http://localhost:5173`            |
    /// | `REDIS_URL`         | `redis://127.0.0.1:6379/0`         |
    /// | `CONVERTER_COMMAND` | `document-converter`               |
    /// | `CONVERTER_ARGS`    | (empty)                            |
    /// | `EXTRACTOR_URL`     | `http://127.0.0.1:9000/v1/extract` |
    /// | `EXTRACTOR_API_KEY` | (unset)                            |
    ///
    /// There is no request timeout setting; the SSE endpoint holds
    /// connections open for minutes by design.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".into());

        let converter_command =
            std::env::var("CONVERTER_COMMAND").unwrap_or_else(|_| "document-converter".into());

        let converter_args: Vec<String> = std::env::var("CONVERTER_ARGS")
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let extractor_url = std::env::var("EXTRACTOR_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:9000/v1/extract".into());

        let extractor_api_key = std::env::var("EXTRACTOR_API_KEY").ok();

        Self {
            host,
            port,
            cors_origins,
            redis_url,
            converter_command,
            converter_args,
            extractor_url,
            extractor_api_key,
        }
    }
}
