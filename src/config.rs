use std::env;
use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_MODEL_SERVICE_URL: &str = "http://127.0.0.1:5001";
pub const DEV_JWT_SECRET: &str = "dev_secret_change_me";
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub jwt_secret: String,
    pub model_service_url: String,
    pub model_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://dropout.db".to_string());
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = match env::var("PORT") {
            Ok(value) => value.parse().context("PORT must be a valid port number")?,
            Err(_) => 5000,
        };
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let jwt_secret =
            env::var("JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.to_string());
        let model_service_url = env::var("MODEL_SERVICE_URL")
            .unwrap_or_else(|_| DEFAULT_MODEL_SERVICE_URL.to_string());
        let model_timeout = parse_model_timeout(env::var("MODEL_TIMEOUT_SECS").ok().as_deref())?;

        Ok(AppConfig {
            database_url,
            host,
            port,
            log_level,
            jwt_secret,
            model_service_url: model_service_url.trim_end_matches('/').to_string(),
            model_timeout,
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Unset means the default. Zero is rejected since every model call would
/// time out before it starts.
fn parse_model_timeout(value: Option<&str>) -> anyhow::Result<Duration> {
    let Some(value) = value else {
        return Ok(DEFAULT_MODEL_TIMEOUT);
    };
    let secs: u64 = value
        .trim()
        .parse()
        .context("MODEL_TIMEOUT_SECS must be a whole number of seconds")?;
    anyhow::ensure!(secs > 0, "MODEL_TIMEOUT_SECS must be at least 1");
    Ok(Duration::from_secs(secs))
}
