//! Configuration module for the notes backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::errors::AppError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway key required on every `/api` request when set
    pub api_key: Option<String>,
    /// HS256 secret used to verify identity tokens; `None` trusts identity headers (dev only)
    pub jwt_secret: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy search index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let api_key = non_empty_var("NOTES_API_KEY");
        let jwt_secret = non_empty_var("NOTES_JWT_SECRET");

        let db_path = env::var("NOTES_DB_PATH")
            .unwrap_or_else(|_| "./data/notes.sqlite".to_string())
            .into();

        let index_path = env::var("NOTES_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let bind_addr_raw =
            env::var("NOTES_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let bind_addr = bind_addr_raw.parse::<SocketAddr>().map_err(|e| {
            AppError::Internal(format!(
                "Invalid NOTES_BIND_ADDR '{}': {}",
                bind_addr_raw, e
            ))
        })?;

        let log_level = env::var("NOTES_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            api_key,
            jwt_secret,
            db_path,
            index_path,
            bind_addr,
            log_level,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
