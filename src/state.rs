//! Shared state handed to every handler.

use crate::{
    config::{AppConfig, RateLimitBackend},
    services::{
        file_service::FileService,
        rate_limit::{
            RateLimitStore, RateLimiter, memory::MemoryStore, redis::RedisStore,
            sqlite::SqliteStore,
        },
        upload_service::UploadService,
    },
};
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub uploads: UploadService,
    pub files: FileService,
    pub limiter: RateLimiter,
}

impl AppState {
    /// Wire services over an open pool and a chosen rate limit store.
    pub fn new(config: AppConfig, db: Arc<SqlitePool>, store: Arc<dyn RateLimitStore>) -> Self {
        let files = FileService::new(db, config.upload_dir.clone());
        let uploads = UploadService::new(config.staging_dir(), config.max_upload_bytes, files.clone());
        let limiter = RateLimiter::new(store, config.rate_limits.clone());
        Self {
            config: Arc::new(config),
            uploads,
            files,
            limiter,
        }
    }

    /// Like [`AppState::new`], connecting the store `config` asks for.
    pub async fn from_config(config: AppConfig, db: Arc<SqlitePool>) -> Result<Self> {
        let store: Arc<dyn RateLimitStore> = match config.rate_limit_backend {
            RateLimitBackend::Sqlite => Arc::new(SqliteStore::new(db.clone())),
            RateLimitBackend::Redis => Arc::new(
                RedisStore::connect(&config.redis_url, config.redis_key_prefix.clone())
                    .await
                    .context("connecting to the redis rate limit store")?,
            ),
            RateLimitBackend::Memory => {
                tracing::warn!("in-memory rate limiting only holds for a single instance");
                Arc::new(MemoryStore::new())
            }
        };
        tracing::info!(backend = ?config.rate_limit_backend, "rate limit store ready");
        Ok(Self::new(config, db, store))
    }

    /// Base URL for links: `https://<domain>` when the client asked for an
    /// allowed domain, the configured public URL otherwise.
    pub fn link_base(&self, requested_domain: Option<&str>) -> String {
        match requested_domain.map(|d| d.trim().trim_end_matches('/').to_ascii_lowercase()) {
            Some(domain) if self.config.allowed_domains.contains(&domain) => {
                format!("https://{}", domain)
            }
            Some(domain) => {
                tracing::debug!(domain = %domain, "ignoring unlisted domain");
                self.config.public_base_url.clone()
            }
            None => self.config.public_base_url.clone(),
        }
    }
}
