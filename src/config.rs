use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{collections::HashMap, env, path::PathBuf, str::FromStr};

use crate::models::rate_limit::RateLimitPolicy;

const MIB: u64 = 1024 * 1024;

/// Which store backs the rate limiter's request and violation logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBackend {
    Sqlite,
    Redis,
    /// Process-local; only correct for a single instance.
    Memory,
}

impl FromStr for RateLimitBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown rate limit backend `{}` (expected sqlite, redis or memory)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Root for finalized files; staging lives under `<upload_dir>/chunks`.
    pub upload_dir: PathBuf,
    pub database_url: String,
    /// Base used to compose absolute links, e.g. `https://keiran.cc`.
    pub public_base_url: String,
    pub rate_limit_backend: RateLimitBackend,
    pub redis_url: String,
    pub redis_key_prefix: String,
    pub max_upload_bytes: u64,
    pub max_chunk_bytes: u64,
    pub staging_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub allowed_domains: Vec<String>,
    pub total_storage_bytes: u64,
    pub rate_limits: HashMap<String, RateLimitPolicy>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Anonymous file host with chunked uploads")]
pub struct Args {
    /// Host to bind to (overrides ANONHOST_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides ANONHOST_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for stored files and chunk staging (overrides ANONHOST_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Database URL (overrides ANONHOST_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL used in returned links (overrides ANONHOST_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Rate limit store: sqlite, redis or memory (overrides ANONHOST_RATE_LIMIT_BACKEND)
    #[arg(long)]
    pub rate_limit_backend: Option<String>,

    /// Redis URL for the redis rate limit store (overrides ANONHOST_REDIS_URL)
    #[arg(long)]
    pub redis_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::from_args(Args::parse())
    }

    /// Merge already-parsed CLI args over the environment.
    pub fn from_args(args: Args) -> Result<(Self, bool)> {
        // --- Environment fallback ---
        let env_host = env::var("ANONHOST_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port: u16 = env_parse("ANONHOST_PORT", 3000)?;
        let env_upload_dir =
            env::var("ANONHOST_UPLOAD_DIR").unwrap_or_else(|_| "./uploads".into());
        let env_db = env::var("ANONHOST_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/anonhost.db".into());
        let env_public =
            env::var("ANONHOST_PUBLIC_URL").unwrap_or_else(|_| "http://localhost:3000".into());
        let env_backend =
            env::var("ANONHOST_RATE_LIMIT_BACKEND").unwrap_or_else(|_| "sqlite".into());
        let env_redis =
            env::var("ANONHOST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());

        let backend = args.rate_limit_backend.unwrap_or(env_backend);
        let allowed_domains = env::var("ANONHOST_ALLOWED_DOMAINS")
            .map(|raw| parse_domain_list(&raw))
            .unwrap_or_default();

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            upload_dir: args.upload_dir.unwrap_or_else(|| env_upload_dir.into()),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args
                .public_url
                .unwrap_or(env_public)
                .trim_end_matches('/')
                .to_string(),
            rate_limit_backend: backend
                .parse()
                .context("reading ANONHOST_RATE_LIMIT_BACKEND")?,
            redis_url: args.redis_url.unwrap_or(env_redis),
            redis_key_prefix: env::var("ANONHOST_REDIS_PREFIX")
                .unwrap_or_else(|_| "anonhost:".into()),
            max_upload_bytes: env_parse("ANONHOST_MAX_UPLOAD_BYTES", 100 * MIB)?,
            max_chunk_bytes: env_parse("ANONHOST_MAX_CHUNK_BYTES", 10 * MIB)?,
            staging_ttl_secs: env_parse("ANONHOST_STAGING_TTL_SECS", 24 * 60 * 60)?,
            sweep_interval_secs: env_parse("ANONHOST_SWEEP_INTERVAL_SECS", 60 * 60)?,
            allowed_domains,
            total_storage_bytes: env_parse("ANONHOST_TOTAL_STORAGE_BYTES", 3 * MIB * MIB)?,
            rate_limits: RateLimitPolicy::default_routes(),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Directory holding one staging directory per in-progress upload.
    pub fn staging_dir(&self) -> PathBuf {
        self.upload_dir.join("chunks")
    }
}

/// Read and parse an environment variable, using `default` when it is unset.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn parse_domain_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|d| d.trim().trim_end_matches('/').to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}
