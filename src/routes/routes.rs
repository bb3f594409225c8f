//! Defines routes for the upload pipeline and file serving.
//!
//! ## Structure
//! - **Chunked upload**
//!   - `POST /api/upload-init`: open a staging session
//!   - `POST /api/upload-chunk`: store one fragment (multipart)
//!   - `POST /api/upload-finalize`: assemble fragments into a stored file
//!
//! - **Single request upload**
//!   - `POST /api/upload`: multipart `file`, optional `domain`
//!
//! - **Files**
//!   - `GET /f/{id}`, `GET /api/files/{id}`: stream a stored file
//!   - `GET /api/stats`: storage usage
//!
//! Every route sits behind the rate limiter middleware; only paths with a
//! configured policy are actually limited.

use crate::{
    config::AppConfig,
    handlers::{
        file_handlers::{get_file, storage_stats},
        health_handlers::{healthz, readyz},
        upload_handlers::{finalize_upload, init_upload, upload_chunk, upload_file},
    },
    middleware::rate_limit::rate_limit,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
};

/// Headroom for multipart boundaries and the text fields around a file part.
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

fn body_limit(bytes: u64) -> DefaultBodyLimit {
    DefaultBodyLimit::max(usize::try_from(bytes + MULTIPART_OVERHEAD_BYTES).unwrap_or(usize::MAX))
}

/// Build the route table. Body limits come from `config`.
pub fn routes(config: &AppConfig) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // chunked upload pipeline
        .route("/api/upload-init", post(init_upload))
        .route(
            "/api/upload-chunk",
            post(upload_chunk).layer(body_limit(config.max_chunk_bytes)),
        )
        .route("/api/upload-finalize", post(finalize_upload))
        // single request upload; the size cap is enforced while streaming
        .route(
            "/api/upload",
            post(upload_file).layer(body_limit(config.max_upload_bytes)),
        )
        // files
        .route("/api/stats", get(storage_stats))
        .route("/api/files/{id}", get(get_file))
        .route("/f/{id}", get(get_file))
}

/// The complete application: routes, rate limiting and shared state.
pub fn app(state: AppState) -> Router {
    routes(&state.config)
        .layer(from_fn_with_state(state.limiter.clone(), rate_limit))
        .with_state(state)
}
