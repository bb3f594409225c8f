#![allow(dead_code)]

use anonhost::{
    config::{AppConfig, RateLimitBackend},
    db,
    models::rate_limit::RateLimitPolicy,
    routes::routes::app,
    services::rate_limit::memory::MemoryStore,
    state::AppState,
};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, header},
};
use std::{path::Path, sync::Arc};

pub const BOUNDARY: &str = "anonhost-test-boundary";

pub fn test_config(upload_dir: &Path) -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        upload_dir: upload_dir.to_path_buf(),
        database_url: "sqlite::memory:".into(),
        public_base_url: "https://keiran.cc".into(),
        rate_limit_backend: RateLimitBackend::Memory,
        redis_url: String::new(),
        redis_key_prefix: "test:".into(),
        max_upload_bytes: 64 * 1024,
        max_chunk_bytes: 16 * 1024,
        staging_ttl_secs: 3600,
        sweep_interval_secs: 3600,
        allowed_domains: vec!["files.example.org".into()],
        total_storage_bytes: 1024 * 1024,
        rate_limits: RateLimitPolicy::default_routes(),
    }
}

pub async fn test_state(config: AppConfig) -> AppState {
    std::fs::create_dir_all(config.staging_dir()).expect("staging dir");
    let pool = db::memory_pool().await.expect("sqlite");
    AppState::new(config, Arc::new(pool), Arc::new(MemoryStore::new()))
}

pub async fn test_app(upload_dir: &Path) -> (Router, AppState) {
    let state = test_state(test_config(upload_dir)).await;
    (app(state.clone()), state)
}

/// One multipart part: name, optional filename, content.
pub struct FormPart<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub data: &'a [u8],
}

pub fn text<'a>(name: &'a str, value: &'a str) -> FormPart<'a> {
    FormPart {
        name,
        filename: None,
        data: value.as_bytes(),
    }
}

pub fn file<'a>(name: &'a str, filename: &'a str, data: &'a [u8]) -> FormPart<'a> {
    FormPart {
        name,
        filename: Some(filename),
        data,
    }
}

pub fn multipart_request(uri: &str, parts: &[FormPart<'_>], forwarded_for: Option<&str>) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part.filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    part.name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name).as_bytes(),
            ),
        }
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    let mut builder = Request::post(uri).header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={}", BOUNDARY),
    );
    if let Some(ip) = forwarded_for {
        builder = builder.header("x-forwarded-for", ip);
    }
    builder.body(Body::from(body)).unwrap()
}

pub fn json_request(uri: &str, json: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
