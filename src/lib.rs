//! AnonHost: anonymous file hosting with a chunked upload pipeline.
//!
//! The server side (`routes`, `handlers`, `services`) receives fragments,
//! assembles them into stored files and rate limits the mutating routes.
//! The `client` module drives the same protocol from the uploading end.

pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
