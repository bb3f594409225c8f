//! Data models for uploads, stored files and rate limiting.
//!
//! `StoredFile` maps to the `stored_files` table via `sqlx::FromRow`; the rest
//! are wire types serialized with `serde`.

pub mod rate_limit;
pub mod stored_file;
pub mod upload;
