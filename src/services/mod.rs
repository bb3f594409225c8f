pub mod file_service;
pub mod naming;
pub mod rate_limit;
pub mod sweeper;
pub mod upload_service;
