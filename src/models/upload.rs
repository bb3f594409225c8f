//! Request and response bodies for the upload endpoints.

use serde::{Deserialize, Serialize};

/// `POST /api/upload-init` body.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub filename: String,
    /// Declared size in bytes, checked against the server maximum up front.
    #[serde(default)]
    pub total_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub upload_id: String,
}

/// Acknowledgement for a stored fragment (and the shape of a failed one).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkAck {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /api/upload-finalize` body.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub filename: String,
    #[serde(default)]
    pub upload_id: Option<String>,
    /// When present the fragments must be exactly `0..total_chunks`.
    #[serde(default)]
    pub total_chunks: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    /// Site-relative link, `/f/<id>`.
    pub url: String,
    pub raw_url: String,
    pub size: u64,
    pub checksum: String,
}

/// `POST /api/upload` (single request) response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub raw_url: String,
    pub image_url: String,
}

/// `GET /api/stats` response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub total_files: u64,
    pub used_storage: u64,
    pub available_storage: u64,
    pub total_storage: u64,
}
