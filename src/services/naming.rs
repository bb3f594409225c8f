//! Names that end up on disk or in public URLs.

use base64::{Engine as _, engine::general_purpose};
use std::path::Path;
use uuid::Uuid;

const MAX_COMPONENT_LEN: usize = 255;
const MAX_EXTENSION_LEN: usize = 16;
/// Bytes of randomness in a public file id (8 base64url characters).
const FILE_ID_ENTROPY_BYTES: usize = 6;

/// True when `name` can be used as a single path component under a root
/// directory without escaping it or colliding with internal temp files.
pub fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_COMPONENT_LEN
        && !name.starts_with('.')
        && !name
            .bytes()
            .any(|b| b == b'/' || b == b'\\' || b == b'\0' || b.is_ascii_control())
}

/// Lowercased extension of `filename` including the dot, or an empty string
/// when it has none or it is not plain ASCII alphanumerics.
pub fn sanitize_extension(filename: &str) -> String {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return String::new();
    }
    format!(".{}", ext.to_ascii_lowercase())
}

/// Fresh public id for a stored file, keeping the original extension.
///
/// No collision check is made; 48 random bits per extension is plenty for
/// an anonymous host.
pub fn generate_file_id(original_name: &str) -> String {
    let uuid = Uuid::new_v4();
    let token = general_purpose::URL_SAFE_NO_PAD.encode(&uuid.as_bytes()[..FILE_ID_ENTROPY_BYTES]);
    format!("{}{}", token, sanitize_extension(original_name))
}

/// MIME type served for a stored file, by extension.
pub fn content_type_for(name: &str) -> &'static str {
    match sanitize_extension(name).as_str() {
        ".jpg" | ".jpeg" => "image/jpeg",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".webp" => "image/webp",
        ".svg" => "image/svg+xml",
        ".mp4" => "video/mp4",
        ".webm" => "video/webm",
        ".mp3" => "audio/mpeg",
        ".txt" => "text/plain; charset=utf-8",
        ".json" => "application/json",
        ".zip" => "application/zip",
        ".pdf" => "application/pdf",
        ".doc" => "application/msword",
        ".docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}
