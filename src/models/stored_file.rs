//! A finalized upload: one immutable file on disk plus its registry row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    /// Public name: random token plus the original extension, e.g. `q3Zx_09a.png`.
    pub id: String,

    /// Filename the client uploaded under.
    pub original_name: String,

    pub content_type: String,

    pub size_bytes: i64,

    /// MD5 of the content, lowercase hex.
    pub checksum: String,

    pub created_at: DateTime<Utc>,
}
