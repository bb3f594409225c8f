//! HTTP handlers for the upload pipeline: session init, chunk receive,
//! finalize, and the single-request upload.

use crate::{
    errors::AppError,
    models::{
        stored_file::StoredFile,
        upload::{
            ChunkAck, FinalizeRequest, FinalizeResponse, InitUploadRequest, InitUploadResponse,
            UploadResponse,
        },
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};
use bytes::Bytes;
use futures::TryStreamExt;
use std::io;

/// `/f/<id>`, relative to whatever host serves the site.
pub fn view_path(id: &str) -> String {
    format!("/f/{}", id)
}

pub fn raw_url(base: &str, id: &str) -> String {
    format!("{}/api/files/{}", base, id)
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}

/// `POST /api/upload-init`: open a staging session.
pub async fn init_upload(
    State(state): State<AppState>,
    Json(req): Json<InitUploadRequest>,
) -> Result<Json<InitUploadResponse>, AppError> {
    let upload_id = state
        .uploads
        .begin_session(&req.filename, req.total_size)
        .await?;
    Ok(Json(InitUploadResponse { upload_id }))
}

/// Fields of one `/api/upload-chunk` request.
#[derive(Debug, Default)]
struct ChunkForm {
    file: Option<Bytes>,
    chunk_index: Option<String>,
    total_chunks: Option<String>,
    filename: Option<String>,
    upload_id: Option<String>,
}

impl ChunkForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = ChunkForm::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => form.file = Some(field.bytes().await.map_err(multipart_error)?),
                "chunkIndex" => form.chunk_index = Some(field.text().await.map_err(multipart_error)?),
                "totalChunks" => form.total_chunks = Some(field.text().await.map_err(multipart_error)?),
                "filename" => form.filename = Some(field.text().await.map_err(multipart_error)?),
                "uploadId" => form.upload_id = Some(field.text().await.map_err(multipart_error)?),
                _ => {}
            }
        }
        Ok(form)
    }
}

/// `POST /api/upload-chunk`: persist one fragment.
pub async fn upload_chunk(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ChunkAck>, AppError> {
    receive_chunk(&state, multipart)
        .await
        .map_err(AppError::as_chunk_ack)
}

async fn receive_chunk(state: &AppState, multipart: Multipart) -> Result<Json<ChunkAck>, AppError> {
    let form = ChunkForm::read(multipart).await?;

    let (Some(file), Some(chunk_index), Some(total_chunks), Some(filename)) = (
        form.file,
        form.chunk_index.filter(|v| !v.trim().is_empty()),
        form.total_chunks.filter(|v| !v.trim().is_empty()),
        form.filename.filter(|v| !v.is_empty()),
    ) else {
        return Err(AppError::bad_request("Missing required form data"));
    };

    let index: u32 = chunk_index
        .trim()
        .parse()
        .map_err(|_| AppError::bad_request("Invalid chunk index"))?;
    let total: u32 = total_chunks
        .trim()
        .parse()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| AppError::bad_request("Invalid total chunks"))?;
    let upload_id = form.upload_id.filter(|v| !v.is_empty());

    state
        .uploads
        .write_chunk(upload_id.as_deref(), &filename, index, file)
        .await?;

    Ok(Json(ChunkAck {
        success: true,
        message: format!("Chunk {} of {} uploaded successfully", index, total),
        error: None,
    }))
}

/// `POST /api/upload-finalize`: assemble the staged fragments.
pub async fn finalize_upload(
    State(state): State<AppState>,
    Json(req): Json<FinalizeRequest>,
) -> Result<Json<FinalizeResponse>, AppError> {
    let stored = state
        .uploads
        .finalize(req.upload_id.as_deref(), &req.filename, req.total_chunks)
        .await
        .map_err(|err| AppError::from(err).plain())?;

    let base = state.link_base(None);
    Ok(Json(FinalizeResponse {
        url: view_path(&stored.id),
        raw_url: raw_url(&base, &stored.id),
        size: stored.size_bytes.max(0) as u64,
        checksum: stored.checksum,
    }))
}

/// `POST /api/upload`: whole file in one multipart request.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut stored: Option<StoredFile> = None;
    let mut domain = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" if stored.is_none() => {
                let original_name = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("upload")
                    .to_string();
                let stream = field.map_err(|err| io::Error::new(io::ErrorKind::Other, err));
                stored = Some(state.uploads.store_stream(&original_name, stream).await?);
            }
            "domain" => domain = Some(field.text().await.map_err(multipart_error)?),
            _ => {}
        }
    }

    let stored = stored.ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "No file uploaded"))?;
    let base = state.link_base(domain.as_deref().filter(|d| !d.trim().is_empty()));
    Ok(Json(UploadResponse {
        raw_url: raw_url(&base, &stored.id),
        image_url: format!("{}{}", base, view_path(&stored.id)),
    }))
}
