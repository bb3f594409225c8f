mod common;

use anonhost::models::upload::{
    ChunkAck, FinalizeResponse, InitUploadResponse, StorageStats, UploadResponse,
};
use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use common::{body_bytes, body_json, file, json_request, multipart_request, test_app, text};
use serde_json::json;
use tower::ServiceExt;

fn chunk_request<'a>(filename: &'a str, index: &'a str, total: &'a str, data: &'a [u8]) -> Request<Body> {
    multipart_request(
        "/api/upload-chunk",
        &[
            file("file", "blob", data),
            text("chunkIndex", index),
            text("totalChunks", total),
            text("filename", filename),
        ],
        None,
    )
}

#[tokio::test]
async fn chunk_without_index_is_rejected_and_nothing_is_staged() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = test_app(tmp.path()).await;

    let request = multipart_request(
        "/api/upload-chunk",
        &[
            file("file", "blob", b"data"),
            text("totalChunks", "1"),
            text("filename", "notes.txt"),
        ],
        None,
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let ack: ChunkAck = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(!ack.success);
    assert_eq!(ack.message, "Missing required form data");
    assert!(!tmp.path().join("chunks/notes.txt").exists());
}

#[tokio::test]
async fn non_numeric_index_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = test_app(tmp.path()).await;

    let response = app
        .oneshot(chunk_request("a.txt", "first", "2", b"x"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let ack: ChunkAck = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(ack.message, "Invalid chunk index");
}

#[tokio::test]
async fn chunks_in_any_order_assemble_in_index_order() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = test_app(tmp.path()).await;

    for (index, data) in [("2", &b"ccc"[..]), ("0", b"aaa"), ("1", b"bbb")] {
        let response = app
            .clone()
            .oneshot(chunk_request("photo.png", index, "3", data))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ack: ChunkAck = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(ack.success);
        assert_eq!(ack.message, format!("Chunk {} of 3 uploaded successfully", index));
    }
    assert!(tmp.path().join("chunks/photo.png/chunk-2").exists());

    let response = app
        .clone()
        .oneshot(json_request(
            "/api/upload-finalize",
            json!({ "filename": "photo.png", "totalChunks": 3 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let finalized: FinalizeResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(finalized.url.starts_with("/f/"));
    assert!(finalized.url.ends_with(".png"));
    assert!(finalized.raw_url.starts_with("https://keiran.cc/api/files/"));
    assert_eq!(finalized.size, 9);
    assert_eq!(finalized.checksum, format!("{:x}", md5::compute(b"aaabbbccc")));
    assert!(!tmp.path().join("chunks/photo.png").exists());

    let response = app
        .clone()
        .oneshot(Request::get(finalized.url.as_str()).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(body_bytes(response).await, b"aaabbbccc");

    // The staging directory is gone, so a repeated finalize has nothing to find.
    let response = app
        .oneshot(json_request(
            "/api/upload-finalize",
            json!({ "filename": "photo.png" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.contains("not found"));
}

#[tokio::test]
async fn resent_chunk_replaces_the_earlier_bytes() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = test_app(tmp.path()).await;

    for data in [&b"stale"[..], b"fresh"] {
        let response = app
            .clone()
            .oneshot(chunk_request("retry.txt", "0", "1", data))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(json_request(
            "/api/upload-finalize",
            json!({ "filename": "retry.txt", "totalChunks": 1 }),
        ))
        .await
        .unwrap();
    let finalized: FinalizeResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(finalized.size, 5);
    assert_eq!(finalized.checksum, format!("{:x}", md5::compute(b"fresh")));
}

#[tokio::test]
async fn session_upload_with_a_gap_is_a_conflict() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = test_app(tmp.path()).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "/api/upload-init",
            json!({ "filename": "song.mp3", "totalSize": 6 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let init: InitUploadResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();

    for index in ["0", "2"] {
        let request = multipart_request(
            "/api/upload-chunk",
            &[
                file("file", "blob", b"xx"),
                text("chunkIndex", index),
                text("totalChunks", "3"),
                text("filename", "song.mp3"),
                text("uploadId", &init.upload_id),
            ],
            None,
        );
        assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(json_request(
            "/api/upload-finalize",
            json!({ "filename": "song.mp3", "uploadId": init.upload_id, "totalChunks": 3 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(
        tmp.path().join("chunks").join(&init.upload_id).read_dir().unwrap().count(),
        2
    );
}

#[tokio::test]
async fn chunk_for_unknown_session_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = test_app(tmp.path()).await;

    let unknown = uuid::Uuid::new_v4().to_string();
    let request = multipart_request(
        "/api/upload-chunk",
        &[
            file("file", "blob", b"x"),
            text("chunkIndex", "0"),
            text("totalChunks", "1"),
            text("filename", "a.txt"),
            text("uploadId", &unknown),
        ],
        None,
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let ack: ChunkAck = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(!ack.success);
}

#[tokio::test]
async fn staged_bytes_beyond_the_limit_are_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, state) = test_app(tmp.path()).await;

    let chunk = vec![7u8; state.config.max_chunk_bytes as usize];
    let fits = (state.config.max_upload_bytes / state.config.max_chunk_bytes) as u32;
    for index in 0..fits {
        let index = index.to_string();
        let response = app
            .clone()
            .oneshot(chunk_request("big.bin", &index, "99", &chunk))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let index = fits.to_string();
    let response = app
        .oneshot(chunk_request("big.bin", &index, "99", b"!"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(!tmp.path().join(format!("chunks/big.bin/chunk-{}", fits)).exists());
}

#[tokio::test]
async fn init_refuses_a_declared_size_over_the_limit() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, state) = test_app(tmp.path()).await;

    let response = app
        .oneshot(json_request(
            "/api/upload-init",
            json!({ "filename": "huge.iso", "totalSize": state.config.max_upload_bytes + 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn single_request_upload_honours_allowed_domains() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = test_app(tmp.path()).await;

    let request = multipart_request(
        "/api/upload",
        &[
            file("file", "cat.gif", b"GIF89a"),
            text("domain", "files.example.org"),
        ],
        Some("203.0.113.9"),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let uploaded: UploadResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(uploaded.image_url.starts_with("https://files.example.org/f/"));
    assert!(uploaded.raw_url.starts_with("https://files.example.org/api/files/"));
    assert!(uploaded.raw_url.ends_with(".gif"));

    let request = multipart_request(
        "/api/upload",
        &[file("file", "dog.gif", b"GIF89a"), text("domain", "evil.example")],
        Some("203.0.113.9"),
    );
    let uploaded: UploadResponse =
        serde_json::from_slice(&body_bytes(app.oneshot(request).await.unwrap()).await).unwrap();
    assert!(uploaded.image_url.starts_with("https://keiran.cc/f/"));
}

#[tokio::test]
async fn single_request_upload_without_file_is_bad_request() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = test_app(tmp.path()).await;

    let request = multipart_request("/api/upload", &[text("domain", "keiran.cc")], None);
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No file uploaded");
}

#[tokio::test]
async fn stats_reflect_stored_files() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, state) = test_app(tmp.path()).await;

    let request = multipart_request("/api/upload", &[file("file", "a.txt", b"hello")], None);
    assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/api/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats: StorageStats = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(stats.total_files, 1);
    assert_eq!(stats.used_storage, 5);
    assert_eq!(stats.total_storage, state.config.total_storage_bytes);
    assert_eq!(stats.available_storage, state.config.total_storage_bytes - 5);
}

#[tokio::test]
async fn unknown_file_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = test_app(tmp.path()).await;

    let response = app
        .oneshot(Request::get("/f/abcdEFGH.png").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn readiness_checks_database_and_directories() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = test_app(tmp.path()).await;

    let response = app
        .clone()
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    for check in ["sqlite", "files", "staging"] {
        assert_eq!(body["checks"][check]["ok"], true);
    }

    std::fs::remove_dir_all(tmp.path().join("chunks")).unwrap();
    let response = app
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["checks"]["staging"]["ok"], false);
}
