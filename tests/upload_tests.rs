use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::util::ServiceExt;

mod common;
use common::{
    bearer, chunk_fields, md5_hex, multipart_body, multipart_content_type, setup_test_app,
};

const CHUNK: u64 = 1024;

async fn get_upload_parameters(
    app: &axum::Router,
    dep_id: &str,
    allow_overwrite: bool,
    resumable: bool,
) -> (StatusCode, serde_json::Value) {
    let uri = format!(
        "/getUploadParameters?repositoryType=deposit&depId={}&contentType=model\
         &partNumber=1&contentFormat=pdbx&version=next&allowOverwrite={}&resumable={}",
        dep_id, allow_overwrite, resumable
    );
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header("Authorization", bearer())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn post_chunk(
    app: &axum::Router,
    fields: Vec<(&'static str, String)>,
    chunk: &[u8],
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header("Authorization", bearer())
                .header("Content-Type", multipart_content_type())
                .body(Body::from(multipart_body(&fields, chunk)))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Drive a whole upload through the chunk endpoint
async fn upload_bytes(
    app: &axum::Router,
    dep_id: &str,
    data: &[u8],
    allow_overwrite: bool,
) -> (StatusCode, String) {
    let (status, params) = get_upload_parameters(app, dep_id, allow_overwrite, false).await;
    assert_eq!(status, StatusCode::OK);
    let file_path = params["filePath"].as_str().unwrap().to_string();
    let upload_id = params["uploadId"].as_str().unwrap().to_string();
    assert_eq!(params["chunkIndex"], 0);

    let digest = md5_hex(data);
    let expected_chunks = (data.len() as u64).div_ceil(CHUNK).max(1);
    let mut last_status = StatusCode::OK;
    for index in 0..expected_chunks {
        let start = (index * CHUNK) as usize;
        let end = usize::min(start + CHUNK as usize, data.len());
        let fields = chunk_fields(
            CHUNK,
            index,
            expected_chunks,
            &upload_id,
            &file_path,
            false,
            &[
                ("hashType", "MD5".to_string()),
                ("hashDigest", digest.clone()),
                ("allowOverwrite", allow_overwrite.to_string()),
            ],
        );
        let (status, _) = post_chunk(app, fields, &data[start..end]).await;
        last_status = status;
        if status != StatusCode::OK {
            break;
        }
    }
    (last_status, file_path)
}

#[tokio::test]
async fn test_two_chunk_upload_round_trip() {
    let app = setup_test_app().await;
    let data: Vec<u8> = (0..(CHUNK + 512)).map(|i| (i % 251) as u8).collect();

    let (status, file_path) = upload_bytes(&app.router, "D_1000000001", &data, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        file_path,
        "deposit/D_1000000001/D_1000000001_model_P1.cif.V1"
    );

    // the target holds exactly the concatenated chunk bytes
    let target = app.repository_dir.join(&file_path);
    assert_eq!(std::fs::read(&target).unwrap(), data);

    // no temp file, placeholder, session row or map row remains
    let deposit_dir = target.parent().unwrap();
    let leftovers: Vec<String> = std::fs::read_dir(deposit_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("._"))
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
    assert_eq!(std::fs::read_dir(&app.session_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn test_second_upload_gets_next_version() {
    let app = setup_test_app().await;

    let (status, first) = upload_bytes(&app.router, "D_2000000002", b"version one", true).await;
    assert_eq!(status, StatusCode::OK);
    assert!(first.ends_with(".V1"));

    let (status, second) = upload_bytes(&app.router, "D_2000000002", b"version two", true).await;
    assert_eq!(status, StatusCode::OK);
    assert!(second.ends_with(".V2"));

    assert_eq!(
        std::fs::read(app.repository_dir.join(&first)).unwrap(),
        b"version one"
    );
    assert_eq!(
        std::fs::read(app.repository_dir.join(&second)).unwrap(),
        b"version two"
    );
}

#[tokio::test]
async fn test_overwrite_denied_at_parameters() {
    let app = setup_test_app().await;

    let (status, _) = upload_bytes(&app.router, "D_3000000003", b"original bytes", true).await;
    assert_eq!(status, StatusCode::OK);

    // the same tuple with version=1 now collides
    let uri = "/getUploadParameters?repositoryType=deposit&depId=D_3000000003\
               &contentType=model&partNumber=1&contentFormat=pdbx&version=1\
               &allowOverwrite=false&resumable=false";
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header("Authorization", bearer())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // target untouched
    let target = app
        .repository_dir
        .join("deposit/D_3000000003/D_3000000003_model_P1.cif.V1");
    assert_eq!(std::fs::read(&target).unwrap(), b"original bytes");
}

#[tokio::test]
async fn test_overwrite_denied_at_finalize() {
    let app = setup_test_app().await;

    // session opened against version 1 before it exists
    let (status, params) = get_upload_parameters(&app.router, "D_4000000004", false, false).await;
    assert_eq!(status, StatusCode::OK);
    let file_path = params["filePath"].as_str().unwrap().to_string();
    let upload_id = params["uploadId"].as_str().unwrap().to_string();

    // a competing upload lands first
    let (status, other_path) =
        upload_bytes(&app.router, "D_4000000004", b"competitor bytes", true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(other_path, file_path);

    // finalization re-checks and refuses
    let data = b"late arrival".to_vec();
    let fields = chunk_fields(
        CHUNK,
        0,
        1,
        &upload_id,
        &file_path,
        false,
        &[
            ("hashType", "MD5".to_string()),
            ("hashDigest", md5_hex(&data)),
            ("allowOverwrite", "false".to_string()),
        ],
    );
    let (status, _) = post_chunk(&app.router, fields, &data).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // the winner's bytes survive
    assert_eq!(
        std::fs::read(app.repository_dir.join(&file_path)).unwrap(),
        b"competitor bytes"
    );
}

#[tokio::test]
async fn test_integrity_mismatch_removes_all_state() {
    let app = setup_test_app().await;

    let (status, params) = get_upload_parameters(&app.router, "D_5000000005", true, false).await;
    assert_eq!(status, StatusCode::OK);
    let file_path = params["filePath"].as_str().unwrap().to_string();
    let upload_id = params["uploadId"].as_str().unwrap().to_string();

    let data = b"chunk with a bad digest".to_vec();
    let fields = chunk_fields(
        CHUNK,
        0,
        1,
        &upload_id,
        &file_path,
        false,
        &[
            ("hashType", "MD5".to_string()),
            ("hashDigest", "00000000000000000000000000000000".to_string()),
            ("allowOverwrite", "true".to_string()),
        ],
    );
    let (status, body) = post_chunk(&app.router, fields, &data).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["error"].as_str().unwrap().contains("hash comparison"),
        "unexpected error body: {}",
        body
    );

    // no target file, temp file or placeholder remains
    let target = app.repository_dir.join(&file_path);
    assert!(!target.exists());
    let deposit_dir = target.parent().unwrap();
    assert_eq!(std::fs::read_dir(deposit_dir).unwrap().count(), 0);
    assert_eq!(std::fs::read_dir(&app.session_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn test_size_verification_accepts_and_rejects() {
    let app = setup_test_app().await;

    // matching size passes
    let (status, params) = get_upload_parameters(&app.router, "D_6000000006", true, false).await;
    assert_eq!(status, StatusCode::OK);
    let file_path = params["filePath"].as_str().unwrap().to_string();
    let upload_id = params["uploadId"].as_str().unwrap().to_string();
    let data = b"sized payload".to_vec();
    let fields = chunk_fields(
        CHUNK,
        0,
        1,
        &upload_id,
        &file_path,
        false,
        &[
            ("fileSize", data.len().to_string()),
            ("allowOverwrite", "true".to_string()),
        ],
    );
    let (status, _) = post_chunk(&app.router, fields, &data).await;
    assert_eq!(status, StatusCode::OK);

    // wrong size fails and creates nothing
    let (_, params) = get_upload_parameters(&app.router, "D_6000000006", true, false).await;
    let file_path = params["filePath"].as_str().unwrap().to_string();
    let upload_id = params["uploadId"].as_str().unwrap().to_string();
    let fields = chunk_fields(
        CHUNK,
        0,
        1,
        &upload_id,
        &file_path,
        false,
        &[
            ("fileSize", "99999".to_string()),
            ("allowOverwrite", "true".to_string()),
        ],
    );
    let (status, _) = post_chunk(&app.router, fields, b"sized payload").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!app.repository_dir.join(&file_path).exists());
}

#[tokio::test]
async fn test_final_chunk_requires_hash_or_size() {
    let app = setup_test_app().await;

    let (_, params) = get_upload_parameters(&app.router, "D_7000000007", true, false).await;
    let file_path = params["filePath"].as_str().unwrap().to_string();
    let upload_id = params["uploadId"].as_str().unwrap().to_string();

    let fields = chunk_fields(
        CHUNK,
        0,
        1,
        &upload_id,
        &file_path,
        false,
        &[("allowOverwrite", "true".to_string())],
    );
    let (status, body) = post_chunk(&app.router, fields, b"anything").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("no hash or file size"));
}

#[tokio::test]
async fn test_empty_chunk_rejected() {
    let app = setup_test_app().await;

    let (_, params) = get_upload_parameters(&app.router, "D_8000000008", true, false).await;
    let file_path = params["filePath"].as_str().unwrap().to_string();
    let upload_id = params["uploadId"].as_str().unwrap().to_string();

    let fields = chunk_fields(
        CHUNK,
        0,
        2,
        &upload_id,
        &file_path,
        false,
        &[("allowOverwrite", "true".to_string())],
    );
    let (status, _) = post_chunk(&app.router, fields, b"").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_decompress_after_upload() {
    let app = setup_test_app().await;

    let original: Vec<u8> = b"title loop atoms coordinates\n".repeat(500);
    let compressed = depo_file_repo::fileops::gzip_bytes(&original).unwrap();

    let (_, params) = get_upload_parameters(&app.router, "D_9000000009", true, false).await;
    let file_path = params["filePath"].as_str().unwrap().to_string();
    let upload_id = params["uploadId"].as_str().unwrap().to_string();

    let fields = chunk_fields(
        CHUNK,
        0,
        1,
        &upload_id,
        &file_path,
        false,
        &[
            ("hashType", "MD5".to_string()),
            ("hashDigest", md5_hex(&compressed)),
            ("allowOverwrite", "true".to_string()),
            ("decompress", "true".to_string()),
            ("fileExtension", "gz".to_string()),
        ],
    );
    let (status, _) = post_chunk(&app.router, fields, &compressed).await;
    assert_eq!(status, StatusCode::OK);

    // target holds the uncompressed bytes and no .gz sibling remains
    let target = app.repository_dir.join(&file_path);
    assert_eq!(std::fs::read(&target).unwrap(), original);
    let gz = app
        .repository_dir
        .join(format!("{}.gz", file_path));
    assert!(!gz.exists());
}

#[tokio::test]
async fn test_double_extension_rejected_and_file_removed() {
    let app = setup_test_app().await;

    let data = b"payload".to_vec();
    let (_, params) = get_upload_parameters(&app.router, "D_9100000001", true, false).await;
    let file_path = params["filePath"].as_str().unwrap().to_string();
    let upload_id = params["uploadId"].as_str().unwrap().to_string();

    let fields = chunk_fields(
        CHUNK,
        0,
        1,
        &upload_id,
        &file_path,
        false,
        &[
            ("hashType", "MD5".to_string()),
            ("hashDigest", md5_hex(&data)),
            ("allowOverwrite", "true".to_string()),
            ("decompress", "true".to_string()),
            ("fileExtension", "tar.gz".to_string()),
        ],
    );
    let (status, _) = post_chunk(&app.router, fields, &data).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!app.repository_dir.join(&file_path).exists());
}

#[tokio::test]
async fn test_chunk_index_past_total_rejected() {
    let app = setup_test_app().await;

    let (_, params) = get_upload_parameters(&app.router, "D_9300000003", true, false).await;
    let file_path = params["filePath"].as_str().unwrap().to_string();
    let upload_id = params["uploadId"].as_str().unwrap().to_string();

    // chunk 2 of an upload that declared 2 chunks (valid indices are 0 and 1)
    let data = b"stray chunk".to_vec();
    let fields = chunk_fields(
        CHUNK,
        2,
        2,
        &upload_id,
        &file_path,
        false,
        &[
            ("hashType", "MD5".to_string()),
            ("hashDigest", md5_hex(&data)),
            ("allowOverwrite", "true".to_string()),
        ],
    );
    let (status, body) = post_chunk(&app.router, fields, &data).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert!(body["error"].as_str().unwrap().contains("out of range"));

    // nothing was written: no target, no temp file, no placeholder
    let target = app.repository_dir.join(&file_path);
    assert!(!target.exists());
    assert_eq!(std::fs::read_dir(target.parent().unwrap()).unwrap().count(), 0);
    assert_eq!(std::fs::read_dir(&app.session_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn test_wire_compressed_chunks_are_expanded() {
    let app = setup_test_app().await;

    let original = b"wire compressed chunk payload".to_vec();
    let frame = depo_file_repo::fileops::gzip_bytes(&original).unwrap();

    let (_, params) = get_upload_parameters(&app.router, "D_9200000002", true, false).await;
    let file_path = params["filePath"].as_str().unwrap().to_string();
    let upload_id = params["uploadId"].as_str().unwrap().to_string();

    let fields = chunk_fields(
        CHUNK,
        0,
        1,
        &upload_id,
        &file_path,
        false,
        &[
            ("fileSize", original.len().to_string()),
            ("allowOverwrite", "true".to_string()),
            ("extractChunk", "true".to_string()),
        ],
    );
    let (status, _) = post_chunk(&app.router, fields, &frame).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        std::fs::read(app.repository_dir.join(&file_path)).unwrap(),
        original
    );
}
