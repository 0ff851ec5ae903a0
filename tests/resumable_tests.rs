use axum::body::Body;
use axum::http::{Request, StatusCode};
use depo_file_repo::kv::Kv as _;
use tower::util::ServiceExt;

mod common;
use common::{
    bearer, chunk_fields, md5_hex, multipart_body, multipart_content_type, setup_test_app,
};

const CHUNK: u64 = 1024;

async fn get_upload_parameters(app: &axum::Router, dep_id: &str) -> serde_json::Value {
    let uri = format!(
        "/getUploadParameters?repositoryType=deposit&depId={}&contentType=model\
         &partNumber=1&contentFormat=pdbx&version=next&allowOverwrite=true&resumable=true",
        dep_id
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
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn post_chunk(
    app: &axum::Router,
    fields: Vec<(&'static str, String)>,
    chunk: &[u8],
) -> StatusCode {
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
    response.status()
}

#[tokio::test]
async fn test_interrupted_upload_resumes_at_correct_chunk() {
    let app = setup_test_app().await;
    let total_chunks = 4u64;
    let data: Vec<u8> = (0..CHUNK * total_chunks).map(|i| (i % 241) as u8).collect();
    let digest = md5_hex(&data);

    let params = get_upload_parameters(&app.router, "D_1000000001").await;
    let file_path = params["filePath"].as_str().unwrap().to_string();
    let upload_id = params["uploadId"].as_str().unwrap().to_string();
    assert_eq!(params["chunkIndex"], 0);

    // client posts the first two chunks, then disappears
    for index in 0..2 {
        let start = (index * CHUNK) as usize;
        let end = start + CHUNK as usize;
        let fields = chunk_fields(
            CHUNK,
            index,
            total_chunks,
            &upload_id,
            &file_path,
            true,
            &[
                ("hashType", "MD5".to_string()),
                ("hashDigest", digest.clone()),
                ("allowOverwrite", "true".to_string()),
            ],
        );
        assert_eq!(post_chunk(&app.router, fields, &data[start..end]).await, StatusCode::OK);
    }

    // the placeholder marks the active session
    assert_eq!(std::fs::read_dir(&app.session_dir).unwrap().count(), 1);

    // a returning client gets the same session and the resume offset
    let params = get_upload_parameters(&app.router, "D_1000000001").await;
    assert_eq!(params["uploadId"].as_str().unwrap(), upload_id);
    assert_eq!(params["chunkIndex"], 2);
    assert_eq!(params["filePath"].as_str().unwrap(), file_path);

    // finish the remaining chunks
    for index in 2..total_chunks {
        let start = (index * CHUNK) as usize;
        let end = start + CHUNK as usize;
        let fields = chunk_fields(
            CHUNK,
            index,
            total_chunks,
            &upload_id,
            &file_path,
            true,
            &[
                ("hashType", "MD5".to_string()),
                ("hashDigest", digest.clone()),
                ("allowOverwrite", "true".to_string()),
            ],
        );
        assert_eq!(post_chunk(&app.router, fields, &data[start..end]).await, StatusCode::OK);
    }

    // byte-identical target, all session state gone
    assert_eq!(std::fs::read(app.repository_dir.join(&file_path)).unwrap(), data);
    assert_eq!(std::fs::read_dir(&app.session_dir).unwrap().count(), 0);
    assert!(
        app.state
            .kv
            .get_session(&upload_id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_find_upload_id_and_status_routes() {
    let app = setup_test_app().await;
    let data: Vec<u8> = vec![7u8; (CHUNK * 2) as usize];
    let digest = md5_hex(&data);

    let params = get_upload_parameters(&app.router, "D_2000000002").await;
    let file_path = params["filePath"].as_str().unwrap().to_string();
    let upload_id = params["uploadId"].as_str().unwrap().to_string();

    let fields = chunk_fields(
        CHUNK,
        0,
        2,
        &upload_id,
        &file_path,
        true,
        &[
            ("hashType", "MD5".to_string()),
            ("hashDigest", digest.clone()),
            ("allowOverwrite", "true".to_string()),
        ],
    );
    assert_eq!(
        post_chunk(&app.router, fields, &data[..CHUNK as usize]).await,
        StatusCode::OK
    );

    // findUploadId resolves the session from file parameters
    let form = "repositoryType=deposit&depId=D_2000000002&contentType=model\
                &partNumber=1&contentFormat=pdbx&version=next";
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/findUploadId")
                .header("Authorization", bearer())
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let found: Option<String> = serde_json::from_slice(&body).unwrap();
    assert_eq!(found.as_deref(), Some(upload_id.as_str()));

    // uploadStatus/{id} exposes the recorded chunk size
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/uploadStatus/{}", upload_id))
                .header("Authorization", bearer())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["chunkSize"], CHUNK.to_string());
}

#[tokio::test]
async fn test_clear_session_removes_kv_rows() {
    let app = setup_test_app().await;
    let data: Vec<u8> = vec![3u8; (CHUNK * 2) as usize];
    let digest = md5_hex(&data);

    let params = get_upload_parameters(&app.router, "D_3000000003").await;
    let file_path = params["filePath"].as_str().unwrap().to_string();
    let upload_id = params["uploadId"].as_str().unwrap().to_string();

    let fields = chunk_fields(
        CHUNK,
        0,
        2,
        &upload_id,
        &file_path,
        true,
        &[
            ("hashType", "MD5".to_string()),
            ("hashDigest", digest),
            ("allowOverwrite", "true".to_string()),
        ],
    );
    assert_eq!(
        post_chunk(&app.router, fields, &data[..CHUNK as usize]).await,
        StatusCode::OK
    );

    let request_body = serde_json::json!({ "uploadIds": [upload_id] });
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/clearSession")
                .header("Authorization", bearer())
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_vec(&request_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(
        app.state
            .kv
            .get_session(&upload_id)
            .await
            .unwrap()
            .is_none()
    );

    // a new session is minted now that the map entry is gone
    let params = get_upload_parameters(&app.router, "D_3000000003").await;
    assert_ne!(params["uploadId"].as_str().unwrap(), upload_id);
}
