use axum::Router;
use depo_file_repo::api::AppState;
use depo_file_repo::config::Config;
use depo_file_repo::{build_router, build_state};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_BYPASS_TOKEN: &str = "test-bypass-token";
pub const BOUNDARY: &str = "depo-test-boundary";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub repository_dir: PathBuf,
    pub session_dir: PathBuf,
}

/// Build the service against temp directories with test-friendly lock timing
pub async fn setup_test_app() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path().to_path_buf();

    // leak so the directories persist for the duration of the test
    std::mem::forget(temp_dir);

    let mut config = Config::default();
    config.storage.repository_dir = temp_path.join("repository");
    config.storage.session_dir = temp_path.join("sessions");
    config.storage.shared_lock_dir = temp_path.join("shared-locks");
    config.storage.chunk_size = byte_unit::Byte::from_u64(1024 * 1024);
    config.kv.file_path = temp_path.join("kv.sqlite");
    config.lock.timeout_secs = 5;
    config.lock.second_traversal_secs = 0;
    config.auth.bypass_token = Some(TEST_BYPASS_TOKEN.to_string());
    config.validate().unwrap();

    depo_file_repo::sweeper::ensure_directories(&config)
        .await
        .unwrap();

    let state = build_state(config).await.unwrap();
    let router = build_router(state.clone());

    TestApp {
        router,
        state,
        repository_dir: temp_path.join("repository"),
        session_dir: temp_path.join("sessions"),
    }
}

pub fn bearer() -> String {
    format!("Bearer {}", TEST_BYPASS_TOKEN)
}

/// Assemble a multipart/form-data body with text fields plus one binary
/// `chunk` part
pub fn multipart_body(fields: &[(&str, String)], chunk: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"chunk\"; filename=\"chunk\"\r\n\
          Content-Type: application/octet-stream\r\n\r\n",
    );
    body.extend_from_slice(chunk);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

/// Standard chunk-field set for one upload request
#[allow(clippy::too_many_arguments)]
pub fn chunk_fields(
    chunk_size: u64,
    chunk_index: u64,
    expected_chunks: u64,
    upload_id: &str,
    file_path: &str,
    resumable: bool,
    extra: &[(&str, String)],
) -> Vec<(&'static str, String)> {
    let mut fields: Vec<(&'static str, String)> = vec![
        ("chunkSize", chunk_size.to_string()),
        ("chunkIndex", chunk_index.to_string()),
        ("expectedChunks", expected_chunks.to_string()),
        ("uploadId", upload_id.to_string()),
        ("filePath", file_path.to_string()),
        ("resumable", resumable.to_string()),
    ];
    for (name, value) in extra {
        let name: &'static str = match *name {
            "hashType" => "hashType",
            "hashDigest" => "hashDigest",
            "fileSize" => "fileSize",
            "fileExtension" => "fileExtension",
            "decompress" => "decompress",
            "allowOverwrite" => "allowOverwrite",
            "extractChunk" => "extractChunk",
            other => panic!("unexpected extra field {}", other),
        };
        fields.push((name, value.clone()));
    }
    fields
}

/// MD5 hex digest of a byte slice (mirrors what the client sends)
pub fn md5_hex(data: &[u8]) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
