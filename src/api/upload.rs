use crate::api::{AppState, FileParams};
use crate::auth::AuthorizedClient;
use crate::error::{Error, Result};
use crate::kv::Table;
use crate::models::HashKind;
use crate::sessions::SessionStore;
use crate::upload::{ChunkRequest, UploadParameters};
use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

/// Standard upload response envelope
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub success: bool,
    pub status_code: u16,
    pub status_message: String,
}

impl UploadResult {
    fn ok() -> Self {
        UploadResult {
            success: true,
            status_code: 200,
            status_message: "Success".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct UploadParametersQuery {
    pub repository_type: String,
    pub dep_id: String,
    pub content_type: String,
    #[serde(default)]
    pub milestone: Option<String>,
    pub part_number: u32,
    pub content_format: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_true")]
    pub allow_overwrite: bool,
    #[serde(default)]
    pub resumable: bool,
}

fn default_version() -> String {
    "next".to_string()
}

fn default_true() -> bool {
    true
}

impl UploadParametersQuery {
    fn file_params(&self) -> FileParams {
        FileParams {
            repository_type: self.repository_type.clone(),
            dep_id: self.dep_id.clone(),
            content_type: self.content_type.clone(),
            milestone: self.milestone.clone(),
            part_number: self.part_number,
            content_format: self.content_format.clone(),
            version: self.version.clone(),
        }
    }
}

/// Open or resume an upload session and return the target path, the chunk
/// index to start from and the session id
#[utoipa::path(
    get,
    path = "/getUploadParameters",
    params(UploadParametersQuery),
    responses(
        (status = 200, description = "Upload parameters", body = UploadParameters),
        (status = 400, description = "Invalid file parameters"),
        (status = 403, description = "Target exists and overwrite is prohibited")
    ),
    tag = "upload"
)]
pub async fn get_upload_parameters(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    Query(query): Query<UploadParametersQuery>,
) -> Result<Json<UploadParameters>> {
    let file = query.file_params().logical_file()?;
    let parameters = state
        .uploads
        .upload_parameters(&file, query.allow_overwrite, query.resumable)
        .await?;
    Ok(Json(parameters))
}

/// Accept one chunk of a sequential upload
#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = Vec<u8>, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Chunk accepted", body = UploadResult),
        (status = 400, description = "Validation or integrity failure"),
        (status = 403, description = "Overwrite prohibited"),
        (status = 405, description = "Upload protocol error")
    ),
    tag = "upload"
)]
pub async fn upload(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    multipart: Multipart,
) -> Result<Json<UploadResult>> {
    let request = parse_chunk_request(multipart).await?;
    state.uploads.upload(request).await?;
    Ok(Json(UploadResult::ok()))
}

/// Session row for the active upload bound to the given file parameters
#[utoipa::path(
    get,
    path = "/uploadStatus",
    params(FileParams),
    responses(
        (status = 200, description = "Session fields, or null when no active session")
    ),
    tag = "upload"
)]
pub async fn upload_status(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    Query(query): Query<FileParams>,
) -> Result<Json<Option<HashMap<String, String>>>> {
    let file = query.logical_file()?;
    let Some(upload_id) = crate::upload::find_upload_id(&state.sessions, &file).await? else {
        return Ok(Json(None));
    };
    Ok(Json(state.kv.get_session(&upload_id).await?))
}

/// Session row by upload id
#[utoipa::path(
    get,
    path = "/uploadStatus/{upload_id}",
    params(("upload_id" = String, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session fields, or null when unknown")
    ),
    tag = "upload"
)]
pub async fn upload_status_by_id(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    Path(upload_id): Path<String>,
) -> Result<Json<Option<HashMap<String, String>>>> {
    Ok(Json(state.kv.get_session(&upload_id).await?))
}

/// Find the active upload id for the given file parameters
#[utoipa::path(
    post,
    path = "/findUploadId",
    responses(
        (status = 200, description = "Upload id, or null when no active session")
    ),
    tag = "upload"
)]
pub async fn find_upload_id(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    axum::Form(form): axum::Form<FileParams>,
) -> Result<Json<Option<String>>> {
    let file = form.logical_file()?;
    Ok(Json(
        crate::upload::find_upload_id(&state.sessions, &file).await?,
    ))
}

/// Mint a fresh upload id
#[utoipa::path(
    get,
    path = "/getNewUploadId",
    responses((status = 200, description = "New upload id", body = String)),
    tag = "upload"
)]
pub async fn get_new_upload_id(
    _client: AuthorizedClient,
) -> Result<Json<String>> {
    Ok(Json(SessionStore::new_upload_id()))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClearSessionRequest {
    pub upload_ids: Vec<String>,
}

/// Remove the session and map rows for the given upload ids
#[utoipa::path(
    post,
    path = "/clearSession",
    request_body = ClearSessionRequest,
    responses((status = 200, description = "Rows removed", body = UploadResult)),
    tag = "upload"
)]
pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    Json(request): Json<ClearSessionRequest>,
) -> Result<Json<UploadResult>> {
    for upload_id in &request.upload_ids {
        state.kv.clear_session(upload_id).await?;
        state.kv.clear_map_value(upload_id).await?;
    }
    Ok(Json(UploadResult::ok()))
}

/// Purge both KV tables (test and operations tooling)
#[utoipa::path(
    post,
    path = "/clearKv",
    responses((status = 200, description = "Tables cleared", body = UploadResult)),
    tag = "upload"
)]
pub async fn clear_kv(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
) -> Result<Json<UploadResult>> {
    state.kv.clear_table(Table::Sessions).await?;
    state.kv.clear_table(Table::Map).await?;
    Ok(Json(UploadResult::ok()))
}

/// Collect the multipart form into a chunk request
async fn parse_chunk_request(mut multipart: Multipart) -> Result<ChunkRequest> {
    let mut chunk: Option<Bytes> = None;
    let mut fields: HashMap<String, String> = HashMap::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| Error::Validation {
        msg: format!("invalid multipart request: {}", e),
    })? {
        let Some(name) = field.name().map(|n| n.to_string()) else {
            continue;
        };
        if name == "chunk" {
            chunk = Some(field.bytes().await.map_err(|e| Error::Validation {
                msg: format!("could not read chunk body: {}", e),
            })?);
        } else {
            let value = field.text().await.map_err(|e| Error::Validation {
                msg: format!("could not read field {}: {}", name, e),
            })?;
            fields.insert(name, value);
        }
    }

    let chunk = chunk.ok_or_else(|| Error::Validation {
        msg: "missing chunk part".to_string(),
    })?;

    let hash_type = match fields.get("hashType").filter(|v| !v.is_empty()) {
        Some(raw) => Some(HashKind::parse(raw)?),
        None => None,
    };

    Ok(ChunkRequest {
        chunk,
        chunk_size: require_u64(&fields, "chunkSize")?,
        chunk_index: require_u64(&fields, "chunkIndex")?,
        expected_chunks: require_u64(&fields, "expectedChunks")?,
        upload_id: require(&fields, "uploadId")?,
        hash_type,
        hash_digest: fields.get("hashDigest").filter(|v| !v.is_empty()).cloned(),
        file_path: require(&fields, "filePath")?,
        file_size: optional_u64(&fields, "fileSize")?,
        file_extension: fields
            .get("fileExtension")
            .filter(|v| !v.is_empty())
            .cloned(),
        decompress: flag(&fields, "decompress"),
        allow_overwrite: flag(&fields, "allowOverwrite"),
        resumable: flag(&fields, "resumable"),
        extract_chunk: flag(&fields, "extractChunk"),
    })
}

fn require(fields: &HashMap<String, String>, name: &str) -> Result<String> {
    fields.get(name).cloned().ok_or_else(|| Error::Validation {
        msg: format!("missing form field: {}", name),
    })
}

fn require_u64(fields: &HashMap<String, String>, name: &str) -> Result<u64> {
    require(fields, name)?.parse().map_err(|_| Error::Validation {
        msg: format!("form field {} is not a number", name),
    })
}

fn optional_u64(fields: &HashMap<String, String>, name: &str) -> Result<Option<u64>> {
    match fields.get(name).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::Validation {
                msg: format!("form field {} is not a number", name),
            }),
        None => Ok(None),
    }
}

fn flag(fields: &HashMap<String, String>, name: &str) -> bool {
    fields
        .get(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}
