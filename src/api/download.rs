use crate::api::{AppState, FileParams};
use crate::download::DownloadPayload;
use crate::error::Result;
use crate::models::HashKind;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    pub repository_type: String,
    pub dep_id: String,
    pub content_type: String,
    #[serde(default)]
    pub milestone: Option<String>,
    #[serde(default = "default_part")]
    pub part_number: u32,
    pub content_format: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub hash_type: Option<HashKind>,
    #[serde(default)]
    pub chunk_size: Option<u64>,
    #[serde(default)]
    pub chunk_index: Option<u64>,
}

fn default_part() -> u32 {
    1
}

fn default_version() -> String {
    "latest".to_string()
}

/// Serve a versioned file, either whole (with digest headers) or as one
/// byte-range chunk. This route is not gated by the bearer token so plain
/// HTML forms can fetch files.
#[utoipa::path(
    get,
    path = "/download",
    params(DownloadQuery),
    responses(
        (status = 200, description = "File contents"),
        (status = 404, description = "Unknown tuple or file not on disk")
    ),
    tag = "download"
)]
pub async fn download(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response> {
    let file = FileParams {
        repository_type: query.repository_type,
        dep_id: query.dep_id,
        content_type: query.content_type,
        milestone: query.milestone,
        part_number: query.part_number,
        content_format: query.content_format,
        version: query.version,
    }
    .logical_file()?;

    let payload = state
        .downloads
        .download(&file, query.hash_type, query.chunk_size, query.chunk_index)
        .await?;

    let response = match payload {
        DownloadPayload::Chunk { data } => (
            [(header::CONTENT_TYPE, "application/octet-stream".to_string())],
            data,
        )
            .into_response(),
        DownloadPayload::Whole {
            data,
            mime,
            file_name,
            digest: (kind, hex),
        } => {
            let headers = vec![
                (header::CONTENT_TYPE.to_string(), mime.to_string()),
                (
                    header::CONTENT_DISPOSITION.to_string(),
                    format!("attachment; filename=\"{}\"", file_name),
                ),
                ("rcsb_hash_type".to_string(), kind.as_str().to_string()),
                ("rcsb_hexdigest".to_string(), hex),
            ];
            let mut response = data.into_response();
            for (name, value) in headers {
                if let (Ok(name), Ok(value)) = (
                    axum::http::HeaderName::try_from(name),
                    axum::http::HeaderValue::try_from(value),
                ) {
                    response.headers_mut().insert(name, value);
                }
            }
            response
        }
    };
    Ok(response)
}
