use crate::api::AppState;
use crate::auth::AuthorizedClient;
use crate::error::Result;
use crate::fileops;
use crate::upload::logical_file_from_parts;
use axum::extract::State;
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Source and target tuples for file copy/move
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilePairForm {
    pub source_repository_type: String,
    pub source_dep_id: String,
    pub source_content_type: String,
    #[serde(default)]
    pub source_milestone: Option<String>,
    pub source_part_number: u32,
    pub source_content_format: String,
    #[serde(default = "default_source_version")]
    pub source_version: String,

    pub target_repository_type: String,
    pub target_dep_id: String,
    pub target_content_type: String,
    #[serde(default)]
    pub target_milestone: Option<String>,
    pub target_part_number: u32,
    pub target_content_format: String,
    #[serde(default = "default_target_version")]
    pub target_version: String,

    #[serde(default)]
    pub overwrite: bool,
}

fn default_source_version() -> String {
    "latest".to_string()
}

fn default_target_version() -> String {
    "next".to_string()
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirPairForm {
    pub source_repository_type: String,
    pub source_dep_id: String,
    pub target_repository_type: String,
    pub target_dep_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirForm {
    pub repository_type: String,
    pub dep_id: String,
}

impl FilePairForm {
    fn pair(&self) -> Result<(crate::models::LogicalFile, crate::models::LogicalFile)> {
        let source = logical_file_from_parts(
            self.source_repository_type.clone(),
            self.source_dep_id.clone(),
            self.source_content_type.clone(),
            self.source_milestone.clone(),
            self.source_part_number,
            self.source_content_format.clone(),
            &self.source_version,
        )?;
        let target = logical_file_from_parts(
            self.target_repository_type.clone(),
            self.target_dep_id.clone(),
            self.target_content_type.clone(),
            self.target_milestone.clone(),
            self.target_part_number,
            self.target_content_format.clone(),
            &self.target_version,
        )?;
        Ok((source, target))
    }
}

/// Copy a versioned file between logical locations
#[utoipa::path(
    post,
    path = "/copy-file",
    responses(
        (status = 200, description = "File copied", body = OperationResult),
        (status = 404, description = "Source not found")
    ),
    tag = "io"
)]
pub async fn copy_file(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    Form(form): Form<FilePairForm>,
) -> Result<Json<OperationResult>> {
    let (source, target) = form.pair()?;
    let path = fileops::copy_file(&state.resolver, &source, &target).await?;
    Ok(Json(OperationResult {
        success: true,
        path: Some(path),
    }))
}

/// Move a versioned file between logical locations
#[utoipa::path(
    post,
    path = "/move-file",
    responses(
        (status = 200, description = "File moved", body = OperationResult),
        (status = 403, description = "Target exists and overwrite not requested"),
        (status = 404, description = "Source not found")
    ),
    tag = "io"
)]
pub async fn move_file(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    Form(form): Form<FilePairForm>,
) -> Result<Json<OperationResult>> {
    let (source, target) = form.pair()?;
    let path = fileops::move_file(&state.resolver, &source, &target, form.overwrite).await?;
    Ok(Json(OperationResult {
        success: true,
        path: Some(path),
    }))
}

/// Recursively copy a deposit directory
#[utoipa::path(
    post,
    path = "/copy-dir",
    responses(
        (status = 200, description = "Directory copied", body = OperationResult),
        (status = 404, description = "Source directory not found")
    ),
    tag = "io"
)]
pub async fn copy_dir(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    Form(form): Form<DirPairForm>,
) -> Result<Json<OperationResult>> {
    fileops::copy_dir(
        &state.resolver,
        &form.source_repository_type,
        &form.source_dep_id,
        &form.target_repository_type,
        &form.target_dep_id,
    )
    .await?;
    Ok(Json(OperationResult {
        success: true,
        path: None,
    }))
}

/// Create the deposit directory
#[utoipa::path(
    post,
    path = "/make-dirs",
    responses((status = 200, description = "Directory created", body = OperationResult)),
    tag = "io"
)]
pub async fn make_dirs(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    Form(form): Form<DirForm>,
) -> Result<Json<OperationResult>> {
    let dir = fileops::make_dirs(&state.resolver, &form.repository_type, &form.dep_id).await?;
    Ok(Json(OperationResult {
        success: true,
        path: Some(state.resolver.relative_to_root(&dir)?),
    }))
}

/// Bundle a deposit directory into a tar.gz, removing the original
#[utoipa::path(
    post,
    path = "/compress-dir",
    responses(
        (status = 200, description = "Directory compressed", body = OperationResult),
        (status = 404, description = "Directory not found")
    ),
    tag = "io"
)]
pub async fn compress_dir(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    Form(form): Form<DirForm>,
) -> Result<Json<OperationResult>> {
    fileops::compress_dir(&state.resolver, &form.repository_type, &form.dep_id).await?;
    Ok(Json(OperationResult {
        success: true,
        path: None,
    }))
}

/// Expand a previously compressed deposit directory
#[utoipa::path(
    post,
    path = "/decompress-dir",
    responses(
        (status = 200, description = "Directory expanded", body = OperationResult),
        (status = 404, description = "Bundle not found")
    ),
    tag = "io"
)]
pub async fn decompress_dir(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    Form(form): Form<DirForm>,
) -> Result<Json<OperationResult>> {
    let dir =
        fileops::decompress_dir(&state.resolver, &form.repository_type, &form.dep_id).await?;
    Ok(Json(OperationResult {
        success: true,
        path: Some(state.resolver.relative_to_root(&dir)?),
    }))
}
