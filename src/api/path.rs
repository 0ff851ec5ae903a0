use crate::api::{AppState, FileParams};
use crate::auth::AuthorizedClient;
use crate::error::{Error, Result};
use axum::extract::{Query, State};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    pub success: bool,
    /// Repository-relative path of the file
    pub path: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirResult {
    pub success: bool,
    pub path: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VersionResult {
    pub success: bool,
    pub version: u32,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirParams {
    pub repository_type: String,
    pub dep_id: String,
}

/// Whether the versioned file exists on disk
#[utoipa::path(
    post,
    path = "/file-exists",
    responses(
        (status = 200, description = "File exists", body = FileResult),
        (status = 404, description = "File does not exist")
    ),
    tag = "path"
)]
pub async fn file_exists(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    Form(form): Form<FileParams>,
) -> Result<Json<FileResult>> {
    let file = form.logical_file()?;
    let Some(path) = state.resolver.resolve(&file)? else {
        return Err(Error::NotFound {
            msg: "could not resolve file from parameters".to_string(),
        });
    };
    if !path.exists() {
        return Err(Error::NotFound {
            msg: format!(
                "file does not exist: {}",
                state.resolver.relative_to_root(&path)?
            ),
        });
    }
    Ok(Json(FileResult {
        success: true,
        path: state.resolver.relative_to_root(&path)?,
    }))
}

/// Whether the deposit directory exists
#[utoipa::path(
    post,
    path = "/dir-exists",
    responses(
        (status = 200, description = "Directory exists", body = DirResult),
        (status = 404, description = "Directory does not exist")
    ),
    tag = "path"
)]
pub async fn dir_exists(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    Form(form): Form<DirParams>,
) -> Result<Json<DirResult>> {
    let dir = state.resolver.dir_path(&form.repository_type, &form.dep_id)?;
    if !dir.exists() {
        return Err(Error::NotFound {
            msg: format!(
                "directory does not exist: {}/{}",
                form.repository_type, form.dep_id
            ),
        });
    }
    Ok(Json(DirResult {
        success: true,
        path: state.resolver.relative_to_root(&dir)?,
    }))
}

/// Highest version number on disk for the logical file
#[utoipa::path(
    get,
    path = "/latest-file-version",
    params(FileParams),
    responses(
        (status = 200, description = "Latest version", body = VersionResult),
        (status = 404, description = "No versions on disk")
    ),
    tag = "path"
)]
pub async fn latest_file_version(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    Query(query): Query<FileParams>,
) -> Result<Json<VersionResult>> {
    let file = query.logical_file()?;
    match state.resolver.latest_version(&file)? {
        Some(version) => Ok(Json(VersionResult {
            success: true,
            version,
        })),
        None => Err(Error::NotFound {
            msg: "no versions found for file parameters".to_string(),
        }),
    }
}

/// File names inside the deposit directory, sorted
#[utoipa::path(
    get,
    path = "/list-dir",
    params(DirParams),
    responses(
        (status = 200, description = "Directory listing", body = Vec<String>),
        (status = 404, description = "Directory does not exist")
    ),
    tag = "path"
)]
pub async fn list_dir(
    State(state): State<Arc<AppState>>,
    _client: AuthorizedClient,
    Query(query): Query<DirParams>,
) -> Result<Json<Vec<String>>> {
    let dir = state.resolver.dir_path(&query.repository_type, &query.dep_id)?;
    if !dir.exists() {
        return Err(Error::NotFound {
            msg: format!(
                "directory does not exist: {}/{}",
                query.repository_type, query.dep_id
            ),
        });
    }
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        // temp files are session-private
        if !name.starts_with("._") {
            names.push(name);
        }
    }
    names.sort();
    Ok(Json(names))
}
