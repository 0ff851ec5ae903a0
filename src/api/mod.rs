mod download;
mod io;
mod path;
mod status;
mod token;
mod upload;

use crate::config::Config;
use crate::download::DownloadEngine;
use crate::error::Result;
use crate::kv::Kv;
use crate::lock::LockManager;
use crate::models::LogicalFile;
use crate::paths::PathResolver;
use crate::sessions::SessionStore;
use crate::upload::{logical_file_from_parts, UploadEngine};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::{IntoParams, OpenApi, ToSchema};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

pub struct AppState {
    pub config: Config,
    pub resolver: PathResolver,
    pub kv: Arc<dyn Kv>,
    pub sessions: Arc<SessionStore>,
    pub locks: Arc<LockManager>,
    pub uploads: UploadEngine,
    pub downloads: DownloadEngine,
}

/// The logical file tuple as it appears in query strings and form bodies
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileParams {
    pub repository_type: String,
    pub dep_id: String,
    pub content_type: String,
    #[serde(default)]
    pub milestone: Option<String>,
    pub part_number: u32,
    pub content_format: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "next".to_string()
}

impl FileParams {
    pub fn logical_file(&self) -> Result<LogicalFile> {
        logical_file_from_parts(
            self.repository_type.clone(),
            self.dep_id.clone(),
            self.content_type.clone(),
            self.milestone.clone(),
            self.part_number,
            self.content_format.clone(),
            &self.version,
        )
    }
}

#[derive(OpenApi)]
#[openapi(
    components(
        schemas(
            crate::upload::UploadParameters,
            upload::UploadResult,
            upload::ClearSessionRequest,
            path::FileResult,
            path::DirResult,
            path::VersionResult,
            io::OperationResult,
            token::TokenResponse,
            status::ServerStatus
        )
    ),
    tags(
        (name = "upload", description = "Chunked upload endpoints"),
        (name = "download", description = "File download endpoints"),
        (name = "path", description = "Repository path queries"),
        (name = "io", description = "File management endpoints"),
        (name = "token", description = "Bearer token endpoints"),
        (name = "status", description = "Service status endpoints")
    )
)]
pub struct ApiDoc;

/// Create the API router with all routes
pub fn create_api_router(state: Arc<AppState>) -> OpenApiRouter {
    OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(routes!(upload::get_upload_parameters))
        .routes(routes!(upload::upload))
        .routes(routes!(upload::upload_status))
        .routes(routes!(upload::upload_status_by_id))
        .routes(routes!(upload::find_upload_id))
        .routes(routes!(upload::get_new_upload_id))
        .routes(routes!(upload::clear_session))
        .routes(routes!(upload::clear_kv))
        .routes(routes!(download::download))
        .routes(routes!(path::file_exists))
        .routes(routes!(path::dir_exists))
        .routes(routes!(path::latest_file_version))
        .routes(routes!(path::list_dir))
        .routes(routes!(io::copy_file))
        .routes(routes!(io::move_file))
        .routes(routes!(io::copy_dir))
        .routes(routes!(io::make_dirs))
        .routes(routes!(io::compress_dir))
        .routes(routes!(io::decompress_dir))
        .routes(routes!(token::get_token))
        .routes(routes!(token::validate_token))
        .routes(routes!(status::root))
        .routes(routes!(status::server_status))
        .with_state(state)
}
