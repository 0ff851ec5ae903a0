use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ServerStatus {
    pub running: bool,
    pub version: &'static str,
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service banner", body = ServerStatus)),
    tag = "status"
)]
pub async fn root() -> Json<ServerStatus> {
    Json(ServerStatus {
        running: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Service status report
#[utoipa::path(
    get,
    path = "/status",
    responses((status = 200, description = "Status report", body = ServerStatus)),
    tag = "status"
)]
pub async fn server_status() -> Json<ServerStatus> {
    Json(ServerStatus {
        running: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}
