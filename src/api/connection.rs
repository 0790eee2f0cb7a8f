//! Connection introspection endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::error::Result;
use crate::hub::{ConnectionInfo, ProjectId};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct ProjectConnectionsResponse {
    pub project_id: ProjectId,
    pub connections: Vec<ConnectionInfo>,
    pub total_connections: usize,
}

/// GET /api/v1/projects/{project_id}/connections - Connections scoped to a project
pub async fn project_connections(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> Result<Json<ProjectConnectionsResponse>> {
    let connections = state.hub.connections(project_id).await?;
    let total = connections.len();

    Ok(Json(ProjectConnectionsResponse {
        project_id,
        connections,
        total_connections: total,
    }))
}
