//! Event trigger used by the CRUD layer after a successful mutation.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::hub::{Envelope, Event, ProjectId};
use crate::metrics::SubmitMetrics;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct PublishEventResponse {
    pub accepted: bool,
    #[serde(rename = "type")]
    pub event_type: String,
    pub project_id: ProjectId,
    pub timestamp: DateTime<Utc>,
}

/// POST /api/v1/events - Dispatch an event to the connections of its project
#[tracing::instrument(
    name = "http.publish_event",
    skip(state, envelope),
    fields(event_type = %envelope.event_type, project_id = envelope.project_id)
)]
pub async fn publish_event(
    State(state): State<AppState>,
    Json(envelope): Json<Envelope>,
) -> Result<(StatusCode, Json<PublishEventResponse>)> {
    let event = Event::try_from(envelope).map_err(|e| {
        SubmitMetrics::record_decode_failure("http");
        AppError::from(e)
    })?;

    let response = PublishEventResponse {
        accepted: true,
        event_type: event.kind.as_str().to_string(),
        project_id: event.project_id,
        timestamp: Utc::now(),
    };

    state.hub.dispatch(event).await?;

    Ok((StatusCode::ACCEPTED, Json(response)))
}
