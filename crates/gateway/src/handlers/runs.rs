//! Run trigger handlers
//!
//! Both triggers return as soon as the run is queued. The run's result is
//! only visible in logs and metrics.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;
use scholarlink_common::errors::Result;
use scholarlink_pipeline::RunTicket;

#[derive(Debug, Serialize)]
pub struct RunAcceptedResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub ticket: RunTicket,
}

impl From<RunTicket> for RunAcceptedResponse {
    fn from(ticket: RunTicket) -> Self {
        Self {
            status: "accepted",
            ticket,
        }
    }
}

pub async fn trigger_ingestion(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<RunAcceptedResponse>)> {
    let ticket = state.pipeline.run_ingestion()?;
    tracing::info!(run_id = %ticket.run_id, "Ingestion run queued");
    Ok((StatusCode::ACCEPTED, Json(ticket.into())))
}

pub async fn trigger_recommendations(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<RunAcceptedResponse>)> {
    let ticket = state.pipeline.run_recommendations()?;
    tracing::info!(run_id = %ticket.run_id, "Recommendation run queued");
    Ok((StatusCode::ACCEPTED, Json(ticket.into())))
}
