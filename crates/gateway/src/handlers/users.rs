//! User interest handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::runs::RunAcceptedResponse;
use crate::AppState;
use scholarlink_common::errors::{AppError, Result};

#[derive(Debug, Deserialize)]
pub struct UpdateInterestRequest {
    pub interest: String,
}

/// Replace a user's interest text.
///
/// The cached interest vector is dropped immediately and a refresh run is
/// queued; the response carries that run's ticket.
pub async fn update_interest(
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
    Json(body): Json<UpdateInterestRequest>,
) -> Result<(StatusCode, Json<RunAcceptedResponse>)> {
    if body.interest.trim().is_empty() {
        return Err(AppError::Validation {
            message: "interest must not be blank".to_string(),
            field: Some("interest".to_string()),
        });
    }

    let ticket = state
        .pipeline
        .update_user_interest(user_id, &body.interest)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(ticket.into())))
}
