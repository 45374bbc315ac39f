//! Paper index handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::AppState;
use scholarlink_common::errors::Result;
use scholarlink_pipeline::IndexOutcome;

#[derive(Debug, Serialize)]
pub struct IndexStatusResponse {
    pub paper_id: i32,
    pub indexed: bool,
}

#[derive(Debug, Serialize)]
pub struct IndexPaperResponse {
    pub paper_id: i32,
    #[serde(flatten)]
    pub outcome: IndexOutcome,
}

/// Whether a paper's abstract has a stored embedding.
/// Unknown ids report `false` rather than 404.
pub async fn get_index_status(
    State(state): State<AppState>,
    Path(paper_id): Path<i32>,
) -> Result<Json<IndexStatusResponse>> {
    let indexed = state.pipeline.is_paper_indexed(paper_id).await?;
    Ok(Json(IndexStatusResponse { paper_id, indexed }))
}

/// Embed a paper's abstract now and wait for the result
pub async fn index_paper(
    State(state): State<AppState>,
    Path(paper_id): Path<i32>,
) -> Result<Json<IndexPaperResponse>> {
    let outcome = state.pipeline.index_paper(paper_id).await?;

    tracing::info!(paper_id, outcome = ?outcome, "Index request served");

    Ok(Json(IndexPaperResponse { paper_id, outcome }))
}
