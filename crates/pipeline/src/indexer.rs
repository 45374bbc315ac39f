//! Single-paper indexing

use crate::throttle::Throttle;
use scholarlink_common::db::models::Paper;
use scholarlink_common::errors::{AppError, Result};
use scholarlink_common::{EmbeddingClient, EmbeddingStore, OwnerKind, Repository};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexOutcome {
    AlreadyIndexed,
    Indexed { dimension: usize },
}

/// Embeds a paper's abstract into the store unless it is there already.
///
/// Every embedding call waits on `throttle`, which is shared with the other
/// callers of the same provider.
#[derive(Clone)]
pub struct PaperIndexer {
    repository: Repository,
    store: EmbeddingStore,
    embeddings: EmbeddingClient,
    throttle: Throttle,
}

impl PaperIndexer {
    pub fn new(
        repository: Repository,
        store: EmbeddingStore,
        embeddings: EmbeddingClient,
        throttle: Throttle,
    ) -> Self {
        Self {
            repository,
            store,
            embeddings,
            throttle,
        }
    }

    pub async fn is_paper_indexed(&self, paper_id: i32) -> Result<bool> {
        self.store.is_indexed(OwnerKind::Paper, paper_id).await
    }

    #[instrument(skip(self))]
    pub async fn index_paper(&self, paper_id: i32) -> Result<IndexOutcome> {
        let paper = self
            .repository
            .find_paper_by_id(paper_id)
            .await?
            .ok_or(AppError::PaperNotFound { id: paper_id })?;

        self.index(&paper).await
    }

    /// Index an already loaded paper
    pub async fn index(&self, paper: &Paper) -> Result<IndexOutcome> {
        if self.store.is_indexed(OwnerKind::Paper, paper.id).await? {
            debug!(paper_id = paper.id, "Paper already indexed");
            return Ok(IndexOutcome::AlreadyIndexed);
        }

        if !paper.has_abstract() {
            return Err(AppError::MissingText {
                owner: format!("paper {}", paper.id),
                field: "abstract".to_string(),
            });
        }

        self.throttle.wait().await;
        let vector = self.embeddings.embed(&paper.abstract_text).await?;
        let stored = self
            .store
            .upsert(OwnerKind::Paper, paper.id, &vector, Some(&paper.abstract_text))
            .await?;

        debug!(paper_id = paper.id, dimension = stored.dimension, "Paper indexed");
        Ok(IndexOutcome::Indexed {
            dimension: stored.dimension,
        })
    }
}
