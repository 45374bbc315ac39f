//! Ingestion run: fetch a window of papers, keep the new ones, index them
//!
//! Stages run in order `Fetching -> Deduplicating -> Persisting -> Indexing ->
//! Done`. Only an unreachable source ends a run early; every per-item failure
//! is recorded in the summary and the run moves on.

use crate::errors::Result;
use crate::indexer::{IndexOutcome, PaperIndexer};
use crate::source::{CandidatePaper, FetchWindow, PaperSource};
use crate::summary::{IngestionSummary, ItemFailure};
use chrono::Utc;
use scholarlink_common::db::models::Paper;
use scholarlink_common::{metrics, Repository};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStage {
    Fetching,
    Deduplicating,
    Persisting,
    Indexing,
    Done,
}

impl fmt::Display for IngestionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestionStage::Fetching => "fetching",
            IngestionStage::Deduplicating => "deduplicating",
            IngestionStage::Persisting => "persisting",
            IngestionStage::Indexing => "indexing",
            IngestionStage::Done => "done",
        };
        f.write_str(name)
    }
}

pub struct IngestionOrchestrator {
    source: Arc<dyn PaperSource>,
    repository: Repository,
    indexer: PaperIndexer,
    window_start_days: i64,
    window_end_days: i64,
}

impl IngestionOrchestrator {
    /// Embedding calls are paced by the indexer's throttle
    pub fn new(source: Arc<dyn PaperSource>, repository: Repository, indexer: PaperIndexer) -> Self {
        Self {
            source,
            repository,
            indexer,
            window_start_days: 2,
            window_end_days: 1,
        }
    }

    /// Days back for the trailing window, `[now - start_days, now - end_days)`
    pub fn with_window_days(mut self, start_days: i64, end_days: i64) -> Self {
        self.window_start_days = start_days;
        self.window_end_days = end_days;
        self
    }

    /// Ingest the trailing window ending now
    pub async fn run(&self) -> Result<IngestionSummary> {
        let window =
            FetchWindow::trailing(Utc::now(), self.window_start_days, self.window_end_days)?;
        self.run_window(window).await
    }

    #[instrument(skip(self, window), fields(source = self.source.name(), window = %window))]
    pub async fn run_window(&self, window: FetchWindow) -> Result<IngestionSummary> {
        let mut summary = IngestionSummary::new(window);

        enter(IngestionStage::Fetching);
        let candidates = self.source.fetch_window(&window).await.map_err(|e| {
            error!(error = %e, "Paper source unreachable, aborting ingestion run");
            e
        })?;
        summary.fetched = candidates.len();
        metrics::record_papers("fetched", candidates.len());

        enter(IngestionStage::Deduplicating);
        let fresh = self.deduplicate(candidates, &mut summary).await;

        enter(IngestionStage::Persisting);
        let saved = self.persist(fresh, &mut summary).await;

        enter(IngestionStage::Indexing);
        self.index(&saved, &mut summary).await;

        enter(IngestionStage::Done);
        metrics::record_papers("saved", summary.saved);
        metrics::record_papers("skipped", summary.skipped);
        metrics::record_papers("failed", summary.failed);

        info!(
            fetched = summary.fetched,
            saved = summary.saved,
            skipped = summary.skipped,
            failed = summary.failed,
            indexed = summary.indexed,
            index_failed = summary.index_failed,
            "Ingestion run complete"
        );

        Ok(summary)
    }

    /// Drop candidates whose exact title is already stored or repeated in this batch
    async fn deduplicate(
        &self,
        candidates: Vec<CandidatePaper>,
        summary: &mut IngestionSummary,
    ) -> Vec<CandidatePaper> {
        let mut seen = HashSet::new();
        let mut fresh = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            if !seen.insert(candidate.title.clone()) {
                debug!(title = %candidate.title, "Duplicate title within batch");
                summary.skipped += 1;
                continue;
            }

            let lookup = self.repository.find_paper_by_title(&candidate.title).await;
            match lookup {
                Ok(Some(existing)) => {
                    debug!(title = %candidate.title, paper_id = existing.id, "Paper already stored");
                    summary.skipped += 1;
                }
                Ok(None) => fresh.push(candidate),
                Err(e) => {
                    warn!(title = %candidate.title, error = %e, "Title lookup failed");
                    summary.failed += 1;
                    summary.failures.push(ItemFailure::new(
                        candidate.title,
                        IngestionStage::Deduplicating,
                        e,
                    ));
                }
            }
        }

        fresh
    }

    async fn persist(
        &self,
        fresh: Vec<CandidatePaper>,
        summary: &mut IngestionSummary,
    ) -> Vec<Paper> {
        let mut saved = Vec::with_capacity(fresh.len());

        for candidate in fresh {
            match self.repository.create_paper(candidate.to_new_paper()).await {
                Ok(paper) => {
                    debug!(paper_id = paper.id, title = %paper.title, "Paper saved");
                    summary.saved += 1;
                    saved.push(paper);
                }
                Err(e) => {
                    warn!(title = %candidate.title, error = %e, "Failed to save paper");
                    summary.failed += 1;
                    summary.failures.push(ItemFailure::new(
                        candidate.title,
                        IngestionStage::Persisting,
                        e,
                    ));
                }
            }
        }

        saved
    }

    async fn index(&self, saved: &[Paper], summary: &mut IngestionSummary) {
        for paper in saved.iter().filter(|p| p.has_abstract()) {
            match self.indexer.index(paper).await {
                Ok(IndexOutcome::Indexed { .. }) => summary.indexed += 1,
                Ok(IndexOutcome::AlreadyIndexed) => {}
                Err(e) => {
                    warn!(paper_id = paper.id, error = %e, "Failed to index paper");
                    summary.index_failed += 1;
                    summary.failures.push(ItemFailure::new(
                        format!("paper {}", paper.id),
                        IngestionStage::Indexing,
                        e,
                    ));
                }
            }
        }
    }
}

fn enter(stage: IngestionStage) {
    debug!(stage = %stage, "Ingestion stage");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PipelineError;
    use crate::testing::{self, candidate, FixedEmbedder, ScriptedSource};
    use crate::throttle::Throttle;
    use scholarlink_common::db::NewPaper;
    use std::time::{Duration, Instant};
    use scholarlink_common::{EmbeddingStore, OwnerKind};

    struct Fixture {
        orchestrator: IngestionOrchestrator,
        repository: Repository,
        store: EmbeddingStore,
        embedder: Arc<FixedEmbedder>,
    }

    async fn fixture(source: ScriptedSource, embedder: FixedEmbedder) -> Fixture {
        throttled_fixture(source, embedder, Throttle::disabled()).await
    }

    async fn throttled_fixture(
        source: ScriptedSource,
        embedder: FixedEmbedder,
        throttle: Throttle,
    ) -> Fixture {
        let pool = testing::pool().await;
        let embedder = Arc::new(embedder);
        let repository = Repository::new(pool.clone());
        let orchestrator = IngestionOrchestrator::new(
            Arc::new(source),
            repository.clone(),
            testing::throttled_indexer(&pool, embedder.clone(), throttle),
        );

        Fixture {
            orchestrator,
            repository,
            store: testing::store(&pool, embedder.as_ref()),
            embedder,
        }
    }

    #[tokio::test]
    async fn test_ingestion_saves_and_indexes_new_papers() {
        let source = ScriptedSource::returning(vec![
            candidate("Paper A", "abstract a"),
            candidate("Paper B", "abstract b"),
        ]);
        let f = fixture(source, FixedEmbedder::new(3)).await;

        let summary = f.orchestrator.run().await.unwrap();

        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.indexed, 2);
        assert!(summary.failures.is_empty());
        assert_eq!(f.repository.count_papers().await.unwrap(), 2);
        assert_eq!(f.store.indexed_vectors(OwnerKind::Paper).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_existing_and_repeated_titles_are_skipped() {
        let source = ScriptedSource::returning(vec![
            candidate("Known", "already here"),
            candidate("Fresh", "new abstract"),
            candidate("Fresh", "same title again"),
        ]);
        let f = fixture(source, FixedEmbedder::new(3)).await;
        f.repository
            .create_paper(NewPaper {
                title: "Known".into(),
                author: "Someone".into(),
                abstract_text: "older copy".into(),
                pdf_url: None,
            })
            .await
            .unwrap();

        let summary = f.orchestrator.run().await.unwrap();

        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.indexed, 1);
        assert_eq!(f.repository.count_papers().await.unwrap(), 2);

        // The stored copy is not overwritten
        let known = f.repository.find_paper_by_title("Known").await.unwrap().unwrap();
        assert_eq!(known.abstract_text, "older copy");
    }

    #[tokio::test]
    async fn test_one_failed_embedding_does_not_stop_the_run() {
        let source = ScriptedSource::returning(vec![
            candidate("First", "fine"),
            candidate("Second", "explodes"),
            candidate("Third", "also fine"),
            candidate("No Abstract", "  "),
        ]);
        let embedder = FixedEmbedder::new(3);
        embedder.fail_on("explodes");
        let f = fixture(source, embedder).await;

        let summary = f.orchestrator.run().await.unwrap();

        assert_eq!(summary.saved, 4);
        assert_eq!(summary.indexed, 2);
        assert_eq!(summary.index_failed, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].stage, "indexing");

        // Blank abstracts are never sent to the provider
        assert_eq!(f.embedder.calls(), 3);
    }

    #[tokio::test]
    async fn test_embedding_calls_are_spaced() {
        let source = ScriptedSource::returning(vec![
            candidate("One", "first abstract"),
            candidate("Two", "second abstract"),
            candidate("Three", "third abstract"),
        ]);
        let f = throttled_fixture(source, FixedEmbedder::new(3), Throttle::new(Duration::from_millis(40)))
            .await;

        let start = Instant::now();
        let summary = f.orchestrator.run().await.unwrap();

        assert_eq!(summary.indexed, 3);
        assert_eq!(f.embedder.calls(), 3);
        assert!(start.elapsed() >= Duration::from_millis(75));
    }

    #[tokio::test]
    async fn test_unreachable_source_aborts_run() {
        let f = fixture(ScriptedSource::unreachable(), FixedEmbedder::new(3)).await;

        let result = f.orchestrator.run().await;

        assert!(matches!(result, Err(PipelineError::SourceUnavailable(_))));
        assert_eq!(f.repository.count_papers().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_window_is_a_normal_outcome() {
        let f = fixture(ScriptedSource::returning(Vec::new()), FixedEmbedder::new(3)).await;

        let summary = f.orchestrator.run().await.unwrap();

        assert_eq!(summary.fetched, 0);
        assert_eq!(summary.saved, 0);
        assert!(summary.failures.is_empty());
    }
}
