//! Recommendation run: rank indexed papers for every user and generate content
//! for the best matches.
//!
//! Users are processed one after another. A user's failure, or a failure on
//! one of their papers, is recorded and the run continues.

use crate::errors::{PipelineError, Result};
use crate::generation::{ContentGenerator, GenerationRequest};
use crate::summary::{ItemFailure, RecommendationSummary, UserOutcome, UserStatus};
use crate::throttle::Throttle;
use scholarlink_common::db::models::User;
use scholarlink_common::errors::AppError;
use scholarlink_common::{
    metrics, EmbeddingClient, EmbeddingStore, OwnerKind, Repository, SimilarityRanker,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Throttles for the two rate-limited providers a run talks to
#[derive(Clone)]
pub struct RecommendationThrottles {
    pub embedding: Throttle,
    pub generation: Throttle,
}

impl RecommendationThrottles {
    pub fn disabled() -> Self {
        Self {
            embedding: Throttle::disabled(),
            generation: Throttle::disabled(),
        }
    }
}

pub struct RecommendationOrchestrator {
    repository: Repository,
    store: EmbeddingStore,
    embeddings: EmbeddingClient,
    generator: Arc<dyn ContentGenerator>,
    throttles: RecommendationThrottles,
    top_n: usize,
}

impl RecommendationOrchestrator {
    pub fn new(
        repository: Repository,
        store: EmbeddingStore,
        embeddings: EmbeddingClient,
        generator: Arc<dyn ContentGenerator>,
        throttles: RecommendationThrottles,
        top_n: usize,
    ) -> Self {
        Self {
            repository,
            store,
            embeddings,
            generator,
            throttles,
            top_n,
        }
    }

    /// Recommend for every user
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<RecommendationSummary> {
        let users = self.repository.list_users().await?;
        let candidates = self.store.indexed_vectors(OwnerKind::Paper).await?;

        let mut summary = RecommendationSummary {
            users: users.len(),
            ..Default::default()
        };

        if candidates.is_empty() {
            warn!(users = users.len(), "No indexed papers, nothing to recommend");
            return Ok(summary);
        }

        debug!(users = users.len(), candidates = candidates.len(), "Ranking papers");

        for user in &users {
            let outcome = self.recommend_for(user, &candidates).await;
            summary.record(outcome);
        }

        info!(
            users = summary.users,
            skipped_users = summary.skipped_users,
            failed_users = summary.failed_users,
            generated = summary.generated,
            generation_failed = summary.generation_failed,
            "Recommendation run complete"
        );

        Ok(summary)
    }

    /// Re-embed a user's interest if the cached vector no longer matches it.
    /// Returns false for a blank interest.
    #[instrument(skip(self))]
    pub async fn refresh_interest(&self, user_id: i32) -> Result<bool> {
        let user = self
            .repository
            .find_user_by_id(user_id)
            .await?
            .ok_or(AppError::UserNotFound { id: user_id })?;

        match user.interest_text() {
            Some(interest) => {
                self.resolve_interest(&user, interest).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn recommend_for(&self, user: &User, candidates: &[(i32, Vec<f32>)]) -> UserOutcome {
        let Some(interest) = user.interest_text() else {
            debug!(user_id = user.id, "Blank interest, skipping user");
            return UserOutcome::skipped(user.id);
        };

        let query = match self.resolve_interest(user, interest).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Interest vector unavailable");
                let failure = ItemFailure::new(format!("user {}", user.id), "interest", e);
                return UserOutcome::failed(user.id, failure);
            }
        };

        let ranked = match SimilarityRanker::top_n(
            &query,
            candidates.iter().map(|(id, vector)| (*id, vector.as_slice())),
            self.top_n,
        ) {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Ranking failed");
                let failure = ItemFailure::new(format!("user {}", user.id), "ranking", e);
                return UserOutcome::failed(user.id, failure);
            }
        };

        let mut outcome = UserOutcome {
            user_id: user.id,
            status: UserStatus::Completed,
            recommended: Vec::with_capacity(ranked.len()),
            failures: Vec::new(),
        };

        for pick in ranked {
            match self.generate(user.id, pick.id).await {
                Ok(()) => {
                    debug!(
                        user_id = user.id,
                        paper_id = pick.id,
                        score = pick.score,
                        "Recommendation stored"
                    );
                    outcome.recommended.push(pick.id);
                }
                Err(e) => {
                    warn!(user_id = user.id, paper_id = pick.id, error = %e, "Generation failed");
                    outcome
                        .failures
                        .push(ItemFailure::new(format!("paper {}", pick.id), "generation", e));
                }
            }
        }

        outcome
    }

    /// Cached interest vector when it was computed from `interest`, otherwise
    /// a fresh one, stored before it is used
    async fn resolve_interest(&self, user: &User, interest: &str) -> Result<Vec<f32>> {
        if self.store.is_indexed(OwnerKind::User, user.id).await? {
            if let Some(cached) = self.store.get(OwnerKind::User, user.id).await? {
                if cached.matches_source(interest) {
                    return Ok(cached.vector);
                }
                debug!(user_id = user.id, "Interest changed since last embedding");
            }
        }

        self.throttles.embedding.wait().await;
        let vector = self.embeddings.embed(interest).await?;
        if vector.is_empty() {
            return Err(PipelineError::App(AppError::MissingText {
                owner: format!("user {}", user.id),
                field: "interest".to_string(),
            }));
        }

        self.store
            .upsert(OwnerKind::User, user.id, &vector, Some(interest))
            .await?;

        Ok(vector)
    }

    async fn generate(&self, user_id: i32, paper_id: i32) -> Result<()> {
        let paper = self
            .repository
            .find_paper_by_id(paper_id)
            .await?
            .ok_or(AppError::PaperNotFound { id: paper_id })?;

        self.throttles.generation.wait().await;

        let start = Instant::now();
        let result = self.generator.generate(&GenerationRequest::from(&paper)).await;
        metrics::record_generation(start.elapsed().as_secs_f64(), result.is_ok());

        let content = result?;
        self.repository
            .upsert_recommendation(user_id, paper.id, &content)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GenerationError;
    use crate::testing::{self, FixedEmbedder, RecordingGenerator};
    use scholarlink_common::db::models::RecommendationFrequency;
    use scholarlink_common::db::NewPaper;
    use scholarlink_common::DbPool;

    const INTEREST: &str = "graph neural networks";

    struct Fixture {
        pool: DbPool,
        repository: Repository,
        store: EmbeddingStore,
        embedder: Arc<FixedEmbedder>,
        generator: Arc<RecordingGenerator>,
    }

    impl Fixture {
        async fn new(embedder: FixedEmbedder) -> Self {
            let pool = testing::pool().await;
            let embedder = Arc::new(embedder);
            Self {
                repository: Repository::new(pool.clone()),
                store: testing::store(&pool, embedder.as_ref()),
                pool,
                embedder,
                generator: Arc::new(RecordingGenerator::default()),
            }
        }

        fn orchestrator(&self, top_n: usize) -> RecommendationOrchestrator {
            self.throttled_orchestrator(top_n, RecommendationThrottles::disabled())
        }

        fn throttled_orchestrator(
            &self,
            top_n: usize,
            throttles: RecommendationThrottles,
        ) -> RecommendationOrchestrator {
            RecommendationOrchestrator::new(
                self.repository.clone(),
                self.store.clone(),
                EmbeddingClient::new(self.embedder.clone()),
                self.generator.clone(),
                throttles,
                top_n,
            )
        }

        async fn indexed_paper(&self, title: &str, vector: Vec<f32>) -> i32 {
            let paper = self
                .repository
                .create_paper(NewPaper {
                    title: title.to_string(),
                    author: "Author".to_string(),
                    abstract_text: format!("About {}", title),
                    pdf_url: None,
                })
                .await
                .unwrap();
            self.store
                .upsert(OwnerKind::Paper, paper.id, &vector, None)
                .await
                .unwrap();
            paper.id
        }

        async fn user(&self, name: &str, interest: &str) -> i32 {
            self.repository
                .create_user(name, interest, RecommendationFrequency::Daily)
                .await
                .unwrap()
                .id
        }
    }

    fn embedder() -> FixedEmbedder {
        FixedEmbedder::new(3)
            .with_vector(INTEREST, vec![0.1, 0.9, 0.1])
            .with_vector("databases", vec![0.0, 0.0, 1.0])
    }

    #[tokio::test]
    async fn test_best_match_gets_recommended() {
        let f = Fixture::new(embedder()).await;
        let _a = f.indexed_paper("Paper A", vec![1.0, 0.0, 0.0]).await;
        let b = f.indexed_paper("Paper B", vec![0.0, 1.0, 0.0]).await;
        let _c = f.indexed_paper("Paper C", vec![0.0, 0.0, 1.0]).await;
        let user = f.user("ada", INTEREST).await;

        let summary = f.orchestrator(1).run().await.unwrap();

        assert_eq!(summary.generated, 1);
        let recommendations = f.repository.recommendations_for_user(user).await.unwrap();
        assert_eq!(recommendations.len(), 1);
        assert_eq!(recommendations[0].paper_id, b);
        assert!(!recommendations[0].content.trim().is_empty());
        assert_eq!(f.generator.titles(), vec!["Paper B"]);
    }

    #[tokio::test]
    async fn test_interest_vector_is_cached_before_use() {
        let f = Fixture::new(embedder()).await;
        f.indexed_paper("Paper A", vec![1.0, 0.0, 0.0]).await;
        let user = f.user("ada", INTEREST).await;
        let orchestrator = f.orchestrator(1);

        orchestrator.run().await.unwrap();
        orchestrator.run().await.unwrap();

        // Second run reuses the stored vector
        assert_eq!(f.embedder.calls(), 1);
        let cached = f.store.get(OwnerKind::User, user).await.unwrap().unwrap();
        assert!(cached.matches_source(INTEREST));

        // Regenerating overwrites rather than duplicating
        assert_eq!(f.repository.recommendations_for_user(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_interest_change_regenerates_vector() {
        let f = Fixture::new(embedder()).await;
        let a = f.indexed_paper("Paper A", vec![0.0, 1.0, 0.0]).await;
        let c = f.indexed_paper("Paper C", vec![0.0, 0.0, 1.0]).await;
        let user = f.user("ada", INTEREST).await;
        let orchestrator = f.orchestrator(1);

        orchestrator.run().await.unwrap();
        assert!(f.repository.find_recommendation(user, a).await.unwrap().is_some());

        // Change the text directly; the old vector is still indexed
        f.repository.update_user_interest(user, "databases").await.unwrap();
        assert!(f.store.is_indexed(OwnerKind::User, user).await.unwrap());

        orchestrator.run().await.unwrap();

        assert_eq!(f.embedder.calls(), 2);
        let cached = f.store.get(OwnerKind::User, user).await.unwrap().unwrap();
        assert!(cached.matches_source("databases"));
        assert_eq!(cached.vector, vec![0.0, 0.0, 1.0]);
        assert!(f.repository.find_recommendation(user, c).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let f = Fixture::new(embedder()).await;
        f.indexed_paper("Paper A", vec![1.0, 0.5, 0.0]).await;
        f.indexed_paper("Paper B", vec![0.0, 1.0, 0.0]).await;
        f.generator.fail_for(
            "Paper B",
            GenerationError::from_status(429, "rate limit reached"),
        );

        let blank = f.user("blank", "   ").await;
        let broken = f.user("broken", "quantum").await;
        f.embedder.fail_on("quantum");
        let ok = f.user("ok", INTEREST).await;

        let summary = f.orchestrator(2).run().await.unwrap();

        assert_eq!(summary.users, 3);
        assert_eq!(summary.skipped_users, 1);
        assert_eq!(summary.failed_users, 1);
        assert_eq!(summary.generated, 1);
        assert_eq!(summary.generation_failed, 1);

        let status = |id: i32| {
            summary
                .outcomes
                .iter()
                .find(|o| o.user_id == id)
                .map(|o| o.status)
        };
        assert_eq!(status(blank), Some(UserStatus::Skipped));
        assert_eq!(status(broken), Some(UserStatus::Failed));
        assert_eq!(status(ok), Some(UserStatus::Completed));

        // Both picks were attempted even though the best one failed
        assert_eq!(f.generator.titles(), vec!["Paper B", "Paper A"]);
        assert_eq!(f.repository.recommendations_for_user(ok).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_papers_without_embeddings_are_not_ranked() {
        let f = Fixture::new(embedder()).await;
        f.repository
            .create_paper(NewPaper {
                title: "Unindexed".into(),
                author: "Author".into(),
                abstract_text: "Never embedded".into(),
                pdf_url: None,
            })
            .await
            .unwrap();
        f.user("ada", INTEREST).await;

        let summary = f.orchestrator(3).run().await.unwrap();

        assert_eq!(summary.generated, 0);
        assert!(f.generator.titles().is_empty());
        assert!(f.pool.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_generation_calls_are_spaced() {
        let f = Fixture::new(embedder()).await;
        f.indexed_paper("Paper A", vec![1.0, 0.0, 0.0]).await;
        f.indexed_paper("Paper B", vec![0.0, 1.0, 0.0]).await;
        f.indexed_paper("Paper C", vec![0.0, 0.0, 1.0]).await;
        let user = f.user("ada", INTEREST).await;
        let orchestrator = f.throttled_orchestrator(
            3,
            RecommendationThrottles {
                embedding: Throttle::disabled(),
                generation: Throttle::new(std::time::Duration::from_millis(40)),
            },
        );

        let start = Instant::now();
        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.generated, 3);
        assert_eq!(f.generator.titles().len(), 3);
        assert_eq!(f.repository.recommendations_for_user(user).await.unwrap().len(), 3);
        assert!(start.elapsed() >= std::time::Duration::from_millis(75));
    }

    #[tokio::test]
    async fn test_refresh_interest() {
        let f = Fixture::new(embedder()).await;
        let user = f.user("ada", INTEREST).await;
        let blank = f.user("blank", "").await;
        let orchestrator = f.orchestrator(1);

        assert!(orchestrator.refresh_interest(user).await.unwrap());
        assert!(f.store.is_indexed(OwnerKind::User, user).await.unwrap());
        assert!(!orchestrator.refresh_interest(blank).await.unwrap());

        let err = orchestrator.refresh_interest(999).await.unwrap_err();
        assert!(matches!(err, PipelineError::App(AppError::UserNotFound { id: 999 })));
    }
}
