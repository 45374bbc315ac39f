//! ScholarLink pipeline
//!
//! Two runs keep the recommendation index fresh:
//! - ingestion fetches yesterday's papers, stores the new ones and embeds
//!   their abstracts
//! - recommendation embeds every user's interest, ranks the indexed papers
//!   against it and generates content for the best matches
//!
//! [`Pipeline`] is the entry point the HTTP layer talks to.

pub mod dispatcher;
pub mod errors;
pub mod generation;
pub mod indexer;
pub mod ingestion;
pub mod recommendation;
pub mod source;
pub mod summary;
pub mod throttle;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{RunDispatcher, RunKind, RunOutcome, RunReport, RunTicket};
pub use errors::{GenerationError, PipelineError};
pub use indexer::{IndexOutcome, PaperIndexer};
pub use ingestion::IngestionOrchestrator;
pub use recommendation::RecommendationOrchestrator;

use async_trait::async_trait;
use dispatcher::RunHandler;
use generation::ContentGenerator;
use recommendation::RecommendationThrottles;
use scholarlink_common::config::AppConfig;
use scholarlink_common::embeddings::create_embedding_provider;
use scholarlink_common::errors::{AppError, Result};
use scholarlink_common::{DbPool, EmbeddingClient, EmbeddingStore, OwnerKind, Repository};
use source::PaperSource;
use std::sync::Arc;
use throttle::Throttle;
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

/// External collaborators the pipeline is wired with
pub struct Collaborators {
    pub source: Arc<dyn PaperSource>,
    pub embeddings: EmbeddingClient,
    pub generator: Arc<dyn ContentGenerator>,
}

impl Collaborators {
    /// Build the providers named in the configuration
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let provider = create_embedding_provider(&config.embedding)?;
        Ok(Self {
            source: source::create_paper_source(&config.paper_source)?,
            embeddings: EmbeddingClient::new(provider),
            generator: generation::create_generator(&config.generation)?,
        })
    }
}

/// Executes dispatched runs
struct PipelineRunner {
    ingestion: IngestionOrchestrator,
    recommendation: RecommendationOrchestrator,
}

#[async_trait]
impl RunHandler for PipelineRunner {
    async fn handle(&self, kind: RunKind) -> RunOutcome {
        let result = match kind {
            RunKind::Ingestion => self.ingestion.run().await.map(RunOutcome::Ingested),
            RunKind::Recommendations => self.recommendation.run().await.map(RunOutcome::Recommended),
            RunKind::RefreshInterest { user_id } => self
                .recommendation
                .refresh_interest(user_id)
                .await
                .map(|refreshed| RunOutcome::InterestRefreshed { user_id, refreshed }),
        };

        result.unwrap_or_else(|e| {
            error!(kind = %kind, error = %e, "Run aborted");
            RunOutcome::Failed {
                error: e.to_string(),
            }
        })
    }
}

pub struct Pipeline {
    repository: Repository,
    store: EmbeddingStore,
    indexer: PaperIndexer,
    dispatcher: RunDispatcher,
}

impl Pipeline {
    /// Wire the orchestrators and start the run worker. Must be called inside
    /// a Tokio runtime.
    pub fn new(pool: DbPool, config: &AppConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            source,
            embeddings,
            generator,
        } = collaborators;

        let repository = Repository::new(pool.clone());
        let store = EmbeddingStore::new(pool, embeddings.model_name(), embeddings.dimension());

        // One limiter per provider, shared by every path that calls it
        let embedding_throttle = Throttle::new(config.pipeline.item_delay());
        let indexer = PaperIndexer::new(
            repository.clone(),
            store.clone(),
            embeddings.clone(),
            embedding_throttle.clone(),
        );

        let ingestion = IngestionOrchestrator::new(source, repository.clone(), indexer.clone())
            .with_window_days(
                config.paper_source.window_start_days,
                config.paper_source.window_end_days,
            );

        let recommendation = RecommendationOrchestrator::new(
            repository.clone(),
            store.clone(),
            embeddings,
            generator,
            RecommendationThrottles {
                embedding: embedding_throttle,
                generation: Throttle::new(config.pipeline.generation_delay()),
            },
            config.pipeline.top_n,
        );

        let runner = Arc::new(PipelineRunner {
            ingestion,
            recommendation,
        });
        let dispatcher = RunDispatcher::start(runner, config.pipeline.run_queue_capacity);

        info!(
            model = store.model(),
            dimension = store.dimension(),
            top_n = config.pipeline.top_n,
            "Pipeline ready"
        );

        Self {
            repository,
            store,
            indexer,
            dispatcher,
        }
    }

    pub async fn is_paper_indexed(&self, paper_id: i32) -> Result<bool> {
        self.indexer.is_paper_indexed(paper_id).await
    }

    /// Embed one paper now, on the caller's task
    pub async fn index_paper(&self, paper_id: i32) -> Result<IndexOutcome> {
        self.indexer.index_paper(paper_id).await
    }

    pub fn run_ingestion(&self) -> Result<RunTicket> {
        self.dispatcher.submit(RunKind::Ingestion)
    }

    pub fn run_recommendations(&self) -> Result<RunTicket> {
        self.dispatcher.submit(RunKind::Recommendations)
    }

    /// Store a new interest text, drop the cached vector and schedule a refresh
    #[instrument(skip(self, interest))]
    pub async fn update_user_interest(&self, user_id: i32, interest: &str) -> Result<RunTicket> {
        if !self.repository.update_user_interest(user_id, interest).await? {
            return Err(AppError::UserNotFound { id: user_id });
        }

        self.store.delete(OwnerKind::User, user_id).await?;
        self.dispatcher.submit(RunKind::RefreshInterest { user_id })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunReport> {
        self.dispatcher.subscribe()
    }

    pub async fn ping(&self) -> Result<()> {
        self.repository.ping().await
    }

    /// Stop accepting runs and wait for the ones in flight
    pub async fn shutdown(self) {
        self.dispatcher.shutdown().await;
    }
}
