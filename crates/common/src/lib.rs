//! ScholarLink Common Library
//!
//! Shared code for the ScholarLink services including:
//! - Configuration management
//! - Error types and handling
//! - Database models, CRUD repository and the embedding store
//! - Embedding client and provider abstraction
//! - Similarity ranking
//! - Metrics and observability

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod metrics;
pub mod ranking;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, EmbeddingStore, OwnerKind, Repository};
pub use embeddings::{EmbeddingClient, EmbeddingProvider};
pub use errors::{AppError, Result};
pub use ranking::{ScoredCandidate, SimilarityRanker};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension (output width of the default model)
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
