//! Database layer for ScholarLink
//!
//! Provides:
//! - SeaORM entity models
//! - Repository pattern for paper, user and recommendation records
//! - The embedding store (vector cache keyed by owner)
//! - Connection pool management

mod embedding_store;
pub mod models;
mod repository;
pub mod schema;

pub use embedding_store::{source_fingerprint, EmbeddingStore, StoredEmbedding};
pub use models::OwnerKind;
pub use repository::{NewPaper, Repository};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");

        let primary = Database::connect(connect_options(&config.url, config))
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect to primary: {}", e),
            })?;

        // Connect to replica if configured
        let replica = if let Some(ref read_url) = config.read_url {
            info!("Connecting to read replica...");

            let replica_conn = Database::connect(connect_options(read_url, config))
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Failed to connect to replica: {}", e),
                })?;

            Some(replica_conn)
        } else {
            None
        };

        info!("Database connections established");

        let pool = Self { primary, replica };

        if config.auto_create_schema {
            schema::create_tables(pool.write()).await?;
        }

        Ok(pool)
    }

    /// Private in-memory SQLite database with the schema already created
    pub async fn in_memory() -> Result<Self> {
        Self::new(&DatabaseConfig::in_memory()).await
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary
            .ping()
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Primary ping failed: {}", e),
            })?;

        if let Some(ref replica) = self.replica {
            replica
                .ping()
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Replica ping failed: {}", e),
                })?;
        }

        Ok(())
    }
}

fn connect_options(url: &str, config: &DatabaseConfig) -> ConnectOptions {
    let mut opts = ConnectOptions::new(url);
    opts.connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(config.log_statements);

    // Every pooled connection to an in-memory SQLite URL opens its own empty database
    if config.is_in_memory() {
        opts.max_connections(1).min_connections(1);
    } else {
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections);
    }

    opts
}
