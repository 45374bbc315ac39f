//! Embedding store
//!
//! Persistent vector cache keyed by (owner kind, owner id). Every write is an
//! upsert on the composite primary key, so one owner never has two rows.

use crate::db::models::{EmbeddingActiveModel, EmbeddingColumn, EmbeddingEntity, OwnerKind};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use chrono::{DateTime, FixedOffset};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// A cached vector with its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub owner_kind: OwnerKind,
    pub owner_id: i32,
    pub vector: Vec<f32>,
    pub dimension: usize,
    pub model: String,
    pub source_hash: Option<String>,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

impl StoredEmbedding {
    /// Whether this vector was computed from `text`
    pub fn matches_source(&self, text: &str) -> bool {
        self.source_hash.as_deref() == Some(source_fingerprint(text).as_str())
    }
}

/// SHA-256 hex of the trimmed text
pub fn source_fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.trim().as_bytes()))
}

#[derive(Clone)]
pub struct EmbeddingStore {
    pool: DbPool,
    model: String,
    dimension: usize,
}

impl EmbeddingStore {
    /// `dimension` is the output width of `model`; writes of any other width are rejected
    pub fn new(pool: DbPool, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            pool,
            model: model.into(),
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Existence check, no vector is loaded
    pub async fn is_indexed(&self, kind: OwnerKind, owner_id: i32) -> Result<bool> {
        let count = EmbeddingEntity::find_by_id((kind.as_str().to_string(), owner_id))
            .count(self.read_conn())
            .await?;

        Ok(count > 0)
    }

    pub async fn get(&self, kind: OwnerKind, owner_id: i32) -> Result<Option<StoredEmbedding>> {
        let row = EmbeddingEntity::find_by_id((kind.as_str().to_string(), owner_id))
            .one(self.read_conn())
            .await?;

        row.map(|row| -> Result<StoredEmbedding> {
            let vector: Vec<f32> = serde_json::from_str(&row.vector)?;
            Ok(StoredEmbedding {
                owner_kind: kind,
                owner_id: row.owner_id,
                dimension: vector.len(),
                vector,
                model: row.model,
                source_hash: row.source_hash,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        })
        .transpose()
    }

    /// Insert or replace the vector for an owner.
    ///
    /// `source_text` is fingerprinted so later readers can tell whether the
    /// vector still belongs to the owner's current text.
    pub async fn upsert(
        &self,
        kind: OwnerKind,
        owner_id: i32,
        vector: &[f32],
        source_text: Option<&str>,
    ) -> Result<StoredEmbedding> {
        if vector.is_empty() {
            return Err(AppError::Validation {
                message: format!("refusing to store an empty vector for {} {}", kind, owner_id),
                field: Some("vector".to_string()),
            });
        }
        if vector.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Validation {
                message: format!("vector for {} {} has non-finite components", kind, owner_id),
                field: Some("vector".to_string()),
            });
        }

        let now = chrono::Utc::now();
        let row = EmbeddingActiveModel {
            owner_kind: Set(kind.as_str().to_string()),
            owner_id: Set(owner_id),
            vector: Set(serde_json::to_string(vector)?),
            dimension: Set(self.dimension as i32),
            model: Set(self.model.clone()),
            source_hash: Set(source_text.map(source_fingerprint)),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        EmbeddingEntity::insert(row)
            .on_conflict(
                OnConflict::columns([EmbeddingColumn::OwnerKind, EmbeddingColumn::OwnerId])
                    .update_columns([
                        EmbeddingColumn::Vector,
                        EmbeddingColumn::Dimension,
                        EmbeddingColumn::Model,
                        EmbeddingColumn::SourceHash,
                        EmbeddingColumn::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.write_conn())
            .await?;

        crate::metrics::record_embedding_stored(kind.as_str());
        debug!(owner_kind = %kind, owner_id, dimension = self.dimension, "Embedding stored");

        // Read back from the primary so the result reflects this write
        let stored = EmbeddingEntity::find_by_id((kind.as_str().to_string(), owner_id))
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::Internal {
                message: format!("embedding for {} {} vanished after upsert", kind, owner_id),
            })?;

        Ok(StoredEmbedding {
            owner_kind: kind,
            owner_id,
            vector: vector.to_vec(),
            dimension: vector.len(),
            model: stored.model,
            source_hash: stored.source_hash,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        })
    }

    /// Remove an owner's vector. Returns false if there was none.
    pub async fn delete(&self, kind: OwnerKind, owner_id: i32) -> Result<bool> {
        let result = EmbeddingEntity::delete_by_id((kind.as_str().to_string(), owner_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// All `(owner_id, vector)` pairs for a kind, ordered by owner id
    pub async fn indexed_vectors(&self, kind: OwnerKind) -> Result<Vec<(i32, Vec<f32>)>> {
        let rows = EmbeddingEntity::find()
            .filter(EmbeddingColumn::OwnerKind.eq(kind.as_str()))
            .order_by_asc(EmbeddingColumn::OwnerId)
            .all(self.read_conn())
            .await?;

        let vectors = rows
            .into_iter()
            .filter_map(|row| match row.parse_vector() {
                Some(vector) => Some((row.owner_id, vector)),
                None => {
                    warn!(owner_kind = %kind, owner_id = row.owner_id, "Skipping unreadable stored vector");
                    None
                }
            })
            .collect();

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(dimension: usize) -> EmbeddingStore {
        let pool = DbPool::in_memory().await.unwrap();
        EmbeddingStore::new(pool, "test-model", dimension)
    }

    #[tokio::test]
    async fn test_upsert_twice_keeps_one_row() {
        let store = store(3).await;

        assert!(!store.is_indexed(OwnerKind::Paper, 1).await.unwrap());

        let first = store
            .upsert(OwnerKind::Paper, 1, &[1.0, 0.0, 0.0], None)
            .await
            .unwrap();
        let second = store
            .upsert(OwnerKind::Paper, 1, &[0.0, 1.0, 0.0], None)
            .await
            .unwrap();

        assert!(store.is_indexed(OwnerKind::Paper, 1).await.unwrap());
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(EmbeddingEntity::find().count(store.read_conn()).await.unwrap(), 1);

        let rows = store.indexed_vectors(OwnerKind::Paper).await.unwrap();
        assert_eq!(rows, vec![(1, vec![0.0, 1.0, 0.0])]);

        let stored = store.get(OwnerKind::Paper, 1).await.unwrap().unwrap();
        assert_eq!(stored.vector, vec![0.0, 1.0, 0.0]);
        assert_eq!(stored.dimension, 3);
        assert_eq!(stored.model, "test-model");
    }

    #[tokio::test]
    async fn test_owner_kinds_are_separate() {
        let store = store(2).await;
        store
            .upsert(OwnerKind::User, 7, &[0.6, 0.8], Some("graph neural networks"))
            .await
            .unwrap();

        assert!(store.is_indexed(OwnerKind::User, 7).await.unwrap());
        assert!(!store.is_indexed(OwnerKind::Paper, 7).await.unwrap());
        assert!(store.indexed_vectors(OwnerKind::Paper).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimension_and_empty_vectors() {
        let store = store(3).await;

        let err = store
            .upsert(OwnerKind::Paper, 1, &[1.0, 0.0], None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));

        let err = store.upsert(OwnerKind::Paper, 1, &[], None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert!(!store.is_indexed(OwnerKind::Paper, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_source_hash_tracks_text() {
        let store = store(2).await;
        let stored = store
            .upsert(OwnerKind::User, 1, &[1.0, 0.0], Some("  compilers "))
            .await
            .unwrap();

        assert!(stored.matches_source("compilers"));
        assert!(!stored.matches_source("databases"));
        assert_eq!(stored.source_hash, Some(source_fingerprint("compilers")));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = store(2).await;
        store.upsert(OwnerKind::User, 3, &[1.0, 0.0], None).await.unwrap();

        assert!(store.delete(OwnerKind::User, 3).await.unwrap());
        assert!(!store.delete(OwnerKind::User, 3).await.unwrap());
        assert!(store.get(OwnerKind::User, 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_indexed_vectors_ordered_by_owner() {
        let store = store(2).await;
        for id in [5, 2, 9] {
            store
                .upsert(OwnerKind::Paper, id, &[id as f32, 1.0], None)
                .await
                .unwrap();
        }

        let ids: Vec<i32> = store
            .indexed_vectors(OwnerKind::Paper)
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }
}
