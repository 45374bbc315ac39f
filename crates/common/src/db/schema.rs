//! Schema bootstrap
//!
//! Tables are derived from the entity definitions, so SQLite (tests, local
//! runs) and Postgres get the same layout without hand-written DDL.

use super::models::{
    EmbeddingEntity, PaperEntity, RecommendationColumn, RecommendationEntity, UserEntity,
};
use crate::errors::Result;
use sea_orm::sea_query::{Index, IndexCreateStatement, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info};

/// Create every table and index that does not exist yet
pub async fn create_tables(conn: &DatabaseConnection) -> Result<()> {
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);

    // Parents first so foreign keys resolve
    let tables = [
        table(&schema, PaperEntity),
        table(&schema, UserEntity),
        table(&schema, EmbeddingEntity),
        table(&schema, RecommendationEntity),
    ];

    for stmt in &tables {
        conn.execute(backend.build(stmt)).await?;
    }

    for stmt in &indexes() {
        conn.execute(backend.build(stmt)).await?;
    }

    info!(backend = ?backend, "Database schema ready");
    Ok(())
}

fn table<E: EntityTrait>(schema: &Schema, entity: E) -> TableCreateStatement {
    debug!(table = entity.table_name(), "Ensuring table");
    schema
        .create_table_from_entity(entity)
        .if_not_exists()
        .to_owned()
}

fn indexes() -> Vec<IndexCreateStatement> {
    vec![
        // At most one recommendation per (user, paper)
        Index::create()
            .if_not_exists()
            .name("idx_recommendations_user_paper")
            .table(RecommendationEntity)
            .col(RecommendationColumn::UserId)
            .col(RecommendationColumn::PaperId)
            .unique()
            .to_owned(),
        Index::create()
            .if_not_exists()
            .name("idx_recommendations_user")
            .table(RecommendationEntity)
            .col(RecommendationColumn::UserId)
            .to_owned(),
    ]
}
