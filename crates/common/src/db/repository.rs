//! Repository pattern for database operations
//!
//! CRUD access for papers, users and recommendations. Embedding vectors live
//! in [`super::EmbeddingStore`].

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};

/// Input for inserting a paper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPaper {
    pub title: String,
    pub author: String,
    pub abstract_text: String,
    pub pdf_url: Option<String>,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Paper Operations
    // ========================================================================

    /// Insert a paper and return it with its assigned id
    pub async fn create_paper(&self, paper: NewPaper) -> Result<Paper> {
        if paper.title.trim().is_empty() {
            return Err(AppError::MissingField {
                field: "title".to_string(),
            });
        }

        let now = chrono::Utc::now();

        let model = PaperActiveModel {
            title: Set(paper.title),
            author: Set(paper.author),
            abstract_text: Set(paper.abstract_text),
            pdf_url: Set(paper.pdf_url),
            created_at: Set(now.into()),
            ..Default::default()
        };

        model.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Find paper by ID
    pub async fn find_paper_by_id(&self, id: i32) -> Result<Option<Paper>> {
        PaperEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find a paper whose title matches exactly
    pub async fn find_paper_by_title(&self, title: &str) -> Result<Option<Paper>> {
        PaperEntity::find()
            .filter(PaperColumn::Title.eq(title))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// List papers, newest first. Pages start at 1.
    pub async fn list_papers(&self, page: u64, page_size: u64) -> Result<(Vec<Paper>, u64)> {
        validate_page(page, page_size)?;

        let paginator = PaperEntity::find()
            .order_by_desc(PaperColumn::CreatedAt)
            .order_by_desc(PaperColumn::Id)
            .paginate(self.read_conn(), page_size);

        let total = paginator.num_items().await?;
        let papers = paginator.fetch_page(page - 1).await?;

        Ok((papers, total))
    }

    /// Total number of stored papers
    pub async fn count_papers(&self) -> Result<u64> {
        PaperEntity::find()
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    /// Create a user
    pub async fn create_user(
        &self,
        username: &str,
        interest: &str,
        frequency: RecommendationFrequency,
    ) -> Result<User> {
        if username.trim().is_empty() {
            return Err(AppError::MissingField {
                field: "username".to_string(),
            });
        }

        let now = chrono::Utc::now();

        let user = UserActiveModel {
            username: Set(username.to_string()),
            interest: Set(interest.to_string()),
            frequency: Set(frequency.hours()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };

        user.insert(self.write_conn()).await.map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Duplicate {
                    message: format!("username '{}' is taken", username),
                }
            } else {
                e.into()
            }
        })
    }

    /// Find user by ID
    pub async fn find_user_by_id(&self, id: i32) -> Result<Option<User>> {
        UserEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// All users in id order
    pub async fn list_users(&self) -> Result<Vec<User>> {
        UserEntity::find()
            .order_by_asc(UserColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Replace a user's interest text. Returns false when the user does not exist.
    pub async fn update_user_interest(&self, id: i32, interest: &str) -> Result<bool> {
        let now: DateTimeWithTimeZone = chrono::Utc::now().into();

        let result = UserEntity::update_many()
            .col_expr(UserColumn::Interest, Expr::value(interest.to_string()))
            .col_expr(UserColumn::UpdatedAt, Expr::value(now))
            .filter(UserColumn::Id.eq(id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Change how often a user receives recommendations (hours: 1, 6, 12 or 24)
    pub async fn update_user_frequency(&self, id: i32, hours: i32) -> Result<User> {
        let frequency = RecommendationFrequency::try_from(hours)?;

        let mut user: UserActiveModel = UserEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or(AppError::UserNotFound { id })?
            .into();

        user.frequency = Set(frequency.hours());
        user.updated_at = Set(chrono::Utc::now().into());

        user.update(self.write_conn()).await.map_err(Into::into)
    }

    // ========================================================================
    // Recommendation Operations
    // ========================================================================

    /// Insert or replace the content generated for (user, paper)
    pub async fn upsert_recommendation(
        &self,
        user_id: i32,
        paper_id: i32,
        content: &str,
    ) -> Result<Recommendation> {
        let now = chrono::Utc::now();

        let model = RecommendationActiveModel {
            user_id: Set(user_id),
            paper_id: Set(paper_id),
            content: Set(content.to_string()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };

        RecommendationEntity::insert(model)
            .on_conflict(
                OnConflict::columns([RecommendationColumn::UserId, RecommendationColumn::PaperId])
                    .update_columns([RecommendationColumn::Content, RecommendationColumn::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(self.write_conn())
            .await?;

        RecommendationEntity::find()
            .filter(RecommendationColumn::UserId.eq(user_id))
            .filter(RecommendationColumn::PaperId.eq(paper_id))
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::Internal {
                message: format!(
                    "recommendation for user {} and paper {} vanished after upsert",
                    user_id, paper_id
                ),
            })
    }

    /// Find the recommendation for (user, paper)
    pub async fn find_recommendation(
        &self,
        user_id: i32,
        paper_id: i32,
    ) -> Result<Option<Recommendation>> {
        RecommendationEntity::find()
            .filter(RecommendationColumn::UserId.eq(user_id))
            .filter(RecommendationColumn::PaperId.eq(paper_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Recommendations for a user, most recently updated first
    pub async fn recommendations_for_user(&self, user_id: i32) -> Result<Vec<Recommendation>> {
        RecommendationEntity::find()
            .filter(RecommendationColumn::UserId.eq(user_id))
            .order_by_desc(RecommendationColumn::UpdatedAt)
            .order_by_asc(RecommendationColumn::PaperId)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}

fn validate_page(page: u64, page_size: u64) -> Result<()> {
    if page == 0 {
        return Err(AppError::Validation {
            message: "page numbers start at 1".to_string(),
            field: Some("page".to_string()),
        });
    }
    if page_size == 0 {
        return Err(AppError::Validation {
            message: "page size must be at least 1".to_string(),
            field: Some("page_size".to_string()),
        });
    }
    Ok(())
}

fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    matches!(
        err.sql_err(),
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
    )
}
