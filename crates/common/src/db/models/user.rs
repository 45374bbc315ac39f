//! User entity

use crate::errors::AppError;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How often a user wants new recommendations, in hours
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum RecommendationFrequency {
    Hourly,
    EverySixHours,
    TwiceDaily,
    Daily,
}

impl RecommendationFrequency {
    pub fn hours(self) -> i32 {
        match self {
            RecommendationFrequency::Hourly => 1,
            RecommendationFrequency::EverySixHours => 6,
            RecommendationFrequency::TwiceDaily => 12,
            RecommendationFrequency::Daily => 24,
        }
    }
}

impl Default for RecommendationFrequency {
    fn default() -> Self {
        RecommendationFrequency::Daily
    }
}

impl TryFrom<i32> for RecommendationFrequency {
    type Error = AppError;

    fn try_from(hours: i32) -> Result<Self, Self::Error> {
        match hours {
            1 => Ok(RecommendationFrequency::Hourly),
            6 => Ok(RecommendationFrequency::EverySixHours),
            12 => Ok(RecommendationFrequency::TwiceDaily),
            24 => Ok(RecommendationFrequency::Daily),
            other => Err(AppError::Validation {
                message: format!("frequency must be one of 1, 6, 12 or 24 hours, got {}", other),
                field: Some("frequency".to_string()),
            }),
        }
    }
}

impl From<RecommendationFrequency> for i32 {
    fn from(frequency: RecommendationFrequency) -> Self {
        frequency.hours()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(column_type = "Text", unique)]
    pub username: String,

    /// Free-text research interest, handed verbatim to the embedding provider
    #[sea_orm(column_type = "Text")]
    pub interest: String,

    /// Recommendation frequency in hours
    pub frequency: i32,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::recommendation::Entity")]
    Recommendations,
}

impl Related<super::recommendation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Recommendations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Interest text with surrounding whitespace removed, if any is left
    pub fn interest_text(&self) -> Option<&str> {
        let trimmed = self.interest.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    /// Stored frequency, falling back to daily for values outside the allowed set
    pub fn recommendation_frequency(&self) -> RecommendationFrequency {
        RecommendationFrequency::try_from(self.frequency).unwrap_or_default()
    }
}
