//! Paper entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "papers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Exact title; ingestion deduplicates on it
    #[sea_orm(column_type = "Text")]
    pub title: String,

    /// Author names joined with ", "
    #[sea_orm(column_type = "Text")]
    pub author: String,

    #[sea_orm(column_name = "abstract", column_type = "Text")]
    pub abstract_text: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub pdf_url: Option<String>,

    pub created_at: DateTimeWithTimeZone,
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
    /// Whether the paper carries text that can be embedded
    pub fn has_abstract(&self) -> bool {
        !self.abstract_text.trim().is_empty()
    }
}
