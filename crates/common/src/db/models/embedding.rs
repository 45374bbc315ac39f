//! Embedding entity: one cached vector per (owner kind, owner id)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of record an embedding belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Paper,
    User,
}

impl OwnerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OwnerKind::Paper => "paper",
            OwnerKind::User => "user",
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OwnerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paper" => Ok(OwnerKind::Paper),
            "user" => Ok(OwnerKind::User),
            other => Err(format!("unknown owner kind: {}", other)),
        }
    }
}

/// The composite primary key doubles as the upsert conflict target
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "embeddings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "String(StringLen::N(16))")]
    pub owner_kind: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub owner_id: i32,

    /// Vector stored as a JSON array, e.g. "[0.12,-0.4,...]"
    #[sea_orm(column_type = "Text")]
    pub vector: String,

    pub dimension: i32,

    /// Embedding model that produced the vector
    #[sea_orm(column_type = "Text")]
    pub model: String,

    /// SHA-256 of the source text, used to detect changed text
    #[sea_orm(column_type = "Text", nullable)]
    pub source_hash: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parse the stored vector
    pub fn parse_vector(&self) -> Option<Vec<f32>> {
        serde_json::from_str(&self.vector).ok()
    }
}
