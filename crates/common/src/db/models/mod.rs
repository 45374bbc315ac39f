//! SeaORM entity models
//!
//! Database entities for ScholarLink

mod embedding;
mod paper;
mod recommendation;
mod user;

pub use paper::{
    Entity as PaperEntity,
    Model as Paper,
    ActiveModel as PaperActiveModel,
    Column as PaperColumn,
};

pub use user::{
    Entity as UserEntity,
    Model as User,
    ActiveModel as UserActiveModel,
    Column as UserColumn,
    RecommendationFrequency,
};

pub use embedding::{
    Entity as EmbeddingEntity,
    Model as Embedding,
    ActiveModel as EmbeddingActiveModel,
    Column as EmbeddingColumn,
    OwnerKind,
};

pub use recommendation::{
    Entity as RecommendationEntity,
    Model as Recommendation,
    ActiveModel as RecommendationActiveModel,
    Column as RecommendationColumn,
};
