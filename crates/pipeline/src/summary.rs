//! Run summaries
//!
//! Per-item failures are collected here instead of being swallowed, so every
//! run reports what it did and what it could not do.

use crate::source::FetchWindow;
use serde::{Deserialize, Serialize};

/// One item that failed and was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Paper title, paper id or user id, whichever identifies the item
    pub key: String,
    pub stage: String,
    pub reason: String,
}

impl ItemFailure {
    pub fn new(key: impl Into<String>, stage: impl ToString, reason: impl ToString) -> Self {
        Self {
            key: key.into(),
            stage: stage.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub window: FetchWindow,
    pub fetched: usize,
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub indexed: usize,
    pub index_failed: usize,
    pub failures: Vec<ItemFailure>,
}

impl IngestionSummary {
    pub fn new(window: FetchWindow) -> Self {
        Self {
            window,
            fetched: 0,
            saved: 0,
            skipped: 0,
            failed: 0,
            indexed: 0,
            index_failed: 0,
            failures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Blank interest, nothing to rank against
    Skipped,
    Completed,
    /// Interest vector or ranking unavailable
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOutcome {
    pub user_id: i32,
    pub status: UserStatus,
    /// Papers whose recommendation was written, best match first
    pub recommended: Vec<i32>,
    pub failures: Vec<ItemFailure>,
}

impl UserOutcome {
    pub fn skipped(user_id: i32) -> Self {
        Self {
            user_id,
            status: UserStatus::Skipped,
            recommended: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn failed(user_id: i32, failure: ItemFailure) -> Self {
        Self {
            user_id,
            status: UserStatus::Failed,
            recommended: Vec::new(),
            failures: vec![failure],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationSummary {
    pub users: usize,
    pub skipped_users: usize,
    pub failed_users: usize,
    pub generated: usize,
    pub generation_failed: usize,
    pub outcomes: Vec<UserOutcome>,
}

impl RecommendationSummary {
    /// Fold one user's outcome into the totals
    pub fn record(&mut self, outcome: UserOutcome) {
        match outcome.status {
            UserStatus::Skipped => self.skipped_users += 1,
            UserStatus::Failed => self.failed_users += 1,
            UserStatus::Completed => {
                self.generated += outcome.recommended.len();
                self.generation_failed += outcome.failures.len();
            }
        }
        self.outcomes.push(outcome);
    }
}
