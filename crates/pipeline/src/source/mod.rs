//! External paper sources
//!
//! A source answers one question: which papers were submitted within a time
//! window. Results carry no guarantee of completeness and may be empty.

mod arxiv;

pub use arxiv::{parse_feed, ArxivSource};

use crate::errors::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use scholarlink_common::config::PaperSourceConfig;
use scholarlink_common::db::NewPaper;
use scholarlink_common::errors::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Half-open submission window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(PipelineError::App(AppError::Validation {
                message: format!("fetch window start {} is not before end {}", start, end),
                field: Some("window".to_string()),
            }));
        }
        Ok(Self { start, end })
    }

    /// `[now - start_days, now - end_days)`, e.g. 2 and 1 for "yesterday's batch"
    pub fn trailing(now: DateTime<Utc>, start_days: i64, end_days: i64) -> Result<Self> {
        Self::new(now - Duration::days(start_days), now - Duration::days(end_days))
    }

    /// Both bounds as `YYYYMMDDHHMM`
    pub fn compact_bounds(&self) -> (String, String) {
        (
            self.start.format("%Y%m%d%H%M").to_string(),
            self.end.format("%Y%m%d%H%M").to_string(),
        )
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} TO {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Paper metadata as reported by a source, before persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePaper {
    pub title: String,
    pub authors: Vec<String>,
    pub abstract_text: String,
    pub pdf_url: Option<String>,
}

impl CandidatePaper {
    pub fn author_line(&self) -> String {
        self.authors.join(", ")
    }

    pub fn to_new_paper(&self) -> NewPaper {
        NewPaper {
            title: self.title.clone(),
            author: self.author_line(),
            abstract_text: self.abstract_text.clone(),
            pdf_url: self.pdf_url.clone(),
        }
    }
}

#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Candidates submitted within `window`.
    ///
    /// An unreachable source is [`PipelineError::SourceUnavailable`]; an empty
    /// list means the window simply had no papers.
    async fn fetch_window(&self, window: &FetchWindow) -> Result<Vec<CandidatePaper>>;

    fn name(&self) -> &str;
}

/// Create the configured paper source
pub fn create_paper_source(config: &PaperSourceConfig) -> Result<Arc<dyn PaperSource>> {
    Ok(Arc::new(ArxivSource::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_trailing_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 8, 30, 0).unwrap();
        let window = FetchWindow::trailing(now, 2, 1).unwrap();

        let (start, end) = window.compact_bounds();
        assert_eq!(start, "202403080830");
        assert_eq!(end, "202403090830");
    }

    #[test]
    fn test_window_must_be_ordered() {
        let now = Utc::now();
        tokio_test::assert_err!(FetchWindow::trailing(now, 1, 2));
        tokio_test::assert_err!(FetchWindow::trailing(now, 1, 1));
    }

    #[test]
    fn test_candidate_to_new_paper() {
        let candidate = CandidatePaper {
            title: "Graph Attention Networks".into(),
            authors: vec!["Petar Velickovic".into(), "Guillem Cucurull".into()],
            abstract_text: "We present GATs.".into(),
            pdf_url: None,
        };
        let paper = candidate.to_new_paper();
        assert_eq!(paper.author, "Petar Velickovic, Guillem Cucurull");
        assert_eq!(paper.title, "Graph Attention Networks");
    }
}
