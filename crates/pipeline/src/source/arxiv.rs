//! arXiv export API adapter (Atom feed)

use super::{CandidatePaper, FetchWindow, PaperSource};
use crate::errors::{PipelineError, Result};
use async_trait::async_trait;
use roxmltree::{Document, Node};
use scholarlink_common::config::PaperSourceConfig;
use scholarlink_common::errors::AppError;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub struct ArxivSource {
    client: reqwest::Client,
    base_url: String,
    category_query: String,
    max_results: u32,
}

impl ArxivSource {
    pub fn new(config: &PaperSourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            category_query: config.category_query.clone(),
            max_results: config.max_results,
        })
    }

    /// `search_query` parameter for a window
    pub fn search_query(&self, window: &FetchWindow) -> String {
        let (start, end) = window.compact_bounds();
        format!(
            "{} AND submittedDate:[{} TO {}]",
            self.category_query, start, end
        )
    }
}

#[async_trait]
impl PaperSource for ArxivSource {
    #[instrument(skip(self, window), fields(window = %window))]
    async fn fetch_window(&self, window: &FetchWindow) -> Result<Vec<CandidatePaper>> {
        let query = self.search_query(window);
        let max_results = self.max_results.to_string();
        debug!(query = %query, "Querying arXiv");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("search_query", query.as_str()),
                ("sortBy", "submittedDate"),
                ("sortOrder", "descending"),
                ("start", "0"),
                ("max_results", max_results.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::SourceUnavailable(format!(
                "arXiv answered HTTP {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(e.to_string()))?;

        let papers = parse_feed(&body)?;
        info!(count = papers.len(), "Fetched candidates from arXiv");
        Ok(papers)
    }

    fn name(&self) -> &str {
        "arxiv"
    }
}

/// Parse an arXiv Atom feed into candidates.
///
/// Missing optional fields are left empty. Entries without a title are
/// dropped. An error entry (arXiv reports bad queries inside the feed) makes
/// the whole response unusable.
pub fn parse_feed(xml: &str) -> Result<Vec<CandidatePaper>> {
    let doc = Document::parse(xml).map_err(|e| PipelineError::SourceFormat(e.to_string()))?;

    let feed = doc.root_element();
    if feed.tag_name().name() != "feed" {
        return Err(PipelineError::SourceFormat(format!(
            "expected an Atom <feed>, found <{}>",
            feed.tag_name().name()
        )));
    }

    let mut papers = Vec::new();

    for entry in feed.children().filter(|n| is_element(n, "entry")) {
        let id = child_text(entry, "id");

        if id.as_deref().is_some_and(|id| id.contains("/api/errors")) {
            let detail = child_text(entry, "summary").unwrap_or_default();
            return Err(PipelineError::SourceUnavailable(format!(
                "arXiv rejected the query: {}",
                collapse_whitespace(&detail)
            )));
        }

        let title = child_text(entry, "title")
            .map(|t| collapse_whitespace(&t))
            .unwrap_or_default();
        if title.is_empty() {
            debug!("Dropping feed entry without a title");
            continue;
        }

        let authors = entry
            .children()
            .filter(|n| is_element(n, "author"))
            .filter_map(|author| child_text(author, "name"))
            .map(|name| collapse_whitespace(&name))
            .filter(|name| !name.is_empty())
            .collect();

        let abstract_text = child_text(entry, "summary")
            .map(|s| collapse_whitespace(&s))
            .unwrap_or_default();

        let pdf_url = entry
            .children()
            .filter(|n| is_element(n, "link"))
            .find(|link| link.attribute("title") == Some("pdf"))
            .and_then(|link| link.attribute("href"))
            .map(str::to_string)
            .or_else(|| id.map(|id| id.trim().replacen("/abs/", "/pdf/", 1)));

        papers.push(CandidatePaper {
            title,
            authors,
            abstract_text,
            pdf_url,
        });
    }

    Ok(papers)
}

fn is_element(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn child_text(node: Node, name: &str) -> Option<String> {
    node.children()
        .find(|n| is_element(n, name))
        .and_then(|n| n.text())
        .map(str::to_string)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
