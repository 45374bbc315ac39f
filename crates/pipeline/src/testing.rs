//! In-crate fakes for the external collaborators

use crate::errors::{GenerationError, PipelineError, Result};
use crate::generation::{ContentGenerator, GenerationRequest};
use crate::indexer::PaperIndexer;
use crate::source::{CandidatePaper, FetchWindow, PaperSource};
use crate::throttle::Throttle;
use async_trait::async_trait;
use scholarlink_common::errors::AppError;
use scholarlink_common::{DbPool, EmbeddingClient, EmbeddingProvider, EmbeddingStore, Repository};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub async fn pool() -> DbPool {
    DbPool::in_memory().await.unwrap()
}

pub fn store(pool: &DbPool, provider: &dyn EmbeddingProvider) -> EmbeddingStore {
    EmbeddingStore::new(pool.clone(), provider.model_name(), provider.dimension())
}

pub fn indexer(pool: &DbPool, provider: Arc<FixedEmbedder>) -> PaperIndexer {
    throttled_indexer(pool, provider, Throttle::disabled())
}

pub fn throttled_indexer(
    pool: &DbPool,
    provider: Arc<FixedEmbedder>,
    throttle: Throttle,
) -> PaperIndexer {
    PaperIndexer::new(
        Repository::new(pool.clone()),
        store(pool, provider.as_ref()),
        EmbeddingClient::new(provider),
        throttle,
    )
}

pub fn candidate(title: &str, abstract_text: &str) -> CandidatePaper {
    CandidatePaper {
        title: title.to_string(),
        authors: vec!["Test Author".to_string()],
        abstract_text: abstract_text.to_string(),
        pdf_url: None,
    }
}

/// Embedding provider with fixed answers per text; unknown texts map to a
/// constant vector. Texts listed in `failing` make the call fail.
pub struct FixedEmbedder {
    dimension: usize,
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    failing: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Mutex::new(HashMap::new()),
            failing: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_vector(self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.lock().unwrap().insert(text.to_string(), vector);
        self
    }

    pub fn fail_on(&self, text: &str) {
        self.failing.lock().unwrap().push(text.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed_raw(&self, texts: &[String]) -> scholarlink_common::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing.lock().unwrap();
        if texts.iter().any(|t| failing.contains(t)) {
            return Err(AppError::EmbeddingProvider {
                message: "simulated provider outage".to_string(),
            });
        }

        let vectors = self.vectors.lock().unwrap();
        Ok(texts
            .iter()
            .map(|t| {
                vectors.get(t).cloned().unwrap_or_else(|| {
                    let mut v = vec![0.0; self.dimension];
                    v[0] = 1.0;
                    v
                })
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Paper source returning a scripted answer
pub struct ScriptedSource {
    answer: std::result::Result<Vec<CandidatePaper>, String>,
}

impl ScriptedSource {
    pub fn returning(papers: Vec<CandidatePaper>) -> Self {
        Self { answer: Ok(papers) }
    }

    pub fn unreachable() -> Self {
        Self {
            answer: Err("connection refused".to_string()),
        }
    }
}

#[async_trait]
impl PaperSource for ScriptedSource {
    async fn fetch_window(&self, _window: &FetchWindow) -> Result<Vec<CandidatePaper>> {
        self.answer
            .clone()
            .map_err(PipelineError::SourceUnavailable)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Generator that records every request and fails for listed titles
#[derive(Default)]
pub struct RecordingGenerator {
    requests: Mutex<Vec<GenerationRequest>>,
    failures: Mutex<HashMap<String, GenerationError>>,
}

impl RecordingGenerator {
    pub fn fail_for(&self, title: &str, error: GenerationError) {
        self.failures.lock().unwrap().insert(title.to_string(), error);
    }

    pub fn titles(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.title.clone())
            .collect()
    }
}

#[async_trait]
impl ContentGenerator for RecordingGenerator {
    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(error) = self.failures.lock().unwrap().get(&request.title) {
            return Err(error.clone());
        }
        Ok(format!("# {}\n\nWhy this paper matters to you.", request.title))
    }

    fn model_name(&self) -> &str {
        "recording"
    }
}
