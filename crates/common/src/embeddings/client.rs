//! Embedding client: trimming, batching and normalization over a provider

use super::EmbeddingProvider;
use crate::errors::{AppError, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Scale a vector to unit length. A zero vector is returned unchanged.
pub fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt();

    if norm == 0.0 || !norm.is_finite() {
        return vector;
    }

    for v in vector.iter_mut() {
        *v = (f64::from(*v) / norm) as f32;
    }
    vector
}

#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed one text.
    ///
    /// Blank text yields an empty vector without a remote call. Provider
    /// failures are returned to the caller.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let vector = self
            .call(&[text.to_string()])
            .await?
            .pop()
            .unwrap_or_default();

        Ok(l2_normalize(vector))
    }

    /// Embed many texts in consecutive groups of at most `batch_size`, one
    /// remote call per group.
    ///
    /// Never fails as a whole: a failed group turns into one empty vector per
    /// item, and blank items are empty without being sent. An empty vector
    /// means "embedding unavailable".
    pub async fn embed_batch(&self, texts: &[String], batch_size: usize) -> Vec<Vec<f32>> {
        let mut results = Vec::with_capacity(texts.len());

        for (group_index, group) in texts.chunks(batch_size.max(1)).enumerate() {
            let sendable: Vec<(usize, String)> = group
                .iter()
                .enumerate()
                .filter_map(|(i, text)| {
                    let text = text.trim();
                    (!text.is_empty()).then(|| (i, text.to_string()))
                })
                .collect();

            let mut vectors = vec![Vec::new(); group.len()];

            if !sendable.is_empty() {
                let inputs: Vec<String> = sendable.iter().map(|(_, text)| text.clone()).collect();

                match self.call(&inputs).await {
                    Ok(embedded) => {
                        for ((slot, _), vector) in sendable.iter().zip(embedded) {
                            vectors[*slot] = l2_normalize(vector);
                        }
                    }
                    Err(e) => {
                        warn!(
                            group = group_index,
                            size = group.len(),
                            error = %e,
                            "Embedding batch failed, marking group as unavailable"
                        );
                    }
                }
            }

            results.extend(vectors);
        }

        results
    }

    async fn call(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let result = self.provider.embed_raw(texts).await.and_then(|vectors| {
            if vectors.len() == texts.len() {
                Ok(vectors)
            } else {
                Err(AppError::EmbeddingProvider {
                    message: format!(
                        "provider returned {} vectors for {} inputs",
                        vectors.len(),
                        texts.len()
                    ),
                })
            }
        });

        crate::metrics::record_embedding(
            start.elapsed().as_secs_f64(),
            self.provider.model_name(),
            texts.len(),
            result.is_ok(),
        );

        result
    }
}
