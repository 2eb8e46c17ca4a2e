//! EmbeddingProvider (spec §4.3): maps text to a fixed-dimension vector.
//!
//! At start-up the service tries, in order, the models named by
//! `EMBED_MODEL_PRIORITY`. If none initialise, it falls back to a
//! deterministic local hash embedding. `d` (the dimension) is fixed for the
//! process lifetime once a branch is chosen.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::AppConfig;

const LOCAL_FALLBACK_DIM: usize = 100;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
}

/// Cosine similarity between two equal-length vectors.
pub fn similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Generalizes the teacher's `embed_with_openai` (`src/llm.rs`) behind the
/// `EmbeddingProvider` trait boundary, using rig-core's OpenAI embedding
/// client exactly as the teacher constructs it.
pub struct RigOpenAiEmbeddingProvider {
    model_name: String,
    dimension: usize,
}

impl RigOpenAiEmbeddingProvider {
    pub fn new(model_name: String, dimension: usize) -> Self {
        Self { model_name, dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for RigOpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        batch.pop().ok_or_else(|| anyhow::anyhow!("no embedding returned"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        use rig::client::EmbeddingsClient as _;
        use rig::embeddings::EmbeddingModel as _;
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let embedding_model = client.embedding_model(&self.model_name);
        let embeddings = embedding_model.embed_texts(texts.to_vec()).await?;

        Ok(embeddings
            .into_iter()
            .map(|e| e.vec.into_iter().map(|v| v as f32).collect())
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic local-hash fallback (spec §4.3): lowercase, split on
/// non-word characters, hash each token into a fixed-dimension bag-of-words
/// vector, L2-normalise.
pub struct LocalHashEmbeddingProvider {
    dimension: usize,
}

impl Default for LocalHashEmbeddingProvider {
    fn default() -> Self {
        Self {
            dimension: LOCAL_FALLBACK_DIM,
        }
    }
}

impl LocalHashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimension];
        for token in tokenize(text) {
            let bucket = hash_token(&token) % self.dimension as u64;
            vector[bucket as usize] += 1.0;
        }
        l2_normalise(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for LocalHashEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn hash_token(token: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    token.hash(&mut hasher);
    hasher.finish()
}

fn l2_normalise(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Initialises the configured embedding provider, trying the priority list
/// before installing the local fallback.
pub async fn init_embedding_provider(cfg: &AppConfig) -> Box<dyn EmbeddingProvider> {
    for candidate in &cfg.embed_model_priority {
        match probe_openai_model(candidate).await {
            Ok(dim) => {
                info!("Embedding provider initialised: {candidate} (dim={dim})");
                return Box::new(RigOpenAiEmbeddingProvider::new(candidate.clone(), dim));
            }
            Err(e) => {
                warn!("Embedding model '{candidate}' unavailable: {e}");
            }
        }
    }

    warn!("No configured embedding model initialised; using local-hash fallback (dim={LOCAL_FALLBACK_DIM})");
    Box::new(LocalHashEmbeddingProvider::default())
}

async fn probe_openai_model(model_name: &str) -> Result<usize> {
    use rig::client::EmbeddingsClient as _;
    use rig::embeddings::EmbeddingModel as _;
    use rig::providers::openai;

    if std::env::var("OPENAI_API_KEY").is_err() {
        return Err(anyhow::anyhow!("OPENAI_API_KEY not set"));
    }

    let client = openai::Client::from_env();
    let embedding_model = client.embedding_model(model_name);
    let embeddings = embedding_model
        .embed_texts(vec!["probe".to_string()])
        .await?;
    let vec = embeddings
        .first()
        .ok_or_else(|| anyhow::anyhow!("empty probe response"))?;
    Ok(vec.vec.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_fallback_embedding_is_pure() {
        let provider = LocalHashEmbeddingProvider::default();
        let a = provider.embed("Acme Corp shall pay Beta LLC").await.unwrap();
        let b = provider.embed("Acme Corp shall pay Beta LLC").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), LOCAL_FALLBACK_DIM);
    }

    #[tokio::test]
    async fn similarity_to_self_is_one() {
        let provider = LocalHashEmbeddingProvider::default();
        let v = provider.embed("the tenant must pay rent").await.unwrap();
        let sim = similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn similarity_is_symmetric() {
        let provider = LocalHashEmbeddingProvider::default();
        let a = provider.embed("rent and lease obligations").await.unwrap();
        let b = provider.embed("payment of monthly rent").await.unwrap();
        assert!((similarity(&a, &b) - similarity(&b, &a)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn distinct_texts_produce_distinct_vectors_generally() {
        let provider = LocalHashEmbeddingProvider::default();
        let a = provider.embed("contract law").await.unwrap();
        let b = provider.embed("marine biology").await.unwrap();
        assert_ne!(a, b);
    }
}
