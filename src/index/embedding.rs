//! Text embedding providers.
//!
//! `OllamaEmbedder` talks to a local Ollama server; `HashingEmbedder` is a
//! deterministic offline fallback used by tests and the sample pipeline when
//! no embedding server is available.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::EmbeddingConfig;
use crate::{GuideError, Result};

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Produces a fixed-dimension vector for a text document.
pub trait Embedder: Send + Sync {
    /// Dimension of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts. The default implementation embeds one at a time.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Verify the provider is reachable and usable.
    fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

/// Embedding client for an Ollama-compatible server.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    base_url: Url,
    model: String,
    dimension: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
}

impl OllamaEmbedder {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config
            .server_url()
            .map_err(|e| GuideError::Embedding(e.to_string()))?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.model.clone(),
            dimension: config.dimension as usize,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    fn embed_url(&self) -> Result<Url> {
        self.base_url
            .join("/api/embed")
            .map_err(|e| GuideError::Embedding(format!("failed to build embed URL: {}", e)))
    }

    fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Requesting embeddings for {} texts", texts.len());

        let request = EmbedRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| GuideError::Embedding(format!("failed to serialize request: {}", e)))?;
        let url = self.embed_url()?;

        let response_text = self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .map_err(|e| GuideError::Embedding(format!("failed to parse response: {}", e)))?;

        if response.embeddings.len() != texts.len() {
            return Err(GuideError::Embedding(format!(
                "mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        for embedding in &response.embeddings {
            if embedding.len() != self.dimension {
                return Err(GuideError::Embedding(format!(
                    "server returned {}-dimensional vector, expected {}",
                    embedding.len(),
                    self.dimension
                )));
            }
        }

        Ok(response.embeddings)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> std::result::Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                return Err(GuideError::Embedding(format!(
                                    "client error: HTTP {}",
                                    status
                                )));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            return Err(GuideError::Embedding(format!(
                                "non-retryable error: {}",
                                error
                            )));
                        }
                    };

                    if should_retry {
                        last_error = Some(GuideError::Embedding(format!("request error: {}", error)));
                        if attempt < self.retry_attempts {
                            let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                            std::thread::sleep(Duration::from_millis(delay_ms));
                        }
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| GuideError::Embedding("request failed after retries".to_string())))
    }
}

impl Embedder for OllamaEmbedder {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.request_embeddings(&[text.to_string()])?;
        embeddings
            .pop()
            .ok_or_else(|| GuideError::Embedding("server returned no embedding".to_string()))
    }

    #[inline]
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.request_embeddings(texts)
    }

    /// Check the server is reachable and the configured model is pulled.
    fn health_check(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/tags")
            .map_err(|e| GuideError::Embedding(format!("failed to build tags URL: {}", e)))?;

        let response_text = self.make_request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let models: ModelsResponse = serde_json::from_str(&response_text)
            .map_err(|e| GuideError::Embedding(format!("failed to parse models list: {}", e)))?;

        if models.models.iter().any(|m| m.name == self.model) {
            Ok(())
        } else {
            let available: Vec<&str> = models.models.iter().map(|m| m.name.as_str()).collect();
            Err(GuideError::Embedding(format!(
                "model {:?} is not available (available: {:?})",
                self.model, available
            )))
        }
    }
}

/// Deterministic bag-of-words embedder. Tokens are hashed into buckets and
/// the counts L2-normalized, so identical texts always embed identically and
/// shared vocabulary yields positive cosine similarity.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashingEmbedder {
    #[inline]
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashingEmbedder {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimension;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }

        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn embedder_for(server: &MockServer, dimension: u32) -> OllamaEmbedder {
        let url = Url::parse(&server.uri()).expect("mock server URL");
        let config = EmbeddingConfig {
            protocol: url.scheme().to_string(),
            host: url.host_str().expect("host").to_string(),
            port: url.port().expect("port"),
            model: "test-model".to_string(),
            dimension,
        };
        OllamaEmbedder::new(&config)
            .expect("create embedder")
            .with_retry_attempts(1)
    }

    #[test]
    fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("vegan pasta in the north zone").expect("embed");
        let b = embedder.embed("vegan pasta in the north zone").expect("embed");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hashing_embedder_normalizes() {
        let embedder = HashingEmbedder::default();
        let v = embedder.embed("spaghetti al pomodoro").expect("embed");
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashing_embedder_similarity_tracks_shared_words() {
        let embedder = HashingEmbedder::default();
        let pasta = embedder.embed("fresh pasta with tomato").expect("embed");
        let more_pasta = embedder.embed("pasta with tomato sauce").expect("embed");
        let coffee = embedder.embed("espresso cappuccino latte").expect("embed");

        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&pasta, &more_pasta) > dot(&pasta, &coffee));
    }

    #[test]
    fn hashing_embedder_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        let v = embedder.embed("").expect("embed");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn ollama_embedder_parses_batch_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(serde_json::json!({"model": "test-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
            })))
            .mount(&server)
            .await;

        let embedder = embedder_for(&server, 3);
        let result = tokio::task::spawn_blocking(move || {
            embedder.embed_batch(&["pasta".to_string(), "coffee".to_string()])
        })
        .await
        .expect("join")
        .expect("embed");

        assert_eq!(result.len(), 2);
        assert_eq!(result[0], vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn ollama_embedder_rejects_wrong_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[1.0, 0.0]]
            })))
            .mount(&server)
            .await;

        let embedder = embedder_for(&server, 768);
        let result = tokio::task::spawn_blocking(move || embedder.embed("pasta"))
            .await
            .expect("join");
        assert!(matches!(result, Err(GuideError::Embedding(_))));
    }

    #[tokio::test]
    async fn ollama_embedder_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = embedder_for(&server, 3).with_retry_attempts(3);
        let result = tokio::task::spawn_blocking(move || embedder.embed("pasta"))
            .await
            .expect("join");
        assert!(matches!(result, Err(GuideError::Embedding(_))));
    }

    #[tokio::test]
    async fn health_check_requires_model_presence() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "other-model"}]
            })))
            .mount(&server)
            .await;

        let embedder = embedder_for(&server, 3);
        let result = tokio::task::spawn_blocking(move || embedder.health_check())
            .await
            .expect("join");
        assert!(matches!(result, Err(GuideError::Embedding(_))));
    }
}
