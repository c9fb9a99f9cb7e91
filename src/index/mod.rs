//! Vector index abstraction and the in-memory implementation.
//!
//! Documents live in named collections. Each carries its rendered text, its
//! embedding and a flat metadata map that query predicates filter on before
//! similarity ranking.

pub mod embedding;
pub mod predicate;


use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{GuideError, Result};

pub use embedding::{Embedder, HashingEmbedder, OllamaEmbedder};
pub use predicate::{Constraint, SearchPredicate};

/// A metadata value attached to an indexed document.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Flag(bool),
    Number(f64),
}

impl FieldValue {
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// A document as stored in a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub id: i64,
    pub document: String,
    pub embedding: Vec<f32>,
    pub fields: BTreeMap<String, FieldValue>,
}

/// A query hit: the stored document plus its similarity score in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub id: i64,
    pub document: String,
    pub score: f32,
    pub fields: BTreeMap<String, FieldValue>,
}

/// Storage backend for embedded documents.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if it does not exist yet.
    async fn ensure_collection(&self, collection: &str) -> Result<()>;

    /// Remove every document from the collection.
    async fn clear_collection(&self, collection: &str) -> Result<()>;

    /// Insert documents, replacing any existing document with the same id.
    async fn upsert(&self, collection: &str, documents: Vec<IndexedDocument>) -> Result<()>;

    /// Number of documents in the collection.
    async fn count(&self, collection: &str) -> Result<usize>;

    /// Fetch a single document by id.
    async fn get(&self, collection: &str, id: i64) -> Result<Option<IndexedDocument>>;

    /// The `limit` most similar documents to `embedding` among those matching
    /// `predicate`, best first.
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
        predicate: &SearchPredicate,
    ) -> Result<Vec<ScoredDocument>>;
}

/// Cosine similarity between two vectors. Zero when either has zero norm or
/// the dimensions disagree.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// In-process vector index. Collections are vectors kept in insertion order;
/// ranking ties break toward the earlier-inserted document so results are
/// stable across runs.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    collections: RwLock<HashMap<String, Vec<IndexedDocument>>>,
}

impl InMemoryIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn clear_collection(&self, collection: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(documents) = collections.get_mut(collection) {
            documents.clear();
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, documents: Vec<IndexedDocument>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let stored = collections.entry(collection.to_string()).or_default();

        for document in documents {
            if let Some(existing) = stored.iter_mut().find(|d| d.id == document.id) {
                *existing = document;
            } else {
                stored.push(document);
            }
        }

        debug!(
            collection,
            count = stored.len(),
            "Upserted documents into collection"
        );
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map_or(0, Vec::len))
    }

    async fn get(&self, collection: &str, id: i64) -> Result<Option<IndexedDocument>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|documents| documents.iter().find(|d| d.id == id).cloned()))
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
        predicate: &SearchPredicate,
    ) -> Result<Vec<ScoredDocument>> {
        let collections = self.collections.read().await;
        let documents = collections
            .get(collection)
            .ok_or_else(|| GuideError::Index(format!("unknown collection: {}", collection)))?;

        let mut scored: Vec<ScoredDocument> = documents
            .iter()
            .filter(|d| predicate.matches(&d.fields))
            .map(|d| ScoredDocument {
                id: d.id,
                document: d.document.clone(),
                score: cosine_similarity(embedding, &d.embedding),
                fields: d.fields.clone(),
            })
            .collect();

        // sort_by is stable, so equal scores keep insertion order
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored)
    }
}
