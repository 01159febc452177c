//! Vector Store Abstraction
//!
//! Namespaced vector storage used for row-level retrieval. One namespace per
//! table. The in-memory store does a linear cosine scan and can be saved to and
//! loaded from a JSON file so row indexes survive restarts without a hosted
//! backend.

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::info;

/// Vector embedding (simple f32 vector)
pub type Embedding = Vec<f32>;

/// A vector with its id and source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Embedding,
    pub text: String,
}

/// Search result from vector store
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records (matched by id) in a namespace.
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<()>;

    /// Nearest records in a namespace, best first. Unknown namespaces yield nothing.
    async fn query(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<SearchResult>>;

    /// Record count per non-empty namespace.
    async fn describe_namespaces(&self) -> Result<HashMap<String, usize>>;

    /// Vector length stored under `namespace`, if it holds anything.
    async fn dimension(&self, namespace: &str) -> Result<Option<usize>>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Namespace {
    records: Vec<VectorRecord>,
    #[serde(skip)]
    positions: HashMap<String, usize>,
}

impl Namespace {
    fn reindex(&mut self) {
        self.positions = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
    }

    fn dimension(&self) -> Option<usize> {
        self.records.first().map(|r| r.values.len())
    }

    fn upsert(&mut self, record: VectorRecord) {
        match self.positions.get(&record.id) {
            Some(&pos) => self.records[pos] = record,
            None => {
                self.positions.insert(record.id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Snapshot {
    namespaces: HashMap<String, Namespace>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    namespaces: &'a HashMap<String, Namespace>,
}

/// In-memory vector store with optional JSON persistence.
#[derive(Default)]
pub struct InMemoryVectorStore {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored under `namespace`.
    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .map(|ns| ns.get(namespace).map(|n| n.records.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Save the vector store to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        let namespaces = self
            .namespaces
            .read()
            .map_err(|_| AgentError::VectorStore("Vector store lock poisoned".to_string()))?;
        let snapshot = SnapshotRef { namespaces: &namespaces };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string(&snapshot)?)?;
        info!("Saved vector store with {} namespaces to {}", namespaces.len(), path.display());
        Ok(())
    }

    /// Load the vector store from disk
    pub fn load(path: &Path) -> Result<Self> {
        let encoded = std::fs::read_to_string(path)?;
        let mut snapshot: Snapshot = serde_json::from_str(&encoded)?;
        for namespace in snapshot.namespaces.values_mut() {
            namespace.reindex();
        }
        info!("Loaded vector store with {} namespaces from {}", snapshot.namespaces.len(), path.display());
        Ok(Self {
            namespaces: RwLock::new(snapshot.namespaces),
        })
    }

    /// Load from `path` if it exists, otherwise start empty.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<()> {
        let mut namespaces = self
            .namespaces
            .write()
            .map_err(|_| AgentError::VectorStore("Vector store lock poisoned".to_string()))?;

        // The whole batch is checked before anything is written.
        let expected = namespaces
            .get(namespace)
            .and_then(Namespace::dimension)
            .or_else(|| records.first().map(|r| r.values.len()));
        if let Some(dimension) = expected {
            if let Some(bad) = records.iter().find(|r| r.values.len() != dimension) {
                return Err(AgentError::VectorStore(format!(
                    "Embedding dimension {} of '{}' doesn't match namespace '{}' dimension {}",
                    bad.values.len(),
                    bad.id,
                    namespace,
                    dimension
                )));
            }
        }

        let ns = namespaces.entry(namespace.to_string()).or_default();
        for record in records {
            ns.upsert(record);
        }
        Ok(())
    }

    async fn query(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        let namespaces = self
            .namespaces
            .read()
            .map_err(|_| AgentError::VectorStore("Vector store lock poisoned".to_string()))?;
        let Some(ns) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        if let Some(dimension) = ns.dimension() {
            if vector.len() != dimension {
                return Err(AgentError::VectorStore(format!(
                    "Query embedding dimension {} doesn't match namespace '{}' dimension {}",
                    vector.len(),
                    namespace,
                    dimension
                )));
            }
        }

        let mut results: Vec<SearchResult> = ns
            .records
            .iter()
            .map(|r| SearchResult {
                id: r.id.clone(),
                text: r.text.clone(),
                score: cosine_similarity(vector, &r.values),
            })
            .collect();

        // Sort by score descending and take top_k
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        Ok(results)
    }

    async fn describe_namespaces(&self) -> Result<HashMap<String, usize>> {
        let namespaces = self
            .namespaces
            .read()
            .map_err(|_| AgentError::VectorStore("Vector store lock poisoned".to_string()))?;
        Ok(namespaces
            .iter()
            .filter(|(_, ns)| !ns.records.is_empty())
            .map(|(name, ns)| (name.clone(), ns.records.len()))
            .collect())
    }

    async fn dimension(&self, namespace: &str) -> Result<Option<usize>> {
        let namespaces = self
            .namespaces
            .read()
            .map_err(|_| AgentError::VectorStore("Vector store lock poisoned".to_string()))?;
        Ok(namespaces.get(namespace).and_then(Namespace::dimension))
    }
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
