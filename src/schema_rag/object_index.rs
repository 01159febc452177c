//! Object Index
//!
//! Retrieval structure over table schema summaries. Built once from the
//! extractor's output, persisted as `object_index.json` under a directory and
//! reloaded on later startups. Delete the directory to force a rebuild.

use crate::error::{AgentError, Result};
use crate::ingestion::extractor::TableInfoExtractor;
use crate::schema_rag::embedder::{check_batch_len, EmbeddingProvider};
use crate::schema_rag::vector_store::{cosine_similarity, Embedding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const INDEX_FILE: &str = "object_index.json";
const FORMAT_VERSION: u32 = 1;

/// One retrievable table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableSchemaObject {
    pub table_name: String,
    pub context_str: Option<String>,
}

impl TableSchemaObject {
    pub fn new(table_name: impl Into<String>, context_str: Option<String>) -> Self {
        Self {
            table_name: table_name.into(),
            context_str,
        }
    }

    /// Text that gets embedded for this object.
    pub fn embedding_text(&self) -> String {
        match &self.context_str {
            Some(context) => format!("Table: {}. {}", self.table_name, context),
            None => format!("Table: {}.", self.table_name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedObject {
    object: TableSchemaObject,
    embedding: Embedding,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    format_version: u32,
    embedding_model: String,
    built_at: DateTime<Utc>,
    objects: Vec<IndexedObject>,
}

/// Outcome of looking for a persisted index.
pub enum IndexLookup {
    Present(ObjectIndex),
    Absent(String),
}

pub struct ObjectIndex {
    objects: Vec<IndexedObject>,
    built_at: DateTime<Utc>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for ObjectIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectIndex")
            .field("tables", &self.table_names())
            .field("built_at", &self.built_at)
            .field("embedding_model", &self.embedder.model_name())
            .finish()
    }
}

impl ObjectIndex {
    /// Embed `objects` and build an index over them. Table names must be unique.
    pub async fn from_objects(
        objects: Vec<TableSchemaObject>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for object in &objects {
            if !seen.insert(object.table_name.as_str()) {
                return Err(AgentError::Config(format!(
                    "Duplicate table '{}' in object index",
                    object.table_name
                )));
            }
        }

        let texts: Vec<String> = objects.iter().map(TableSchemaObject::embedding_text).collect();
        let embeddings = if texts.is_empty() {
            Vec::new()
        } else {
            embedder.embed_batch(&texts).await?
        };
        check_batch_len(&texts, &embeddings)?;

        let objects = objects
            .into_iter()
            .zip(embeddings)
            .map(|(object, embedding)| IndexedObject { object, embedding })
            .collect();

        Ok(Self {
            objects,
            built_at: Utc::now(),
            embedder,
        })
    }

    /// Look for a persisted index under `dir`. Missing, corrupt or stale
    /// (other format version or embedding model) files come back as `Absent`.
    pub fn load(dir: &Path, embedder: Arc<dyn EmbeddingProvider>) -> IndexLookup {
        match Self::try_load(dir, embedder) {
            Ok(index) => IndexLookup::Present(index),
            Err(e) => IndexLookup::Absent(e.to_string()),
        }
    }

    fn try_load(dir: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let path = index_path(dir);
        let encoded = std::fs::read_to_string(&path)
            .map_err(|e| AgentError::IndexLoad(format!("Cannot read {}: {}", path.display(), e)))?;
        let persisted: PersistedIndex = serde_json::from_str(&encoded)
            .map_err(|e| AgentError::IndexLoad(format!("Corrupt {}: {}", path.display(), e)))?;

        if persisted.format_version != FORMAT_VERSION {
            return Err(AgentError::IndexLoad(format!(
                "Format version {} is not supported (expected {})",
                persisted.format_version, FORMAT_VERSION
            )));
        }
        if persisted.embedding_model != embedder.model_name() {
            return Err(AgentError::IndexLoad(format!(
                "Index was built with embedding model '{}', configured model is '{}'",
                persisted.embedding_model,
                embedder.model_name()
            )));
        }

        Ok(Self {
            objects: persisted.objects,
            built_at: persisted.built_at,
            embedder,
        })
    }

    /// Write the index to `dir`, creating it if needed.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let persisted = PersistedIndex {
            format_version: FORMAT_VERSION,
            embedding_model: self.embedder.model_name().to_string(),
            built_at: self.built_at,
            objects: self.objects.clone(),
        };

        let path = index_path(dir);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&persisted)?)?;
        std::fs::rename(&tmp, &path)?;
        info!("Persisted object index with {} tables to {}", self.len(), path.display());
        Ok(())
    }

    /// Load the index from `dir`, or extract every usable table, build and persist it.
    pub async fn load_or_build(
        dir: &Path,
        extractor: &TableInfoExtractor,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        match Self::load(dir, Arc::clone(&embedder)) {
            IndexLookup::Present(index) => {
                info!("Loaded object index with {} tables from {}", index.len(), dir.display());
                return Ok(index);
            }
            IndexLookup::Absent(reason) => {
                info!("Building object index: {}", reason);
            }
        }

        let outcome = extractor.extract_all().await?;
        for failure in &outcome.failures {
            warn!("Table {} left out of the object index: {}", failure.table, failure.error);
        }

        let objects = outcome
            .tables
            .into_iter()
            .map(|info| TableSchemaObject::new(info.table_name, Some(info.table_summary)))
            .collect();
        let index = Self::from_objects(objects, embedder).await?;
        index.persist(dir)?;
        Ok(index)
    }

    /// At most `top_k` tables closest to `query`, best first.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<TableSchemaObject>> {
        if top_k == 0 || self.objects.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query).await?;

        let mut scored: Vec<(f32, &IndexedObject)> = self
            .objects
            .iter()
            .map(|o| (cosine_similarity(&query_embedding, &o.embedding), o))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        debug!(
            "Retrieved tables for '{}': {:?}",
            query,
            scored.iter().map(|(s, o)| (o.object.table_name.as_str(), *s)).collect::<Vec<_>>()
        );
        Ok(scored.into_iter().map(|(_, o)| o.object.clone()).collect())
    }

    pub fn objects(&self) -> impl Iterator<Item = &TableSchemaObject> {
        self.objects.iter().map(|o| &o.object)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.objects().map(|o| o.table_name.as_str()).collect()
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

pub fn index_path(dir: &Path) -> PathBuf {
    dir.join(INDEX_FILE)
}
