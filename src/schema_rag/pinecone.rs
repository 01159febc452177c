//! Pinecone vector store
//!
//! Talks to a Pinecone index over its data-plane REST API. Each table is a
//! namespace inside one index.

use crate::error::{AgentError, Result};
use crate::schema_rag::vector_store::{SearchResult, VectorRecord, VectorStore};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Pinecone caps upsert requests; stay well under the payload limit.
const UPSERT_BATCH_SIZE: usize = 100;

pub struct PineconeStore {
    client: Client,
    host: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<PineconeVector<'a>>,
    namespace: &'a str,
}

#[derive(Debug, Serialize)]
struct PineconeVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: PineconeMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct PineconeMetadata<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct IndexStats {
    #[serde(default)]
    namespaces: HashMap<String, NamespaceStats>,
    #[serde(default)]
    dimension: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceStats {
    #[serde(default)]
    vector_count: usize,
}

impl PineconeStore {
    /// Create a store for the index served at `host`.
    pub fn new(api_key: String, host: String, timeout: Duration) -> Result<Self> {
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host
        } else {
            format!("https://{}", host)
        };
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::VectorStore(format!("Pinecone call {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AgentError::VectorStore(format!(
                "Pinecone {} error ({}): {}",
                path, status, error_text
            )));
        }
        Ok(response)
    }

    async fn index_stats(&self) -> Result<IndexStats> {
        self.post("/describe_index_stats", &serde_json::json!({}))
            .await?
            .json()
            .await
            .map_err(|e| AgentError::VectorStore(format!("Failed to parse Pinecone index stats: {}", e)))
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<()> {
        for chunk in records.chunks(UPSERT_BATCH_SIZE) {
            let request = UpsertRequest {
                vectors: chunk
                    .iter()
                    .map(|r| PineconeVector {
                        id: &r.id,
                        values: &r.values,
                        metadata: PineconeMetadata { text: &r.text },
                    })
                    .collect(),
                namespace,
            };
            self.post("/vectors/upsert", &request).await?;
            debug!("Upserted {} vectors into namespace {}", chunk.len(), namespace);
        }
        Ok(())
    }

    async fn query(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        let request = QueryRequest {
            namespace,
            vector,
            top_k,
            include_metadata: true,
        };
        let response: QueryResponse = self
            .post("/query", &request)
            .await?
            .json()
            .await
            .map_err(|e| AgentError::VectorStore(format!("Failed to parse Pinecone query response: {}", e)))?;

        Ok(response
            .matches
            .into_iter()
            .map(|m| {
                let text = m
                    .metadata
                    .as_ref()
                    .and_then(|md| md.get("text"))
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string();
                SearchResult {
                    id: m.id,
                    text,
                    score: m.score,
                }
            })
            .collect())
    }

    async fn describe_namespaces(&self) -> Result<HashMap<String, usize>> {
        let stats = self.index_stats().await?;
        Ok(stats
            .namespaces
            .into_iter()
            .filter(|(_, ns)| ns.vector_count > 0)
            .map(|(name, ns)| (name, ns.vector_count))
            .collect())
    }

    /// Pinecone fixes one dimension for the whole index.
    async fn dimension(&self, namespace: &str) -> Result<Option<usize>> {
        let stats = self.index_stats().await?;
        let populated = stats.namespaces.get(namespace).map_or(false, |ns| ns.vector_count > 0);
        Ok(if populated { stats.dimension } else { None })
    }
}
