//! Agent Configuration
//!
//! One immutable value carrying models, paths and retrieval knobs. Built from
//! the environment by the binary and handed to every component at construction.

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// System tables that are never summarized or indexed.
pub const DEFAULT_IGNORE_TABLES: [&str; 4] = ["admin", "admin_block", "api_key", "refresh_token"];

/// What the extractor does when one table fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPolicy {
    /// Any failing table fails the whole batch.
    #[default]
    AllOrNothing,
    /// Keep the tables that succeeded and report the rest.
    BestEffort,
}

impl FromStr for ExtractionPolicy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "all_or_nothing" | "strict" => Ok(ExtractionPolicy::AllOrNothing),
            "best_effort" | "partial" => Ok(ExtractionPolicy::BestEffort),
            other => Err(AgentError::Config(format!(
                "Unknown extraction policy '{}', expected all_or_nothing or best_effort",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PineconeConfig {
    pub api_key: String,
    /// Index host, e.g. `https://my-index-abc123.svc.us-east-1.pinecone.io`
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub database_url: String,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub fallback_model: String,
    pub embedding_model: String,
    pub pinecone: Option<PineconeConfig>,
    pub object_index_dir: PathBuf,
    pub row_index_path: PathBuf,
    pub ignore_tables: Vec<String>,
    /// Row ceiling per table when building row indexes; `None` reads every row.
    pub max_row_index: Option<usize>,
    pub sample_rows: usize,
    pub table_top_k: usize,
    pub row_top_k: usize,
    pub extraction_policy: ExtractionPolicy,
    pub request_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://agent.db".to_string(),
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            fallback_model: "gpt-4o".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            pinecone: None,
            object_index_dir: PathBuf::from("./object_index"),
            row_index_path: PathBuf::from("./row_index.json"),
            ignore_tables: DEFAULT_IGNORE_TABLES.iter().map(|t| t.to_string()).collect(),
            max_row_index: None,
            sample_rows: 3,
            table_top_k: 3,
            row_top_k: 2,
            extraction_policy: ExtractionPolicy::AllOrNothing,
            request_timeout_secs: 60,
        }
    }
}

impl AgentConfig {
    /// Read configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let pinecone = match (env("PINECONE_API_KEY"), env("PINECONE_HOST")) {
            (Some(api_key), Some(host)) => Some(PineconeConfig { api_key, host }),
            _ => None,
        };

        let max_row_index = env("MAX_ROW_INDEX")
            .map(|v| {
                v.parse::<usize>()
                    .map_err(|e| AgentError::Config(format!("MAX_ROW_INDEX '{}': {}", v, e)))
            })
            .transpose()?;

        let extraction_policy = env("EXTRACTION_POLICY")
            .map(|v| v.parse::<ExtractionPolicy>())
            .transpose()?
            .unwrap_or(defaults.extraction_policy);

        Ok(Self {
            database_url: env("DATABASE_URL").unwrap_or(defaults.database_url),
            api_key: env("OPENAI_API_KEY").unwrap_or(defaults.api_key),
            base_url: env("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            model: env("OPENAI_MODEL").unwrap_or(defaults.model),
            fallback_model: env("OPENAI_FALLBACK_MODEL").unwrap_or(defaults.fallback_model),
            embedding_model: env("OPENAI_EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            pinecone,
            object_index_dir: env("OBJECT_INDEX_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.object_index_dir),
            row_index_path: env("ROW_INDEX_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.row_index_path),
            max_row_index,
            extraction_policy,
            ..defaults
        })
    }

    /// True when no generation/embedding key is configured.
    pub fn is_offline(&self) -> bool {
        self.api_key.is_empty()
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
