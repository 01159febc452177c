pub mod agent;
pub mod config;
pub mod db;
pub mod error;
pub mod ingestion;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod schema_rag;
pub mod services;
pub mod sql_parser;

pub use agent::{QueryRunContext, RunOutcome, SqlAgent};
pub use config::{AgentConfig, ExtractionPolicy};
pub use error::{AgentError, Result};
pub use ingestion::{ingest, Indexes};
pub use services::Services;
