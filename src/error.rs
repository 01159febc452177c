use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Response does not match {shape}: {message}")]
    ShapeValidation { shape: String, message: String },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Table extraction failed for '{table}': {message}")]
    Extraction { table: String, message: String },

    #[error("Index load error: {0}")]
    IndexLoad(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Pipeline node '{node}' failed: {source}")]
    Node {
        node: String,
        #[source]
        source: Box<AgentError>,
    },

    #[error("Fallback run failed after primary failure (primary: {primary}; fallback: {fallback})")]
    FallbackExhausted {
        primary: Box<AgentError>,
        fallback: Box<AgentError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl AgentError {
    /// Wrap a failure raised inside a pipeline node.
    pub fn node(node: impl Into<String>, source: AgentError) -> Self {
        AgentError::Node {
            node: node.into(),
            source: Box::new(source),
        }
    }

    /// Name of the pipeline node that failed, if this is a node failure.
    pub fn failed_node(&self) -> Option<&str> {
        match self {
            AgentError::Node { node, .. } => Some(node),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
