//! External service handles shared by ingestion and the pipeline.

use crate::db::SqlDatabase;
use crate::llm::TextGenerator;
use crate::schema_rag::embedder::EmbeddingProvider;
use crate::schema_rag::vector_store::VectorStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct Services {
    pub db: Arc<dyn SqlDatabase>,
    /// Bound to the primary model.
    pub llm: Arc<dyn TextGenerator>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub store: Arc<dyn VectorStore>,
}

impl Services {
    pub fn new(
        db: Arc<dyn SqlDatabase>,
        llm: Arc<dyn TextGenerator>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            db,
            llm,
            embedder,
            store,
        }
    }
}
