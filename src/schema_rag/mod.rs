//! Schema RAG
//!
//! Retrieval over table summaries (object index) and over table rows (row
//! indexes), plus the assembler that turns both into prompt context.

pub mod context;
pub mod embedder;
pub mod object_index;
pub mod pinecone;
pub mod row_index;
pub mod vector_store;

pub use context::ContextAssembler;
pub use embedder::{EmbeddingProvider, HashingEmbedder, OpenAiEmbedder};
pub use object_index::{IndexLookup, ObjectIndex, TableSchemaObject};
pub use pinecone::PineconeStore;
pub use row_index::{RowIndexBuilder, RowVectorIndex};
pub use vector_store::{InMemoryVectorStore, SearchResult, VectorRecord, VectorStore};
