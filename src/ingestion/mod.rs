//! Ingestion
//!
//! Builds (or reloads) the two retrieval structures the agent needs: the
//! object index over table summaries and one row index per table. Running it
//! again with both already in place does no extraction and no re-indexing.

pub mod extractor;

pub use extractor::{ExtractionOutcome, TableFailure, TableInfo, TableInfoExtractor};

use crate::config::AgentConfig;
use crate::error::Result;
use crate::schema_rag::object_index::ObjectIndex;
use crate::schema_rag::row_index::{RowIndexBuilder, RowVectorIndex};
use crate::services::Services;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Everything retrieval needs at query time.
pub struct Indexes {
    pub object_index: ObjectIndex,
    pub row_indexes: HashMap<String, RowVectorIndex>,
}

pub async fn ingest(services: &Services, config: &AgentConfig) -> Result<Indexes> {
    let extractor = TableInfoExtractor::new(
        Arc::clone(&services.db),
        Arc::clone(&services.llm),
        config.sample_rows,
        config.extraction_policy,
    );
    let object_index =
        ObjectIndex::load_or_build(&config.object_index_dir, &extractor, Arc::clone(&services.embedder)).await?;

    let row_indexes = RowIndexBuilder::new(
        Arc::clone(&services.db),
        Arc::clone(&services.store),
        Arc::clone(&services.embedder),
        config.max_row_index,
    )
    .build_all()
    .await?;

    info!(
        "Ingestion complete: {} tables in object index, {} row indexes",
        object_index.len(),
        row_indexes.len()
    );
    Ok(Indexes {
        object_index,
        row_indexes,
    })
}
