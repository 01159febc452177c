//! Row-level vector indexes
//!
//! One vector-store namespace per table holding an embedding of every row, so
//! the context assembler can show the model example rows that look like the
//! question. Tables whose namespace already has content are not re-indexed;
//! content written by an embedder of another dimension is a load error.

use crate::db::{QueryRows, SqlDatabase};
use crate::error::{AgentError, Result};
use crate::schema_rag::embedder::{check_batch_len, EmbeddingProvider};
use crate::schema_rag::vector_store::{SearchResult, VectorRecord, VectorStore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const EMBED_BATCH_SIZE: usize = 64;

/// Handle on the row vectors of one table.
#[derive(Clone)]
pub struct RowVectorIndex {
    namespace: String,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RowVectorIndex {
    pub fn new(
        namespace: impl Into<String>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            store,
            embedder,
        }
    }

    /// Rows most similar to `query`, best first.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).await?;
        self.store.query(&self.namespace, &vector, top_k).await
    }
}

pub struct RowIndexBuilder {
    db: Arc<dyn SqlDatabase>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    max_rows: Option<usize>,
}

impl RowIndexBuilder {
    pub fn new(
        db: Arc<dyn SqlDatabase>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        max_rows: Option<usize>,
    ) -> Self {
        Self {
            db,
            store,
            embedder,
            max_rows,
        }
    }

    /// Index every usable table, one at a time, skipping those already indexed.
    pub async fn build_all(&self) -> Result<HashMap<String, RowVectorIndex>> {
        let tables = self.db.usable_table_names().await?;
        let mut indexes = HashMap::with_capacity(tables.len());

        for table in tables {
            let existing = self.store.describe_namespaces().await?;
            match existing.get(&table) {
                Some(count) => {
                    self.check_dimension(&table).await?;
                    info!("Row index for {} already has {} vectors, skipping", table, count);
                }
                None => {
                    let count = self.index_table(&table).await?;
                    info!("Indexed {} rows of {}", count, table);
                }
            }
            indexes.insert(table.clone(), self.handle(&table));
        }
        Ok(indexes)
    }

    async fn check_dimension(&self, table: &str) -> Result<()> {
        let expected = self.embedder.dimensions();
        match self.store.dimension(table).await? {
            Some(stored) if stored != expected => Err(AgentError::IndexLoad(format!(
                "Row index for {} holds {}-dimensional vectors but embedding model '{}' produces {}; \
                 delete the row index to rebuild it",
                table,
                stored,
                self.embedder.model_name(),
                expected
            ))),
            _ => Ok(()),
        }
    }

    /// Embed and upsert the rows of one table. Returns the number of rows indexed.
    pub async fn index_table(&self, table: &str) -> Result<usize> {
        let rows = self.db.select_rows(table, self.max_rows).await?;
        let records = row_records(table, &rows);

        for chunk in records.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = chunk.iter().map(|(_, text)| text.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            check_batch_len(&texts, &embeddings)?;
            let batch = chunk
                .iter()
                .zip(embeddings)
                .map(|((id, text), values)| VectorRecord {
                    id: id.clone(),
                    values,
                    text: text.clone(),
                })
                .collect();
            self.store.upsert(table, batch).await?;
            debug!("Upserted {} row vectors into {}", chunk.len(), table);
        }
        Ok(records.len())
    }

    fn handle(&self, table: &str) -> RowVectorIndex {
        RowVectorIndex::new(table, Arc::clone(&self.store), Arc::clone(&self.embedder))
    }
}

/// `(row_id, row_text)` per row; the id is the table name followed by the first column value.
fn row_records(table: &str, rows: &QueryRows) -> Vec<(String, String)> {
    rows.rows
        .iter()
        .map(|row| {
            let first = row.first().map(|v| v.to_plain_string()).unwrap_or_default();
            (format!("{}{}", table, first), QueryRows::row_text(row))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteDatabase;
    use crate::schema_rag::embedder::HashingEmbedder;
    use crate::schema_rag::vector_store::InMemoryVectorStore;

    fn setup() -> (Arc<dyn SqlDatabase>, Arc<InMemoryVectorStore>) {
        let db = SqliteDatabase::open_in_memory(&[]).unwrap();
        db.execute_batch(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer TEXT, amount REAL);
             INSERT INTO orders VALUES (1, 'ann', 10.5), (2, 'bob', 20.0), (3, 'cy', 7.25);
             CREATE TABLE empty_table (id INTEGER);",
        )
        .unwrap();
        (Arc::new(db), Arc::new(InMemoryVectorStore::new()))
    }

    #[tokio::test]
    async fn test_build_all_indexes_rows_once() {
        let (db, store) = setup();
        let builder = RowIndexBuilder::new(db, store.clone(), Arc::new(HashingEmbedder::default()), None);

        let indexes = builder.build_all().await.unwrap();
        assert_eq!(indexes.len(), 2);
        assert_eq!(store.len("orders"), 3);
        let before = store.describe_namespaces().await.unwrap();

        builder.build_all().await.unwrap();
        assert_eq!(store.describe_namespaces().await.unwrap(), before);
        assert_eq!(store.len("orders"), 3);
    }

    #[tokio::test]
    async fn test_row_ids_and_retrieval() {
        let (db, store) = setup();
        let builder = RowIndexBuilder::new(db, store, Arc::new(HashingEmbedder::default()), None);
        let indexes = builder.build_all().await.unwrap();

        let hits = indexes["orders"].retrieve("what did bob order", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "orders2");
        assert!(hits[0].text.contains("'bob'"));

        assert!(indexes["empty_table"].retrieve("anything", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rows_from_another_embedder_fail_at_build() {
        let (db, store) = setup();
        RowIndexBuilder::new(Arc::clone(&db), store.clone(), Arc::new(HashingEmbedder::new(256)), None)
            .build_all()
            .await
            .unwrap();

        let err = RowIndexBuilder::new(db, store.clone(), Arc::new(HashingEmbedder::new(64)), None)
            .build_all()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::IndexLoad(_)));
        assert!(err.to_string().contains("hashing-64"));
        assert_eq!(store.len("orders"), 3);
    }

    #[tokio::test]
    async fn test_row_ceiling_limits_indexed_rows() {
        let (db, store) = setup();
        let builder = RowIndexBuilder::new(db, store.clone(), Arc::new(HashingEmbedder::default()), Some(2));
        assert_eq!(builder.index_table("orders").await.unwrap(), 2);
        assert_eq!(store.len("orders"), 2);
    }
}
