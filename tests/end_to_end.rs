mod common;

use common::{count, orders_database, CallKind, ScriptedLlm};
use sql_agent::schema_rag::{InMemoryVectorStore, VectorStore};
use sql_agent::{ingest, AgentError, ExtractionPolicy, SqlAgent};
use std::sync::Arc;
use tempfile::TempDir;

const COUNT_SQL: &str = "SQLQuery: SELECT COUNT(*) FROM orders";

#[tokio::test]
async fn test_ingest_and_answer_orders_question() {
    let dir = TempDir::new().unwrap();
    let config = common::config(dir.path());
    let llm = ScriptedLlm::new(&config.model, COUNT_SQL);
    let calls = llm.calls();
    let store = Arc::new(InMemoryVectorStore::new());
    let services = common::services(orders_database(&config), llm, store.clone());

    let indexes = ingest(&services, &config).await.unwrap();
    assert_eq!(indexes.object_index.table_names(), vec!["orders"]);
    assert_eq!(store.len("orders"), 3);
    assert_eq!(store.len("api_key"), 0);
    assert!(config.object_index_dir.join("object_index.json").exists());

    let agent = SqlAgent::new(&services, indexes, &config).unwrap();
    let context = agent.answer_with_context("how many orders are there").await.unwrap();

    assert_eq!(context.model, config.model);
    assert_eq!(context.retrieved_tables.len(), 1);
    assert_eq!(context.retrieved_tables[0].table_name, "orders");
    assert!(context.assembled_context.starts_with("Table 'orders' has columns"));
    assert!(context
        .assembled_context
        .contains(" The table description is: Customer orders with customer name and amount"));
    assert!(context
        .assembled_context
        .contains("Here are some relevant example rows (values in the same order as columns above)"));
    assert_eq!(context.generated_sql, "SELECT COUNT(*) FROM orders");
    assert_eq!(context.execution_result, "[(3,)]");
    assert!(context.answer.contains('3'));

    // one summary during ingest, then text-to-SQL and synthesis
    assert_eq!(count(&calls, CallKind::Summary), 1);
    assert_eq!(count(&calls, CallKind::TextToSql), 1);
    assert_eq!(count(&calls, CallKind::Synthesis), 1);
}

#[tokio::test]
async fn test_second_ingest_reuses_both_indexes() {
    let dir = TempDir::new().unwrap();
    let config = common::config(dir.path());
    let llm = ScriptedLlm::new(&config.model, COUNT_SQL);
    let calls = llm.calls();
    let store = Arc::new(InMemoryVectorStore::new());
    let services = common::services(orders_database(&config), llm, store.clone());

    let first = ingest(&services, &config).await.unwrap();
    let namespaces = store.describe_namespaces().await.unwrap();
    assert_eq!(count(&calls, CallKind::Summary), 1);

    let second = ingest(&services, &config).await.unwrap();
    assert_eq!(count(&calls, CallKind::Summary), 1);
    assert_eq!(store.describe_namespaces().await.unwrap(), namespaces);
    assert_eq!(second.object_index.built_at(), first.object_index.built_at());

    for query in ["how many orders are there", "total amount per customer"] {
        assert_eq!(
            first.object_index.retrieve(query, 3).await.unwrap(),
            second.object_index.retrieve(query, 3).await.unwrap()
        );
    }
}

#[tokio::test]
async fn test_deleting_the_index_directory_forces_a_rebuild() {
    let dir = TempDir::new().unwrap();
    let config = common::config(dir.path());
    let llm = ScriptedLlm::new(&config.model, COUNT_SQL);
    let calls = llm.calls();
    let services = common::services(orders_database(&config), llm, Arc::new(InMemoryVectorStore::new()));

    ingest(&services, &config).await.unwrap();
    std::fs::remove_dir_all(&config.object_index_dir).unwrap();
    ingest(&services, &config).await.unwrap();
    assert_eq!(count(&calls, CallKind::Summary), 2);
}

#[tokio::test]
async fn test_extraction_policy_decides_partial_failures() {
    let dir = TempDir::new().unwrap();
    let mut config = common::config(dir.path());
    let db = orders_database(&config);
    db.execute_batch("CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT);")
        .unwrap();
    let services = common::services(
        db,
        ScriptedLlm::new(&config.model, COUNT_SQL).refusing("customers"),
        Arc::new(InMemoryVectorStore::new()),
    );

    let err = ingest(&services, &config).await.err().unwrap();
    assert!(matches!(err, AgentError::Extraction { ref table, .. } if table == "customers"));
    assert!(!config.object_index_dir.exists());

    config.extraction_policy = ExtractionPolicy::BestEffort;
    let indexes = ingest(&services, &config).await.unwrap();
    assert_eq!(indexes.object_index.table_names(), vec!["orders"]);
    // rows are indexed for every usable table regardless of summaries
    assert_eq!(indexes.row_indexes.len(), 2);
}

#[tokio::test]
async fn test_reserved_word_table_is_ingested() {
    let dir = TempDir::new().unwrap();
    let config = common::config(dir.path());
    let db = orders_database(&config);
    db.execute_batch(
        r#"CREATE TABLE "order" (id INTEGER PRIMARY KEY, item TEXT);
           INSERT INTO "order" VALUES (1, 'pen'), (2, 'ink');"#,
    )
    .unwrap();
    let store = Arc::new(InMemoryVectorStore::new());
    let services = common::services(db, ScriptedLlm::new(&config.model, COUNT_SQL), store.clone());

    let indexes = ingest(&services, &config).await.unwrap();
    let mut tables = indexes.object_index.table_names();
    tables.sort();
    assert_eq!(tables, vec!["order", "orders"]);
    assert_eq!(store.len("order"), 2);
}
