#![allow(dead_code)]

use async_trait::async_trait;
use sql_agent::db::SqliteDatabase;
use sql_agent::llm::{Completion, TextGenerator};
use sql_agent::schema_rag::{HashingEmbedder, InMemoryVectorStore};
use sql_agent::{AgentConfig, AgentError, Result, Services};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Summary,
    TextToSql,
    Synthesis,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub model: String,
    pub kind: CallKind,
}

/// Generator that answers by recognizing which prompt it was handed.
///
/// Summary prompts get a JSON `TableInfo` (junk for `refuse_tables`),
/// text-to-SQL prompts get `sql`, synthesis prompts restate the first number
/// in the SQL response. Models in `failing_models` return a service error.
pub struct ScriptedLlm {
    model: String,
    sql: String,
    failing_models: HashSet<String>,
    refuse_tables: HashSet<String>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedLlm {
    pub fn new(model: &str, sql: &str) -> Self {
        Self {
            model: model.to_string(),
            sql: sql.to_string(),
            failing_models: HashSet::new(),
            refuse_tables: HashSet::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(mut self, model: &str) -> Self {
        self.failing_models.insert(model.to_string());
        self
    }

    pub fn refusing(mut self, table: &str) -> Self {
        self.refuse_tables.insert(table.to_string());
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<Call>>> {
        Arc::clone(&self.calls)
    }
}

pub fn count(calls: &Arc<Mutex<Vec<Call>>>, kind: CallKind) -> usize {
    calls.lock().unwrap().iter().filter(|c| c.kind == kind).count()
}

pub fn models(calls: &Arc<Mutex<Vec<Call>>>) -> Vec<String> {
    calls.lock().unwrap().iter().map(|c| c.model.clone()).collect()
}

#[async_trait]
impl TextGenerator for ScriptedLlm {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<Completion> {
        let kind = if prompt.contains("Create a summary of the table") {
            CallKind::Summary
        } else if prompt.contains("synthesize a response") {
            CallKind::Synthesis
        } else {
            CallKind::TextToSql
        };
        self.calls.lock().unwrap().push(Call {
            model: self.model.clone(),
            kind,
        });

        if self.failing_models.contains(&self.model) {
            return Err(AgentError::Llm(format!("LLM API error (503): {} is overloaded", self.model)));
        }

        let content = match kind {
            CallKind::Summary => {
                let table = prompt
                    .lines()
                    .skip_while(|l| !l.starts_with("Create a summary of the table"))
                    .nth(1)
                    .unwrap_or_default()
                    .to_string();
                if self.refuse_tables.contains(&table) {
                    "Sorry, I can't describe this table.".to_string()
                } else {
                    serde_json::json!({
                        "table_name": table,
                        "table_summary": format!("Customer {} with customer name and amount", table),
                    })
                    .to_string()
                }
            }
            CallKind::TextToSql => format!("{}\nSQLResult: unknown\nAnswer: unknown", self.sql),
            CallKind::Synthesis => {
                let result = prompt
                    .lines()
                    .find_map(|l| l.strip_prefix("SQL Response: "))
                    .unwrap_or_default();
                let number: String = result
                    .chars()
                    .skip_while(|c| !c.is_ascii_digit())
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                format!("There are {} orders in total.", number)
            }
        };
        Ok(Completion::new(self.model.clone(), content))
    }

    fn with_model(&self, model: &str) -> Arc<dyn TextGenerator> {
        Arc::new(Self {
            model: model.to_string(),
            sql: self.sql.clone(),
            failing_models: self.failing_models.clone(),
            refuse_tables: self.refuse_tables.clone(),
            calls: Arc::clone(&self.calls),
        })
    }
}

/// `orders(id, customer, amount)` with 3 rows, plus an ignored system table.
pub fn orders_database(config: &AgentConfig) -> SqliteDatabase {
    let db = SqliteDatabase::open_in_memory(&config.ignore_tables).unwrap();
    db.execute_batch(
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer TEXT, amount REAL);
         INSERT INTO orders VALUES (1, 'alice', 120.0), (2, 'bob', 80.5), (3, 'carol', 42.0);
         CREATE TABLE api_key (id INTEGER PRIMARY KEY, secret TEXT);
         INSERT INTO api_key VALUES (1, 'sk-test');",
    )
    .unwrap();
    db
}

pub fn config(index_dir: &Path) -> AgentConfig {
    AgentConfig {
        object_index_dir: index_dir.join("object_index"),
        row_index_path: index_dir.join("row_index.json"),
        ..AgentConfig::default()
    }
}

pub fn services(db: SqliteDatabase, llm: ScriptedLlm, store: Arc<InMemoryVectorStore>) -> Services {
    Services::new(Arc::new(db), Arc::new(llm), Arc::new(HashingEmbedder::default()), store)
}
