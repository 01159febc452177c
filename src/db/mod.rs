//! Relational engine capability
//!
//! The agent only needs four things from a database: the usable tables, a
//! canonical schema description per table, a dialect name and a way to run SQL.

pub mod sqlite;

pub use sqlite::SqliteDatabase;

use crate::error::Result;
use async_trait::async_trait;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single cell returned by the relational engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Unquoted rendering, used where a value becomes part of an identifier.
    pub fn to_plain_string(&self) -> String {
        match self {
            SqlValue::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(i) => write!(f, "{}", i),
            SqlValue::Real(r) => write!(f, "{:?}", r),
            SqlValue::Text(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            SqlValue::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
        }
    }
}

/// Rows produced by one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render one row as a tuple, e.g. `(1, 'alice', 10.5)`.
    pub fn row_text(row: &[SqlValue]) -> String {
        if row.len() == 1 {
            format!("({},)", row[0])
        } else {
            format!("({})", row.iter().join(", "))
        }
    }

    /// Render the whole result as a list of tuples, e.g. `[(3,)]`.
    pub fn render(&self) -> String {
        format!("[{}]", self.rows.iter().map(|r| Self::row_text(r)).join(", "))
    }
}

/// Relational engine used by ingestion and by the pipeline's SQL executor.
///
/// Implementations must tolerate concurrent use: the extractor calls into the
/// same handle from several tasks at once.
#[async_trait]
pub trait SqlDatabase: Send + Sync {
    /// Dialect name, e.g. "sqlite" or "postgresql".
    fn dialect(&self) -> &str;

    /// Tables eligible for indexing (ignore-list already applied).
    async fn usable_table_names(&self) -> Result<Vec<String>>;

    /// Canonical schema description for one table.
    async fn table_info(&self, table: &str) -> Result<String>;

    /// Execute arbitrary SQL and return its rows.
    async fn run_sql(&self, sql: &str) -> Result<QueryRows>;

    /// Quote a table or column name for this dialect.
    fn quote_identifier(&self, name: &str) -> String;

    /// Read rows from a table, optionally bounded.
    async fn select_rows(&self, table: &str, limit: Option<usize>) -> Result<QueryRows> {
        let table = self.quote_identifier(table);
        let sql = match limit {
            Some(n) => format!("SELECT * FROM {} LIMIT {}", table, n),
            None => format!("SELECT * FROM {}", table),
        };
        self.run_sql(&sql).await
    }
}
