//! SQLite relational engine built on rusqlite.

use crate::db::{QueryRows, SqlDatabase, SqlValue};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

pub struct SqliteDatabase {
    db: Mutex<Connection>,
    ignore_tables: HashSet<String>,
}

impl SqliteDatabase {
    pub fn from_connection(conn: Connection, ignore_tables: &[String]) -> Self {
        Self {
            db: Mutex::new(conn),
            ignore_tables: ignore_tables.iter().cloned().collect(),
        }
    }

    pub fn open_in_memory(ignore_tables: &[String]) -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?, ignore_tables))
    }

    /// Open from a URL such as `sqlite://data/app.db`, `sqlite::memory:` or a bare path.
    pub fn open(url: &str, ignore_tables: &[String]) -> Result<Self> {
        if url == "sqlite::memory:" || url == ":memory:" {
            return Self::open_in_memory(ignore_tables);
        }
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        if path.contains("://") {
            return Err(AgentError::Config(format!(
                "Unsupported database URL '{}': only SQLite is available",
                url
            )));
        }
        let conn = Connection::open(Path::new(path))?;
        Ok(Self::from_connection(conn, ignore_tables))
    }

    /// Run one or more statements without collecting rows (schema setup, seeding).
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let db = self.lock()?;
        db.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| AgentError::Database("SQLite connection mutex poisoned".to_string()))
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names
            .into_iter()
            .filter(|name| !self.ignore_tables.contains(name))
            .collect())
    }

    fn describe_table(&self, table: &str) -> Result<String> {
        let db = self.lock()?;
        let quoted = quote_identifier(table);

        let mut stmt = db.prepare(&format!("PRAGMA table_info({})", quoted))?;
        let columns = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let data_type: String = row.get(2)?;
                Ok(format!("{} ({})", name, if data_type.is_empty() { "ANY".to_string() } else { data_type }))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(AgentError::Database(format!("Table not found: {}", table)));
        }

        let mut stmt = db.prepare(&format!("PRAGMA foreign_key_list({})", quoted))?;
        let foreign_keys = stmt
            .query_map([], |row| {
                let target: String = row.get(2)?;
                let from: String = row.get(3)?;
                let to: Option<String> = row.get(4)?;
                Ok(format!("{} -> {}.{}", from, target, to.unwrap_or_else(|| "rowid".to_string())))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut info = format!("Table '{}' has columns: {}", table, columns.join(", "));
        if !foreign_keys.is_empty() {
            info.push_str(&format!(", and foreign keys: {}", foreign_keys.join(", ")));
        }
        info.push('.');
        Ok(info)
    }

    fn query(&self, sql: &str) -> Result<QueryRows> {
        let db = self.lock()?;
        let mut stmt = db.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        if columns.is_empty() {
            stmt.execute([])?;
            return Ok(QueryRows::default());
        }

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(match row.get_ref(i)? {
                    ValueRef::Null => SqlValue::Null,
                    ValueRef::Integer(v) => SqlValue::Integer(v),
                    ValueRef::Real(v) => SqlValue::Real(v),
                    ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
                    ValueRef::Blob(v) => SqlValue::Blob(v.to_vec()),
                });
            }
            out.push(values);
        }

        Ok(QueryRows { columns, rows: out })
    }
}

#[async_trait]
impl SqlDatabase for SqliteDatabase {
    fn dialect(&self) -> &str {
        "sqlite"
    }

    async fn usable_table_names(&self) -> Result<Vec<String>> {
        self.list_tables()
    }

    async fn table_info(&self, table: &str) -> Result<String> {
        self.describe_table(table)
    }

    async fn run_sql(&self, sql: &str) -> Result<QueryRows> {
        debug!("Executing SQL: {}", sql);
        self.query(sql)
            .map_err(|e| AgentError::Database(format!("Failed to execute '{}': {}", sql, e)))
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_identifier(name)
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
