//! Table Metadata Extractor
//!
//! Summarizes every usable table (schema + a few sample rows) into a
//! `TableInfo` through structured extraction. Tables are processed
//! concurrently and joined as one batch.

use crate::config::ExtractionPolicy;
use crate::db::SqlDatabase;
use crate::error::{AgentError, Result};
use crate::llm::{extract, Shape, TextGenerator};
use crate::prompts::{PromptTemplate, TABLE_SUMMARY_TEMPLATE};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

lazy_static! {
    static ref TABLE_NAME: Regex = Regex::new(r"^\S+$").unwrap();
}

/// Short business description of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_name: String,
    pub table_summary: String,
}

impl Shape for TableInfo {
    const NAME: &'static str = "TableInfo";

    fn schema() -> serde_json::Value {
        serde_json::json!({
            "table_name": "string: the table name, no spaces",
            "table_summary": "string: short, concise summary/caption of the table"
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !TABLE_NAME.is_match(&self.table_name) {
            return Err(format!("table_name '{}' must be one word without spaces", self.table_name));
        }
        if self.table_summary.trim().is_empty() {
            return Err("table_summary is empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFailure {
    pub table: String,
    pub error: String,
}

/// Result of one extraction batch. `failures` is only ever non-empty under
/// [`ExtractionPolicy::BestEffort`].
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    pub tables: Vec<TableInfo>,
    pub failures: Vec<TableFailure>,
}

pub struct TableInfoExtractor {
    db: Arc<dyn SqlDatabase>,
    llm: Arc<dyn TextGenerator>,
    sample_rows: usize,
    policy: ExtractionPolicy,
}

impl TableInfoExtractor {
    pub fn new(
        db: Arc<dyn SqlDatabase>,
        llm: Arc<dyn TextGenerator>,
        sample_rows: usize,
        policy: ExtractionPolicy,
    ) -> Self {
        Self {
            db,
            llm,
            sample_rows,
            policy,
        }
    }

    /// Summarize every usable table.
    pub async fn extract_all(&self) -> Result<ExtractionOutcome> {
        let tables = self.db.usable_table_names().await?;
        self.extract_tables(&tables).await
    }

    pub async fn extract_tables(&self, tables: &[String]) -> Result<ExtractionOutcome> {
        info!("Extracting table summaries for {} tables ({:?})", tables.len(), self.policy);

        let mut tasks = JoinSet::new();
        for table in tables {
            let db = Arc::clone(&self.db);
            let llm = Arc::clone(&self.llm);
            let table = table.clone();
            let sample_rows = self.sample_rows;
            tasks.spawn(async move {
                let result = summarize_table(db.as_ref(), llm.as_ref(), &table, sample_rows).await;
                (table, result)
            });
        }

        let mut outcome = ExtractionOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            let (table, result) = joined.map_err(|e| AgentError::Extraction {
                table: "<unknown>".to_string(),
                message: format!("Extraction task did not complete: {}", e),
            })?;

            match result {
                Ok(info) => outcome.tables.push(info),
                Err(e) => match self.policy {
                    ExtractionPolicy::AllOrNothing => {
                        tasks.abort_all();
                        return Err(AgentError::Extraction {
                            table,
                            message: e.to_string(),
                        });
                    }
                    ExtractionPolicy::BestEffort => {
                        warn!("Skipping table {}: {}", table, e);
                        outcome.failures.push(TableFailure {
                            table,
                            error: e.to_string(),
                        });
                    }
                },
            }
        }

        info!(
            "Extracted {} table summaries ({} failed)",
            outcome.tables.len(),
            outcome.failures.len()
        );
        Ok(outcome)
    }
}

async fn summarize_table(
    db: &dyn SqlDatabase,
    llm: &dyn TextGenerator,
    table: &str,
    sample_rows: usize,
) -> Result<TableInfo> {
    let schema = db.table_info(table).await?;
    let dialect = db.dialect().to_string();
    let sample = db.select_rows(table, Some(sample_rows)).await?;

    let prompt = PromptTemplate::new(TABLE_SUMMARY_TEMPLATE).format_pairs(&[
        ("table", table),
        ("dialect", &dialect),
        ("schema", &schema),
        ("sample_rows", &sample.render()),
    ])?;

    let mut info: TableInfo = extract(llm, &prompt).await?;
    // The summary describes `table`; a renamed table could not be looked up later.
    if info.table_name != table {
        warn!(
            "Model named table {} as '{}', keeping the real name",
            table, info.table_name
        );
        info.table_name = table.to_string();
    }
    debug!("Summarized {}: {}", table, info.table_summary);
    Ok(info)
}
