//! Context Assembler
//!
//! Turns the retrieved tables into the schema text given to the text-to-SQL
//! prompt: canonical schema, the table summary, and a few rows that resemble
//! the question.

use crate::db::SqlDatabase;
use crate::error::Result;
use crate::schema_rag::object_index::TableSchemaObject;
use crate::schema_rag::row_index::RowVectorIndex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

const DESCRIPTION_PREFIX: &str = " The table description is: ";
const ROWS_HEADER: &str = "Here are some relevant example rows (values in the same order as columns above)";

pub struct ContextAssembler {
    db: Arc<dyn SqlDatabase>,
    row_indexes: Arc<HashMap<String, RowVectorIndex>>,
    row_top_k: usize,
}

impl ContextAssembler {
    pub fn new(
        db: Arc<dyn SqlDatabase>,
        row_indexes: Arc<HashMap<String, RowVectorIndex>>,
        row_top_k: usize,
    ) -> Self {
        Self {
            db,
            row_indexes,
            row_top_k,
        }
    }

    /// One block per table, in the order given, separated by a blank line.
    pub async fn assemble(&self, query: &str, tables: &[TableSchemaObject]) -> Result<String> {
        let mut blocks = Vec::with_capacity(tables.len());
        for table in tables {
            blocks.push(self.describe(query, table).await?);
        }
        Ok(blocks.join("\n\n"))
    }

    async fn describe(&self, query: &str, table: &TableSchemaObject) -> Result<String> {
        let mut block = self.db.table_info(&table.table_name).await?;
        if let Some(context) = &table.context_str {
            block.push_str(DESCRIPTION_PREFIX);
            block.push_str(context);
        }

        match self.row_indexes.get(&table.table_name) {
            Some(index) => {
                let rows = index.retrieve(query, self.row_top_k).await?;
                if !rows.is_empty() {
                    block.push('\n');
                    block.push_str(ROWS_HEADER);
                    block.push('\n');
                    for row in rows {
                        block.push_str(&row.text);
                        block.push('\n');
                    }
                }
            }
            None => warn!("No row index for table {}, describing it without example rows", table.table_name),
        }
        Ok(block.trim_end_matches('\n').to_string())
    }
}
