//! Nodes of the text-to-SQL pipeline.

use crate::db::SqlDatabase;
use crate::error::{AgentError, Result};
use crate::llm::TextGenerator;
use crate::pipeline::graph::Node;
use crate::pipeline::value::{Inputs, Port, Value, ValueKind};
use crate::prompts::PromptTemplate;
use crate::schema_rag::context::ContextAssembler;
use crate::schema_rag::object_index::ObjectIndex;
use crate::sql_parser::parse_response_to_sql;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// query -> nearest tables from the object index.
pub struct TableRetrieverNode {
    index: Arc<ObjectIndex>,
    top_k: usize,
}

impl TableRetrieverNode {
    pub fn new(index: Arc<ObjectIndex>, top_k: usize) -> Self {
        Self { index, top_k }
    }
}

#[async_trait]
impl Node for TableRetrieverNode {
    fn inputs(&self) -> Vec<Port> {
        vec![Port::text("query")]
    }

    fn output(&self) -> ValueKind {
        ValueKind::Tables
    }

    async fn run(&self, inputs: Inputs) -> Result<Value> {
        let tables = self.index.retrieve(inputs.text("query")?, self.top_k).await?;
        Ok(Value::Tables(tables))
    }
}

/// (query, tables) -> schema context text.
pub struct ContextNode {
    assembler: Arc<ContextAssembler>,
}

impl ContextNode {
    pub fn new(assembler: Arc<ContextAssembler>) -> Self {
        Self { assembler }
    }
}

#[async_trait]
impl Node for ContextNode {
    fn inputs(&self) -> Vec<Port> {
        vec![Port::text("query"), Port::new("tables", ValueKind::Tables)]
    }

    fn output(&self) -> ValueKind {
        ValueKind::Text
    }

    async fn run(&self, inputs: Inputs) -> Result<Value> {
        let context = self
            .assembler
            .assemble(inputs.text("query")?, inputs.tables("tables")?)
            .await?;
        Ok(Value::Text(context))
    }
}

/// Formats a template; one text port per unfilled field.
pub struct PromptNode {
    template: PromptTemplate,
}

impl PromptNode {
    pub fn new(template: PromptTemplate) -> Self {
        Self { template }
    }
}

#[async_trait]
impl Node for PromptNode {
    fn inputs(&self) -> Vec<Port> {
        self.template.required_fields().into_iter().map(Port::text).collect()
    }

    fn output(&self) -> ValueKind {
        ValueKind::Text
    }

    async fn run(&self, inputs: Inputs) -> Result<Value> {
        Ok(Value::Text(self.template.format(&inputs.texts())?))
    }
}

/// prompt -> completion.
pub struct LlmNode {
    llm: Arc<dyn TextGenerator>,
}

impl LlmNode {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Node for LlmNode {
    fn inputs(&self) -> Vec<Port> {
        vec![Port::text("prompt")]
    }

    fn output(&self) -> ValueKind {
        ValueKind::Completion
    }

    async fn run(&self, inputs: Inputs) -> Result<Value> {
        let completion = self.llm.complete(inputs.text("prompt")?).await?;
        Ok(Value::Completion(completion))
    }
}

/// completion -> SQL text. Never fails on content.
pub struct SqlParserNode;

#[async_trait]
impl Node for SqlParserNode {
    fn inputs(&self) -> Vec<Port> {
        vec![Port::new("completion", ValueKind::Completion)]
    }

    fn output(&self) -> ValueKind {
        ValueKind::Text
    }

    async fn run(&self, inputs: Inputs) -> Result<Value> {
        let sql = parse_response_to_sql(inputs.completion("completion")?);
        debug!("Parsed SQL: {}", sql);
        Ok(Value::Text(sql))
    }
}

/// SQL text -> rendered result rows.
pub struct SqlExecutorNode {
    db: Arc<dyn SqlDatabase>,
}

impl SqlExecutorNode {
    pub fn new(db: Arc<dyn SqlDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Node for SqlExecutorNode {
    fn inputs(&self) -> Vec<Port> {
        vec![Port::text("sql")]
    }

    fn output(&self) -> ValueKind {
        ValueKind::Text
    }

    async fn run(&self, inputs: Inputs) -> Result<Value> {
        let sql = inputs.text("sql")?;
        if sql.trim().is_empty() {
            return Err(AgentError::Database("Model produced no SQL to execute".to_string()));
        }
        let rows = self.db.run_sql(sql).await?;
        info!("Query returned {} rows", rows.len());
        Ok(Value::Text(rows.render()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteDatabase;
    use crate::llm::Completion;
    use crate::prompts::RESPONSE_SYNTHESIS_TEMPLATE;
    use std::collections::HashMap;

    fn inputs(pairs: &[(&str, Value)]) -> Inputs {
        Inputs::new(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect::<HashMap<_, _>>())
    }

    #[tokio::test]
    async fn test_prompt_node_ports_follow_template_fields() {
        let node = PromptNode::new(PromptTemplate::new(RESPONSE_SYNTHESIS_TEMPLATE));
        let names: Vec<String> = node.inputs().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["query", "sql", "sql_result"]);

        let out = node
            .run(inputs(&[
                ("query", Value::from("how many")),
                ("sql", Value::from("SELECT COUNT(*) FROM t")),
                ("sql_result", Value::from("[(3,)]")),
            ]))
            .await
            .unwrap();
        assert!(out.as_text().unwrap().contains("SQL Response: [(3,)]"));
    }

    #[tokio::test]
    async fn test_parser_and_executor_nodes() {
        let parsed = SqlParserNode
            .run(inputs(&[(
                "completion",
                Value::Completion(Completion::new("m", "SQLQuery: SELECT COUNT(*) FROM t\nSQLResult: 2")),
            )]))
            .await
            .unwrap();
        assert_eq!(parsed, Value::from("SELECT COUNT(*) FROM t"));

        let db = SqliteDatabase::open_in_memory(&[]).unwrap();
        db.execute_batch("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1), (2);")
            .unwrap();
        let executor = SqlExecutorNode::new(Arc::new(db));
        let rendered = executor.run(inputs(&[("sql", parsed)])).await.unwrap();
        assert_eq!(rendered, Value::from("[(2,)]"));

        assert!(executor.run(inputs(&[("sql", Value::from(""))])).await.is_err());
    }
}
