//! SQL Agent
//!
//! Owns the two query pipelines (primary model and fallback model), both
//! built once at construction, and answers questions through them. A failed
//! primary run is retried exactly once on the fallback pipeline.

use crate::config::AgentConfig;
use crate::db::SqlDatabase;
use crate::error::{AgentError, Result};
use crate::ingestion::{ingest, Indexes};
use crate::llm::TextGenerator;
use crate::pipeline::nodes::{ContextNode, LlmNode, PromptNode, SqlExecutorNode, SqlParserNode, TableRetrieverNode};
use crate::pipeline::{Pipeline, PipelineBuilder, RunTrace, Value, ValueKind};
use crate::prompts::{PromptTemplate, RESPONSE_SYNTHESIS_TEMPLATE, TEXT_TO_SQL_TEMPLATE};
use crate::schema_rag::context::ContextAssembler;
use crate::schema_rag::object_index::{ObjectIndex, TableSchemaObject};
use crate::services::Services;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const QUERY_INPUT: &str = "query";
const TABLE_RETRIEVER: &str = "table_retriever";
const CONTEXT: &str = "table_context";
const TEXT_TO_SQL_PROMPT: &str = "text2sql_prompt";
const TEXT_TO_SQL_LLM: &str = "text2sql_llm";
const SQL_PARSER: &str = "sql_output_parser";
const SQL_EXECUTOR: &str = "sql_executor";
const RESPONSE_PROMPT: &str = "response_synthesis_prompt";
const RESPONSE_LLM: &str = "response_synthesis_llm";

/// Everything one question went through.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRunContext {
    pub run_id: Uuid,
    pub model: String,
    pub query: String,
    pub retrieved_tables: Vec<TableSchemaObject>,
    pub assembled_context: String,
    pub generated_sql: String,
    pub execution_result: String,
    pub answer: String,
}

/// Result of a single pipeline run.
#[derive(Debug)]
pub enum RunOutcome {
    Success(QueryRunContext),
    Failure(AgentError),
}

enum FallbackState {
    Primary,
    Fallback(AgentError),
    Success(QueryRunContext),
    Failure(AgentError),
}

struct ModelPipeline {
    model: String,
    pipeline: Pipeline,
}

pub struct SqlAgent {
    primary: ModelPipeline,
    fallback: ModelPipeline,
}

impl SqlAgent {
    /// Ingest (or reload) the indexes, then build the agent.
    pub async fn open(services: &Services, config: &AgentConfig) -> Result<Self> {
        let indexes = ingest(services, config).await?;
        Self::new(services, indexes, config)
    }

    pub fn new(services: &Services, indexes: Indexes, config: &AgentConfig) -> Result<Self> {
        let object_index = Arc::new(indexes.object_index);
        let assembler = Arc::new(ContextAssembler::new(
            Arc::clone(&services.db),
            Arc::new(indexes.row_indexes),
            config.row_top_k,
        ));

        let parts = PipelineParts {
            db: Arc::clone(&services.db),
            object_index,
            assembler,
            table_top_k: config.table_top_k,
        };

        let primary_llm = Arc::clone(&services.llm);
        let fallback_llm = services.llm.with_model(&config.fallback_model);
        info!(
            "Building SQL agent pipelines (primary: {}, fallback: {})",
            primary_llm.model(),
            fallback_llm.model()
        );

        Ok(Self {
            primary: ModelPipeline {
                model: primary_llm.model().to_string(),
                pipeline: parts.build(primary_llm)?,
            },
            fallback: ModelPipeline {
                model: fallback_llm.model().to_string(),
                pipeline: parts.build(fallback_llm)?,
            },
        })
    }

    /// Answer a natural-language question.
    pub async fn answer(&self, query: &str) -> Result<String> {
        Ok(self.answer_with_context(query).await?.answer)
    }

    /// Answer a question and return everything the run produced.
    pub async fn answer_with_context(&self, query: &str) -> Result<QueryRunContext> {
        let mut state = FallbackState::Primary;
        loop {
            state = match state {
                FallbackState::Primary => match self.run_once(&self.primary, query).await {
                    RunOutcome::Success(context) => FallbackState::Success(context),
                    RunOutcome::Failure(e) => {
                        warn!("Primary run on {} failed, retrying on {}: {}", self.primary.model, self.fallback.model, e);
                        FallbackState::Fallback(e)
                    }
                },
                FallbackState::Fallback(primary) => match self.run_once(&self.fallback, query).await {
                    RunOutcome::Success(context) => {
                        info!("Fallback run on {} succeeded", self.fallback.model);
                        FallbackState::Success(context)
                    }
                    RunOutcome::Failure(fallback) => {
                        warn!("Fallback run on {} failed: {}", self.fallback.model, fallback);
                        FallbackState::Failure(AgentError::FallbackExhausted {
                            primary: Box::new(primary),
                            fallback: Box::new(fallback),
                        })
                    }
                },
                FallbackState::Success(context) => return Ok(context),
                FallbackState::Failure(e) => return Err(e),
            };
        }
    }

    async fn run_once(&self, target: &ModelPipeline, query: &str) -> RunOutcome {
        let run_id = Uuid::new_v4();
        info!("Run {} on {}: {}", run_id, target.model, query);

        let inputs = HashMap::from([(QUERY_INPUT.to_string(), Value::from(query))]);
        match target.pipeline.run_with_trace(inputs).await {
            Ok(trace) => match run_context(run_id, &target.model, query, &trace) {
                Ok(context) => RunOutcome::Success(context),
                Err(e) => RunOutcome::Failure(e),
            },
            Err(e) => RunOutcome::Failure(e),
        }
    }
}

/// Shared pieces both pipelines are built from.
struct PipelineParts {
    db: Arc<dyn SqlDatabase>,
    object_index: Arc<ObjectIndex>,
    assembler: Arc<ContextAssembler>,
    table_top_k: usize,
}

impl PipelineParts {
    fn build(&self, llm: Arc<dyn TextGenerator>) -> Result<Pipeline> {
        let text_to_sql = PromptTemplate::new(TEXT_TO_SQL_TEMPLATE).partial_format("dialect", self.db.dialect());

        PipelineBuilder::new()
            .add_input(QUERY_INPUT, ValueKind::Text)
            .add_node(TABLE_RETRIEVER, TableRetrieverNode::new(Arc::clone(&self.object_index), self.table_top_k))
            .add_node(CONTEXT, ContextNode::new(Arc::clone(&self.assembler)))
            .add_node(TEXT_TO_SQL_PROMPT, PromptNode::new(text_to_sql))
            .add_node(TEXT_TO_SQL_LLM, LlmNode::new(Arc::clone(&llm)))
            .add_node(SQL_PARSER, SqlParserNode)
            .add_node(SQL_EXECUTOR, SqlExecutorNode::new(Arc::clone(&self.db)))
            .add_node(RESPONSE_PROMPT, PromptNode::new(PromptTemplate::new(RESPONSE_SYNTHESIS_TEMPLATE)))
            .add_node(RESPONSE_LLM, LlmNode::new(llm))
            .add_link(QUERY_INPUT, TABLE_RETRIEVER, "query")
            .add_link(QUERY_INPUT, CONTEXT, "query")
            .add_link(TABLE_RETRIEVER, CONTEXT, "tables")
            .add_link(QUERY_INPUT, TEXT_TO_SQL_PROMPT, "query")
            .add_link(CONTEXT, TEXT_TO_SQL_PROMPT, "schema")
            .add_link(TEXT_TO_SQL_PROMPT, TEXT_TO_SQL_LLM, "prompt")
            .add_link(TEXT_TO_SQL_LLM, SQL_PARSER, "completion")
            .add_link(SQL_PARSER, SQL_EXECUTOR, "sql")
            .add_link(QUERY_INPUT, RESPONSE_PROMPT, "query")
            .add_link(SQL_PARSER, RESPONSE_PROMPT, "sql")
            .add_link(SQL_EXECUTOR, RESPONSE_PROMPT, "sql_result")
            .add_link(RESPONSE_PROMPT, RESPONSE_LLM, "prompt")
            .build()
    }
}

fn run_context(run_id: Uuid, model: &str, query: &str, trace: &RunTrace) -> Result<QueryRunContext> {
    let text = |node: &str| -> Result<String> {
        trace
            .output(node)
            .and_then(Value::as_text)
            .map(str::to_string)
            .ok_or_else(|| AgentError::Graph(format!("Node '{}' produced no text", node)))
    };

    let retrieved_tables = trace
        .output(TABLE_RETRIEVER)
        .and_then(Value::as_tables)
        .map(<[TableSchemaObject]>::to_vec)
        .ok_or_else(|| AgentError::Graph(format!("Node '{}' produced no tables", TABLE_RETRIEVER)))?;
    let answer = trace
        .output(RESPONSE_LLM)
        .and_then(Value::as_completion)
        .map(|c| c.text().to_string())
        .ok_or_else(|| AgentError::Graph(format!("Node '{}' produced no completion", RESPONSE_LLM)))?;

    Ok(QueryRunContext {
        run_id,
        model: model.to_string(),
        query: query.to_string(),
        retrieved_tables,
        assembled_context: text(CONTEXT)?,
        generated_sql: text(SQL_PARSER)?,
        execution_result: text(SQL_EXECUTOR)?,
        answer,
    })
}
