//! Prompt templates
//!
//! Templates use `{field}` placeholders (`{{` and `}}` for literal braces).
//! Fields are discovered when the template is parsed so a pipeline can check
//! at build time that every field is wired to an input.

use crate::error::{AgentError, Result};
use std::collections::HashMap;

pub const TEXT_TO_SQL_TEMPLATE: &str = "Given an input question, first create a syntactically correct {dialect} \
query to run, then look at the results of the query and return the answer. You can order the results by a \
relevant column to return the most interesting examples in the database.

Never query for all the columns from a specific table, only ask for a few relevant columns given the question.

Pay attention to use only the column names that you can see in the schema description. Be careful to not query \
for columns that do not exist. Pay attention to which column is in which table. Also, qualify column names with \
the table name when needed. You are required to use the following format, each taking one line:

Question: Question here
SQLQuery: SQL Query to run
SQLResult: Result of the SQLQuery
Answer: Final answer here

Only use tables listed below.
{schema}

Question: {query}
SQLQuery: ";

pub const RESPONSE_SYNTHESIS_TEMPLATE: &str = "Given an input question, synthesize a response from the query results.
Query: {query}
SQL: {sql}
SQL Response: {sql_result}
Response: ";

pub const TABLE_SUMMARY_TEMPLATE: &str = "Let's think step by step.
Create a summary of the table
{table}

Database is in dialect
{dialect}

Here's the schema
{schema}

Here's the sample data
{sample_rows}
";

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field(String),
}

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
    partials: HashMap<String, String>,
}

impl PromptTemplate {
    pub fn new(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    while let Some(&n) = chars.peek() {
                        chars.next();
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        name.push(n);
                    }
                    if closed && is_identifier(&name) {
                        if !literal.is_empty() {
                            segments.push(Segment::Literal(std::mem::take(&mut literal)));
                        }
                        segments.push(Segment::Field(name));
                    } else {
                        literal.push('{');
                        literal.push_str(&name);
                        if closed {
                            literal.push('}');
                        }
                    }
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self {
            segments,
            partials: HashMap::new(),
        }
    }

    /// Fix a field's value ahead of time.
    pub fn partial_format(mut self, field: &str, value: impl Into<String>) -> Self {
        self.partials.insert(field.to_string(), value.into());
        self
    }

    /// Fields still needing a value, in order of first appearance.
    pub fn required_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for segment in &self.segments {
            if let Segment::Field(name) = segment {
                if !self.partials.contains_key(name) && !fields.contains(name) {
                    fields.push(name.clone());
                }
            }
        }
        fields
    }

    pub fn format(&self, values: &HashMap<String, String>) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => {
                    let value = values
                        .get(name)
                        .or_else(|| self.partials.get(name))
                        .ok_or_else(|| AgentError::Graph(format!("Prompt field '{}' has no value", name)))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// Convenience wrapper over [`PromptTemplate::format`].
    pub fn format_pairs(&self, pairs: &[(&str, &str)]) -> Result<String> {
        let values = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.format(&values)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
