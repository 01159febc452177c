//! Pipeline Engine
//!
//! A small typed DAG executor. Nodes declare named input ports and a single
//! output; edges are checked when the graph is built and nodes run one at a
//! time in a fixed topological order.

pub mod graph;
pub mod nodes;
pub mod value;

pub use graph::{Edge, Node, Pipeline, PipelineBuilder, RunTrace, OUTPUT_PORT};
pub use value::{Inputs, Port, Value, ValueKind};
