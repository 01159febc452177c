//! Pipeline graph
//!
//! Named nodes connected by typed edges. `PipelineBuilder::build` checks the
//! whole graph up front (names, ports, types, cycles, single sink) and fixes
//! the execution order; `Pipeline::run` then executes nodes one at a time in
//! that order.

use crate::error::{AgentError, Result};
use crate::pipeline::value::{Inputs, Port, Value, ValueKind};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Every node has exactly one output port.
pub const OUTPUT_PORT: &str = "output";

/// A unit of work in a pipeline.
#[async_trait]
pub trait Node: Send + Sync {
    /// Declared input ports; each must be fed by exactly one edge.
    fn inputs(&self) -> Vec<Port>;

    fn output(&self) -> ValueKind;

    async fn run(&self, inputs: Inputs) -> Result<Value>;
}

enum Slot {
    /// Value supplied by the caller at run time.
    Input(ValueKind),
    Node(Arc<dyn Node>),
}

impl Slot {
    fn output(&self) -> ValueKind {
        match self {
            Slot::Input(kind) => *kind,
            Slot::Node(node) => node.output(),
        }
    }

    fn ports(&self) -> Vec<Port> {
        match self {
            Slot::Input(_) => Vec::new(),
            Slot::Node(node) => node.inputs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub src: String,
    pub src_port: String,
    pub dst: String,
    pub dst_port: String,
}

struct Registered {
    name: String,
    slot: Slot,
}

/// Collects nodes and edges; nothing is checked until [`PipelineBuilder::build`].
#[derive(Default)]
pub struct PipelineBuilder {
    nodes: Vec<Registered>,
    edges: Vec<Edge>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a run-time input.
    pub fn add_input(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.nodes.push(Registered {
            name: name.into(),
            slot: Slot::Input(kind),
        });
        self
    }

    pub fn add_node(mut self, name: impl Into<String>, node: impl Node + 'static) -> Self {
        self.nodes.push(Registered {
            name: name.into(),
            slot: Slot::Node(Arc::new(node)),
        });
        self
    }

    /// Connect the output of `src` to port `dst_port` of `dst`.
    pub fn add_link(self, src: &str, dst: &str, dst_port: &str) -> Self {
        self.add_edge(src, OUTPUT_PORT, dst, dst_port)
    }

    pub fn add_edge(mut self, src: &str, src_port: &str, dst: &str, dst_port: &str) -> Self {
        self.edges.push(Edge {
            src: src.to_string(),
            src_port: src_port.to_string(),
            dst: dst.to_string(),
            dst_port: dst_port.to_string(),
        });
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if index.insert(node.name.as_str(), i).is_some() {
                return Err(AgentError::Graph(format!("Duplicate node name '{}'", node.name)));
            }
        }

        let ports: Vec<Vec<Port>> = self.nodes.iter().map(|n| n.slot.ports()).collect();
        let mut incoming: Vec<Vec<(usize, String)>> = vec![Vec::new(); self.nodes.len()];
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        let mut satisfied: HashSet<(usize, &str)> = HashSet::new();

        for edge in &self.edges {
            let src = *index
                .get(edge.src.as_str())
                .ok_or_else(|| AgentError::Graph(format!("Edge source '{}' is not a declared node", edge.src)))?;
            let dst = *index
                .get(edge.dst.as_str())
                .ok_or_else(|| AgentError::Graph(format!("Edge destination '{}' is not a declared node", edge.dst)))?;

            if edge.src_port != OUTPUT_PORT {
                return Err(AgentError::Graph(format!(
                    "Node '{}' has no output port '{}'",
                    edge.src, edge.src_port
                )));
            }
            let port = ports[dst]
                .iter()
                .find(|p| p.name == edge.dst_port)
                .ok_or_else(|| {
                    AgentError::Graph(format!("Node '{}' has no input port '{}'", edge.dst, edge.dst_port))
                })?;

            let produced = self.nodes[src].slot.output();
            if produced != port.kind {
                return Err(AgentError::Graph(format!(
                    "Type mismatch on {}.{} -> {}.{}: {} into {}",
                    edge.src, edge.src_port, edge.dst, edge.dst_port, produced, port.kind
                )));
            }
            if !satisfied.insert((dst, port.name.as_str())) {
                return Err(AgentError::Graph(format!(
                    "Port {}.{} receives more than one edge",
                    edge.dst, edge.dst_port
                )));
            }

            incoming[dst].push((src, edge.dst_port.clone()));
            outgoing[src].push(dst);
        }

        for (i, node_ports) in ports.iter().enumerate() {
            for port in node_ports {
                if !satisfied.contains(&(i, port.name.as_str())) {
                    return Err(AgentError::Graph(format!(
                        "Port {}.{} is not connected",
                        self.nodes[i].name, port.name
                    )));
                }
            }
        }

        let order = execution_order(&incoming, &outgoing).map_err(|stuck| {
            let names: Vec<&str> = stuck.iter().map(|&i| self.nodes[i].name.as_str()).collect();
            AgentError::Graph(format!("Pipeline contains a cycle through {:?}", names))
        })?;

        let sinks: Vec<usize> = (0..self.nodes.len()).filter(|&i| outgoing[i].is_empty()).collect();
        let sink = match sinks.as_slice() {
            [sink] => *sink,
            [] => return Err(AgentError::Graph("Pipeline has no terminal node".to_string())),
            many => {
                let names: Vec<&str> = many.iter().map(|&i| self.nodes[i].name.as_str()).collect();
                return Err(AgentError::Graph(format!("Pipeline has several terminal nodes: {:?}", names)));
            }
        };

        Ok(Pipeline {
            nodes: self.nodes,
            incoming,
            order,
            sink,
        })
    }
}

/// Kahn's algorithm; among ready nodes the earliest registered runs first.
/// On a cycle, returns the nodes that never became ready.
fn execution_order(incoming: &[Vec<(usize, String)>], outgoing: &[Vec<usize>]) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let mut in_degree: Vec<usize> = incoming.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = (0..incoming.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(incoming.len());

    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &dependent in &outgoing[node] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != incoming.len() {
        return Err((0..incoming.len()).filter(|&i| in_degree[i] > 0).collect());
    }
    Ok(order)
}

/// Outputs of one run, by node name.
#[derive(Debug, Clone)]
pub struct RunTrace {
    pub outputs: HashMap<String, Value>,
    pub terminal: String,
}

impl RunTrace {
    pub fn output(&self, node: &str) -> Option<&Value> {
        self.outputs.get(node)
    }

    pub fn into_terminal(mut self) -> Result<Value> {
        self.outputs
            .remove(&self.terminal)
            .ok_or_else(|| AgentError::Graph(format!("Terminal node '{}' produced nothing", self.terminal)))
    }
}

/// A validated, reusable graph.
pub struct Pipeline {
    nodes: Vec<Registered>,
    incoming: Vec<Vec<(usize, String)>>,
    order: Vec<usize>,
    sink: usize,
}

impl Pipeline {
    /// Node names in the order they run.
    pub fn execution_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.nodes[i].name.as_str()).collect()
    }

    /// Run the graph and return the terminal node's output.
    pub async fn run(&self, inputs: HashMap<String, Value>) -> Result<Value> {
        self.run_with_trace(inputs).await?.into_terminal()
    }

    /// Run the graph and keep every node's output.
    pub async fn run_with_trace(&self, mut inputs: HashMap<String, Value>) -> Result<RunTrace> {
        for name in inputs.keys() {
            let declared = self
                .nodes
                .iter()
                .any(|n| &n.name == name && matches!(n.slot, Slot::Input(_)));
            if !declared {
                return Err(AgentError::Graph(format!("'{}' is not a declared pipeline input", name)));
            }
        }

        let mut outputs: Vec<Option<Value>> = vec![None; self.nodes.len()];
        for &i in &self.order {
            let registered = &self.nodes[i];
            let value = match &registered.slot {
                Slot::Input(kind) => {
                    let value = inputs
                        .remove(&registered.name)
                        .ok_or_else(|| AgentError::Graph(format!("Missing pipeline input '{}'", registered.name)))?;
                    if value.kind() != *kind {
                        return Err(AgentError::Graph(format!(
                            "Pipeline input '{}' expects {}, got {}",
                            registered.name,
                            kind,
                            value.kind()
                        )));
                    }
                    value
                }
                Slot::Node(node) => {
                    let mut delivered = HashMap::with_capacity(self.incoming[i].len());
                    for (src, port) in &self.incoming[i] {
                        let value = outputs[*src].clone().ok_or_else(|| {
                            AgentError::Graph(format!("Node '{}' ran before its inputs", registered.name))
                        })?;
                        delivered.insert(port.clone(), value);
                    }

                    debug!("Running pipeline node {}", registered.name);
                    let value = node
                        .run(Inputs::new(delivered))
                        .await
                        .map_err(|e| AgentError::node(&registered.name, e))?;
                    if value.kind() != node.output() {
                        return Err(AgentError::node(
                            &registered.name,
                            AgentError::Graph(format!("Declared {} output, produced {}", node.output(), value.kind())),
                        ));
                    }
                    debug!("Pipeline node {} finished", registered.name);
                    value
                }
            };
            outputs[i] = Some(value);
        }

        let outputs = self
            .nodes
            .iter()
            .zip(outputs)
            .filter_map(|(n, v)| v.map(|v| (n.name.clone(), v)))
            .collect();
        Ok(RunTrace {
            outputs,
            terminal: self.nodes[self.sink].name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;
    use std::sync::Mutex;

    /// Joins its text inputs in port order and records every call.
    struct Concat {
        ports: Vec<&'static str>,
        log: Arc<Mutex<Vec<String>>>,
        label: &'static str,
    }

    #[async_trait]
    impl Node for Concat {
        fn inputs(&self) -> Vec<Port> {
            self.ports.iter().map(|p| Port::text(*p)).collect()
        }

        fn output(&self) -> ValueKind {
            ValueKind::Text
        }

        async fn run(&self, inputs: Inputs) -> Result<Value> {
            self.log.lock().unwrap().push(self.label.to_string());
            let mut parts = vec![self.label.to_string()];
            for port in &self.ports {
                parts.push(inputs.text(port)?.to_string());
            }
            Ok(Value::Text(parts.join(":")))
        }
    }

    struct ToCompletion;

    #[async_trait]
    impl Node for ToCompletion {
        fn inputs(&self) -> Vec<Port> {
            vec![Port::text("text")]
        }

        fn output(&self) -> ValueKind {
            ValueKind::Completion
        }

        async fn run(&self, inputs: Inputs) -> Result<Value> {
            Ok(Value::Completion(Completion::new("m", inputs.text("text")?)))
        }
    }

    struct Fails;

    #[async_trait]
    impl Node for Fails {
        fn inputs(&self) -> Vec<Port> {
            vec![Port::text("in")]
        }

        fn output(&self) -> ValueKind {
            ValueKind::Text
        }

        async fn run(&self, _inputs: Inputs) -> Result<Value> {
            Err(AgentError::Database("no such table: ghosts".to_string()))
        }
    }

    fn concat(label: &'static str, ports: &[&'static str], log: &Arc<Mutex<Vec<String>>>) -> Concat {
        Concat {
            ports: ports.to_vec(),
            log: Arc::clone(log),
            label,
        }
    }

    fn query(text: &str) -> HashMap<String, Value> {
        HashMap::from([("query".to_string(), Value::from(text))])
    }

    #[tokio::test]
    async fn test_fan_out_and_join() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PipelineBuilder::new()
            .add_input("query", ValueKind::Text)
            .add_node("left", concat("L", &["in"], &log))
            .add_node("right", concat("R", &["in"], &log))
            .add_node("join", concat("J", &["a", "b"], &log))
            .add_link("query", "left", "in")
            .add_link("query", "right", "in")
            .add_link("left", "join", "a")
            .add_link("right", "join", "b")
            .build()
            .unwrap();

        let trace = pipeline.run_with_trace(query("q")).await.unwrap();
        assert_eq!(trace.output("left"), Some(&Value::from("L:q")));
        assert_eq!(trace.output("right"), Some(&Value::from("R:q")));
        assert_eq!(trace.terminal, "join");
        assert_eq!(trace.into_terminal().unwrap(), Value::from("J:L:q:R:q"));
        // each node ran exactly once
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_ties_follow_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PipelineBuilder::new()
            .add_input("query", ValueKind::Text)
            .add_node("join", concat("J", &["a", "b", "c"], &log))
            .add_node("zeta", concat("Z", &["in"], &log))
            .add_node("alpha", concat("A", &["in"], &log))
            .add_node("mid", concat("M", &["in"], &log))
            .add_link("query", "zeta", "in")
            .add_link("query", "alpha", "in")
            .add_link("query", "mid", "in")
            .add_link("mid", "join", "c")
            .add_link("alpha", "join", "b")
            .add_link("zeta", "join", "a")
            .build()
            .unwrap();

        assert_eq!(pipeline.execution_order(), vec!["query", "zeta", "alpha", "mid", "join"]);
        pipeline.run(query("q")).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["Z", "A", "M", "J"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = PipelineBuilder::new()
            .add_input("query", ValueKind::Text)
            .add_node("a", concat("A", &["x", "y"], &log))
            .add_node("b", concat("B", &["x"], &log))
            .add_node("end", concat("E", &["x"], &log))
            .add_link("query", "a", "x")
            .add_link("b", "a", "y")
            .add_link("a", "b", "x")
            .add_link("a", "end", "x")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_duplicate_destination_port_is_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = PipelineBuilder::new()
            .add_input("query", ValueKind::Text)
            .add_input("other", ValueKind::Text)
            .add_node("a", concat("A", &["in"], &log))
            .add_link("query", "a", "in")
            .add_link("other", "a", "in")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("more than one edge"));
    }

    #[test]
    fn test_undeclared_node_and_port_are_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = PipelineBuilder::new()
            .add_input("query", ValueKind::Text)
            .add_node("a", concat("A", &["in"], &log))
            .add_link("query", "a", "in")
            .add_link("a", "ghost", "in")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("'ghost'"));

        let err = PipelineBuilder::new()
            .add_input("query", ValueKind::Text)
            .add_node("a", concat("A", &["in"], &log))
            .add_link("query", "a", "nope")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("no input port 'nope'"));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = PipelineBuilder::new()
            .add_input("query", ValueKind::Text)
            .add_node("complete", ToCompletion)
            .add_node("a", concat("A", &["in"], &log))
            .add_link("query", "complete", "text")
            .add_link("complete", "a", "in")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("Type mismatch"));
    }

    #[test]
    fn test_unconnected_port_duplicate_name_and_sinks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = PipelineBuilder::new()
            .add_input("query", ValueKind::Text)
            .add_node("a", concat("A", &["in", "extra"], &log))
            .add_link("query", "a", "in")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("a.extra is not connected"));

        let err = PipelineBuilder::new()
            .add_input("query", ValueKind::Text)
            .add_node("query", concat("A", &["in"], &log))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("Duplicate node name"));

        let err = PipelineBuilder::new()
            .add_input("query", ValueKind::Text)
            .add_node("a", concat("A", &["in"], &log))
            .add_node("b", concat("B", &["in"], &log))
            .add_link("query", "a", "in")
            .add_link("query", "b", "in")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("several terminal nodes"));
    }

    #[tokio::test]
    async fn test_node_failure_names_the_node() {
        let pipeline = PipelineBuilder::new()
            .add_input("query", ValueKind::Text)
            .add_node("executor", Fails)
            .add_link("query", "executor", "in")
            .build()
            .unwrap();

        let err = pipeline.run(query("q")).await.unwrap_err();
        assert_eq!(err.failed_node(), Some("executor"));
        assert!(err.to_string().contains("no such table: ghosts"));
    }

    #[tokio::test]
    async fn test_inputs_are_checked_at_run_time() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PipelineBuilder::new()
            .add_input("query", ValueKind::Text)
            .add_node("a", concat("A", &["in"], &log))
            .add_link("query", "a", "in")
            .build()
            .unwrap();

        assert!(pipeline.run(HashMap::new()).await.is_err());
        let wrong = HashMap::from([("query".to_string(), Value::Tables(Vec::new()))]);
        assert!(pipeline.run(wrong).await.is_err());
        assert!(log.lock().unwrap().is_empty());
    }
}
