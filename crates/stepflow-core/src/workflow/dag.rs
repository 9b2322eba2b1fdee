//! Graph validation and topological leveling.
//!
//! Uses `petgraph` to model the workflow: nodes are steps, edges point from a
//! dependency to its dependent. Validation is deterministic and completes
//! before any step runs; it yields an `ExecutionPlan` whose levels drive the
//! coordinator's dispatch order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Duration;

use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::Value;
use stepflow_types::workflow::{NodeDefinition, RetryPolicy, StepKind, WorkflowDefinition};
use uuid::Uuid;

use super::error::{EngineError, GraphValidationError};
use super::expression::ExpressionEvaluator;
use super::registry::StepRegistry;
use super::step::BoxStepExecutor;

// ---------------------------------------------------------------------------
// Execution plan
// ---------------------------------------------------------------------------

/// An edge as seen from its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingEdge {
    pub source: String,
    pub condition: Option<String>,
}

/// A validated node with everything the coordinator needs to run it.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub id: String,
    pub step_type: String,
    pub kind: StepKind,
    pub level: usize,
    pub optional: bool,
    pub config: Value,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub executor: BoxStepExecutor,
    /// Sorted, de-duplicated source ids.
    pub dependencies: Vec<String>,
    /// Sorted, de-duplicated target ids.
    pub dependents: Vec<String>,
    /// Incoming edges in definition order.
    pub incoming: Vec<IncomingEdge>,
}

/// Output of [`validate`]: the workflow grouped into dependency levels.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub workflow_id: Uuid,
    pub workflow_name: String,
    levels: Vec<Vec<String>>,
    steps: BTreeMap<String, PlannedStep>,
}

impl ExecutionPlan {
    /// Level 0 first; ids within a level are sorted.
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn step(&self, id: &str) -> Option<&PlannedStep> {
        self.steps.get(id)
    }

    /// Steps ordered by id.
    pub fn steps(&self) -> impl Iterator<Item = &PlannedStep> {
        self.steps.values()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps without dependencies.
    pub fn roots(&self) -> &[String] {
        self.levels.first().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn optional_steps(&self) -> HashSet<String> {
        self.steps
            .values()
            .filter(|s| s.optional)
            .map(|s| s.id.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate `definition` against `registry` and compute its levels.
///
/// Checks, in order: non-empty, unique ids, edge endpoints exist, edge
/// conditions parse, step types resolve and accept their config, acyclic, has an input root and a
/// terminal output, every node lies on an input-to-output path.
pub fn validate(
    definition: &WorkflowDefinition,
    registry: &StepRegistry,
) -> Result<ExecutionPlan, EngineError> {
    let nodes = &definition.nodes;
    if nodes.is_empty() {
        return Err(GraphValidationError::Empty.into());
    }

    let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        if index_of.insert(node.id.as_str(), i).is_some() {
            return Err(GraphValidationError::DuplicateNodeId(node.id.clone()).into());
        }
    }

    for edge in &definition.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !index_of.contains_key(endpoint.as_str()) {
                return Err(GraphValidationError::UnknownNode {
                    node_id: endpoint.clone(),
                    edge: format!("{} -> {}", edge.source, edge.target),
                }
                .into());
            }
        }
    }

    let evaluator = ExpressionEvaluator::new();
    for edge in &definition.edges {
        if let Some(condition) = &edge.condition {
            evaluator.check_syntax(condition).map_err(|e| {
                GraphValidationError::InvalidCondition {
                    edge: format!("{} -> {}", edge.source, edge.target),
                    message: e.to_string(),
                }
            })?;
        }
    }

    let mut resolved = Vec::with_capacity(nodes.len());
    for node in nodes {
        let registered =
            registry
                .resolve(&node.step_type)
                .ok_or_else(|| EngineError::UnsupportedStepType {
                    node_id: node.id.clone(),
                    step_type: node.step_type.clone(),
                })?;
        registered
            .executor
            .validate_config(&node.config)
            .map_err(|message| EngineError::InvalidStepConfig {
                node_id: node.id.clone(),
                message,
            })?;
        resolved.push(registered);
    }

    let mut graph = DiGraph::<&str, ()>::with_capacity(nodes.len(), definition.edges.len());
    let indices: Vec<NodeIndex> = nodes.iter().map(|n| graph.add_node(n.id.as_str())).collect();
    for edge in &definition.edges {
        graph.add_edge(
            indices[index_of[edge.source.as_str()]],
            indices[index_of[edge.target.as_str()]],
            (),
        );
    }

    if let Some((from, to)) = find_cycle(&graph) {
        return Err(GraphValidationError::CycleDetected { from, to }.into());
    }

    let kind_at = |idx: NodeIndex| resolved[idx.index()].kind;
    let has_edges = |idx: NodeIndex, dir: Direction| {
        graph.neighbors_directed(idx, dir).next().is_some()
    };

    let input_roots: Vec<NodeIndex> = graph
        .node_indices()
        .filter(|&i| kind_at(i) == StepKind::Input && !has_edges(i, Direction::Incoming))
        .collect();
    if input_roots.is_empty() {
        return Err(GraphValidationError::MissingInput.into());
    }

    let terminal_outputs: Vec<NodeIndex> = graph
        .node_indices()
        .filter(|&i| kind_at(i) == StepKind::Output && !has_edges(i, Direction::Outgoing))
        .collect();
    if terminal_outputs.is_empty() {
        return Err(GraphValidationError::MissingOutput.into());
    }

    let forward = reachable(&graph, &input_roots, Direction::Outgoing);
    let backward = reachable(&graph, &terminal_outputs, Direction::Incoming);
    let mut unreachable: Vec<String> = graph
        .node_indices()
        .filter(|i| !forward.contains(i) || !backward.contains(i))
        .map(|i| graph[i].to_string())
        .collect();
    if !unreachable.is_empty() {
        unreachable.sort();
        return Err(GraphValidationError::Unreachable {
            node_ids: unreachable,
        }
        .into());
    }

    let order = toposort(&graph, None).map_err(|cycle| {
        let id = graph[cycle.node_id()].to_string();
        GraphValidationError::CycleDetected {
            from: id.clone(),
            to: id,
        }
    })?;

    let mut depth = vec![0usize; nodes.len()];
    for idx in order {
        depth[idx.index()] = graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|dep| depth[dep.index()] + 1)
            .max()
            .unwrap_or(0);
    }

    let mut levels: Vec<Vec<String>> = vec![Vec::new(); depth.iter().max().map_or(1, |d| d + 1)];
    let mut steps = BTreeMap::new();
    for (i, node) in nodes.iter().enumerate() {
        let idx = indices[i];
        levels[depth[i]].push(node.id.clone());
        steps.insert(
            node.id.clone(),
            planned_step(node, resolved[i].kind, &resolved[i].executor, depth[i], &graph, idx, definition),
        );
    }
    for level in &mut levels {
        level.sort();
    }

    tracing::debug!(
        workflow = %definition.name,
        steps = steps.len(),
        levels = levels.len(),
        "workflow validated"
    );

    Ok(ExecutionPlan {
        workflow_id: definition.id,
        workflow_name: definition.name.clone(),
        levels,
        steps,
    })
}

fn planned_step(
    node: &NodeDefinition,
    kind: StepKind,
    executor: &BoxStepExecutor,
    level: usize,
    graph: &DiGraph<&str, ()>,
    idx: NodeIndex,
    definition: &WorkflowDefinition,
) -> PlannedStep {
    let sorted_ids = |dir: Direction| -> Vec<String> {
        graph
            .neighbors_directed(idx, dir)
            .map(|n| graph[n].to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    };

    PlannedStep {
        id: node.id.clone(),
        step_type: node.step_type.clone(),
        kind,
        level,
        optional: node.optional,
        config: node.config.clone(),
        // Same floor as the engine-wide step timeout.
        timeout: node.timeout_secs.map(|secs| Duration::from_secs(secs.max(1))),
        retry: node.retry.clone(),
        executor: executor.clone(),
        dependencies: sorted_ids(Direction::Incoming),
        dependents: sorted_ids(Direction::Outgoing),
        incoming: definition
            .edges
            .iter()
            .filter(|e| e.target == node.id)
            .map(|e| IncomingEdge {
                source: e.source.clone(),
                condition: e.condition.clone(),
            })
            .collect(),
    }
}

/// Pick a deterministic edge lying on a cycle, if there is one.
///
/// Among all cyclic strongly connected components, take the smallest node id
/// and its smallest successor inside the same component.
fn find_cycle(graph: &DiGraph<&str, ()>) -> Option<(String, String)> {
    tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .filter_map(|scc| {
            let members: HashSet<NodeIndex> = scc.iter().copied().collect();
            let from = *scc.iter().min_by_key(|&&i| graph[i])?;
            let to = graph
                .neighbors_directed(from, Direction::Outgoing)
                .filter(|n| members.contains(n))
                .min_by_key(|&n| graph[n])?;
            Some((graph[from].to_string(), graph[to].to_string()))
        })
        .min()
}

fn reachable(
    graph: &DiGraph<&str, ()>,
    starts: &[NodeIndex],
    direction: Direction,
) -> HashSet<NodeIndex> {
    let mut seen: HashSet<NodeIndex> = starts.iter().copied().collect();
    let mut queue: VecDeque<NodeIndex> = starts.iter().copied().collect();
    while let Some(idx) = queue.pop_front() {
        for next in graph.neighbors_directed(idx, direction) {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderRegistry;
    use crate::sink::SinkRegistry;
    use serde_json::json;
    use stepflow_types::workflow::EdgeDefinition;

    fn registry() -> StepRegistry {
        StepRegistry::with_defaults(ProviderRegistry::new(), SinkRegistry::new())
    }

    fn node(id: &str, step_type: &str) -> NodeDefinition {
        let config = match step_type {
            "ai" => json!({ "prompt": "hi" }),
            _ => Value::Null,
        };
        NodeDefinition {
            id: id.to_string(),
            name: None,
            step_type: step_type.to_string(),
            config,
            optional: false,
            timeout_secs: None,
            retry: None,
        }
    }

    fn edge(source: &str, target: &str) -> EdgeDefinition {
        EdgeDefinition {
            source: source.to_string(),
            target: target.to_string(),
            condition: None,
        }
    }

    fn workflow(nodes: Vec<NodeDefinition>, edges: Vec<EdgeDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            name: "test".to_string(),
            version: "1.0.0".to_string(),
            nodes,
            edges,
            metadata: Default::default(),
        }
    }

    fn graph_err(def: &WorkflowDefinition) -> GraphValidationError {
        match validate(def, &registry()) {
            Err(EngineError::Graph(err)) => err,
            other => panic!("expected graph error, got {other:?}"),
        }
    }

    fn diamond() -> WorkflowDefinition {
        workflow(
            vec![
                node("end", "output"),
                node("b", "process"),
                node("a", "process"),
                node("start", "input"),
            ],
            vec![
                edge("start", "a"),
                edge("start", "b"),
                edge("a", "end"),
                edge("b", "end"),
            ],
        )
    }

    #[test]
    fn test_diamond_levels() {
        let plan = validate(&diamond(), &registry()).unwrap();
        assert_eq!(
            plan.levels(),
            &[
                vec!["start".to_string()],
                vec!["a".to_string(), "b".to_string()],
                vec!["end".to_string()],
            ]
        );
        let end = plan.step("end").unwrap();
        assert_eq!(end.dependencies, vec!["a", "b"]);
        assert_eq!(end.kind, StepKind::Output);
        assert_eq!(plan.step("start").unwrap().dependents, vec!["a", "b"]);
        assert_eq!(plan.roots(), &["start".to_string()]);
    }

    #[test]
    fn test_level_exceeds_every_dependency() {
        // start -> a -> b -> c -> out, plus a shortcut start -> c.
        let def = workflow(
            vec![
                node("start", "input"),
                node("a", "process"),
                node("b", "process"),
                node("c", "process"),
                node("out", "output"),
            ],
            vec![
                edge("start", "a"),
                edge("a", "b"),
                edge("b", "c"),
                edge("start", "c"),
                edge("c", "out"),
            ],
        );
        let plan = validate(&def, &registry()).unwrap();
        for step in plan.steps() {
            for dep in &step.dependencies {
                assert!(step.level > plan.step(dep).unwrap().level);
            }
        }
        assert_eq!(plan.step("c").unwrap().level, 3);
    }

    #[test]
    fn test_validation_is_deterministic() {
        let def = diamond();
        let first = validate(&def, &registry()).unwrap();
        let second = validate(&def, &registry()).unwrap();
        assert_eq!(first.levels(), second.levels());
    }

    #[test]
    fn test_empty_workflow() {
        assert_eq!(graph_err(&workflow(vec![], vec![])), GraphValidationError::Empty);
    }

    #[test]
    fn test_duplicate_id() {
        let def = workflow(vec![node("a", "input"), node("a", "output")], vec![]);
        assert_eq!(graph_err(&def), GraphValidationError::DuplicateNodeId("a".into()));
    }

    #[test]
    fn test_unknown_edge_endpoint() {
        let def = workflow(
            vec![node("in", "input"), node("out", "output")],
            vec![edge("in", "ghost")],
        );
        assert_eq!(
            graph_err(&def),
            GraphValidationError::UnknownNode {
                node_id: "ghost".into(),
                edge: "in -> ghost".into(),
            }
        );
    }

    #[test]
    fn test_cycle_names_nodes_on_cycle() {
        let def = workflow(
            vec![
                node("in", "input"),
                node("x", "process"),
                node("y", "process"),
                node("z", "process"),
                node("out", "output"),
            ],
            vec![
                edge("in", "x"),
                edge("x", "y"),
                edge("y", "z"),
                edge("z", "x"),
                edge("z", "out"),
            ],
        );
        assert_eq!(
            graph_err(&def),
            GraphValidationError::CycleDetected {
                from: "x".into(),
                to: "y".into(),
            }
        );
    }

    #[test]
    fn test_self_loop() {
        let def = workflow(
            vec![node("in", "input"), node("out", "output")],
            vec![edge("in", "out"), edge("out", "out")],
        );
        assert_eq!(
            graph_err(&def),
            GraphValidationError::CycleDetected {
                from: "out".into(),
                to: "out".into(),
            }
        );
    }

    #[test]
    fn test_missing_input_and_output() {
        let no_input = workflow(
            vec![node("p", "process"), node("out", "output")],
            vec![edge("p", "out")],
        );
        assert_eq!(graph_err(&no_input), GraphValidationError::MissingInput);

        let no_output = workflow(
            vec![node("in", "input"), node("p", "process")],
            vec![edge("in", "p")],
        );
        assert_eq!(graph_err(&no_output), GraphValidationError::MissingOutput);
    }

    #[test]
    fn test_unreachable_nodes_sorted() {
        let def = workflow(
            vec![
                node("in", "input"),
                node("out", "output"),
                node("orphan", "process"),
                node("dead_end", "process"),
            ],
            vec![edge("in", "out"), edge("in", "dead_end")],
        );
        assert_eq!(
            graph_err(&def),
            GraphValidationError::Unreachable {
                node_ids: vec!["dead_end".into(), "orphan".into()],
            }
        );
    }

    #[test]
    fn test_unsupported_step_type() {
        let def = workflow(
            vec![node("in", "input"), node("hook", "webhook"), node("out", "output")],
            vec![edge("in", "hook"), edge("hook", "out")],
        );
        match validate(&def, &registry()) {
            Err(EngineError::UnsupportedStepType { node_id, step_type }) => {
                assert_eq!(node_id, "hook");
                assert_eq!(step_type, "webhook");
            }
            other => panic!("expected UnsupportedStepType, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_step_config() {
        let mut ai = node("sum", "ai");
        ai.config = json!({});
        let def = workflow(
            vec![node("in", "input"), ai, node("out", "output")],
            vec![edge("in", "sum"), edge("sum", "out")],
        );
        assert!(matches!(
            validate(&def, &registry()),
            Err(EngineError::InvalidStepConfig { ref node_id, .. }) if node_id == "sum"
        ));
    }

    #[test]
    fn test_unparsable_condition_rejected() {
        let mut def = diamond();
        def.edges[1].condition = Some("output ==".to_string());
        match graph_err(&def) {
            GraphValidationError::InvalidCondition { edge, .. } => assert_eq!(edge, "start -> b"),
            other => panic!("expected InvalidCondition, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_node_timeout_clamped() {
        let mut def = diamond();
        def.nodes[2].timeout_secs = Some(0);
        def.nodes[1].timeout_secs = Some(30);
        let plan = validate(&def, &registry()).unwrap();
        assert_eq!(plan.step("a").unwrap().timeout, Some(Duration::from_secs(1)));
        assert_eq!(plan.step("b").unwrap().timeout, Some(Duration::from_secs(30)));
        assert_eq!(plan.step("start").unwrap().timeout, None);
    }

    #[test]
    fn test_incoming_edges_keep_conditions() {
        let mut def = diamond();
        def.edges[2].condition = Some("output.ok".to_string());
        let plan = validate(&def, &registry()).unwrap();
        let end = plan.step("end").unwrap();
        assert_eq!(end.incoming.len(), 2);
        assert_eq!(end.incoming[0].source, "a");
        assert_eq!(end.incoming[0].condition.as_deref(), Some("output.ok"));
    }
}
