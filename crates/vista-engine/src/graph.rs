//! Dependency graphs.
//!
//! A [`DependencyGraph`] holds the function applications needed to produce
//! the terminal outputs of one calculation configuration. Nodes live in a
//! petgraph arena; an edge runs from the node producing a value to each node
//! consuming it and is labelled with that value.
//!
//! Every value specification has at most one producer. The graph is
//! acyclic: nodes are only ever added after the producers of their inputs.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use vista_core::{ComputationTargetSpecification, UniqueId, ValueRequirement, ValueSpecification};

use crate::error::{EngineError, EngineResult};

/// Function identifier of nodes that source values from market data.
pub const MARKET_DATA_SOURCING_FUNCTION: &str = "MarketDataSourcingFunction";

// =============================================================================
// DEPENDENCY NODE
// =============================================================================

/// One application of a function to a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyNode {
    function_id: String,
    target: ComputationTargetSpecification,
    inputs: BTreeSet<ValueSpecification>,
    outputs: BTreeSet<ValueSpecification>,
}

impl DependencyNode {
    /// Creates a node with no inputs or outputs.
    pub fn new(function_id: impl Into<String>, target: ComputationTargetSpecification) -> Self {
        Self {
            function_id: function_id.into(),
            target,
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
        }
    }

    /// Node sourcing one value from market data.
    pub fn market_data(output: ValueSpecification) -> Self {
        Self::new(MARKET_DATA_SOURCING_FUNCTION, output.target().clone()).with_output(output)
    }

    /// Adds an input.
    #[must_use]
    pub fn with_input(mut self, input: ValueSpecification) -> Self {
        self.inputs.insert(input);
        self
    }

    /// Adds an output.
    #[must_use]
    pub fn with_output(mut self, output: ValueSpecification) -> Self {
        self.outputs.insert(output);
        self
    }

    /// Function applied.
    pub fn function_id(&self) -> &str {
        &self.function_id
    }

    /// Target the function is applied to.
    pub fn target(&self) -> &ComputationTargetSpecification {
        &self.target
    }

    /// Consumed values.
    pub fn inputs(&self) -> &BTreeSet<ValueSpecification> {
        &self.inputs
    }

    /// Produced values.
    pub fn outputs(&self) -> &BTreeSet<ValueSpecification> {
        &self.outputs
    }

    /// True for market data sourcing nodes.
    pub fn is_market_data_sourcing(&self) -> bool {
        self.function_id == MARKET_DATA_SOURCING_FUNCTION
    }
}

impl fmt::Display for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DependencyNode[{} on {}]", self.function_id, self.target)?;
        writeln!(f, "  inputs:")?;
        for input in &self.inputs {
            writeln!(f, "    {input}")?;
        }
        writeln!(f, "  outputs:")?;
        for output in &self.outputs {
            writeln!(f, "    {output}")?;
        }
        Ok(())
    }
}

// =============================================================================
// DEPENDENCY GRAPH
// =============================================================================

/// The dependency graph of one calculation configuration.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    calculation_configuration_name: String,
    graph: StableDiGraph<DependencyNode, ValueSpecification>,
    producers: HashMap<ValueSpecification, NodeIndex>,
    outputs_by_value: HashMap<(String, ComputationTargetSpecification), BTreeSet<ValueSpecification>>,
    nodes_by_target: HashMap<ComputationTargetSpecification, Vec<NodeIndex>>,
    terminal_outputs: HashMap<ValueSpecification, BTreeSet<ValueRequirement>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new(calculation_configuration_name: impl Into<String>) -> Self {
        Self {
            calculation_configuration_name: calculation_configuration_name.into(),
            graph: StableDiGraph::new(),
            producers: HashMap::new(),
            outputs_by_value: HashMap::new(),
            nodes_by_target: HashMap::new(),
            terminal_outputs: HashMap::new(),
        }
    }

    /// Name of the calculation configuration.
    pub fn calculation_configuration_name(&self) -> &str {
        &self.calculation_configuration_name
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// True when the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Adds a node whose inputs are all produced already.
    ///
    /// A node equivalent to an existing one (same function, target and
    /// inputs) is merged into it. Outputs that already have a producer are
    /// dropped from the new node; if none remain, the existing producer is
    /// returned.
    pub fn add_dependency_node(&mut self, node: DependencyNode) -> EngineResult<NodeIndex> {
        if node.outputs.is_empty() {
            return Err(EngineError::Graph(format!(
                "node {} on {} has no outputs",
                node.function_id, node.target
            )));
        }
        if let Some(missing) = node.inputs.iter().find(|i| !self.producers.contains_key(*i)) {
            return Err(EngineError::Graph(format!(
                "input {missing} of {} on {} has no producer",
                node.function_id, node.target
            )));
        }

        if let Some(existing) = self.equivalent_node(&node) {
            for output in node.outputs {
                if !self.producers.contains_key(&output) {
                    self.graph[existing].outputs.insert(output.clone());
                    self.index_output(existing, output);
                }
            }
            return Ok(existing);
        }

        let fresh: BTreeSet<ValueSpecification> = node
            .outputs
            .iter()
            .filter(|o| !self.producers.contains_key(*o))
            .cloned()
            .collect();
        if fresh.is_empty() {
            if let Some(idx) = node.outputs.iter().find_map(|o| self.producers.get(o)) {
                return Ok(*idx);
            }
        }

        let target = node.target.clone();
        let inputs = node.inputs.clone();
        let idx = self.graph.add_node(DependencyNode {
            outputs: fresh.clone(),
            ..node
        });
        for output in fresh {
            self.index_output(idx, output);
        }
        for input in inputs {
            if let Some(&producer) = self.producers.get(&input) {
                self.graph.add_edge(producer, idx, input);
            }
        }
        self.nodes_by_target.entry(target).or_default().push(idx);
        Ok(idx)
    }

    /// Marks a produced value as satisfying a requirement of the view.
    ///
    /// Returns false when nothing in the graph produces the value.
    pub fn add_terminal_output(
        &mut self,
        requirement: ValueRequirement,
        specification: ValueSpecification,
    ) -> bool {
        if !self.producers.contains_key(&specification) {
            return false;
        }
        self.terminal_outputs
            .entry(specification)
            .or_default()
            .insert(requirement);
        true
    }

    /// Terminal outputs with the requirements they satisfy.
    pub fn terminal_outputs(&self) -> &HashMap<ValueSpecification, BTreeSet<ValueRequirement>> {
        &self.terminal_outputs
    }

    /// Every requirement satisfied by a terminal output.
    pub fn terminal_requirements(&self) -> BTreeSet<ValueRequirement> {
        self.terminal_outputs.values().flatten().cloned().collect()
    }

    /// Node at an index.
    pub fn node(&self, idx: NodeIndex) -> Option<&DependencyNode> {
        self.graph.node_weight(idx)
    }

    /// Iterates nodes with their indices.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &DependencyNode)> {
        self.graph
            .node_indices()
            .filter_map(move |idx| self.graph.node_weight(idx).map(|node| (idx, node)))
    }

    /// Index of the node producing a value.
    pub fn producer_of(&self, specification: &ValueSpecification) -> Option<NodeIndex> {
        self.producers.get(specification).copied()
    }

    /// The node producing a value.
    pub fn node_producing(&self, specification: &ValueSpecification) -> Option<&DependencyNode> {
        self.producer_of(specification)
            .and_then(|idx| self.graph.node_weight(idx))
    }

    /// Produced values with a given name on a given target.
    pub fn outputs_matching(
        &self,
        value_name: &str,
        target: &ComputationTargetSpecification,
    ) -> impl Iterator<Item = &ValueSpecification> {
        self.outputs_by_value
            .get(&(value_name.to_string(), target.clone()))
            .into_iter()
            .flatten()
    }

    /// Nodes producing the inputs of a node.
    pub fn input_nodes(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    /// Nodes consuming the outputs of a node.
    pub fn dependent_nodes(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    /// Every target a node is applied to.
    pub fn all_computation_targets(&self) -> BTreeSet<ComputationTargetSpecification> {
        self.graph
            .node_weights()
            .map(|node| node.target.clone())
            .collect()
    }

    /// Every value sourced from market data.
    pub fn all_required_market_data(&self) -> BTreeSet<ValueSpecification> {
        self.graph
            .node_weights()
            .filter(|node| node.is_market_data_sourcing())
            .flat_map(|node| node.outputs.iter().cloned())
            .collect()
    }

    /// Node indices with producers before consumers.
    pub fn topological_order(&self) -> EngineResult<Vec<NodeIndex>> {
        toposort(&self.graph, None).map_err(|cycle| {
            let at = self
                .graph
                .node_weight(cycle.node_id())
                .map(|node| format!("{} on {}", node.function_id, node.target))
                .unwrap_or_default();
            EngineError::Graph(format!("dependency cycle at {at}"))
        })
    }

    /// True when the graph has no cycles.
    pub fn is_acyclic(&self) -> bool {
        self.topological_order().is_ok()
    }

    /// Drops outputs that are neither terminal nor consumed, then drops nodes
    /// left without outputs, until nothing changes.
    ///
    /// Returns the number of nodes removed.
    pub fn remove_unnecessary_values(&mut self) -> usize {
        let mut queue: VecDeque<NodeIndex> = self.graph.node_indices().collect();
        let mut queued: HashSet<NodeIndex> = queue.iter().copied().collect();
        let mut removed = 0;

        while let Some(idx) = queue.pop_front() {
            queued.remove(&idx);
            if !self.graph.contains_node(idx) {
                continue;
            }
            let unused: Vec<ValueSpecification> = {
                let consumed: HashSet<&ValueSpecification> = self
                    .graph
                    .edges_directed(idx, Direction::Outgoing)
                    .map(|edge| edge.weight())
                    .collect();
                self.graph[idx]
                    .outputs
                    .iter()
                    .filter(|o| !consumed.contains(*o) && !self.terminal_outputs.contains_key(*o))
                    .cloned()
                    .collect()
            };
            for output in &unused {
                self.remove_output(idx, output);
            }
            if self.graph[idx].outputs.is_empty() {
                let producers = self.input_nodes(idx);
                self.remove_node(idx);
                removed += 1;
                for producer in producers {
                    if queued.insert(producer) {
                        queue.push_back(producer);
                    }
                }
            }
        }

        if removed > 0 {
            tracing::debug!(
                config = %self.calculation_configuration_name,
                removed,
                remaining = self.graph.node_count(),
                "Removed unnecessary nodes"
            );
        }
        removed
    }

    /// Removes every node applied to one of the given objects, and every node
    /// depending on those, transitively.
    ///
    /// Returns the view requirements whose terminal outputs were removed.
    /// Versions are ignored when matching identifiers.
    pub fn invalidate_targets(&mut self, changed: &HashSet<UniqueId>) -> BTreeSet<ValueRequirement> {
        let changed: HashSet<UniqueId> = changed.iter().map(UniqueId::to_latest).collect();
        let mut stack: Vec<NodeIndex> = self
            .nodes()
            .filter(|(_, node)| changed.contains(&node.target.unique_id().to_latest()))
            .map(|(idx, _)| idx)
            .collect();

        let mut doomed = HashSet::new();
        while let Some(idx) = stack.pop() {
            if doomed.insert(idx) {
                stack.extend(self.graph.neighbors_directed(idx, Direction::Outgoing));
            }
        }

        let mut pending = BTreeSet::new();
        for idx in &doomed {
            pending.extend(self.remove_node(*idx));
        }
        if !doomed.is_empty() {
            tracing::debug!(
                config = %self.calculation_configuration_name,
                invalidated = doomed.len(),
                pending = pending.len(),
                "Invalidated nodes for changed targets"
            );
        }
        pending
    }

    /// Summary counts.
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.graph.node_count(),
            edge_count: self.graph.edge_count(),
            terminal_output_count: self.terminal_outputs.len(),
            market_data_count: self
                .graph
                .node_weights()
                .filter(|node| node.is_market_data_sourcing())
                .count(),
        }
    }

    fn equivalent_node(&self, node: &DependencyNode) -> Option<NodeIndex> {
        self.nodes_by_target
            .get(&node.target)?
            .iter()
            .copied()
            .find(|&idx| {
                let existing = &self.graph[idx];
                existing.function_id == node.function_id && existing.inputs == node.inputs
            })
    }

    fn index_output(&mut self, idx: NodeIndex, output: ValueSpecification) {
        self.outputs_by_value
            .entry((output.value_name().to_string(), output.target().clone()))
            .or_default()
            .insert(output.clone());
        self.producers.insert(output, idx);
    }

    fn remove_output(&mut self, idx: NodeIndex, output: &ValueSpecification) {
        self.graph[idx].outputs.remove(output);
        self.producers.remove(output);
        let key = (output.value_name().to_string(), output.target().clone());
        if let Some(outputs) = self.outputs_by_value.get_mut(&key) {
            outputs.remove(output);
            if outputs.is_empty() {
                self.outputs_by_value.remove(&key);
            }
        }
    }

    fn remove_node(&mut self, idx: NodeIndex) -> BTreeSet<ValueRequirement> {
        let Some(node) = self.graph.remove_node(idx) else {
            return BTreeSet::new();
        };
        let mut requirements = BTreeSet::new();
        for output in &node.outputs {
            if let Some(reqs) = self.terminal_outputs.remove(output) {
                requirements.extend(reqs);
            }
            self.producers.remove(output);
            let key = (output.value_name().to_string(), output.target().clone());
            if let Some(outputs) = self.outputs_by_value.get_mut(&key) {
                outputs.remove(output);
                if outputs.is_empty() {
                    self.outputs_by_value.remove(&key);
                }
            }
        }
        if let Some(indices) = self.nodes_by_target.get_mut(&node.target) {
            indices.retain(|&i| i != idx);
            if indices.is_empty() {
                self.nodes_by_target.remove(&node.target);
            }
        }
        requirements
    }

    fn sorted_nodes(&self) -> Vec<&DependencyNode> {
        let mut nodes: Vec<&DependencyNode> = self.graph.node_weights().collect();
        nodes.sort();
        nodes
    }
}

impl PartialEq for DependencyGraph {
    fn eq(&self, other: &Self) -> bool {
        self.calculation_configuration_name == other.calculation_configuration_name
            && self.terminal_outputs == other.terminal_outputs
            && self.sorted_nodes() == other.sorted_nodes()
    }
}

impl fmt::Display for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DependencyGraph[{}: {} nodes, {} terminal outputs]",
            self.calculation_configuration_name,
            self.graph.node_count(),
            self.terminal_outputs.len()
        )
    }
}

// =============================================================================
// GRAPH STATISTICS
// =============================================================================

/// Statistics about a dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    /// Number of nodes.
    pub node_count: usize,
    /// Number of edges.
    pub edge_count: usize,
    /// Number of terminal outputs.
    pub terminal_output_count: usize,
    /// Number of market data sourcing nodes.
    pub market_data_count: usize,
}
