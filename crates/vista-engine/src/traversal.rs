//! Portfolio traversal and requirement expansion.
//!
//! The per-security-type requirements of a calculation configuration are
//! expanded into one requirement per position, and aggregated into one
//! requirement per portfolio node for every requirement found beneath it.
//! Sibling subtrees are walked in parallel on the compilation's pool.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use rayon::prelude::*;
use vista_config::{PortfolioRequirement, ResultModelDefinition, ViewCalculationConfiguration};
use vista_core::{
    ComputationTargetReference, ComputationTargetSpecification, ComputationTargetType,
    PortfolioNode, Position, UniqueId, ValueRequirement,
};

use crate::builder::DependencyGraphBuilder;
use crate::target_resolution::TargetResolutionCache;

// =============================================================================
// INCREMENTAL CHANGES
// =============================================================================

/// What changed in the portfolio since the previous compile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PortfolioChanges {
    /// Expand every position and node.
    #[default]
    None,
    /// Only these positions are re-requested, along with the aggregates of
    /// the nodes containing them.
    ChangedPositions(HashSet<UniqueId>),
    /// These nodes and their subtrees are skipped.
    UnchangedNodes(HashSet<UniqueId>),
}

impl PortfolioChanges {
    /// Changed positions, compared without versions.
    pub fn changed_positions<I: IntoIterator<Item = UniqueId>>(ids: I) -> Self {
        Self::ChangedPositions(ids.into_iter().map(|id| id.to_latest()).collect())
    }

    /// Unchanged nodes, compared without versions.
    pub fn unchanged_nodes<I: IntoIterator<Item = UniqueId>>(ids: I) -> Self {
        Self::UnchangedNodes(ids.into_iter().map(|id| id.to_latest()).collect())
    }

    fn contains(ids: &HashSet<UniqueId>, id: &UniqueId) -> bool {
        ids.contains(id) || ids.contains(&id.to_latest())
    }

    /// True when the position must be re-requested.
    pub fn includes_position(&self, id: &UniqueId) -> bool {
        match self {
            Self::ChangedPositions(ids) => Self::contains(ids, id),
            _ => true,
        }
    }

    /// True when the node's subtree is skipped.
    pub fn skips_node(&self, id: &UniqueId) -> bool {
        match self {
            Self::UnchangedNodes(ids) => Self::contains(ids, id),
            _ => false,
        }
    }
}

// =============================================================================
// TRAVERSER
// =============================================================================

/// Receives the nodes and positions of a portfolio walk.
pub trait PortfolioTraversalCallback: Send + Sync {
    /// Called before a node's positions and children. Returning false skips
    /// them.
    fn pre_order_node(&self, node: &Arc<PortfolioNode>) -> bool;

    /// Called for each position of a visited node.
    fn position(&self, node: &Arc<PortfolioNode>, position: &Arc<Position>);

    /// Called after a node's positions and children, even when they were
    /// skipped.
    fn post_order_node(&self, node: &Arc<PortfolioNode>);
}

/// Walks a portfolio tree, visiting every node and position once.
#[derive(Debug, Clone)]
pub enum PortfolioNodeTraverser {
    /// Depth first on the calling thread.
    Sequential,
    /// Sibling positions and subtrees in parallel on the pool.
    Parallel(Arc<rayon::ThreadPool>),
}

impl PortfolioNodeTraverser {
    /// Walks the tree below `root`.
    pub fn traverse(&self, root: &Arc<PortfolioNode>, callback: &dyn PortfolioTraversalCallback) {
        match self {
            Self::Sequential => visit_sequential(root, callback),
            Self::Parallel(pool) => pool.install(|| visit_parallel(root, callback)),
        }
    }
}

fn visit_sequential(node: &Arc<PortfolioNode>, callback: &dyn PortfolioTraversalCallback) {
    if callback.pre_order_node(node) {
        for position in node.positions() {
            callback.position(node, position);
        }
        for child in node.child_nodes() {
            visit_sequential(child, callback);
        }
    }
    callback.post_order_node(node);
}

fn visit_parallel(node: &Arc<PortfolioNode>, callback: &dyn PortfolioTraversalCallback) {
    if callback.pre_order_node(node) {
        node.positions()
            .par_iter()
            .for_each(|position| callback.position(node, position));
        node.child_nodes()
            .par_iter()
            .for_each(|child| visit_parallel(child, callback));
    }
    callback.post_order_node(node);
}

// =============================================================================
// REQUIREMENT EXPANSION
// =============================================================================

/// Adds position and node requirements to a builder while walking the
/// portfolio.
pub struct PortfolioCompilerTraversalCallback<'a> {
    calculation_configuration: &'a ViewCalculationConfiguration,
    result_model: &'a ResultModelDefinition,
    builder: &'a DependencyGraphBuilder,
    resolutions: &'a TargetResolutionCache,
    changes: &'a PortfolioChanges,
    /// Requirement templates found beneath each node.
    subtree_requirements: DashMap<UniqueId, BTreeSet<PortfolioRequirement>>,
    /// Nodes containing a changed position.
    touched: DashSet<UniqueId>,
    positions: AtomicUsize,
    nodes: AtomicUsize,
    requirements: AtomicUsize,
}

impl<'a> PortfolioCompilerTraversalCallback<'a> {
    /// Creates the callback.
    pub fn new(
        calculation_configuration: &'a ViewCalculationConfiguration,
        result_model: &'a ResultModelDefinition,
        builder: &'a DependencyGraphBuilder,
        resolutions: &'a TargetResolutionCache,
        changes: &'a PortfolioChanges,
    ) -> Self {
        Self {
            calculation_configuration,
            result_model,
            builder,
            resolutions,
            changes,
            subtree_requirements: DashMap::new(),
            touched: DashSet::new(),
            positions: AtomicUsize::new(0),
            nodes: AtomicUsize::new(0),
            requirements: AtomicUsize::new(0),
        }
    }

    /// Positions visited.
    pub fn positions_visited(&self) -> usize {
        self.positions.load(Ordering::Relaxed)
    }

    /// Nodes visited, including skipped ones.
    pub fn nodes_visited(&self) -> usize {
        self.nodes.load(Ordering::Relaxed)
    }

    /// Requirements handed to the builder.
    pub fn requirements_added(&self) -> usize {
        self.requirements.load(Ordering::Relaxed)
    }

    /// Templates aggregated beneath a node.
    pub fn requirements_below(&self, node_id: &UniqueId) -> BTreeSet<PortfolioRequirement> {
        self.subtree_requirements
            .get(&node_id.to_latest())
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn templates_for(&self, position: &Position) -> Option<&'a BTreeSet<PortfolioRequirement>> {
        let calculation_configuration: &'a ViewCalculationConfiguration = self.calculation_configuration;
        position
            .security_type()
            .and_then(|security_type| calculation_configuration.portfolio_requirements_for(security_type))
    }

    fn collect_subtree(&self, node: &PortfolioNode, into: &mut BTreeSet<PortfolioRequirement>) {
        for position in node.positions() {
            if let Some(templates) = self.templates_for(position) {
                into.extend(templates.iter().cloned());
            }
        }
        for child in node.child_nodes() {
            self.collect_subtree(child, into);
        }
    }

    fn request(&self, target: ComputationTargetSpecification, templates: &BTreeSet<PortfolioRequirement>) {
        for template in templates {
            self.builder.add_target(
                ValueRequirement::new(template.value_name.clone(), target.clone())
                    .with_constraints(template.constraints.clone()),
            );
        }
        self.requirements.fetch_add(templates.len(), Ordering::Relaxed);
    }

    fn record(&self, target_type: ComputationTargetType, id: &UniqueId) {
        self.resolutions
            .record(ComputationTargetReference::of(target_type, id.to_latest()), id.clone());
    }
}

impl PortfolioTraversalCallback for PortfolioCompilerTraversalCallback<'_> {
    fn pre_order_node(&self, node: &Arc<PortfolioNode>) -> bool {
        self.nodes.fetch_add(1, Ordering::Relaxed);
        self.record(ComputationTargetType::PortfolioNode, node.unique_id());

        if self.changes.skips_node(node.unique_id()) {
            let mut templates = BTreeSet::new();
            self.collect_subtree(node, &mut templates);
            self.subtree_requirements
                .insert(node.unique_id().to_latest(), templates);
            return false;
        }
        true
    }

    fn position(&self, node: &Arc<PortfolioNode>, position: &Arc<Position>) {
        self.positions.fetch_add(1, Ordering::Relaxed);
        self.record(ComputationTargetType::Position, position.unique_id());

        let Some(templates) = self.templates_for(position) else {
            return;
        };
        self.subtree_requirements
            .entry(node.unique_id().to_latest())
            .or_default()
            .extend(templates.iter().cloned());

        if !self.changes.includes_position(position.unique_id()) {
            return;
        }
        self.touched.insert(node.unique_id().to_latest());

        if self
            .result_model
            .output_mode(ComputationTargetType::Position)
            .is_enabled()
        {
            let target = ComputationTargetSpecification::new(
                ComputationTargetType::Position,
                position.unique_id().to_latest(),
            );
            self.request(target, templates);
        }
    }

    fn post_order_node(&self, node: &Arc<PortfolioNode>) {
        let node_id = node.unique_id().to_latest();

        let mut templates = BTreeSet::new();
        let mut child_touched = false;
        for child in node.child_nodes() {
            let child_id = child.unique_id().to_latest();
            if let Some(below) = self.subtree_requirements.get(&child_id) {
                templates.extend(below.value().iter().cloned());
            }
            child_touched |= self.touched.contains(&child_id);
        }
        if child_touched {
            self.touched.insert(node_id.clone());
        }
        let templates = {
            let mut entry = self.subtree_requirements.entry(node_id.clone()).or_default();
            entry.extend(templates);
            entry.value().clone()
        };

        if templates.is_empty()
            || !self
                .result_model
                .output_mode(ComputationTargetType::PortfolioNode)
                .is_enabled()
        {
            return;
        }
        let wanted = match self.changes {
            PortfolioChanges::None => true,
            PortfolioChanges::ChangedPositions(_) => self.touched.contains(&node_id),
            PortfolioChanges::UnchangedNodes(_) => !self.changes.skips_node(node.unique_id()),
        };
        if wanted {
            self.request(
                ComputationTargetSpecification::new(ComputationTargetType::PortfolioNode, node_id),
                &templates,
            );
        }
    }
}

/// Expands a configuration's portfolio requirements over a portfolio tree.
///
/// Does nothing when the configuration has no portfolio requirements.
pub fn add_portfolio_requirements(
    calculation_configuration: &ViewCalculationConfiguration,
    result_model: &ResultModelDefinition,
    builder: &DependencyGraphBuilder,
    root: &Arc<PortfolioNode>,
    resolutions: &TargetResolutionCache,
    changes: &PortfolioChanges,
    traverser: &PortfolioNodeTraverser,
) {
    if !calculation_configuration.has_portfolio_requirements() {
        return;
    }
    let callback = PortfolioCompilerTraversalCallback::new(
        calculation_configuration,
        result_model,
        builder,
        resolutions,
        changes,
    );
    traverser.traverse(root, &callback);
    tracing::debug!(
        config = %calculation_configuration.name(),
        nodes = callback.nodes_visited(),
        positions = callback.positions_visited(),
        requirements = callback.requirements_added(),
        "Expanded portfolio requirements"
    );
}
