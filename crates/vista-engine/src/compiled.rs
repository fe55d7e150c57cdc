//! Compiled view definitions.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use vista_config::ViewDefinition;
use vista_core::{
    ComputationTargetReference, Portfolio, UniqueId, ValueRequirement, ValueSpecification,
    VersionCorrection,
};

use crate::builder::FailureReport;
use crate::graph::DependencyGraph;

/// A graph carried into an incremental compile, with the requirements that
/// must be resolved again.
#[derive(Debug, Clone)]
pub struct PreviousGraph {
    /// Graph with invalidated nodes removed.
    pub graph: DependencyGraph,
    /// Requirements whose terminal outputs were removed.
    pub pending: BTreeSet<ValueRequirement>,
}

impl PreviousGraph {
    /// Carries a graph unchanged.
    pub fn unchanged(graph: DependencyGraph) -> Self {
        Self {
            graph,
            pending: BTreeSet::new(),
        }
    }
}

/// Result of compiling a view: one dependency graph per calculation
/// configuration, plus what is needed to recompile incrementally.
///
/// Immutable once created.
#[derive(Debug, Clone)]
pub struct CompiledViewDefinitionWithGraphs {
    pub(crate) version_correction: VersionCorrection,
    pub(crate) compilation_identifier: String,
    pub(crate) view_definition: Arc<ViewDefinition>,
    pub(crate) valuation_time: DateTime<Utc>,
    pub(crate) graphs: Vec<DependencyGraph>,
    pub(crate) resolutions: HashMap<ComputationTargetReference, UniqueId>,
    pub(crate) portfolio: Option<Arc<Portfolio>>,
    pub(crate) function_init_id: u64,
    pub(crate) failure_reports: Vec<FailureReport>,
}

impl CompiledViewDefinitionWithGraphs {
    /// Version-correction the view was resolved at.
    pub fn version_correction(&self) -> VersionCorrection {
        self.version_correction
    }

    /// Identifier of the compilation that produced this view.
    pub fn compilation_identifier(&self) -> &str {
        &self.compilation_identifier
    }

    /// The compiled view definition.
    pub fn view_definition(&self) -> &Arc<ViewDefinition> {
        &self.view_definition
    }

    /// Valuation time used while compiling.
    pub fn valuation_time(&self) -> DateTime<Utc> {
        self.valuation_time
    }

    /// Graphs in configuration order.
    pub fn dependency_graphs(&self) -> &[DependencyGraph] {
        &self.graphs
    }

    /// Graph of one configuration.
    pub fn dependency_graph(&self, calculation_configuration_name: &str) -> Option<&DependencyGraph> {
        self.graphs
            .iter()
            .find(|g| g.calculation_configuration_name() == calculation_configuration_name)
    }

    /// Target resolutions that remain relevant.
    pub fn resolutions(&self) -> &HashMap<ComputationTargetReference, UniqueId> {
        &self.resolutions
    }

    /// Resolved portfolio, if the view needed one.
    pub fn portfolio(&self) -> Option<&Arc<Portfolio>> {
        self.portfolio.as_ref()
    }

    /// Function initialization the graphs were built against.
    pub fn function_init_id(&self) -> u64 {
        self.function_init_id
    }

    /// True while the function repository is unchanged.
    pub fn is_valid_for(&self, function_init_id: u64) -> bool {
        self.function_init_id == function_init_id
    }

    /// Failure reports in configuration order.
    pub fn failure_reports(&self) -> &[FailureReport] {
        &self.failure_reports
    }

    /// Failure report of one configuration.
    pub fn failure_report(&self, calculation_configuration_name: &str) -> Option<&FailureReport> {
        self.failure_reports
            .iter()
            .find(|r| r.calculation_configuration_name == calculation_configuration_name)
    }

    /// Market data needed by every configuration.
    pub fn market_data_requirements(&self) -> BTreeSet<ValueSpecification> {
        self.graphs
            .iter()
            .flat_map(|graph| graph.all_required_market_data())
            .collect()
    }

    /// Graphs for an incremental recompile after the given objects changed.
    ///
    /// Nodes on changed targets, and everything depending on them, are
    /// removed; their terminal requirements become pending.
    pub fn incremental_inputs(&self, changed: &HashSet<UniqueId>) -> HashMap<String, PreviousGraph> {
        self.graphs
            .iter()
            .map(|graph| {
                let mut graph = graph.clone();
                let pending = graph.invalidate_targets(changed);
                (
                    graph.calculation_configuration_name().to_string(),
                    PreviousGraph { graph, pending },
                )
            })
            .collect()
    }

    /// Resolutions still valid after the given objects changed.
    pub fn carried_resolutions(
        &self,
        changed: &HashSet<UniqueId>,
    ) -> HashMap<ComputationTargetReference, UniqueId> {
        self.resolutions
            .iter()
            .filter(|(_, id)| !changed.iter().any(|c| c.same_object(id)))
            .map(|(reference, id)| (reference.clone(), id.clone()))
            .collect()
    }
}
