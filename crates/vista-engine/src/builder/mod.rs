//! Dependency graph building.
//!
//! A [`DependencyGraphBuilder`] owns the graph of one calculation
//! configuration while it is being built. Each requested value is resolved
//! by a job on the compilation's thread pool; a job stages the nodes it
//! needs privately and only commits them to the shared graph once the whole
//! requirement has resolved, so a failed branch never leaves partial state
//! behind.
//!
//! # Example
//!
//! ```ignore
//! let builder = DependencyGraphBuilder::new(context, registry, market_data, pool);
//! builder.add_target(requirement);
//! let graph = builder.dependency_graph();
//! ```

mod failure;
mod resolve;

pub use failure::{FailureReason, FailureReport, FailureSummary, FunctionFailure};

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::{Condvar, Mutex, RwLock};
use vista_core::{ValueRequirement, ValueSpecification};
use vista_traits::{FunctionError, MarketDataAvailabilityProvider};

use crate::context::FunctionCompilationContext;
use crate::functions::FunctionRegistry;
use crate::graph::{DependencyGraph, GraphStats};

use self::resolve::Resolution;

// =============================================================================
// BUILDER STATE
// =============================================================================

struct BuilderState {
    calculation_configuration_name: String,
    context: Arc<FunctionCompilationContext>,
    registry: Arc<FunctionRegistry>,
    market_data: Arc<dyn MarketDataAvailabilityProvider>,
    graph: RwLock<DependencyGraph>,
    /// Requirements already queued; each is resolved once.
    requested: DashSet<ValueRequirement>,
    /// Committed resolutions of terminal and intermediate requirements.
    resolved: DashMap<ValueRequirement, ValueSpecification>,
    /// Requirements known to fail regardless of the resolution path.
    failed: DashMap<ValueRequirement, FailureReason>,
    /// Terminal requirements that failed.
    unresolved: DashMap<ValueRequirement, FailureReason>,
    exceptions: DashMap<FunctionFailure, usize>,
    pending: AtomicUsize,
    completed: AtomicUsize,
    cancelled: AtomicBool,
    complete: AtomicBool,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl BuilderState {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn record_exception(&self, function_id: &str, error: &FunctionError) {
        tracing::debug!(
            config = %self.calculation_configuration_name,
            function = function_id,
            error = %error,
            "Function raised an error"
        );
        *self
            .exceptions
            .entry(FunctionFailure {
                function_id: function_id.to_string(),
                error: error.clone(),
            })
            .or_insert(0) += 1;
    }

    fn run(&self, requirement: ValueRequirement) {
        let outcome = if self.is_cancelled() {
            Err(FailureReason::Cancelled)
        } else {
            panic::catch_unwind(AssertUnwindSafe(|| resolve::resolve_requirement(self, &requirement)))
                .unwrap_or_else(|payload| {
                    let message = resolve::panic_message(payload.as_ref());
                    tracing::warn!(
                        config = %self.calculation_configuration_name,
                        requirement = %requirement,
                        "Resolution panicked: {message}"
                    );
                    Err(FailureReason::Panicked(message))
                })
        };

        match outcome {
            Ok(resolution) => self.commit(requirement, resolution),
            Err(reason) => {
                tracing::debug!(
                    config = %self.calculation_configuration_name,
                    requirement = %requirement,
                    reason = %reason,
                    "Unable to resolve requirement"
                );
                self.unresolved.insert(requirement, reason);
            }
        }
        self.job_finished();
    }

    fn commit(&self, requirement: ValueRequirement, resolution: Resolution) {
        let Resolution {
            specification,
            nodes,
            resolved,
        } = resolution;

        {
            let mut graph = self.graph.write();
            for node in nodes {
                if let Err(err) = graph.add_dependency_node(node) {
                    drop(graph);
                    self.unresolved
                        .insert(requirement, FailureReason::Rejected(err.to_string()));
                    return;
                }
            }
            if !graph.add_terminal_output(requirement.clone(), specification.clone()) {
                drop(graph);
                self.unresolved.insert(
                    requirement,
                    FailureReason::Rejected(format!("{specification} has no producer")),
                );
                return;
            }
        }

        for (req, spec) in resolved {
            self.resolved.entry(req).or_insert(spec);
        }
        self.resolved.entry(requirement).or_insert(specification);
    }

    fn job_finished(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _guard = self.idle_lock.lock();
            self.idle.notify_all();
        }
    }

    fn wait_until_idle(&self) {
        let mut guard = self.idle_lock.lock();
        while self.pending.load(Ordering::SeqCst) > 0 {
            self.idle.wait(&mut guard);
        }
    }
}

// =============================================================================
// DEPENDENCY GRAPH BUILDER
// =============================================================================

/// Builds the dependency graph of one calculation configuration.
///
/// Cloning gives another handle to the same builder.
#[derive(Clone)]
pub struct DependencyGraphBuilder {
    state: Arc<BuilderState>,
    executor: Arc<rayon::ThreadPool>,
}

impl DependencyGraphBuilder {
    /// Creates a builder with an empty graph.
    pub fn new(
        context: Arc<FunctionCompilationContext>,
        registry: Arc<FunctionRegistry>,
        market_data: Arc<dyn MarketDataAvailabilityProvider>,
        executor: Arc<rayon::ThreadPool>,
    ) -> Self {
        let name = context.calculation_configuration_name().to_string();
        Self {
            state: Arc::new(BuilderState {
                graph: RwLock::new(DependencyGraph::new(name.clone())),
                calculation_configuration_name: name,
                context,
                registry,
                market_data,
                requested: DashSet::new(),
                resolved: DashMap::new(),
                failed: DashMap::new(),
                unresolved: DashMap::new(),
                exceptions: DashMap::new(),
                pending: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                cancelled: AtomicBool::new(false),
                complete: AtomicBool::new(false),
                idle_lock: Mutex::new(()),
                idle: Condvar::new(),
            }),
            executor,
        }
    }

    /// Configuration being built.
    pub fn calculation_configuration_name(&self) -> &str {
        &self.state.calculation_configuration_name
    }

    /// Function compilation context.
    pub fn context(&self) -> &Arc<FunctionCompilationContext> {
        &self.state.context
    }

    /// Requests a terminal output. Requesting the same requirement again has
    /// no effect.
    pub fn add_target(&self, requirement: ValueRequirement) {
        if !self.state.requested.insert(requirement.clone()) {
            return;
        }
        self.state.complete.store(false, Ordering::SeqCst);
        self.state.pending.fetch_add(1, Ordering::SeqCst);
        let state = Arc::clone(&self.state);
        self.executor.spawn(move || state.run(requirement));
    }

    /// Requests several terminal outputs.
    pub fn add_targets<I>(&self, requirements: I)
    where
        I: IntoIterator<Item = ValueRequirement>,
    {
        for requirement in requirements {
            self.add_target(requirement);
        }
    }

    /// Seeds the builder with a graph carried from a previous compile.
    ///
    /// The graph's terminal requirements count as already requested.
    pub fn set_dependency_graph(&self, graph: DependencyGraph) {
        tracing::debug!(
            config = %self.state.calculation_configuration_name,
            nodes = graph.node_count(),
            terminal_outputs = graph.terminal_outputs().len(),
            "Seeding builder with previous graph"
        );
        for (specification, requirements) in graph.terminal_outputs() {
            for requirement in requirements {
                self.state.requested.insert(requirement.clone());
                self.state
                    .resolved
                    .insert(requirement.clone(), specification.clone());
            }
        }
        *self.state.graph.write() = graph;
    }

    /// Waits for every queued requirement, then returns the graph.
    pub fn dependency_graph(&self) -> DependencyGraph {
        self.state.wait_until_idle();
        self.state.complete.store(true, Ordering::SeqCst);
        let graph = self.state.graph.read().clone();
        tracing::debug!(
            config = %self.state.calculation_configuration_name,
            nodes = graph.node_count(),
            unresolved = self.state.unresolved.len(),
            cancelled = self.is_cancelled(),
            "Dependency graph built"
        );
        graph
    }

    /// The graph built so far, without waiting.
    pub fn graph_snapshot(&self) -> DependencyGraph {
        self.state.graph.read().clone()
    }

    /// Current graph statistics.
    pub fn stats(&self) -> GraphStats {
        self.state.graph.read().stats()
    }

    /// Handle reporting how far the build has got.
    pub fn build_fraction_estimate(&self) -> BuildFractionEstimate {
        BuildFractionEstimate {
            state: Arc::clone(&self.state),
        }
    }

    /// Requests cancellation.
    ///
    /// Queued jobs finish without resolving; nodes already installed stay.
    /// Threads are never interrupted, so `may_interrupt` only affects logging.
    /// Returns false if the builder had already completed.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        if self.is_complete() {
            return false;
        }
        let first = !self.state.cancelled.swap(true, Ordering::SeqCst);
        if first {
            tracing::debug!(
                config = %self.state.calculation_configuration_name,
                may_interrupt,
                pending = self.state.pending.load(Ordering::SeqCst),
                "Builder cancelled"
            );
        }
        true
    }

    /// True once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// True once [`dependency_graph`](Self::dependency_graph) has returned
    /// and nothing was requested since.
    pub fn is_complete(&self) -> bool {
        self.state.complete.load(Ordering::SeqCst)
    }

    /// Function errors with occurrence counts, most frequent first.
    pub fn exceptions(&self) -> Vec<(FunctionFailure, usize)> {
        let mut exceptions: Vec<(FunctionFailure, usize)> = self
            .state
            .exceptions
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        exceptions.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| a.0.function_id.cmp(&b.0.function_id))
                .then_with(|| a.0.error.to_string().cmp(&b.0.error.to_string()))
        });
        exceptions
    }

    /// Terminal requirements that failed, in requirement order.
    pub fn unresolved_requirements(&self) -> Vec<(ValueRequirement, FailureReason)> {
        let mut unresolved: Vec<(ValueRequirement, FailureReason)> = self
            .state
            .unresolved
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        unresolved.sort_by(|a, b| a.0.cmp(&b.0));
        unresolved
    }

    /// Unresolved requirements and function errors so far.
    pub fn failure_report(&self) -> FailureReport {
        FailureReport {
            calculation_configuration_name: self.state.calculation_configuration_name.clone(),
            unresolved: self.unresolved_requirements(),
            exceptions: self.exceptions(),
        }
    }

    pub(crate) fn same_builder(&self, other: &DependencyGraphBuilder) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for DependencyGraphBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyGraphBuilder")
            .field("config", &self.state.calculation_configuration_name)
            .field("pending", &self.state.pending.load(Ordering::SeqCst))
            .field("completed", &self.state.completed.load(Ordering::SeqCst))
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// =============================================================================
// BUILD FRACTION
// =============================================================================

/// Live view of a builder's progress.
#[derive(Clone)]
pub struct BuildFractionEstimate {
    state: Arc<BuilderState>,
}

impl BuildFractionEstimate {
    /// Fraction of the build done, in `[0, 1]`.
    ///
    /// Only reaches 1.0 once the graph has been collected.
    pub fn get(&self) -> f64 {
        if self.state.complete.load(Ordering::SeqCst) {
            return 1.0;
        }
        let completed = self.state.completed.load(Ordering::SeqCst) as f64;
        let pending = self.state.pending.load(Ordering::SeqCst) as f64;
        completed / (completed + pending + 1.0)
    }

    /// True once the builder was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }
}

impl fmt::Debug for BuildFractionEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildFractionEstimate")
            .field("config", &self.state.calculation_configuration_name)
            .field("fraction", &self.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vista_core::{
        ComputationTarget, ComputationTargetSpecification, ComputationTargetType, UniqueId,
        ValueProperties,
    };
    use vista_traits::{CompiledFunction, FunctionResult, VersionedTargetResolver};

    use crate::functions::InMemoryFunctionRepository;
    use crate::sources::{InMemoryTargetResolver, StaticMarketDataAvailability};

    #[derive(Debug)]
    struct Stub {
        id: &'static str,
        produces: &'static str,
        inputs: Vec<&'static str>,
        properties: ValueProperties,
        fail: bool,
        panics: bool,
    }

    impl Stub {
        fn new(id: &'static str, produces: &'static str, inputs: Vec<&'static str>) -> Self {
            Self {
                id,
                produces,
                inputs,
                properties: ValueProperties::none(),
                fail: false,
                panics: false,
            }
        }

        fn with_currency(mut self, currency: &str) -> Self {
            self.properties = ValueProperties::builder().with("Currency", currency).build();
            self
        }

        fn panicking(mut self) -> Self {
            self.panics = true;
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    impl CompiledFunction for Stub {
        fn function_id(&self) -> &str {
            self.id
        }

        fn target_type(&self) -> ComputationTargetType {
            ComputationTargetType::Primitive
        }

        fn results(&self, target: &ComputationTarget) -> FunctionResult<Vec<ValueSpecification>> {
            Ok(vec![ValueSpecification::new(
                self.produces,
                target.specification().clone(),
                self.properties.clone(),
            )])
        }

        fn requirements(
            &self,
            target: &ComputationTarget,
            _desired: &ValueSpecification,
        ) -> FunctionResult<Option<Vec<ValueRequirement>>> {
            if self.panics {
                panic!("{} blew up", self.id);
            }
            if self.fail {
                return Err(FunctionError::failed(format!("{} exploded", self.id)));
            }
            Ok(Some(
                self.inputs
                    .iter()
                    .map(|name| ValueRequirement::new(*name, target.specification().to_reference()))
                    .collect(),
            ))
        }
    }

    fn builder(functions: Vec<(Stub, i32)>, market_data: StaticMarketDataAvailability) -> DependencyGraphBuilder {
        builder_on(functions, market_data, 2)
    }

    fn builder_on(
        functions: Vec<(Stub, i32)>,
        market_data: StaticMarketDataAvailability,
        threads: usize,
    ) -> DependencyGraphBuilder {
        let repository = InMemoryFunctionRepository::new();
        for (function, priority) in functions {
            repository.add_function(Arc::new(function), priority);
        }
        let registry = Arc::new(FunctionRegistry::from_repository(&repository));
        let resolver: Arc<dyn VersionedTargetResolver> = Arc::new(InMemoryTargetResolver::new());
        let context = Arc::new(FunctionCompilationContext::new(
            "Default",
            resolver,
            Utc::now(),
            registry.function_init_id(),
        ));
        let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap());
        DependencyGraphBuilder::new(context, registry, Arc::new(market_data), pool)
    }

    fn curve(currency: &str) -> ComputationTargetSpecification {
        ComputationTargetSpecification::primitive(UniqueId::of("Curve", currency))
    }

    fn requirement(name: &str, currency: &str) -> ValueRequirement {
        ValueRequirement::new(name, curve(currency))
    }

    fn prices() -> StaticMarketDataAvailability {
        StaticMarketDataAvailability::new().with_value_everywhere("Price")
    }

    #[test]
    fn test_resolves_through_market_data() {
        let builder = builder(vec![(Stub::new("pv", "PV", vec!["Price"]), 0)], prices());
        builder.add_target(requirement("PV", "USD"));
        let graph = builder.dependency_graph();

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.all_required_market_data().len(), 1);
        let (spec, requirements) = graph.terminal_outputs().iter().next().unwrap();
        assert_eq!(spec.function_id(), Some("pv"));
        assert!(requirements.contains(&requirement("PV", "USD")));
        assert!(builder.failure_report().is_empty());
        assert_eq!(builder.build_fraction_estimate().get(), 1.0);
    }

    #[test]
    fn test_backtracks_to_next_candidate() {
        let builder = builder(
            vec![
                (Stub::new("preferred", "PV", vec!["Vol"]), 10),
                (Stub::new("fallback", "PV", vec!["Price"]), 1),
            ],
            prices(),
        );
        builder.add_target(requirement("PV", "USD"));
        let graph = builder.dependency_graph();

        assert_eq!(graph.node_count(), 2);
        assert!(graph.nodes().all(|(_, node)| node.function_id() != "preferred"));
        let spec = graph.terminal_outputs().keys().next().unwrap();
        assert_eq!(spec.function_id(), Some("fallback"));
    }

    #[test]
    fn test_function_errors_are_tallied_not_fatal() {
        let builder = builder(vec![(Stub::new("broken", "PV", vec![]).failing(), 0)], prices());
        builder.add_targets([
            requirement("PV", "USD"),
            requirement("PV", "EUR"),
            requirement("Price", "USD"),
        ]);
        let graph = builder.dependency_graph();

        assert_eq!(graph.node_count(), 1);
        let unresolved = builder.unresolved_requirements();
        assert_eq!(unresolved.len(), 2);
        assert!(matches!(unresolved[0].1, FailureReason::FunctionFailed { .. }));

        let exceptions = builder.exceptions();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].0.function_id, "broken");
        assert_eq!(exceptions[0].1, 2);
        assert_eq!(builder.failure_report().exception_count(), 2);
    }

    #[test]
    fn test_mutual_recursion_fails_without_cycle() {
        let builder = builder(
            vec![
                (Stub::new("a", "A", vec!["B"]), 0),
                (Stub::new("b", "B", vec!["A"]), 0),
            ],
            StaticMarketDataAvailability::new(),
        );
        builder.add_targets([requirement("A", "USD"), requirement("B", "USD")]);
        let graph = builder.dependency_graph();

        assert!(graph.is_empty());
        let unresolved = builder.unresolved_requirements();
        assert_eq!(unresolved.len(), 2);
        assert!(unresolved.iter().all(|(_, reason)| reason.is_path_dependent()));
    }

    #[test]
    fn test_exact_match_preferred_over_relaxed() {
        let wanted = requirement("PV", "USD").with_constraints(
            ValueProperties::builder()
                .with("Currency", "EUR")
                .with_optional("Currency")
                .build(),
        );

        let both = builder(
            vec![
                (Stub::new("usd", "PV", vec![]).with_currency("USD"), 10),
                (Stub::new("eur", "PV", vec![]).with_currency("EUR"), 1),
            ],
            StaticMarketDataAvailability::new(),
        );
        both.add_target(wanted.clone());
        let graph = both.dependency_graph();
        assert_eq!(graph.terminal_outputs().keys().next().unwrap().function_id(), Some("eur"));

        let relaxed_only = builder(
            vec![(Stub::new("usd", "PV", vec![]).with_currency("USD"), 10)],
            StaticMarketDataAvailability::new(),
        );
        relaxed_only.add_target(wanted);
        let graph = relaxed_only.dependency_graph();
        assert_eq!(graph.terminal_outputs().keys().next().unwrap().function_id(), Some("usd"));
    }

    #[test]
    fn test_shared_inputs_reuse_nodes() {
        let builder = builder(
            vec![
                (Stub::new("pv", "PV", vec!["Price"]), 0),
                (Stub::new("delta", "Delta", vec!["Price"]), 0),
            ],
            prices(),
        );
        builder.add_targets([requirement("PV", "USD"), requirement("Delta", "USD")]);
        builder.add_target(requirement("PV", "USD"));
        let graph = builder.dependency_graph();

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.all_required_market_data().len(), 1);
        assert_eq!(graph.terminal_outputs().len(), 2);
        assert!(graph.is_acyclic());
    }

    #[test]
    fn test_cancelled_builder_resolves_nothing() {
        let builder = builder(vec![(Stub::new("pv", "PV", vec!["Price"]), 0)], prices());
        assert!(builder.cancel(true));
        builder.add_target(requirement("PV", "USD"));
        let graph = builder.dependency_graph();

        assert!(graph.is_empty());
        assert!(builder.is_cancelled());
        assert_eq!(
            builder.unresolved_requirements(),
            vec![(requirement("PV", "USD"), FailureReason::Cancelled)]
        );
        assert!(!builder.cancel(false));
    }

    #[test]
    fn test_seeded_graph_is_not_rebuilt() {
        let first = builder(vec![(Stub::new("pv", "PV", vec!["Price"]), 0)], prices());
        first.add_target(requirement("PV", "USD"));
        let graph = first.dependency_graph();

        let second = builder(Vec::new(), StaticMarketDataAvailability::new());
        second.set_dependency_graph(graph.clone());
        second.add_target(requirement("PV", "USD"));
        assert_eq!(second.dependency_graph(), graph);
        assert!(second.failure_report().is_empty());
    }

    #[test]
    fn test_panicking_function_backtracks_to_next_candidate() {
        let builder = builder(
            vec![
                (Stub::new("explosive", "PV", vec!["Price"]).panicking(), 10),
                (Stub::new("steady", "PV", vec!["Price"]), 1),
                (Stub::new("rate", "Rate", vec![]), 0),
            ],
            prices(),
        );
        builder.add_targets([requirement("PV", "USD"), requirement("Rate", "USD")]);
        let graph = builder.dependency_graph();

        assert_eq!(graph.terminal_outputs().len(), 2);
        assert!(graph.nodes().all(|(_, node)| node.function_id() != "explosive"));
        assert!(builder.unresolved_requirements().is_empty());

        let exceptions = builder.exceptions();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].0.function_id, "explosive");
        assert!(exceptions[0].0.error.to_string().contains("explosive blew up"));
    }

    #[test]
    fn test_panicking_function_fails_only_its_requirement() {
        let builder = builder(
            vec![
                (Stub::new("explosive", "PV", vec![]).panicking(), 0),
                (Stub::new("rate", "Rate", vec![]), 0),
            ],
            StaticMarketDataAvailability::new(),
        );
        builder.add_targets([
            requirement("PV", "USD"),
            requirement("PV", "EUR"),
            requirement("Rate", "USD"),
        ]);
        let graph = builder.dependency_graph();

        assert_eq!(graph.node_count(), 1);
        let unresolved = builder.unresolved_requirements();
        assert_eq!(unresolved.len(), 2);
        assert!(unresolved.iter().all(|(_, reason)| matches!(
            reason,
            FailureReason::FunctionFailed { function_id, .. } if function_id == "explosive"
        )));
        assert_eq!(builder.failure_report().exception_count(), 2);
        assert_eq!(builder.build_fraction_estimate().get(), 1.0);
    }

    #[test]
    fn test_graph_snapshot_while_jobs_queued() {
        let builder = builder_on(vec![(Stub::new("pv", "PV", vec!["Price"]), 0)], prices(), 1);
        builder.add_target(requirement("Price", "USD"));
        assert_eq!(builder.dependency_graph().node_count(), 1);

        // Occupy the only worker so the next job stays queued.
        let (release, blocked) = crossbeam::channel::bounded::<()>(0);
        builder.executor.spawn(move || {
            let _ = blocked.recv();
        });
        builder.add_target(requirement("PV", "USD"));

        let snapshot = builder.graph_snapshot();
        assert_eq!(snapshot.node_count(), 1);
        assert_eq!(snapshot.terminal_outputs().len(), 1);
        assert!(!builder.is_complete());
        assert!(builder.build_fraction_estimate().get() < 1.0);

        release.send(()).unwrap();
        let graph = builder.dependency_graph();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.terminal_outputs().len(), 2);
    }
}
