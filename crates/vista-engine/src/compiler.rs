//! View definition compilation.
//!
//! [`ViewDefinitionCompiler`] creates [`CompilationTask`]s. A task compiles
//! every calculation configuration of a view into a dependency graph the
//! first time [`CompilationTask::get`] is called, and hands the same
//! [`CompiledViewDefinitionWithGraphs`] to every later caller.
//!
//! # Example
//!
//! ```ignore
//! let compiler = ViewDefinitionCompiler::new();
//! let task = compiler.full_compile_task(view, services, Utc::now(), VersionCorrection::LATEST);
//! let compiled = task.get()?;
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use vista_config::{Validate, ViewCalculationConfiguration, ViewDefinition};
use vista_core::{
    ComputationTargetReference, ComputationTargetType, Portfolio, UniqueId, VersionCorrection,
};
use vista_traits::VersionedTargetResolver;

use crate::builder::{DependencyGraphBuilder, FailureReport};
use crate::compiled::{CompiledViewDefinitionWithGraphs, PreviousGraph};
use crate::context::{FunctionCompilationContext, ViewCompilationContext, ViewCompilationServices};
use crate::error::{EngineError, EngineResult};
use crate::graph::DependencyGraph;
use crate::progress::{CompilationCompletionEstimate, Housekeeper};
use crate::report;
use crate::target_resolution::TargetResolutionLogger;
use crate::traversal::{add_portfolio_requirements, PortfolioChanges, PortfolioNodeTraverser};

// =============================================================================
// COMPILATION IDENTIFIERS
// =============================================================================

/// Generates compilation identifiers unique to one compiler instance.
#[derive(Debug)]
pub struct CompilationIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl CompilationIdGenerator {
    /// Creates a generator with a random prefix.
    pub fn new() -> Self {
        Self {
            prefix: uuid::Uuid::new_v4().simple().to_string(),
            counter: AtomicU64::new(0),
        }
    }

    /// Next identifier.
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{n}", self.prefix)
    }
}

impl Default for CompilationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// COMPILER
// =============================================================================

/// Entry point for compiling view definitions.
#[derive(Debug, Clone, Default)]
pub struct ViewDefinitionCompiler {
    ids: Arc<CompilationIdGenerator>,
}

impl ViewDefinitionCompiler {
    /// Creates a compiler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Task compiling a view from scratch.
    pub fn full_compile_task(
        &self,
        view: Arc<ViewDefinition>,
        services: Arc<ViewCompilationServices>,
        valuation_time: DateTime<Utc>,
        version_correction: VersionCorrection,
    ) -> CompilationTask {
        self.task(
            view,
            services,
            valuation_time,
            version_correction,
            HashMap::new(),
            HashMap::new(),
            PortfolioChanges::None,
        )
    }

    /// Task recompiling a view from graphs carried over from a previous
    /// compile.
    #[allow(clippy::too_many_arguments)]
    pub fn incremental_compile_task(
        &self,
        view: Arc<ViewDefinition>,
        services: Arc<ViewCompilationServices>,
        valuation_time: DateTime<Utc>,
        version_correction: VersionCorrection,
        previous_graphs: HashMap<String, PreviousGraph>,
        resolutions: HashMap<ComputationTargetReference, UniqueId>,
        changes: PortfolioChanges,
    ) -> CompilationTask {
        self.task(
            view,
            services,
            valuation_time,
            version_correction,
            previous_graphs,
            resolutions,
            changes,
        )
    }

    /// Compiles a view from scratch and waits for the result.
    pub fn compile(
        &self,
        view: Arc<ViewDefinition>,
        services: Arc<ViewCompilationServices>,
        valuation_time: DateTime<Utc>,
        version_correction: VersionCorrection,
    ) -> EngineResult<Arc<CompiledViewDefinitionWithGraphs>> {
        self.full_compile_task(view, services, valuation_time, version_correction)
            .get()
    }

    #[allow(clippy::too_many_arguments)]
    fn task(
        &self,
        view: Arc<ViewDefinition>,
        services: Arc<ViewCompilationServices>,
        valuation_time: DateTime<Utc>,
        version_correction: VersionCorrection,
        previous_graphs: HashMap<String, PreviousGraph>,
        resolutions: HashMap<ComputationTargetReference, UniqueId>,
        changes: PortfolioChanges,
    ) -> CompilationTask {
        let estimate = Arc::new(CompilationCompletionEstimate::new());
        for config in view.calculation_configurations() {
            estimate.register(config.name());
        }
        let context = ViewCompilationContext::new(
            view,
            services,
            valuation_time,
            version_correction,
            self.ids.next_id(),
            resolutions,
        );
        CompilationTask {
            inner: Arc::new(TaskInner {
                context,
                previous_graphs,
                changes,
                state: Mutex::new(TaskState::Created),
                phase: AtomicU8::new(PHASE_CREATED),
                cancelled: AtomicBool::new(false),
                estimate,
            }),
        }
    }
}

// =============================================================================
// COMPILATION TASK
// =============================================================================

const PHASE_CREATED: u8 = 0;
const PHASE_COMPILING: u8 = 1;
const PHASE_DONE: u8 = 2;

enum TaskState {
    Created,
    Done(Arc<CompiledViewDefinitionWithGraphs>),
    Failed(EngineError),
}

struct TaskInner {
    context: ViewCompilationContext,
    previous_graphs: HashMap<String, PreviousGraph>,
    changes: PortfolioChanges,
    state: Mutex<TaskState>,
    phase: AtomicU8,
    cancelled: AtomicBool,
    estimate: Arc<CompilationCompletionEstimate>,
}

/// One compilation of a view.
///
/// `Created`, then `Compiling` during the first [`get`](Self::get), then
/// done. Cloning gives another handle to the same task.
#[derive(Clone)]
pub struct CompilationTask {
    inner: Arc<TaskInner>,
}

impl CompilationTask {
    /// Identifier of this compilation.
    pub fn compilation_identifier(&self) -> &str {
        self.inner.context.compilation_identifier()
    }

    /// Compiles the view, or returns the result of the compile that already
    /// ran. Concurrent callers wait for the same compile.
    pub fn get(&self) -> EngineResult<Arc<CompiledViewDefinitionWithGraphs>> {
        let mut state = self.inner.state.lock();
        match &*state {
            TaskState::Done(compiled) => return Ok(Arc::clone(compiled)),
            TaskState::Failed(err) => return Err(err.clone()),
            TaskState::Created => {}
        }

        self.inner.phase.store(PHASE_COMPILING, Ordering::SeqCst);
        let result = self.run();
        *state = match &result {
            Ok(compiled) => TaskState::Done(Arc::clone(compiled)),
            Err(err) => TaskState::Failed(err.clone()),
        };
        self.inner.phase.store(PHASE_DONE, Ordering::SeqCst);
        result
    }

    /// Not supported; use [`get`](Self::get).
    pub fn get_timeout(&self, _timeout: Duration) -> EngineResult<Arc<CompiledViewDefinitionWithGraphs>> {
        Err(EngineError::Unsupported(
            "waiting for a compilation with a timeout".into(),
        ))
    }

    /// Compiles on tokio's blocking pool.
    pub async fn compile_async(&self) -> EngineResult<Arc<CompiledViewDefinitionWithGraphs>> {
        let task = self.clone();
        tokio::task::spawn_blocking(move || task.get())
            .await
            .map_err(|err| EngineError::Executor(err.to_string()))?
    }

    /// Requests cancellation of the compile and every running builder.
    ///
    /// Returns false if the task had already finished.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        if self.is_done() {
            return false;
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
        for builder in self.inner.context.active_builders() {
            builder.cancel(may_interrupt);
        }
        tracing::info!(
            compilation = %self.compilation_identifier(),
            "Compilation cancelled"
        );
        true
    }

    /// True once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// True once the compile finished, successfully or not.
    pub fn is_done(&self) -> bool {
        self.inner.phase.load(Ordering::SeqCst) == PHASE_DONE
    }

    /// Progress of every configuration.
    pub fn completion_estimate(&self) -> Arc<CompilationCompletionEstimate> {
        Arc::clone(&self.inner.estimate)
    }

    fn run(&self) -> EngineResult<Arc<CompiledViewDefinitionWithGraphs>> {
        let started = Instant::now();
        let context = &self.inner.context;
        let view = context.view();
        let config = context.services().config();
        view.validate_or_error()?;

        tracing::info!(
            view = %view.name(),
            compilation = %context.compilation_identifier(),
            version_correction = %context.version_correction(),
            incremental = !self.inner.previous_graphs.is_empty(),
            "Compiling view definition"
        );

        let portfolio = self.resolve_portfolio()?;
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let traverser = if config.parallel_traversal {
            PortfolioNodeTraverser::Parallel(Arc::clone(context.services().executor()))
        } else {
            PortfolioNodeTraverser::Sequential
        };
        let configurations = view.calculation_configurations();
        let portfolio_ref = portfolio.as_ref();

        let compiled: Vec<(DependencyGraph, FailureReport)> =
            if config.parallel_configurations && configurations.len() > 1 {
                std::thread::scope(|scope| {
                    let handles: Vec<_> = configurations
                        .iter()
                        .map(|calc| {
                            let traverser = &traverser;
                            scope.spawn(move || self.compile_configuration(calc, portfolio_ref, traverser))
                        })
                        .collect();
                    handles
                        .into_iter()
                        .map(|handle| {
                            handle.join().map_err(|_| {
                                EngineError::CompilationFailed(
                                    "configuration compile thread panicked".into(),
                                )
                            })
                        })
                        .collect::<EngineResult<Vec<_>>>()
                })?
            } else {
                configurations
                    .iter()
                    .map(|calc| self.compile_configuration(calc, portfolio_ref, &traverser))
                    .collect()
            };

        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let (mut graphs, failure_reports): (Vec<DependencyGraph>, Vec<FailureReport>) =
            compiled.into_iter().unzip();
        for graph in &mut graphs {
            graph.remove_unnecessary_values();
        }

        self.prune_resolutions(&graphs, portfolio_ref);

        let compiled = Arc::new(CompiledViewDefinitionWithGraphs {
            version_correction: context.version_correction(),
            compilation_identifier: context.compilation_identifier().to_string(),
            view_definition: Arc::clone(view),
            valuation_time: context.valuation_time(),
            graphs,
            resolutions: context.resolution_cache().resolutions_snapshot(),
            portfolio,
            function_init_id: context.registry().function_init_id(),
            failure_reports,
        });

        report::emit(config, compiled.dependency_graphs(), compiled.failure_reports());

        tracing::info!(
            view = %view.name(),
            compilation = %context.compilation_identifier(),
            configurations = compiled.dependency_graphs().len(),
            nodes = compiled.dependency_graphs().iter().map(DependencyGraph::node_count).sum::<usize>(),
            resolutions = compiled.resolutions().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Compiled view definition"
        );
        Ok(compiled)
    }

    /// Resolves the view's portfolio when some configuration needs it.
    fn resolve_portfolio(&self) -> EngineResult<Option<Arc<Portfolio>>> {
        let context = &self.inner.context;
        let view = context.view();
        let result_model = view.result_model();

        let needed = view
            .calculation_configurations()
            .iter()
            .any(ViewCalculationConfiguration::has_portfolio_requirements)
            && (result_model
                .output_mode(ComputationTargetType::PortfolioNode)
                .is_enabled()
                || result_model
                    .output_mode(ComputationTargetType::Position)
                    .is_enabled());
        if !needed {
            return Ok(None);
        }

        let portfolio_id = view.portfolio_id().ok_or_else(|| EngineError::NoPortfolio {
            view: view.name().to_string(),
        })?;
        let reference =
            ComputationTargetReference::of(ComputationTargetType::Portfolio, portfolio_id.clone());
        let resolver = TargetResolutionLogger::new(
            view.name(),
            Arc::clone(context.target_resolver()),
            Arc::clone(context.resolution_cache()),
        );

        let specification = resolver.target_specification(&reference).ok_or_else(|| {
            EngineError::PortfolioNotIdentified {
                portfolio: portfolio_id.clone(),
                view: view.name().to_string(),
            }
        })?;
        let portfolio = resolver
            .resolve(&specification)
            .and_then(|target| target.as_portfolio().cloned())
            .ok_or_else(|| EngineError::PortfolioNotFound {
                portfolio: portfolio_id.clone(),
                view: view.name().to_string(),
            })?;
        context
            .resolution_cache()
            .record(reference, specification.unique_id().clone());

        tracing::debug!(
            view = %view.name(),
            portfolio = %portfolio.unique_id(),
            nodes = portfolio.root_node().node_count(),
            positions = portfolio.root_node().position_count(),
            "Resolved portfolio"
        );
        Ok(Some(portfolio))
    }

    fn compile_configuration(
        &self,
        calc: &ViewCalculationConfiguration,
        portfolio: Option<&Arc<Portfolio>>,
        traverser: &PortfolioNodeTraverser,
    ) -> (DependencyGraph, FailureReport) {
        let started = Instant::now();
        let context = &self.inner.context;
        let services = context.services();
        let config = services.config();
        let name = calc.name();

        let function_context = Arc::new(FunctionCompilationContext::new(
            name,
            Arc::clone(context.target_resolver()),
            context.valuation_time(),
            context.registry().function_init_id(),
        ));
        let logger: Arc<dyn VersionedTargetResolver> = Arc::new(TargetResolutionLogger::new(
            name,
            Arc::clone(context.target_resolver()),
            Arc::clone(context.resolution_cache()),
        ));
        function_context.set_target_resolver(logger);
        function_context.set_portfolio(portfolio.cloned());

        let builder = DependencyGraphBuilder::new(
            function_context,
            Arc::clone(context.registry()),
            Arc::clone(services.market_data()),
            Arc::clone(services.executor()),
        );
        context.register_builder(builder.clone());
        if self.is_cancelled() {
            builder.cancel(true);
        }

        let mut housekeeper = config.track_progress.then(|| {
            Housekeeper::start(
                &builder,
                Arc::clone(&self.inner.estimate),
                config.progress_interval(),
            )
        });

        if let Some(previous) = self.inner.previous_graphs.get(name) {
            builder.set_dependency_graph(previous.graph.clone());
            builder.add_targets(previous.pending.iter().cloned());
        }

        let result_model = context.view().result_model();
        builder.add_targets(
            calc.specific_requirements()
                .iter()
                .filter(|r| result_model.output_mode(r.target().target_type()).is_enabled())
                .cloned(),
        );

        if let Some(portfolio) = portfolio {
            add_portfolio_requirements(
                calc,
                result_model,
                &builder,
                portfolio.root_node(),
                context.resolution_cache(),
                &self.inner.changes,
                traverser,
            );
        }

        let graph = builder.dependency_graph();
        match housekeeper.as_mut() {
            Some(housekeeper) => housekeeper.stop(),
            None => self
                .inner
                .estimate
                .completed(name, builder.build_fraction_estimate().get()),
        }
        let failure_report = builder.failure_report();
        context.unregister_builder(&builder);

        tracing::debug!(
            config = name,
            nodes = graph.node_count(),
            terminal_outputs = graph.terminal_outputs().len(),
            unresolved = failure_report.unresolved_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Compiled calculation configuration"
        );
        (graph, failure_report)
    }

    /// Keeps resolutions of positions, of the portfolio, and of every object
    /// a graph node is applied to.
    fn prune_resolutions(&self, graphs: &[DependencyGraph], portfolio: Option<&Arc<Portfolio>>) {
        let mut live: HashSet<UniqueId> = graphs
            .iter()
            .flat_map(DependencyGraph::all_computation_targets)
            .map(|spec| spec.unique_id().to_latest())
            .collect();
        if let Some(portfolio) = portfolio {
            live.insert(portfolio.unique_id().to_latest());
        }

        let cache = self.inner.context.resolution_cache();
        let before = cache.resolution_count();
        cache.retain_resolutions(|reference, id| {
            reference.target_type() == ComputationTargetType::Position
                || live.contains(&id.to_latest())
        });
        tracing::debug!(
            compilation = %self.compilation_identifier(),
            kept = cache.resolution_count(),
            dropped = before - cache.resolution_count(),
            "Pruned target resolutions"
        );
    }
}

impl fmt::Debug for CompilationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationTask")
            .field("compilation", &self.compilation_identifier())
            .field("done", &self.is_done())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compilation_ids_are_unique_per_compiler() {
        let first = CompilationIdGenerator::new();
        let second = CompilationIdGenerator::new();
        let a = first.next_id();
        let b = first.next_id();
        assert_ne!(a, b);
        assert!(a.ends_with("-1"));
        assert!(b.ends_with("-2"));
        assert_ne!(second.next_id(), a);
    }
}
