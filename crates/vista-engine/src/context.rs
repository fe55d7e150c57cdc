//! Compilation contexts and injected services.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use vista_config::{CompilerConfig, Validate, ViewDefinition};
use vista_core::{ComputationTargetReference, Portfolio, UniqueId, VersionCorrection};
use vista_traits::{
    ComputationTargetResolver, FunctionRepository, MarketDataAvailabilityProvider,
    VersionedTargetResolver,
};

use crate::builder::DependencyGraphBuilder;
use crate::error::{EngineError, EngineResult};
use crate::functions::FunctionRegistry;
use crate::sources::NoMarketDataAvailability;
use crate::target_resolution::TargetResolutionCache;

// =============================================================================
// SERVICES
// =============================================================================

/// Collaborators used by every compilation.
pub struct ViewCompilationServices {
    function_repository: Arc<dyn FunctionRepository>,
    target_resolver: Arc<dyn ComputationTargetResolver>,
    market_data: Arc<dyn MarketDataAvailabilityProvider>,
    executor: Arc<rayon::ThreadPool>,
    config: CompilerConfig,
}

impl ViewCompilationServices {
    /// Starts a builder.
    pub fn builder() -> ViewCompilationServicesBuilder {
        ViewCompilationServicesBuilder::default()
    }

    /// Function repository.
    pub fn function_repository(&self) -> &Arc<dyn FunctionRepository> {
        &self.function_repository
    }

    /// Target resolver.
    pub fn target_resolver(&self) -> &Arc<dyn ComputationTargetResolver> {
        &self.target_resolver
    }

    /// Market data availability.
    pub fn market_data(&self) -> &Arc<dyn MarketDataAvailabilityProvider> {
        &self.market_data
    }

    /// Pool running graph building and portfolio traversal.
    pub fn executor(&self) -> &Arc<rayon::ThreadPool> {
        &self.executor
    }

    /// Compiler configuration.
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }
}

impl fmt::Debug for ViewCompilationServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewCompilationServices")
            .field("function_init_id", &self.function_repository.function_init_id())
            .field("threads", &self.executor.current_num_threads())
            .field("config", &self.config)
            .finish()
    }
}

/// Builder for [`ViewCompilationServices`].
#[derive(Default)]
pub struct ViewCompilationServicesBuilder {
    function_repository: Option<Arc<dyn FunctionRepository>>,
    target_resolver: Option<Arc<dyn ComputationTargetResolver>>,
    market_data: Option<Arc<dyn MarketDataAvailabilityProvider>>,
    executor: Option<Arc<rayon::ThreadPool>>,
    config: Option<CompilerConfig>,
}

impl ViewCompilationServicesBuilder {
    /// Sets the function repository (required).
    #[must_use]
    pub fn with_function_repository(mut self, repository: Arc<dyn FunctionRepository>) -> Self {
        self.function_repository = Some(repository);
        self
    }

    /// Sets the target resolver (required).
    #[must_use]
    pub fn with_target_resolver(mut self, resolver: Arc<dyn ComputationTargetResolver>) -> Self {
        self.target_resolver = Some(resolver);
        self
    }

    /// Sets the market data availability provider.
    #[must_use]
    pub fn with_market_data_availability(
        mut self,
        provider: Arc<dyn MarketDataAvailabilityProvider>,
    ) -> Self {
        self.market_data = Some(provider);
        self
    }

    /// Uses an existing thread pool instead of building one from the config.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<rayon::ThreadPool>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Sets the compiler configuration.
    #[must_use]
    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the services.
    pub fn build(self) -> EngineResult<ViewCompilationServices> {
        let function_repository = self
            .function_repository
            .ok_or_else(|| EngineError::MissingService("function repository".into()))?;
        let target_resolver = self
            .target_resolver
            .ok_or_else(|| EngineError::MissingService("target resolver".into()))?;
        let market_data = self
            .market_data
            .unwrap_or_else(|| Arc::new(NoMarketDataAvailability));
        let config = self.config.unwrap_or_default();
        config.validate_or_error()?;

        let executor = match self.executor {
            Some(executor) => executor,
            None => Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.effective_worker_threads())
                    .thread_name(|i| format!("vista-graph-builder-{i}"))
                    .build()?,
            ),
        };

        tracing::debug!(
            threads = executor.current_num_threads(),
            parallel_configurations = config.parallel_configurations,
            "Created view compilation services"
        );

        Ok(ViewCompilationServices {
            function_repository,
            target_resolver,
            market_data,
            executor,
            config,
        })
    }
}

// =============================================================================
// PER-CONFIGURATION CONTEXT
// =============================================================================

/// State a configuration's functions and builder see during compilation.
pub struct FunctionCompilationContext {
    calculation_configuration_name: String,
    target_resolver: RwLock<Arc<dyn VersionedTargetResolver>>,
    portfolio: RwLock<Option<Arc<Portfolio>>>,
    valuation_time: DateTime<Utc>,
    function_init_id: u64,
}

impl FunctionCompilationContext {
    /// Creates a context.
    pub fn new(
        calculation_configuration_name: impl Into<String>,
        target_resolver: Arc<dyn VersionedTargetResolver>,
        valuation_time: DateTime<Utc>,
        function_init_id: u64,
    ) -> Self {
        Self {
            calculation_configuration_name: calculation_configuration_name.into(),
            target_resolver: RwLock::new(target_resolver),
            portfolio: RwLock::new(None),
            valuation_time,
            function_init_id,
        }
    }

    /// Configuration name.
    pub fn calculation_configuration_name(&self) -> &str {
        &self.calculation_configuration_name
    }

    /// Current target resolver.
    pub fn target_resolver(&self) -> Arc<dyn VersionedTargetResolver> {
        Arc::clone(&*self.target_resolver.read())
    }

    /// Replaces the target resolver.
    pub fn set_target_resolver(&self, resolver: Arc<dyn VersionedTargetResolver>) {
        *self.target_resolver.write() = resolver;
    }

    /// The resolved portfolio, once known.
    pub fn portfolio(&self) -> Option<Arc<Portfolio>> {
        self.portfolio.read().clone()
    }

    /// Sets the resolved portfolio.
    pub fn set_portfolio(&self, portfolio: Option<Arc<Portfolio>>) {
        *self.portfolio.write() = portfolio;
    }

    /// Valuation time.
    pub fn valuation_time(&self) -> DateTime<Utc> {
        self.valuation_time
    }

    /// Function initialization identifier.
    pub fn function_init_id(&self) -> u64 {
        self.function_init_id
    }
}

impl fmt::Debug for FunctionCompilationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCompilationContext")
            .field("config", &self.calculation_configuration_name)
            .field("valuation_time", &self.valuation_time)
            .field("function_init_id", &self.function_init_id)
            .finish()
    }
}

// =============================================================================
// PER-COMPILE CONTEXT
// =============================================================================

/// State shared by every configuration of one compilation.
pub struct ViewCompilationContext {
    view: Arc<ViewDefinition>,
    services: Arc<ViewCompilationServices>,
    registry: Arc<FunctionRegistry>,
    valuation_time: DateTime<Utc>,
    version_correction: VersionCorrection,
    target_resolver: Arc<dyn VersionedTargetResolver>,
    resolution_cache: Arc<TargetResolutionCache>,
    active_builders: Mutex<Vec<DependencyGraphBuilder>>,
    compilation_identifier: String,
}

impl ViewCompilationContext {
    /// Creates the context, fixing the version-correction at `now` and
    /// snapshotting the function repository.
    pub fn new(
        view: Arc<ViewDefinition>,
        services: Arc<ViewCompilationServices>,
        valuation_time: DateTime<Utc>,
        version_correction: VersionCorrection,
        compilation_identifier: String,
        carried_resolutions: HashMap<ComputationTargetReference, UniqueId>,
    ) -> Self {
        let version_correction = version_correction.with_latest_fixed(Utc::now());
        let target_resolver = services
            .target_resolver()
            .at_version_correction(&version_correction);
        let registry = Arc::new(FunctionRegistry::from_repository(
            services.function_repository().as_ref(),
        ));
        Self {
            view,
            services,
            registry,
            valuation_time,
            version_correction,
            target_resolver,
            resolution_cache: Arc::new(TargetResolutionCache::with_resolutions(
                carried_resolutions,
            )),
            active_builders: Mutex::new(Vec::new()),
            compilation_identifier,
        }
    }

    /// View being compiled.
    pub fn view(&self) -> &Arc<ViewDefinition> {
        &self.view
    }

    /// Services.
    pub fn services(&self) -> &Arc<ViewCompilationServices> {
        &self.services
    }

    /// Function snapshot for this compile.
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// Valuation time.
    pub fn valuation_time(&self) -> DateTime<Utc> {
        self.valuation_time
    }

    /// Fixed version-correction.
    pub fn version_correction(&self) -> VersionCorrection {
        self.version_correction
    }

    /// Resolver bound to the fixed version-correction.
    pub fn target_resolver(&self) -> &Arc<dyn VersionedTargetResolver> {
        &self.target_resolver
    }

    /// Shared resolution cache.
    pub fn resolution_cache(&self) -> &Arc<TargetResolutionCache> {
        &self.resolution_cache
    }

    /// Compilation identifier.
    pub fn compilation_identifier(&self) -> &str {
        &self.compilation_identifier
    }

    pub(crate) fn register_builder(&self, builder: DependencyGraphBuilder) {
        self.active_builders.lock().push(builder);
    }

    pub(crate) fn unregister_builder(&self, builder: &DependencyGraphBuilder) {
        self.active_builders.lock().retain(|b| !b.same_builder(builder));
    }

    /// Snapshot of the builders currently running.
    pub fn active_builders(&self) -> Vec<DependencyGraphBuilder> {
        self.active_builders.lock().clone()
    }
}

impl fmt::Debug for ViewCompilationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewCompilationContext")
            .field("view", &self.view.name())
            .field("compilation", &self.compilation_identifier)
            .field("version_correction", &self.version_correction)
            .finish()
    }
}
