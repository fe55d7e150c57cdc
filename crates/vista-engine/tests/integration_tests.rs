//! Integration tests for vista-engine.
//!
//! These tests compile realistic views end to end: a small portfolio of
//! equities and bonds valued from market prices, aggregated up the tree.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal_macros::dec;
use vista_config::{
    CompilerConfig, ResultModelDefinition, ResultOutputMode, ViewCalculationConfiguration,
    ViewDefinition,
};
use vista_core::prelude::*;
use vista_engine::*;
use vista_traits::{
    CompiledFunction, ComputationTargetResolver, FunctionError, FunctionRepository,
    FunctionResult, VersionedTargetResolver,
};

// =============================================================================
// TEST FUNCTIONS
// =============================================================================

/// Values a position from the price of its security.
#[derive(Debug)]
struct PositionValue;

impl CompiledFunction for PositionValue {
    fn function_id(&self) -> &str {
        "PositionValue"
    }

    fn target_type(&self) -> ComputationTargetType {
        ComputationTargetType::Position
    }

    fn results(&self, target: &ComputationTarget) -> FunctionResult<Vec<ValueSpecification>> {
        Ok(vec![ValueSpecification::new(
            "PV",
            target.specification().clone(),
            ValueProperties::none(),
        )])
    }

    fn requirements(
        &self,
        target: &ComputationTarget,
        _desired: &ValueSpecification,
    ) -> FunctionResult<Option<Vec<ValueRequirement>>> {
        let position = target
            .as_position()
            .ok_or_else(|| FunctionError::failed("target is not a position"))?;
        Ok(Some(vec![ValueRequirement::new(
            "Price",
            ComputationTargetReference::of_external(
                ComputationTargetType::Security,
                position.security_link().clone(),
            ),
        )]))
    }
}

/// Sums the values of a node's positions and child nodes.
#[derive(Debug)]
struct NodeValue;

impl CompiledFunction for NodeValue {
    fn function_id(&self) -> &str {
        "NodeValue"
    }

    fn target_type(&self) -> ComputationTargetType {
        ComputationTargetType::PortfolioNode
    }

    fn results(&self, target: &ComputationTarget) -> FunctionResult<Vec<ValueSpecification>> {
        Ok(vec![ValueSpecification::new(
            "PV",
            target.specification().clone(),
            ValueProperties::none(),
        )])
    }

    fn requirements(
        &self,
        target: &ComputationTarget,
        _desired: &ValueSpecification,
    ) -> FunctionResult<Option<Vec<ValueRequirement>>> {
        let node = target
            .as_portfolio_node()
            .ok_or_else(|| FunctionError::failed("target is not a portfolio node"))?;
        let positions = node.positions().iter().map(|position| {
            ValueRequirement::new(
                "PV",
                ComputationTargetReference::of(
                    ComputationTargetType::Position,
                    position.unique_id().to_latest(),
                ),
            )
        });
        let children = node.child_nodes().iter().map(|child| {
            ValueRequirement::new(
                "PV",
                ComputationTargetReference::of(
                    ComputationTargetType::PortfolioNode,
                    child.unique_id().to_latest(),
                ),
            )
        });
        Ok(Some(positions.chain(children).collect()))
    }
}

/// Builds a rate for a primitive target from a quote.
#[derive(Debug)]
struct CurveRate;

impl CompiledFunction for CurveRate {
    fn function_id(&self) -> &str {
        "CurveRate"
    }

    fn target_type(&self) -> ComputationTargetType {
        ComputationTargetType::Primitive
    }

    fn results(&self, target: &ComputationTarget) -> FunctionResult<Vec<ValueSpecification>> {
        Ok(vec![ValueSpecification::new(
            "Rate",
            target.specification().clone(),
            ValueProperties::none(),
        )])
    }

    fn requirements(
        &self,
        target: &ComputationTarget,
        _desired: &ValueSpecification,
    ) -> FunctionResult<Option<Vec<ValueRequirement>>> {
        Ok(Some(vec![ValueRequirement::new(
            "Quote",
            target.specification().clone(),
        )]))
    }
}

/// Declares a risk value on primitives but panics when asked for inputs.
#[derive(Debug)]
struct Detonator;

impl CompiledFunction for Detonator {
    fn function_id(&self) -> &str {
        "Detonator"
    }

    fn target_type(&self) -> ComputationTargetType {
        ComputationTargetType::Primitive
    }

    fn results(&self, target: &ComputationTarget) -> FunctionResult<Vec<ValueSpecification>> {
        Ok(vec![ValueSpecification::new(
            "Risk",
            target.specification().clone(),
            ValueProperties::none(),
        )])
    }

    fn requirements(
        &self,
        _target: &ComputationTarget,
        _desired: &ValueSpecification,
    ) -> FunctionResult<Option<Vec<ValueRequirement>>> {
        panic!("risk model not loaded");
    }
}

// =============================================================================
// TEST FIXTURES
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn security(ticker: &str, security_type: &str) -> Arc<Security> {
    Arc::new(Security::new(
        UniqueId::of("Sec", ticker),
        security_type,
        ticker,
        ExternalIdBundle::of(ExternalId::of("TICKER", ticker)),
    ))
}

fn position(id: &str, security: Arc<Security>) -> Position {
    Position::new(
        UniqueId::versioned("Pos", id, "1"),
        dec!(1000),
        security.external_ids().clone(),
    )
    .with_security(security)
}

fn security_spec(ticker: &str) -> ComputationTargetSpecification {
    ComputationTargetSpecification::new(ComputationTargetType::Security, UniqueId::of("Sec", ticker))
}

fn position_ref(id: &str) -> ComputationTargetReference {
    ComputationTargetReference::of(ComputationTargetType::Position, UniqueId::of("Pos", id))
}

fn node_ref(id: &str) -> ComputationTargetReference {
    ComputationTargetReference::of(ComputationTargetType::PortfolioNode, UniqueId::of("Node", id))
}

fn sample_root() -> PortfolioNode {
    PortfolioNode::new(UniqueId::of("Node", "root"), "Root")
        .with_child(
            PortfolioNode::new(UniqueId::of("Node", "equities"), "Equities")
                .with_position(position("1", security("AAPL", "EQUITY")))
                .with_position(position("2", security("MSFT", "EQUITY"))),
        )
        .with_child(
            PortfolioNode::new(UniqueId::of("Node", "bonds"), "Bonds")
                .with_position(position("3", security("UST10Y", "BOND"))),
        )
}

/// root -> { equities -> { 1: AAPL, 2: MSFT }, bonds -> { 3: UST10Y } }
fn sample_portfolio() -> Arc<Portfolio> {
    Arc::new(Portfolio::new(UniqueId::of("Port", "main"), "Main", sample_root()))
}

/// The sample portfolio plus cash -> { 4: USD }, which nothing values.
fn portfolio_with_cash() -> Arc<Portfolio> {
    let root = sample_root().with_child(
        PortfolioNode::new(UniqueId::of("Node", "cash"), "Cash")
            .with_position(position("4", security("USD", "CASH"))),
    );
    Arc::new(Portfolio::new(UniqueId::of("Port", "main"), "Main", root))
}

fn all_prices() -> StaticMarketDataAvailability {
    StaticMarketDataAvailability::new()
        .with_value("Price", security_spec("AAPL"))
        .with_value("Price", security_spec("MSFT"))
        .with_value("Price", security_spec("UST10Y"))
}

fn functions() -> Arc<InMemoryFunctionRepository> {
    Arc::new(
        InMemoryFunctionRepository::new()
            .with_function(Arc::new(PositionValue), 10)
            .with_function(Arc::new(NodeValue), 10)
            .with_function(Arc::new(CurveRate), 5),
    )
}

fn portfolio_config(name: &str) -> ViewCalculationConfiguration {
    ViewCalculationConfiguration::new(name)
        .with_portfolio_requirement("EQUITY", "PV", ValueProperties::none())
        .with_portfolio_requirement("BOND", "PV", ValueProperties::none())
}

fn portfolio_view() -> Arc<ViewDefinition> {
    Arc::new(
        ViewDefinition::new("Valuation")
            .with_portfolio(UniqueId::of("Port", "main"))
            .with_calculation_configuration(portfolio_config("Default")),
    )
}

struct Fixture {
    resolver: InMemoryTargetResolver,
    functions: Arc<InMemoryFunctionRepository>,
    services: Arc<ViewCompilationServices>,
}

fn fixture_with(market_data: StaticMarketDataAvailability, config: CompilerConfig) -> Fixture {
    fixture_for(sample_portfolio(), market_data, config)
}

fn fixture_for(
    portfolio: Arc<Portfolio>,
    market_data: StaticMarketDataAvailability,
    config: CompilerConfig,
) -> Fixture {
    init_tracing();
    let resolver = InMemoryTargetResolver::new();
    resolver.add_portfolio(portfolio);
    let functions = functions();
    let services = ViewCompilationServices::builder()
        .with_function_repository(functions.clone())
        .with_target_resolver(Arc::new(resolver.clone()))
        .with_market_data_availability(Arc::new(market_data))
        .with_config(config)
        .build()
        .unwrap();
    Fixture {
        resolver,
        functions,
        services: Arc::new(services),
    }
}

fn fixture() -> Fixture {
    fixture_with(all_prices(), CompilerConfig::new().with_worker_threads(4))
}

/// Every node with its outputs, plus the terminal outputs.
fn shape(graph: &DependencyGraph) -> (BTreeSet<String>, BTreeSet<ValueSpecification>) {
    let nodes = graph.nodes().map(|(_, node)| node.to_string()).collect();
    let terminals = graph.terminal_outputs().keys().cloned().collect();
    (nodes, terminals)
}

fn assert_every_node_feeds_a_terminal_output(graph: &DependencyGraph) {
    let terminals: HashSet<&ValueSpecification> = graph.terminal_outputs().keys().collect();
    for (idx, _) in graph.nodes() {
        let mut stack = vec![idx];
        let mut seen = HashSet::new();
        let mut reaches = false;
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let node = graph.node(current).unwrap();
            if node.outputs().iter().any(|output| terminals.contains(output)) {
                reaches = true;
                break;
            }
            stack.extend(graph.dependent_nodes(current));
        }
        assert!(reaches, "{} feeds no terminal output", graph.node(idx).unwrap());
    }
}

// =============================================================================
// FULL COMPILATION
// =============================================================================

#[test]
fn test_full_compile_values_portfolio() {
    let fx = fixture();
    let compiled = ViewDefinitionCompiler::new()
        .compile(portfolio_view(), fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap();

    let graph = compiled.dependency_graph("Default").unwrap();
    // Three prices, three positions, three nodes.
    assert_eq!(graph.node_count(), 9);
    assert_eq!(graph.terminal_outputs().len(), 6);
    assert!(graph.is_acyclic());
    assert!(graph.topological_order().is_ok());
    assert_eq!(compiled.market_data_requirements().len(), 3);

    let terminal_targets: BTreeSet<UniqueId> = graph
        .terminal_outputs()
        .keys()
        .map(|spec| spec.target().unique_id().to_latest())
        .collect();
    assert!(terminal_targets.contains(&UniqueId::of("Node", "root")));
    assert!(terminal_targets.contains(&UniqueId::of("Pos", "3")));
    assert_eq!(terminal_targets.len(), 6);

    let report = compiled.failure_report("Default").unwrap();
    assert!(report.is_empty());
    assert_eq!(compiled.portfolio().unwrap().unique_id(), &UniqueId::of("Port", "main"));
    assert!(compiled.is_valid_for(fx.functions.function_init_id()));
}

#[test]
fn test_every_node_feeds_a_terminal_output() {
    let fx = fixture();
    let compiled = ViewDefinitionCompiler::new()
        .compile(portfolio_view(), fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap();
    for graph in compiled.dependency_graphs() {
        assert_every_node_feeds_a_terminal_output(graph);
    }
}

#[test]
fn test_each_reference_resolved_at_most_once() {
    let config = CompilerConfig::new()
        .with_worker_threads(4)
        .with_parallel_traversal(true)
        .with_parallel_configurations(true);
    let fx = fixture_with(all_prices(), config);
    let view = Arc::new(
        ViewDefinition::new("Valuation")
            .with_portfolio(UniqueId::of("Port", "main"))
            .with_calculation_configuration(portfolio_config("Default"))
            .with_calculation_configuration(portfolio_config("Stressed")),
    );

    let compiled = ViewDefinitionCompiler::new()
        .compile(view, fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap();

    assert_eq!(compiled.dependency_graphs().len(), 2);
    assert!(fx.resolver.specification_calls() > 0);
    assert_eq!(fx.resolver.max_specification_calls_per_reference(), 1);
    assert_eq!(
        fx.resolver.specification_calls_for(&ComputationTargetReference::of(
            ComputationTargetType::Portfolio,
            UniqueId::of("Port", "main"),
        )),
        1
    );
}

#[test]
fn test_resolutions_are_pruned_to_graph_targets() {
    let fx = fixture_for(portfolio_with_cash(), all_prices(), CompilerConfig::new());
    let view = Arc::new(
        ViewDefinition::new("Positions")
            .with_portfolio(UniqueId::of("Port", "main"))
            .with_result_model(
                ResultModelDefinition::new()
                    .with_output_mode(ComputationTargetType::PortfolioNode, ResultOutputMode::None),
            )
            .with_calculation_configuration(portfolio_config("Default")),
    );
    let compiled = ViewDefinitionCompiler::new()
        .compile(view, fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap();
    // Three prices, three positions.
    assert_eq!(compiled.dependency_graph("Default").unwrap().node_count(), 6);
    let resolutions = compiled.resolutions();

    // Positions are always kept, valued or not.
    assert_eq!(resolutions.get(&position_ref("1")), Some(&UniqueId::versioned("Pos", "1", "1")));
    assert!(resolutions.contains_key(&position_ref("4")));
    // The portfolio is kept; nodes are visited but valued nowhere.
    assert!(resolutions.contains_key(&ComputationTargetReference::of(
        ComputationTargetType::Portfolio,
        UniqueId::of("Port", "main"),
    )));
    assert!(!resolutions.contains_key(&node_ref("equities")));
    assert!(!resolutions.contains_key(&node_ref("cash")));
    // Securities priced through their tickers are kept.
    let by_ticker = ComputationTargetReference::of_external(
        ComputationTargetType::Security,
        ExternalIdBundle::of(ExternalId::of("TICKER", "AAPL")),
    );
    assert_eq!(resolutions.get(&by_ticker), Some(&UniqueId::of("Sec", "AAPL")));
}

#[test]
fn test_version_correction_is_fixed() {
    let fx = fixture();
    let before = Utc::now();
    let compiled = ViewDefinitionCompiler::new()
        .compile(portfolio_view(), fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap();

    let fixed = compiled.version_correction();
    assert!(!fixed.contains_latest());
    assert_eq!(fx.resolver.last_version_correction(), Some(fixed));
    assert!(compiled.valuation_time() >= before);
}

// =============================================================================
// FAILURES
// =============================================================================

#[test]
fn test_missing_price_leaves_rest_of_graph() {
    let prices = StaticMarketDataAvailability::new()
        .with_value("Price", security_spec("AAPL"))
        .with_value("Price", security_spec("MSFT"));
    let fx = fixture_with(prices, CompilerConfig::new().with_worker_threads(2));
    let compiled = ViewDefinitionCompiler::new()
        .compile(portfolio_view(), fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap();

    let graph = compiled.dependency_graph("Default").unwrap();
    // Two prices, two positions, the equities node.
    assert_eq!(graph.node_count(), 5);
    assert_every_node_feeds_a_terminal_output(graph);

    let report = compiled.failure_report("Default").unwrap();
    let unresolved: BTreeSet<ComputationTargetReference> = report
        .unresolved
        .iter()
        .map(|(requirement, _)| requirement.target().clone())
        .collect();
    let expected: BTreeSet<ComputationTargetReference> = [
        ComputationTargetSpecification::new(ComputationTargetType::Position, UniqueId::of("Pos", "3")).into(),
        ComputationTargetSpecification::new(ComputationTargetType::PortfolioNode, UniqueId::of("Node", "bonds")).into(),
        ComputationTargetSpecification::new(ComputationTargetType::PortfolioNode, UniqueId::of("Node", "root")).into(),
    ]
    .into_iter()
    .collect();
    assert_eq!(unresolved, expected);
    assert!(report.exceptions.is_empty());
    assert_eq!(report.summary().unresolved, 3);

    let summary = serde_json::to_value(report.summary()).unwrap();
    assert_eq!(summary["calculation_configuration_name"], "Default");
    assert_eq!(summary["unresolved"], 3);
    assert_eq!(summary["total_exceptions"], 0);
}

#[test]
fn test_view_without_portfolio_is_fatal() {
    let fx = fixture();
    let view = Arc::new(ViewDefinition::new("Orphan").with_calculation_configuration(portfolio_config("Default")));

    let err = ViewDefinitionCompiler::new()
        .compile(view, fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap_err();
    assert_eq!(err, EngineError::NoPortfolio { view: "Orphan".into() });
}

#[test]
fn test_unknown_portfolio_is_fatal() {
    let fx = fixture();
    let view = Arc::new(
        ViewDefinition::new("Ghost")
            .with_portfolio(UniqueId::of("Port", "missing"))
            .with_calculation_configuration(portfolio_config("Default")),
    );

    let err = ViewDefinitionCompiler::new()
        .compile(view, fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap_err();
    assert!(matches!(err, EngineError::PortfolioNotIdentified { ref view, .. } if view == "Ghost"));
}

/// Identifies every reference but resolves nothing.
#[derive(Debug, Clone, Copy)]
struct BlindResolver;

impl ComputationTargetResolver for BlindResolver {
    fn at_version_correction(&self, _version_correction: &VersionCorrection) -> Arc<dyn VersionedTargetResolver> {
        Arc::new(*self)
    }
}

impl VersionedTargetResolver for BlindResolver {
    fn target_specification(
        &self,
        reference: &ComputationTargetReference,
    ) -> Option<ComputationTargetSpecification> {
        reference.as_specification().cloned()
    }

    fn resolve(&self, _specification: &ComputationTargetSpecification) -> Option<ComputationTarget> {
        None
    }
}

#[test]
fn test_unresolvable_portfolio_is_fatal() {
    init_tracing();
    let services = ViewCompilationServices::builder()
        .with_function_repository(functions())
        .with_target_resolver(Arc::new(BlindResolver))
        .build()
        .unwrap();

    let err = ViewDefinitionCompiler::new()
        .compile(portfolio_view(), Arc::new(services), Utc::now(), VersionCorrection::LATEST)
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::PortfolioNotFound {
            portfolio: UniqueId::of("Port", "main"),
            view: "Valuation".into(),
        }
    );
}

#[test]
fn test_portfolio_ignored_when_outputs_disabled() {
    let fx = fixture();
    let result_model = ResultModelDefinition::new()
        .with_output_mode(ComputationTargetType::PortfolioNode, ResultOutputMode::None)
        .with_output_mode(ComputationTargetType::Position, ResultOutputMode::None);
    let view = Arc::new(
        ViewDefinition::new("Quiet")
            .with_result_model(result_model)
            .with_calculation_configuration(portfolio_config("Default")),
    );

    let compiled = ViewDefinitionCompiler::new()
        .compile(view, fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap();
    assert!(compiled.portfolio().is_none());
    assert!(compiled.dependency_graph("Default").unwrap().is_empty());
}

#[test]
fn test_invalid_view_is_rejected() {
    let fx = fixture();
    let err = ViewDefinitionCompiler::new()
        .compile(Arc::new(ViewDefinition::new("Empty")), fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn test_panicking_function_does_not_halt_compilation() {
    init_tracing();
    let functions = InMemoryFunctionRepository::new()
        .with_function(Arc::new(CurveRate), 5)
        .with_function(Arc::new(Detonator), 5);
    let services = ViewCompilationServices::builder()
        .with_function_repository(Arc::new(functions))
        .with_target_resolver(Arc::new(InMemoryTargetResolver::new()))
        .with_market_data_availability(Arc::new(
            StaticMarketDataAvailability::new().with_value_everywhere("Quote"),
        ))
        .with_config(CompilerConfig::new().with_worker_threads(2))
        .build()
        .unwrap();

    let usd = ComputationTargetSpecification::primitive(UniqueId::of("Curve", "USD"));
    let view = Arc::new(
        ViewDefinition::new("Curves").with_calculation_configuration(
            ViewCalculationConfiguration::new("Default")
                .with_specific_requirement(ValueRequirement::new("Risk", usd.clone()))
                .with_specific_requirement(ValueRequirement::new("Rate", usd.clone())),
        ),
    );

    let compiled = ViewDefinitionCompiler::new()
        .compile(view, Arc::new(services), Utc::now(), VersionCorrection::LATEST)
        .unwrap();

    let graph = compiled.dependency_graph("Default").unwrap();
    assert_eq!(graph.node_count(), 2);
    assert_eq!(
        graph.terminal_requirements().into_iter().collect::<Vec<_>>(),
        vec![ValueRequirement::new("Rate", usd.clone())]
    );

    let report = compiled.failure_report("Default").unwrap();
    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(report.unresolved[0].0, ValueRequirement::new("Risk", usd));
    assert_eq!(report.exceptions.len(), 1);
    assert_eq!(report.exceptions[0].0.function_id, "Detonator");
    assert!(report.exceptions[0].0.error.to_string().contains("risk model not loaded"));
}

// =============================================================================
// SPECIFIC REQUIREMENTS
// =============================================================================

#[test]
fn test_specific_requirements_need_no_portfolio() {
    init_tracing();
    let services = ViewCompilationServices::builder()
        .with_function_repository(functions())
        .with_target_resolver(Arc::new(InMemoryTargetResolver::new()))
        .with_market_data_availability(Arc::new(
            StaticMarketDataAvailability::new().with_value_everywhere("Quote"),
        ))
        .with_config(CompilerConfig::new().with_parallel_configurations(true))
        .build()
        .unwrap();

    let curve = |currency: &str| ComputationTargetSpecification::primitive(UniqueId::of("Curve", currency));
    let view = Arc::new(
        ViewDefinition::new("Curves")
            .with_calculation_configuration(
                ViewCalculationConfiguration::new("Dollar")
                    .with_specific_requirement(ValueRequirement::new("Rate", curve("USD"))),
            )
            .with_calculation_configuration(
                ViewCalculationConfiguration::new("Euro")
                    .with_specific_requirement(ValueRequirement::new("Rate", curve("EUR")))
                    .with_specific_requirement(ValueRequirement::new("Quote", curve("EUR"))),
            ),
    );

    let compiled = ViewDefinitionCompiler::new()
        .compile(view, Arc::new(services), Utc::now(), VersionCorrection::LATEST)
        .unwrap();

    assert!(compiled.portfolio().is_none());
    assert!(compiled.resolutions().is_empty());
    assert_eq!(compiled.dependency_graph("Dollar").unwrap().node_count(), 2);
    let euro = compiled.dependency_graph("Euro").unwrap();
    assert_eq!(euro.node_count(), 2);
    assert_eq!(euro.terminal_outputs().len(), 2);
}

#[test]
fn test_disabled_primitive_outputs_are_not_requested() {
    let fx = fixture();
    let view = Arc::new(
        ViewDefinition::new("Curves")
            .with_result_model(
                ResultModelDefinition::new()
                    .with_output_mode(ComputationTargetType::Primitive, ResultOutputMode::None),
            )
            .with_calculation_configuration(ViewCalculationConfiguration::new("Default").with_specific_requirement(
                ValueRequirement::new("Rate", ComputationTargetSpecification::primitive(UniqueId::of("Curve", "USD"))),
            )),
    );

    let compiled = ViewDefinitionCompiler::new()
        .compile(view, fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap();
    assert!(compiled.dependency_graph("Default").unwrap().is_empty());
    assert!(compiled.failure_report("Default").unwrap().is_empty());
}

// =============================================================================
// INCREMENTAL COMPILATION
// =============================================================================

#[test]
fn test_incremental_without_changes_matches_full() {
    let fx = fixture();
    let compiler = ViewDefinitionCompiler::new();
    let full = compiler
        .compile(portfolio_view(), fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap();

    let unchanged = HashSet::new();
    let incremental = compiler
        .incremental_compile_task(
            portfolio_view(),
            fx.services.clone(),
            Utc::now(),
            VersionCorrection::LATEST,
            full.incremental_inputs(&unchanged),
            full.carried_resolutions(&unchanged),
            PortfolioChanges::None,
        )
        .get()
        .unwrap();

    assert_ne!(full.compilation_identifier(), incremental.compilation_identifier());
    assert_eq!(
        shape(full.dependency_graph("Default").unwrap()),
        shape(incremental.dependency_graph("Default").unwrap())
    );
}

#[test]
fn test_incremental_after_position_change_matches_full() {
    let fx = fixture();
    let compiler = ViewDefinitionCompiler::new();
    let full = compiler
        .compile(portfolio_view(), fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap();

    let changed: HashSet<UniqueId> = [UniqueId::versioned("Pos", "1", "1")].into_iter().collect();
    let previous = full.incremental_inputs(&changed);
    let seeded = &previous["Default"];
    // Position 1, and the equities and root aggregates above it.
    assert_eq!(seeded.pending.len(), 3);
    assert_eq!(seeded.graph.node_count(), 6);

    fx.resolver.reset_counters();
    let incremental = compiler
        .incremental_compile_task(
            portfolio_view(),
            fx.services.clone(),
            Utc::now(),
            VersionCorrection::LATEST,
            previous,
            full.carried_resolutions(&changed),
            PortfolioChanges::changed_positions(changed.iter().cloned()),
        )
        .get()
        .unwrap();

    assert_eq!(
        shape(full.dependency_graph("Default").unwrap()),
        shape(incremental.dependency_graph("Default").unwrap())
    );
    assert_eq!(fx.resolver.specification_calls_for(&position_ref("2")), 0);
    assert!(incremental.failure_report("Default").unwrap().is_empty());
}

#[test]
fn test_incremental_with_no_changed_positions_matches_full() {
    let fx = fixture();
    let compiler = ViewDefinitionCompiler::new();
    let full = compiler
        .compile(portfolio_view(), fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap();

    let changed = HashSet::new();
    let previous = full.incremental_inputs(&changed);
    assert!(previous["Default"].pending.is_empty());

    fx.resolver.reset_counters();
    let incremental = compiler
        .incremental_compile_task(
            portfolio_view(),
            fx.services.clone(),
            Utc::now(),
            VersionCorrection::LATEST,
            previous,
            full.carried_resolutions(&changed),
            PortfolioChanges::changed_positions(Vec::<UniqueId>::new()),
        )
        .get()
        .unwrap();

    assert_eq!(
        shape(full.dependency_graph("Default").unwrap()),
        shape(incremental.dependency_graph("Default").unwrap())
    );
    assert_eq!(fx.resolver.specification_calls(), 0);
    assert!(incremental.failure_report("Default").unwrap().is_empty());
}

#[test]
fn test_incremental_skipping_unchanged_nodes_matches_full() {
    let fx = fixture();
    let compiler = ViewDefinitionCompiler::new();
    let full = compiler
        .compile(portfolio_view(), fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap();

    let changed: HashSet<UniqueId> = [UniqueId::versioned("Pos", "2", "1")].into_iter().collect();
    let previous = full.incremental_inputs(&changed);

    fx.resolver.reset_counters();
    let incremental = compiler
        .incremental_compile_task(
            portfolio_view(),
            fx.services.clone(),
            Utc::now(),
            VersionCorrection::LATEST,
            previous,
            full.carried_resolutions(&changed),
            PortfolioChanges::unchanged_nodes([UniqueId::of("Node", "bonds")]),
        )
        .get()
        .unwrap();

    assert_eq!(
        shape(full.dependency_graph("Default").unwrap()),
        shape(incremental.dependency_graph("Default").unwrap())
    );
    assert_eq!(fx.resolver.specification_calls_for(&position_ref("3")), 0);
    assert!(incremental.failure_report("Default").unwrap().is_empty());
}

#[test]
fn test_function_changes_invalidate_compiled_view() {
    let fx = fixture();
    let compiled = ViewDefinitionCompiler::new()
        .compile(portfolio_view(), fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap();
    assert!(compiled.is_valid_for(fx.functions.function_init_id()));

    fx.functions.remove_function("CurveRate");
    assert!(!compiled.is_valid_for(fx.functions.function_init_id()));
}

// =============================================================================
// TASK LIFECYCLE
// =============================================================================

#[test]
fn test_get_returns_same_artifact() {
    let fx = fixture();
    let task = ViewDefinitionCompiler::new().full_compile_task(
        portfolio_view(),
        fx.services.clone(),
        Utc::now(),
        VersionCorrection::LATEST,
    );
    assert!(!task.is_done());

    let first = task.get().unwrap();
    let second = task.clone().get().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(task.is_done());
    assert!(!task.cancel(true));
    assert!(matches!(
        task.get_timeout(std::time::Duration::from_secs(1)),
        Err(EngineError::Unsupported(_))
    ));
}

#[test]
fn test_cancel_before_get() {
    let fx = fixture();
    let task = ViewDefinitionCompiler::new().full_compile_task(
        portfolio_view(),
        fx.services.clone(),
        Utc::now(),
        VersionCorrection::LATEST,
    );

    assert!(task.cancel(false));
    assert!(task.is_cancelled());
    assert_eq!(task.get().unwrap_err(), EngineError::Cancelled);
    assert!(task.is_done());
    assert_eq!(task.get().unwrap_err(), EngineError::Cancelled);
}

#[test]
fn test_completion_estimate_reaches_one() {
    let config = CompilerConfig::new().with_progress_tracking(true, 5);
    let fx = fixture_with(all_prices(), config);
    let view = Arc::new(
        ViewDefinition::new("Valuation")
            .with_portfolio(UniqueId::of("Port", "main"))
            .with_calculation_configuration(portfolio_config("Default"))
            .with_calculation_configuration(portfolio_config("Stressed")),
    );
    let task = ViewDefinitionCompiler::new().full_compile_task(view, fx.services.clone(), Utc::now(), VersionCorrection::LATEST);

    let estimate = task.completion_estimate();
    assert_eq!(estimate.estimate(), 0.0);
    assert_eq!(estimate.estimates().len(), 2);

    task.get().unwrap();
    assert_eq!(estimate.fraction("Default"), Some(1.0));
    assert_eq!(estimate.fraction("Stressed"), Some(1.0));
    assert!((estimate.estimate() - 1.0).abs() < 1e-12);
}

#[test]
fn test_debug_outputs_do_not_change_result() {
    let fx = fixture_with(all_prices(), CompilerConfig::new().with_debug_outputs());
    let compiled = ViewDefinitionCompiler::new()
        .compile(portfolio_view(), fx.services.clone(), Utc::now(), VersionCorrection::LATEST)
        .unwrap();
    assert_eq!(compiled.dependency_graph("Default").unwrap().node_count(), 9);
}

#[tokio::test]
async fn test_compile_async() -> anyhow::Result<()> {
    let fx = fixture();
    let task = ViewDefinitionCompiler::new().full_compile_task(
        portfolio_view(),
        fx.services.clone(),
        Utc::now(),
        VersionCorrection::LATEST,
    );

    let compiled = task.compile_async().await?;
    let graph = compiled
        .dependency_graph("Default")
        .ok_or_else(|| anyhow::anyhow!("missing Default graph"))?;
    assert_eq!(graph.node_count(), 9);
    assert!(Arc::ptr_eq(&compiled, &task.get()?));
    Ok(())
}
