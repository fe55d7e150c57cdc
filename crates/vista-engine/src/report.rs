//! Diagnostic output for compiled graphs.
//!
//! Each report is written through `tracing` and switched on by
//! [`CompilerConfig`](vista_config::CompilerConfig).

use tracing::Level;
use vista_config::CompilerConfig;
use vista_traits::FunctionError;

use crate::builder::{DependencyGraphBuilder, FailureReport};
use crate::graph::DependencyGraph;

/// Logs every node of a graph.
pub fn output_dependency_graph(graph: &DependencyGraph) {
    let mut dump = String::new();
    for (_, node) in graph.nodes() {
        dump.push_str(&node.to_string());
    }
    tracing::warn!(
        config = graph.calculation_configuration_name(),
        nodes = graph.node_count(),
        "Dependency graph:\n{dump}"
    );
}

/// Logs the market data a graph needs.
pub fn output_live_data_requirements(graph: &DependencyGraph) {
    let required = graph.all_required_market_data();
    let listing = required
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n  ");
    tracing::warn!(
        config = graph.calculation_configuration_name(),
        count = required.len(),
        "Live data requirements:\n  {listing}"
    );
}

/// Logs the failures a builder has recorded.
pub fn output_failure_report(builder: &DependencyGraphBuilder) {
    log_failure_report(&builder.failure_report());
}

/// Logs a failure report.
///
/// Function errors are logged with their occurrence count: at warn when
/// they have no underlying cause, at debug otherwise. The causes follow at
/// debug.
pub fn log_failure_report(report: &FailureReport) {
    let config = report.calculation_configuration_name.as_str();
    if report.exceptions.is_empty() {
        tracing::info!(config, "No exceptions raised");
    }
    for (failure, count) in &report.exceptions {
        if exception_level(&failure.error) == Level::WARN {
            tracing::warn!(
                config,
                function = %failure.function_id,
                count,
                "Exception raised: {}",
                failure.error
            );
        } else {
            tracing::debug!(
                config,
                function = %failure.function_id,
                count,
                "Exception raised: {}",
                failure.error
            );
        }
        let mut cause = failure.error.cause();
        while let Some(inner) = cause {
            tracing::debug!(config, function = %failure.function_id, "Caused by: {inner}");
            cause = inner.cause();
        }
    }

    if !report.unresolved.is_empty() {
        tracing::warn!(
            config,
            unresolved = report.unresolved.len(),
            "Unresolved value requirements"
        );
        for (requirement, reason) in &report.unresolved {
            tracing::debug!(config, requirement = %requirement, reason = %reason, "Unresolved");
        }
    }
}

/// Level a reported function error is logged at.
pub(crate) fn exception_level(error: &FunctionError) -> Level {
    if error.cause().is_some() {
        Level::DEBUG
    } else {
        Level::WARN
    }
}

/// Writes the reports the configuration asks for.
pub(crate) fn emit(config: &CompilerConfig, graphs: &[DependencyGraph], reports: &[FailureReport]) {
    if config.output_dependency_graphs {
        graphs.iter().for_each(output_dependency_graph);
    }
    if config.output_live_data_requirements {
        graphs.iter().for_each(output_live_data_requirements);
    }
    if config.output_failure_reports {
        reports.iter().for_each(log_failure_report);
    }
}
