//! # Vista Engine
//!
//! Compiles view definitions into dependency graphs.
//!
//! This crate provides:
//! - [`ViewDefinitionCompiler`]: Full and incremental compilation tasks
//! - [`DependencyGraphBuilder`]: Concurrent resolution of value requirements
//! - [`DependencyGraph`]: Function applications connected by value edges
//! - [`CompiledViewDefinitionWithGraphs`]: The immutable compilation artifact
//! - [`TargetResolutionLogger`]: Memoized target resolution shared by a compile
//!
//! ## Architecture
//!
//! ```text
//! ViewDefinition ─> CompilationTask ─┬─> portfolio resolution
//!                                    │
//!                                    └─> per configuration:
//!                                          specific requirements ─┐
//!                                          portfolio traversal ───┴─> DependencyGraphBuilder
//!                                                                       │
//!                                                                       └─> DependencyGraph
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let services = Arc::new(
//!     ViewCompilationServices::builder()
//!         .with_function_repository(functions)
//!         .with_target_resolver(resolver)
//!         .with_market_data_availability(market_data)
//!         .build()?,
//! );
//!
//! let compiled = ViewDefinitionCompiler::new()
//!     .full_compile_task(view, services, Utc::now(), VersionCorrection::LATEST)
//!     .get()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod compiled;
pub mod compiler;
pub mod context;
pub mod error;
pub mod functions;
pub mod graph;
pub mod progress;
pub mod report;
pub mod sources;
pub mod target_resolution;
pub mod traversal;

// Re-exports
pub use builder::{
    BuildFractionEstimate, DependencyGraphBuilder, FailureReason, FailureReport, FailureSummary,
    FunctionFailure,
};
pub use compiled::{CompiledViewDefinitionWithGraphs, PreviousGraph};
pub use compiler::{CompilationIdGenerator, CompilationTask, ViewDefinitionCompiler};
pub use context::{
    FunctionCompilationContext, ViewCompilationContext, ViewCompilationServices,
    ViewCompilationServicesBuilder,
};
pub use error::{EngineError, EngineResult};
pub use functions::{FunctionRegistry, InMemoryFunctionRepository};
pub use graph::{DependencyGraph, DependencyNode, GraphStats, MARKET_DATA_SOURCING_FUNCTION};
pub use progress::{CompilationCompletionEstimate, Housekeeper};
pub use sources::{InMemoryTargetResolver, NoMarketDataAvailability, StaticMarketDataAvailability};
pub use target_resolution::{TargetResolutionCache, TargetResolutionLogger};
pub use traversal::{
    add_portfolio_requirements, PortfolioChanges, PortfolioCompilerTraversalCallback,
    PortfolioNodeTraverser, PortfolioTraversalCallback,
};
