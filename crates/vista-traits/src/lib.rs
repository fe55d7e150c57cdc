//! # Vista Traits
//!
//! Trait definitions for the collaborators of the view compiler.
//!
//! This crate contains ONLY trait definitions and their error types.
//! Implementations live in the engine crate or in caller code.
//!
//! ## Module Structure
//!
//! - [`function`]: compiled functions and the repository listing them
//! - [`resolver`]: resolution of target references at a version-correction
//! - [`market_data`]: availability of values sourced from market data
//!
//! ## Dependency Injection
//!
//! The compiler uses these traits via dependency injection:
//!
//! ```ignore
//! ViewCompilationServices::builder()
//!     .with_function_repository(impl FunctionRepository)
//!     .with_target_resolver(impl ComputationTargetResolver)
//!     .with_market_data_availability(impl MarketDataAvailabilityProvider)
//!     .build()
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod function;
pub mod market_data;
pub mod resolver;

pub use error::{FunctionError, FunctionResult};
pub use function::{CompiledFunction, FunctionRepository};
pub use market_data::MarketDataAvailabilityProvider;
pub use resolver::{ComputationTargetResolver, VersionedTargetResolver};
