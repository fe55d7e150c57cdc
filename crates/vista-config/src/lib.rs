//! Vista Configuration Layer
//!
//! This crate holds the user-facing inputs of the view compiler.
//!
//! # Features
//!
//! - **View Definitions**: portfolio, result model and calculation
//!   configurations, loadable from JSON
//! - **Compiler Configuration**: thread pool size, traversal and progress
//!   settings, debug reports, loadable from TOML or JSON
//! - **Validation**: every input implements [`Validate`]
//!
//! # Example
//!
//! ```rust
//! use vista_config::{CompilerConfig, Validate, ViewCalculationConfiguration, ViewDefinition};
//! use vista_core::{UniqueId, ValueProperties};
//!
//! let view = ViewDefinition::new("Equity Risk")
//!     .with_portfolio(UniqueId::of("Port", "main"))
//!     .with_calculation_configuration(
//!         ViewCalculationConfiguration::new("Default")
//!             .with_portfolio_requirement("EQUITY", "PresentValue", ValueProperties::none()),
//!     );
//! assert!(view.is_valid());
//!
//! let config = CompilerConfig::from_toml_str("worker_threads = 2").unwrap();
//! assert_eq!(config.effective_worker_threads(), 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compiler;
pub mod error;
pub mod view;

pub use compiler::CompilerConfig;
pub use error::{ConfigError, ConfigResult, Validate, ValidationError};
pub use view::{
    PortfolioRequirement, ResultModelDefinition, ResultOutputMode, ViewCalculationConfiguration,
    ViewDefinition,
};
