//! # Vista Core
//!
//! Core types shared by every Vista crate:
//!
//! - **Identifiers**: [`UniqueId`], [`ExternalId`], [`ExternalIdBundle`] and
//!   the [`VersionCorrection`] at which versioned data is read
//! - **Targets**: what functions are applied to, by reference or resolved
//! - **Portfolio**: the resolved portfolio tree
//! - **Values**: requirements, specifications and the property matching
//!   rules between them
//!
//! ## Example
//!
//! ```rust
//! use vista_core::prelude::*;
//!
//! let target = ComputationTargetSpecification::new(
//!     ComputationTargetType::Position,
//!     UniqueId::of("Pos", "1"),
//! );
//! let requirement = ValueRequirement::new("PresentValue", target.to_reference())
//!     .with_constraints(ValueProperties::builder().with("Currency", "USD").build());
//!
//! let produced = ValueSpecification::new(
//!     "PresentValue",
//!     target.clone(),
//!     ValueProperties::builder().with_any("Currency").build(),
//! );
//! assert_eq!(produced.satisfies(&requirement, &target), Some(Satisfaction::Exact));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod identifiers;
pub mod portfolio;
pub mod target;
pub mod value;

pub use error::{IdentifierError, IdentifierResult};
pub use identifiers::{ExternalId, ExternalIdBundle, UniqueId, VersionCorrection};
pub use portfolio::{Portfolio, PortfolioNode, Position, Security};
pub use target::{
    ComputationTarget, ComputationTargetReference, ComputationTargetRequirement,
    ComputationTargetSpecification, ComputationTargetType, TargetValue,
};
pub use value::{
    PropertyValues, Satisfaction, ValueProperties, ValuePropertiesBuilder, ValuePropertyNames,
    ValueRequirement, ValueSpecification,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::identifiers::{ExternalId, ExternalIdBundle, UniqueId, VersionCorrection};
    pub use crate::portfolio::{Portfolio, PortfolioNode, Position, Security};
    pub use crate::target::{
        ComputationTarget, ComputationTargetReference, ComputationTargetSpecification,
        ComputationTargetType,
    };
    pub use crate::value::{
        Satisfaction, ValueProperties, ValuePropertyNames, ValueRequirement, ValueSpecification,
    };
}
