//! Market data availability.

use vista_core::{ComputationTargetSpecification, ValueRequirement, ValueSpecification};

/// Tells the builder which requirements are satisfied directly by market data.
///
/// When a requirement is available, the builder places a sourcing node in
/// the graph instead of searching for a function.
pub trait MarketDataAvailabilityProvider: Send + Sync {
    /// The specification under which the requirement is available, if it is.
    fn availability(
        &self,
        target: &ComputationTargetSpecification,
        requirement: &ValueRequirement,
    ) -> Option<ValueSpecification>;
}
