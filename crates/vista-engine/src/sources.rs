//! In-memory collaborators: target resolution and market data availability.
//!
//! These back tests and embedded use. Production deployments plug their own
//! implementations of the `vista-traits` interfaces into
//! [`ViewCompilationServices`](crate::context::ViewCompilationServices).

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use vista_core::{
    ComputationTarget, ComputationTargetReference, ComputationTargetSpecification,
    ComputationTargetType, ExternalId, Portfolio, PortfolioNode, UniqueId, ValueProperties,
    ValueRequirement, ValueSpecification, VersionCorrection,
};
use vista_traits::{ComputationTargetResolver, MarketDataAvailabilityProvider, VersionedTargetResolver};

use crate::graph::MARKET_DATA_SOURCING_FUNCTION;

// =============================================================================
// TARGET RESOLVER
// =============================================================================

#[derive(Default)]
struct ResolverInner {
    targets: DashMap<ComputationTargetSpecification, ComputationTarget>,
    external: DashMap<(ComputationTargetType, ExternalId), UniqueId>,
    specification_calls: AtomicUsize,
    resolve_calls: AtomicUsize,
    calls_by_reference: DashMap<ComputationTargetReference, usize>,
    last_version_correction: RwLock<Option<VersionCorrection>>,
}

/// Resolver over targets registered in memory.
///
/// Lookups ignore versions: a reference to the latest version of an object
/// resolves to whatever version was registered. Primitive targets always
/// resolve, to themselves if nothing was registered for them. Every call is
/// counted so callers can check how often resolution was attempted.
#[derive(Clone, Default)]
pub struct InMemoryTargetResolver {
    inner: Arc<ResolverInner>,
}

impl InMemoryTargetResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a target.
    pub fn add_target(&self, target: ComputationTarget) {
        self.inner
            .targets
            .insert(target.specification().to_latest(), target);
    }

    /// Registers a portfolio with all of its nodes, positions and securities.
    pub fn add_portfolio(&self, portfolio: Arc<Portfolio>) {
        let root = Arc::clone(portfolio.root_node());
        self.add_target(ComputationTarget::portfolio(portfolio));
        self.add_node(&root);
    }

    fn add_node(&self, node: &Arc<PortfolioNode>) {
        self.add_target(ComputationTarget::portfolio_node(Arc::clone(node)));
        for position in node.positions() {
            self.add_target(ComputationTarget::position(Arc::clone(position)));
            if let Some(security) = position.security() {
                for id in security.external_ids().iter() {
                    self.inner.external.insert(
                        (ComputationTargetType::Security, id.clone()),
                        security.unique_id().clone(),
                    );
                }
                self.add_target(ComputationTarget::security(Arc::clone(security)));
            }
        }
        for child in node.child_nodes() {
            self.add_node(child);
        }
    }

    /// Removes a target.
    pub fn remove_target(&self, specification: &ComputationTargetSpecification) -> bool {
        self.inner
            .targets
            .remove(&specification.to_latest())
            .is_some()
    }

    /// Total `target_specification` calls.
    pub fn specification_calls(&self) -> usize {
        self.inner.specification_calls.load(Ordering::SeqCst)
    }

    /// Total `resolve` calls.
    pub fn resolve_calls(&self) -> usize {
        self.inner.resolve_calls.load(Ordering::SeqCst)
    }

    /// `target_specification` calls made for one reference.
    pub fn specification_calls_for(&self, reference: &ComputationTargetReference) -> usize {
        self.inner
            .calls_by_reference
            .get(reference)
            .map_or(0, |count| *count)
    }

    /// Largest number of `target_specification` calls made for any reference.
    pub fn max_specification_calls_per_reference(&self) -> usize {
        self.inner
            .calls_by_reference
            .iter()
            .map(|entry| *entry.value())
            .max()
            .unwrap_or(0)
    }

    /// Version-correction most recently requested.
    pub fn last_version_correction(&self) -> Option<VersionCorrection> {
        *self.inner.last_version_correction.read()
    }

    /// Clears call counters.
    pub fn reset_counters(&self) {
        self.inner.specification_calls.store(0, Ordering::SeqCst);
        self.inner.resolve_calls.store(0, Ordering::SeqCst);
        self.inner.calls_by_reference.clear();
    }
}

impl ComputationTargetResolver for InMemoryTargetResolver {
    fn at_version_correction(
        &self,
        version_correction: &VersionCorrection,
    ) -> Arc<dyn VersionedTargetResolver> {
        *self.inner.last_version_correction.write() = Some(*version_correction);
        Arc::new(self.clone())
    }
}

impl VersionedTargetResolver for InMemoryTargetResolver {
    fn target_specification(
        &self,
        reference: &ComputationTargetReference,
    ) -> Option<ComputationTargetSpecification> {
        self.inner.specification_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .inner
            .calls_by_reference
            .entry(reference.clone())
            .or_insert(0) += 1;

        match reference {
            ComputationTargetReference::Specification(spec) => {
                match self.inner.targets.get(&spec.to_latest()) {
                    Some(target) => Some(target.specification().clone()),
                    None if spec.target_type() == ComputationTargetType::Primitive => {
                        Some(spec.clone())
                    }
                    None => None,
                }
            }
            ComputationTargetReference::Requirement(req) => {
                req.identifiers().iter().find_map(|id| {
                    self.inner
                        .external
                        .get(&(req.target_type(), id.clone()))
                        .map(|entry| {
                            ComputationTargetSpecification::new(
                                req.target_type(),
                                entry.value().clone(),
                            )
                        })
                })
            }
        }
    }

    fn resolve(&self, specification: &ComputationTargetSpecification) -> Option<ComputationTarget> {
        self.inner.resolve_calls.fetch_add(1, Ordering::SeqCst);
        match self.inner.targets.get(&specification.to_latest()) {
            Some(entry) => Some(entry.value().clone()),
            None if specification.target_type() == ComputationTargetType::Primitive => Some(
                ComputationTarget::primitive(specification.unique_id().clone()),
            ),
            None => None,
        }
    }
}

// =============================================================================
// MARKET DATA AVAILABILITY
// =============================================================================

/// Market data availability declared up front.
///
/// A value is available either for one specific target or, by name, for
/// every target. Available values carry no properties beyond the sourcing
/// function, so requirements with mandatory constraints are not met.
#[derive(Default)]
pub struct StaticMarketDataAvailability {
    by_target: DashMap<(String, ComputationTargetSpecification), ValueProperties>,
    everywhere: RwLock<HashSet<String>>,
}

impl StaticMarketDataAvailability {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a value available on one target.
    #[must_use]
    pub fn with_value(self, value_name: impl Into<String>, target: ComputationTargetSpecification) -> Self {
        self.by_target
            .insert((value_name.into(), target), ValueProperties::none());
        self
    }

    /// Declares a value available on one target with extra properties.
    #[must_use]
    pub fn with_value_properties(
        self,
        value_name: impl Into<String>,
        target: ComputationTargetSpecification,
        properties: ValueProperties,
    ) -> Self {
        self.by_target.insert((value_name.into(), target), properties);
        self
    }

    /// Declares a value available on every target.
    #[must_use]
    pub fn with_value_everywhere(self, value_name: impl Into<String>) -> Self {
        self.everywhere.write().insert(value_name.into());
        self
    }
}

impl MarketDataAvailabilityProvider for StaticMarketDataAvailability {
    fn availability(
        &self,
        target: &ComputationTargetSpecification,
        requirement: &ValueRequirement,
    ) -> Option<ValueSpecification> {
        let key = (requirement.value_name().to_string(), target.clone());
        let properties = match self.by_target.get(&key) {
            Some(properties) => properties.clone(),
            None if self.everywhere.read().contains(requirement.value_name()) => {
                ValueProperties::none()
            }
            None => return None,
        };
        let properties = properties.with_function(MARKET_DATA_SOURCING_FUNCTION);
        requirement.constraints().satisfaction(&properties)?;
        Some(ValueSpecification::new(
            requirement.value_name(),
            target.clone(),
            properties,
        ))
    }
}

/// Provider for which nothing is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMarketDataAvailability;

impl MarketDataAvailabilityProvider for NoMarketDataAvailability {
    fn availability(
        &self,
        _target: &ComputationTargetSpecification,
        _requirement: &ValueRequirement,
    ) -> Option<ValueSpecification> {
        None
    }
}
