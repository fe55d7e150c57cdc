//! Compilation-scoped target resolution caching.
//!
//! Every configuration of a compile resolves targets through its own
//! [`TargetResolutionLogger`], and all loggers share one
//! [`TargetResolutionCache`]. Each distinct reference and specification is
//! looked up in the underlying resolver at most once per compile. References
//! that resolve to a different identity than they name (a latest reference
//! resolving to a versioned object, or an external-id reference) are
//! recorded in the resolution map carried on the compiled view.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use vista_core::{ComputationTarget, ComputationTargetReference, ComputationTargetSpecification, UniqueId};
use vista_traits::VersionedTargetResolver;

/// Resolution results shared by every configuration of one compile.
#[derive(Debug, Default)]
pub struct TargetResolutionCache {
    specifications: DashMap<ComputationTargetReference, Option<ComputationTargetSpecification>>,
    targets: DashMap<ComputationTargetSpecification, Option<ComputationTarget>>,
    resolutions: DashMap<ComputationTargetReference, UniqueId>,
}

impl TargetResolutionCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache seeded with resolutions carried from a previous compile.
    pub fn with_resolutions(resolutions: HashMap<ComputationTargetReference, UniqueId>) -> Self {
        let cache = Self::new();
        for (reference, id) in resolutions {
            cache.resolutions.insert(reference, id);
        }
        cache
    }

    /// Records a resolution unless one is already present.
    ///
    /// Returns true when this call inserted the entry.
    pub fn record(&self, reference: ComputationTargetReference, unique_id: UniqueId) -> bool {
        let mut inserted = false;
        self.resolutions.entry(reference).or_insert_with(|| {
            inserted = true;
            unique_id
        });
        inserted
    }

    /// Recorded resolution for a reference.
    pub fn resolution(&self, reference: &ComputationTargetReference) -> Option<UniqueId> {
        self.resolutions.get(reference).map(|entry| entry.value().clone())
    }

    /// Number of recorded resolutions.
    pub fn resolution_count(&self) -> usize {
        self.resolutions.len()
    }

    /// Keeps only the resolutions matching the predicate.
    pub fn retain_resolutions<F>(&self, mut keep: F)
    where
        F: FnMut(&ComputationTargetReference, &UniqueId) -> bool,
    {
        self.resolutions.retain(|reference, id| keep(reference, id));
    }

    /// Copy of the recorded resolutions.
    pub fn resolutions_snapshot(&self) -> HashMap<ComputationTargetReference, UniqueId> {
        self.resolutions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// Target resolver that memoizes lookups in a shared cache.
pub struct TargetResolutionLogger {
    calculation_configuration_name: String,
    underlying: Arc<dyn VersionedTargetResolver>,
    cache: Arc<TargetResolutionCache>,
}

impl TargetResolutionLogger {
    /// Wraps a resolver for one configuration.
    pub fn new(
        calculation_configuration_name: impl Into<String>,
        underlying: Arc<dyn VersionedTargetResolver>,
        cache: Arc<TargetResolutionCache>,
    ) -> Self {
        Self {
            calculation_configuration_name: calculation_configuration_name.into(),
            underlying,
            cache,
        }
    }

    /// The shared cache.
    pub fn cache(&self) -> &Arc<TargetResolutionCache> {
        &self.cache
    }
}

impl VersionedTargetResolver for TargetResolutionLogger {
    fn target_specification(
        &self,
        reference: &ComputationTargetReference,
    ) -> Option<ComputationTargetSpecification> {
        if let Some(hit) = self.cache.specifications.get(reference) {
            return hit.clone();
        }

        if let Some(id) = self.cache.resolution(reference) {
            let carried = ComputationTargetSpecification::new(reference.target_type(), id);
            return self
                .cache
                .specifications
                .entry(reference.clone())
                .or_insert(Some(carried))
                .clone();
        }

        let resolved = self
            .cache
            .specifications
            .entry(reference.clone())
            .or_insert_with(|| self.underlying.target_specification(reference))
            .clone();

        if let Some(spec) = &resolved {
            if spec.to_reference() != *reference
                && self.cache.record(reference.clone(), spec.unique_id().clone())
            {
                tracing::trace!(
                    config = %self.calculation_configuration_name,
                    reference = %reference,
                    resolved = %spec.unique_id(),
                    "Recorded target resolution"
                );
            }
        }
        resolved
    }

    fn resolve(&self, specification: &ComputationTargetSpecification) -> Option<ComputationTarget> {
        if let Some(hit) = self.cache.targets.get(specification) {
            return hit.clone();
        }
        self.cache
            .targets
            .entry(specification.clone())
            .or_insert_with(|| self.underlying.resolve(specification))
            .clone()
    }
}
