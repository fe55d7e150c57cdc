//! Target resolution traits.

use std::sync::Arc;

use vista_core::{
    ComputationTarget, ComputationTargetReference, ComputationTargetSpecification,
    VersionCorrection,
};

/// Resolves target references against versioned storage.
pub trait ComputationTargetResolver: Send + Sync {
    /// A resolver bound to one version-correction.
    fn at_version_correction(
        &self,
        version_correction: &VersionCorrection,
    ) -> Arc<dyn VersionedTargetResolver>;
}

/// Target resolver bound to a version-correction.
pub trait VersionedTargetResolver: Send + Sync {
    /// Resolves a reference to the specification of a concrete object.
    fn target_specification(
        &self,
        reference: &ComputationTargetReference,
    ) -> Option<ComputationTargetSpecification>;

    /// Loads the object named by a specification.
    fn resolve(&self, specification: &ComputationTargetSpecification) -> Option<ComputationTarget>;

    /// Resolves a reference straight to its object.
    fn resolve_reference(&self, reference: &ComputationTargetReference) -> Option<ComputationTarget> {
        let specification = self.target_specification(reference)?;
        self.resolve(&specification)
    }
}
