//! Function traits.
//!
//! Functions are opaque to the compiler: it only sees which targets they
//! apply to, which outputs they can produce and which inputs each output
//! needs.

use std::fmt;
use std::sync::Arc;

use vista_core::{ComputationTarget, ComputationTargetType, ValueRequirement, ValueSpecification};

use crate::error::FunctionResult;

/// A function ready to be placed in a dependency graph.
pub trait CompiledFunction: Send + Sync + fmt::Debug {
    /// Stable identifier, stamped on every output as the `Function` property.
    fn function_id(&self) -> &str;

    /// Type of target the function applies to.
    fn target_type(&self) -> ComputationTargetType;

    /// Finer check on a target of the right type.
    fn can_apply_to(&self, _target: &ComputationTarget) -> bool {
        true
    }

    /// Outputs the function may produce on the target.
    ///
    /// Properties may be wildcards; the builder narrows them to the
    /// constraints of the requirement being resolved.
    fn results(&self, target: &ComputationTarget) -> FunctionResult<Vec<ValueSpecification>>;

    /// Inputs needed to produce `desired`.
    ///
    /// `Ok(None)` means the function cannot produce this particular output.
    fn requirements(
        &self,
        target: &ComputationTarget,
        desired: &ValueSpecification,
    ) -> FunctionResult<Option<Vec<ValueRequirement>>>;

    /// Outputs once the inputs are known.
    ///
    /// Called after every input resolved. A function may refine the
    /// properties of its outputs here; the default keeps them as proposed.
    fn results_with_inputs(
        &self,
        _target: &ComputationTarget,
        _inputs: &[ValueSpecification],
        outputs: &[ValueSpecification],
    ) -> FunctionResult<Vec<ValueSpecification>> {
        Ok(outputs.to_vec())
    }
}

/// Source of compiled functions.
pub trait FunctionRepository: Send + Sync {
    /// All functions, highest priority first.
    fn functions(&self) -> Vec<Arc<dyn CompiledFunction>>;

    /// Identifier of the function initialization that produced this set.
    ///
    /// A compiled view is only valid while this value is unchanged.
    fn function_init_id(&self) -> u64;
}
