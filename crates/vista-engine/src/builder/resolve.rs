//! Backtracking requirement resolution.
//!
//! Resolution walks an explicit stack of frames, one per requirement being
//! resolved. Nodes are staged in a private journal; a candidate that fails
//! rolls the journal back to where the candidate started, and the next
//! candidate is tried. Nothing touches the shared graph until the root
//! requirement has resolved.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use vista_core::{
    ComputationTarget, ComputationTargetSpecification, Satisfaction, ValueRequirement,
    ValueSpecification,
};
use vista_traits::{CompiledFunction, FunctionError, FunctionResult};

use super::{BuilderState, FailureReason};
use crate::graph::DependencyNode;

/// Deepest chain of nested requirements followed before giving up.
const MAX_RESOLUTION_DEPTH: usize = 256;

/// Staged result of resolving one requirement.
pub(super) struct Resolution {
    pub(super) specification: ValueSpecification,
    /// Nodes to install, producers before consumers.
    pub(super) nodes: Vec<DependencyNode>,
    pub(super) resolved: Vec<(ValueRequirement, ValueSpecification)>,
}

// =============================================================================
// FUNCTION CALLS
// =============================================================================

/// Runs a function call, turning a panic into a [`FunctionError`].
fn guarded<T>(function_id: &str, call: impl FnOnce() -> FunctionResult<T>) -> FunctionResult<T> {
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        Err(FunctionError::failed(format!(
            "{function_id} panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}

/// Text of a panic payload.
pub(super) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// STAGING JOURNAL
// =============================================================================

#[derive(Default)]
struct Staging {
    nodes: Vec<DependencyNode>,
    produced: HashSet<ValueSpecification>,
    resolved: Vec<(ValueRequirement, ValueSpecification)>,
    resolved_index: HashMap<ValueRequirement, ValueSpecification>,
}

#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    nodes: usize,
    resolved: usize,
}

impl Staging {
    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            nodes: self.nodes.len(),
            resolved: self.resolved.len(),
        }
    }

    fn rollback(&mut self, to: Checkpoint) {
        for node in self.nodes.drain(to.nodes..) {
            for output in node.outputs() {
                self.produced.remove(output);
            }
        }
        for (requirement, _) in self.resolved.drain(to.resolved..) {
            self.resolved_index.remove(&requirement);
        }
    }

    fn stage(&mut self, node: DependencyNode) {
        self.produced.extend(node.outputs().iter().cloned());
        self.nodes.push(node);
    }

    fn record(&mut self, requirement: ValueRequirement, specification: ValueSpecification) {
        if self.resolved_index.contains_key(&requirement) {
            return;
        }
        self.resolved_index
            .insert(requirement.clone(), specification.clone());
        self.resolved.push((requirement, specification));
    }

    fn outputs_matching<'a>(
        &'a self,
        value_name: &'a str,
        target: &'a ComputationTargetSpecification,
    ) -> impl Iterator<Item = &'a ValueSpecification> + 'a {
        self.nodes
            .iter()
            .flat_map(|node| node.outputs().iter())
            .filter(move |o| o.value_name() == value_name && o.target() == target)
    }
}

// =============================================================================
// FRAMES
// =============================================================================

enum Candidate {
    Existing(ValueSpecification),
    Function {
        function: Arc<dyn CompiledFunction>,
        desired: ValueSpecification,
    },
}

struct Attempt {
    function: Arc<dyn CompiledFunction>,
    desired: ValueSpecification,
    requirements: Vec<ValueRequirement>,
    inputs: Vec<ValueSpecification>,
    checkpoint: Checkpoint,
}

struct Frame {
    requirement: ValueRequirement,
    target: ComputationTarget,
    candidates: VecDeque<Candidate>,
    failures: Vec<FailureReason>,
    attempt: Option<Attempt>,
}

enum Opened {
    Done(Result<ValueSpecification, FailureReason>),
    Frame(Frame),
}

enum Step {
    Need(ValueRequirement),
    Finished(Result<ValueSpecification, FailureReason>),
}

// =============================================================================
// DRIVER
// =============================================================================

/// Resolves a requirement, staging every node it needs.
pub(super) fn resolve_requirement(
    state: &BuilderState,
    requirement: &ValueRequirement,
) -> Result<Resolution, FailureReason> {
    let mut staging = Staging::default();
    let mut stack: Vec<Frame> = Vec::new();

    let mut carry = match open(state, &mut staging, &stack, requirement.clone()) {
        Opened::Done(result) => Some(result),
        Opened::Frame(frame) => {
            stack.push(frame);
            None
        }
    };

    while !stack.is_empty() {
        if state.is_cancelled() {
            return Err(FailureReason::Cancelled);
        }

        let step = match stack.last_mut() {
            Some(frame) => advance(state, &mut staging, frame, carry.take()),
            None => break,
        };

        match step {
            Step::Need(input) => {
                if stack.len() >= MAX_RESOLUTION_DEPTH {
                    carry = Some(Err(FailureReason::Recursion(format!(
                        "{input} exceeds depth {MAX_RESOLUTION_DEPTH}"
                    ))));
                    continue;
                }
                match open(state, &mut staging, &stack, input) {
                    Opened::Done(result) => carry = Some(result),
                    Opened::Frame(frame) => stack.push(frame),
                }
            }
            Step::Finished(result) => {
                if let Some(frame) = stack.pop() {
                    match &result {
                        Ok(spec) => staging.record(frame.requirement, spec.clone()),
                        Err(reason) if !reason.is_path_dependent() => {
                            state.failed.insert(frame.requirement, reason.clone());
                        }
                        Err(_) => {}
                    }
                }
                carry = Some(result);
            }
        }
    }

    match carry {
        Some(Ok(specification)) => {
            staging.record(requirement.clone(), specification.clone());
            Ok(Resolution {
                specification,
                nodes: staging.nodes,
                resolved: staging.resolved,
            })
        }
        Some(Err(reason)) => Err(reason),
        None => Err(FailureReason::Rejected(format!(
            "resolution of {requirement} produced no result"
        ))),
    }
}

/// Resolves what can be resolved without trying functions, or builds the
/// frame that will try them.
fn open(
    state: &BuilderState,
    staging: &mut Staging,
    stack: &[Frame],
    requirement: ValueRequirement,
) -> Opened {
    if let Some(spec) = state.resolved.get(&requirement) {
        return Opened::Done(Ok(spec.value().clone()));
    }
    if let Some(spec) = staging.resolved_index.get(&requirement) {
        return Opened::Done(Ok(spec.clone()));
    }
    if stack.iter().any(|frame| frame.requirement == requirement) {
        return Opened::Done(Err(FailureReason::Recursion(requirement.to_string())));
    }
    if let Some(reason) = state.failed.get(&requirement) {
        return Opened::Done(Err(reason.value().clone()));
    }

    let resolver = state.context.target_resolver();
    let Some(target) = resolver
        .target_specification(requirement.target())
        .and_then(|spec| resolver.resolve(&spec))
    else {
        let reason = FailureReason::UnresolvedTarget(requirement.target().to_string());
        state.failed.insert(requirement, reason.clone());
        return Opened::Done(Err(reason));
    };
    let target_spec = target.specification().clone();

    // Existing exact output.
    if let Some(existing) = existing_output(state, staging, &requirement, &target, Satisfaction::Exact) {
        staging.record(requirement, existing.clone());
        return Opened::Done(Ok(existing));
    }

    // Market data.
    if let Some(available) = state.market_data.availability(&target_spec, &requirement) {
        if !is_produced(state, staging, &available) {
            staging.stage(DependencyNode::market_data(available.clone()));
        }
        staging.record(requirement, available.clone());
        return Opened::Done(Ok(available));
    }

    let mut failures = Vec::new();
    let mut exact = Vec::new();
    let mut relaxed = Vec::new();
    for function in state.registry.candidates(&target) {
        let outputs = match guarded(function.function_id(), || function.results(&target)) {
            Ok(outputs) => outputs,
            Err(error) => {
                state.record_exception(function.function_id(), &error);
                failures.push(FailureReason::FunctionFailed {
                    function_id: function.function_id().to_string(),
                    error,
                });
                continue;
            }
        };
        for output in outputs {
            if output.value_name() != requirement.value_name() || output.target() != &target_spec {
                continue;
            }
            let properties = output
                .properties()
                .compose(requirement.constraints())
                .with_function(function.function_id());
            let desired = output.with_properties(properties);
            match requirement.constraints().satisfaction(desired.properties()) {
                Some(Satisfaction::Exact) => exact.push(Candidate::Function {
                    function: Arc::clone(&function),
                    desired,
                }),
                Some(Satisfaction::Relaxed) => relaxed.push(Candidate::Function {
                    function: Arc::clone(&function),
                    desired,
                }),
                None => {}
            }
        }
    }

    let mut candidates: VecDeque<Candidate> = exact.into_iter().collect();
    if let Some(existing) = existing_output(state, staging, &requirement, &target, Satisfaction::Relaxed) {
        candidates.push_back(Candidate::Existing(existing));
    }
    candidates.extend(relaxed);

    if candidates.is_empty() {
        let reason = if failures.is_empty() {
            FailureReason::NoApplicableFunctions {
                value_name: requirement.value_name().to_string(),
                target: target_spec.to_string(),
            }
        } else {
            FailureReason::from_candidates(failures)
        };
        state.failed.insert(requirement, reason.clone());
        return Opened::Done(Err(reason));
    }

    Opened::Frame(Frame {
        requirement,
        target,
        candidates,
        failures,
        attempt: None,
    })
}

/// Moves the top frame forward: consumes the child's result, then asks for
/// the next input or finishes.
fn advance(
    state: &BuilderState,
    staging: &mut Staging,
    frame: &mut Frame,
    carry: Option<Result<ValueSpecification, FailureReason>>,
) -> Step {
    if let Some(result) = carry {
        match result {
            Ok(spec) => {
                if let Some(attempt) = frame.attempt.as_mut() {
                    attempt.inputs.push(spec);
                }
            }
            Err(reason) => {
                if let Some(attempt) = frame.attempt.take() {
                    staging.rollback(attempt.checkpoint);
                    let input = attempt
                        .requirements
                        .get(attempt.inputs.len())
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    frame.failures.push(FailureReason::InputUnresolved {
                        function_id: attempt.function.function_id().to_string(),
                        input,
                        cause: Box::new(reason),
                    });
                }
            }
        }
    }

    loop {
        if let Some(attempt) = frame.attempt.as_ref() {
            if let Some(next) = attempt.requirements.get(attempt.inputs.len()) {
                return Step::Need(next.clone());
            }
        }

        if let Some(attempt) = frame.attempt.take() {
            let checkpoint = attempt.checkpoint;
            match finish_attempt(state, staging, frame, attempt) {
                Ok(spec) => return Step::Finished(Ok(spec)),
                Err(reason) => {
                    staging.rollback(checkpoint);
                    frame.failures.push(reason);
                }
            }
        }

        match frame.candidates.pop_front() {
            Some(Candidate::Existing(spec)) => return Step::Finished(Ok(spec)),
            Some(Candidate::Function { function, desired }) => {
                match start_attempt(state, staging, &frame.target, function, desired) {
                    Ok(attempt) => frame.attempt = Some(attempt),
                    Err(reason) => frame.failures.push(reason),
                }
            }
            None => {
                let failures = std::mem::take(&mut frame.failures);
                return Step::Finished(Err(FailureReason::from_candidates(failures)));
            }
        }
    }
}

fn start_attempt(
    state: &BuilderState,
    staging: &Staging,
    target: &ComputationTarget,
    function: Arc<dyn CompiledFunction>,
    desired: ValueSpecification,
) -> Result<Attempt, FailureReason> {
    let requirements = guarded(function.function_id(), || function.requirements(target, &desired));
    match requirements {
        Ok(Some(requirements)) => Ok(Attempt {
            function,
            desired,
            requirements,
            inputs: Vec::new(),
            checkpoint: staging.checkpoint(),
        }),
        Ok(None) => Err(FailureReason::RequirementsUnsatisfied {
            function_id: function.function_id().to_string(),
        }),
        Err(error) => {
            state.record_exception(function.function_id(), &error);
            Err(FailureReason::FunctionFailed {
                function_id: function.function_id().to_string(),
                error,
            })
        }
    }
}

/// Confirms the outputs once every input is known and stages the node.
fn finish_attempt(
    state: &BuilderState,
    staging: &mut Staging,
    frame: &Frame,
    attempt: Attempt,
) -> Result<ValueSpecification, FailureReason> {
    let function_id = attempt.function.function_id().to_string();
    let target_spec = frame.target.specification();

    let outputs = guarded(&function_id, || {
        attempt
            .function
            .results_with_inputs(&frame.target, &attempt.inputs, std::slice::from_ref(&attempt.desired))
    })
    .map_err(|error| {
        state.record_exception(&function_id, &error);
        FailureReason::FunctionFailed {
            function_id: function_id.clone(),
            error,
        }
    })?;

    let chosen = outputs
        .into_iter()
        .map(|o| {
            let properties = o.properties().with_function(&function_id);
            o.with_properties(properties)
        })
        .filter_map(|o| o.satisfies(&frame.requirement, target_spec).map(|s| (s, o)))
        .min_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, o)| o)
        .ok_or_else(|| FailureReason::PropertyMismatch {
            function_id: function_id.clone(),
        })?;

    if !is_produced(state, staging, &chosen) {
        let node = attempt
            .inputs
            .iter()
            .cloned()
            .fold(DependencyNode::new(function_id, target_spec.clone()), |node, input| {
                node.with_input(input)
            })
            .with_output(chosen.clone());
        staging.stage(node);
    }
    Ok(chosen)
}

// =============================================================================
// LOOKUPS
// =============================================================================

fn is_produced(state: &BuilderState, staging: &Staging, spec: &ValueSpecification) -> bool {
    staging.produced.contains(spec) || state.graph.read().producer_of(spec).is_some()
}

/// First produced value meeting the requirement at the given level, from the
/// committed graph, then from the staging journal.
fn existing_output(
    state: &BuilderState,
    staging: &Staging,
    requirement: &ValueRequirement,
    target: &ComputationTarget,
    level: Satisfaction,
) -> Option<ValueSpecification> {
    let target_spec = target.specification();
    let meets = |spec: &ValueSpecification| spec.satisfies(requirement, target_spec) == Some(level);

    let committed = state
        .graph
        .read()
        .outputs_matching(requirement.value_name(), target_spec)
        .find(|&spec| meets(spec))
        .cloned();
    committed.or_else(|| {
        staging
            .outputs_matching(requirement.value_name(), target_spec)
            .find(|&spec| meets(spec))
            .cloned()
    })
}
