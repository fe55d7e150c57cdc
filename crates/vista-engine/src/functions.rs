//! Function lookup for graph building.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use vista_core::{ComputationTarget, ComputationTargetType};
use vista_traits::{CompiledFunction, FunctionRepository};

// =============================================================================
// FUNCTION REGISTRY
// =============================================================================

/// Functions of one repository snapshot, indexed by target type.
///
/// Candidate order within a target type is the repository's priority order.
pub struct FunctionRegistry {
    by_target_type: HashMap<ComputationTargetType, Vec<Arc<dyn CompiledFunction>>>,
    by_id: HashMap<String, Arc<dyn CompiledFunction>>,
    function_init_id: u64,
}

impl FunctionRegistry {
    /// Snapshots a repository.
    pub fn from_repository(repository: &dyn FunctionRepository) -> Self {
        let mut by_target_type: HashMap<ComputationTargetType, Vec<Arc<dyn CompiledFunction>>> =
            HashMap::new();
        let mut by_id = HashMap::new();
        for function in repository.functions() {
            by_id
                .entry(function.function_id().to_string())
                .or_insert_with(|| Arc::clone(&function));
            by_target_type
                .entry(function.target_type())
                .or_default()
                .push(function);
        }
        Self {
            by_target_type,
            by_id,
            function_init_id: repository.function_init_id(),
        }
    }

    /// Functions applicable to a target, highest priority first.
    pub fn candidates(&self, target: &ComputationTarget) -> Vec<Arc<dyn CompiledFunction>> {
        self.by_target_type
            .get(&target.target_type())
            .map(|functions| {
                functions
                    .iter()
                    .filter(|f| f.can_apply_to(target))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Looks a function up by identifier.
    pub fn function(&self, function_id: &str) -> Option<Arc<dyn CompiledFunction>> {
        self.by_id.get(function_id).cloned()
    }

    /// Number of distinct functions.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Initialization identifier of the snapshotted repository.
    pub fn function_init_id(&self) -> u64 {
        self.function_init_id
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.by_id.len())
            .field("function_init_id", &self.function_init_id)
            .finish()
    }
}

// =============================================================================
// IN-MEMORY REPOSITORY
// =============================================================================

struct PrioritizedFunction {
    priority: i32,
    function: Arc<dyn CompiledFunction>,
}

/// Repository holding functions in memory with explicit priorities.
///
/// Higher priorities are tried first; equal priorities keep insertion order.
/// Every change bumps the function initialization identifier.
pub struct InMemoryFunctionRepository {
    functions: RwLock<Vec<PrioritizedFunction>>,
    init_id: AtomicU64,
}

impl InMemoryFunctionRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self {
            functions: RwLock::new(Vec::new()),
            init_id: AtomicU64::new(1),
        }
    }

    /// Adds a function (builder style).
    #[must_use]
    pub fn with_function(self, function: Arc<dyn CompiledFunction>, priority: i32) -> Self {
        self.add_function(function, priority);
        self
    }

    /// Adds a function.
    pub fn add_function(&self, function: Arc<dyn CompiledFunction>, priority: i32) {
        let mut functions = self.functions.write();
        functions.push(PrioritizedFunction { priority, function });
        functions.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.init_id.fetch_add(1, Ordering::SeqCst);
    }

    /// Removes every function with the given identifier.
    pub fn remove_function(&self, function_id: &str) -> bool {
        let mut functions = self.functions.write();
        let before = functions.len();
        functions.retain(|f| f.function.function_id() != function_id);
        let removed = functions.len() != before;
        if removed {
            self.init_id.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    /// Number of functions.
    pub fn len(&self) -> usize {
        self.functions.read().len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.functions.read().is_empty()
    }
}

impl Default for InMemoryFunctionRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRepository for InMemoryFunctionRepository {
    fn functions(&self) -> Vec<Arc<dyn CompiledFunction>> {
        self.functions
            .read()
            .iter()
            .map(|f| Arc::clone(&f.function))
            .collect()
    }

    fn function_init_id(&self) -> u64 {
        self.init_id.load(Ordering::SeqCst)
    }
}
