//! Error taxonomy for the kernel core.
//!
//! The variants below are a direct transcription of spec §7's error taxonomy;
//! `ErrorCategory` gives callers a coarse match without naming every variant,
//! mirroring `spark-core::error::ErrorCategory`'s role in the teacher crate.

use std::any::Any;
use std::fmt;
use std::time::Duration;

/// Coarse classification of a [`KernelError`], independent of its exact variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad input from the caller: rate <= 0, unknown handle, time going backwards.
    ContractViolation,
    /// A lookup that found nothing; not itself a failure of the system.
    NotFound,
    /// An idempotent-ish operation observed prior completion/state.
    AlreadyPresent,
    /// Missing or cyclic dependency at resolve time.
    DependencyFailure,
    /// A lifecycle or health call exceeded its budget.
    Timeout,
    /// A subscriber handler raised; contained within the bus.
    HandlerFailure,
    /// Out-of-memory, corruption, or similar; the module is not trusted further.
    FatalRuntimeFault,
    /// The bus or kernel has been disposed.
    Closed,
}

/// The single error type returned by fallible kernel operations.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already loaded: {module_id}")]
    AlreadyLoaded { module_id: String },

    #[error("already running")]
    AlreadyRunning,

    #[error("missing dependencies for {module}: {missing:?}")]
    MissingDependencies { module: String, missing: Vec<String> },

    #[error("cyclic dependency: {path}")]
    CyclicDependency { path: String },

    #[error("module {module_id} has dependents: {dependents:?}")]
    HasDependents {
        module_id: String,
        dependents: Vec<String>,
    },

    #[error("{operation} on {module_id} timed out after {elapsed:?}")]
    Timeout {
        module_id: String,
        operation: String,
        elapsed: Duration,
    },

    #[error("{module_id} failed during {phase}: {message}")]
    LifecycleFailed {
        module_id: String,
        phase: String,
        message: String,
    },

    #[error("fatal runtime fault in {module_id}: {message}")]
    FatalRuntimeFault { module_id: String, message: String },

    #[error("deadlock: simulation stalled with pending external futures and no due work")]
    Deadlock,

    #[error("closed")]
    Closed,
}

impl KernelError {
    pub fn category(&self) -> ErrorCategory {
        use KernelError::*;
        match self {
            ContractViolation(_) => ErrorCategory::ContractViolation,
            NotFound(_) => ErrorCategory::NotFound,
            AlreadyLoaded { .. } | AlreadyRunning => ErrorCategory::AlreadyPresent,
            MissingDependencies { .. } | CyclicDependency { .. } | HasDependents { .. } => {
                ErrorCategory::DependencyFailure
            }
            Timeout { .. } => ErrorCategory::Timeout,
            LifecycleFailed { .. } => ErrorCategory::Timeout,
            FatalRuntimeFault { .. } => ErrorCategory::FatalRuntimeFault,
            Deadlock => ErrorCategory::ContractViolation,
            Closed => ErrorCategory::Closed,
        }
    }
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Extracts a human-readable message from a `catch_unwind` payload. Shared
/// by the bus dispatch loop, the scheduler tick loop, and the worker pool so
/// a panic anywhere in user code is reported the same way.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_string()
    }
}

/// Outcome of a call routed through the safe executor (spec §4.7). Generic
/// over the success payload so both void lifecycle calls (`initialize`,
/// `stop`, ...) and data-bearing ones (`getHealth`) share one shape.
#[derive(Debug, Clone)]
pub enum OperationResult<T = ()> {
    Success(T),
    Cancelled,
    Failure { message: String, fatal: bool },
}

impl<T> OperationResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Success(_))
    }
}

impl<T> fmt::Display for OperationResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationResult::Success(_) => write!(f, "success"),
            OperationResult::Cancelled => write!(f, "cancelled"),
            OperationResult::Failure { message, fatal } => {
                write!(f, "failure(fatal={fatal}): {message}")
            }
        }
    }
}
