//! `furrow-core`: the runtime core of an in-process microkernel that hosts a
//! dynamic set of cooperating modules communicating exclusively through a
//! typed publish/subscribe bus, executed under a deterministic rate-driven
//! scheduler, and supervised by a lifecycle manager with watchdog, memory,
//! and failure isolation facilities.
//!
//! The crate is domain-agnostic; the motivating application is a real-time
//! guidance stack (high-frequency sensor ingestion, closed-loop control,
//! sustained multi-hour operation), but nothing here assumes that domain.
//!
//! ## Layout
//!
//! - [`time`] — the abstract clock (`TimeSource`), with system and
//!   simulated implementations.
//! - [`bus`] — the typed pub/sub message bus, its last-value cache,
//!   per-handler failure tracker, and per-module deferred queue.
//! - [`scheduler`] — the rate-driven tick loop and its real-time/simulation
//!   drivers.
//! - [`dependency`] — topological load-order resolution.
//! - [`workerpool`] — the per-module worker pool.
//! - [`executor`] — the safe-execution envelope lifecycle calls run through.
//! - [`watchdog`] — hang detection.
//! - [`memory`] — heuristic per-module memory attribution.
//! - [`module`] — the module contract and its injected [`module::ModuleContext`].
//! - [`lifecycle`] — the module registry and state machine.
//! - [`kernel`] — wires all of the above into a single [`kernel::ApplicationKernel`].

mod cancellation;
mod dependency;
mod error;
mod model;

pub mod bus;
pub mod config;
pub mod events;
pub mod executor;
pub mod kernel;
pub mod lifecycle;
pub mod memory;
pub mod module;
pub mod scheduler;
pub mod time;
pub mod watchdog;
pub mod workerpool;

pub use cancellation::Cancellation;
pub use dependency::{resolve as resolve_dependencies, ModuleSpec};
pub use error::{ErrorCategory, KernelError, OperationResult, Result};
pub use kernel::ApplicationKernel;
pub use model::{module_id, names_eq, HealthStatus, ModuleCategory};
pub use module::{Module, ModuleContext};
