//! Scheduling and check-execution engine for apimon
//!
//! The engine probes HTTP targets on independent intervals:
//! - [`probe`] runs one request attempt against a target
//! - [`retry`] wraps the probe in bounded retries with exponential backoff
//! - [`scheduler`] keeps one timer per enabled target and dispatches cycles
//!
//! Target configuration comes from a [`TargetRegistry`] and every finished
//! cycle is handed to a [`ResultSink`]. Both are supplied by the caller.

pub mod probe;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod target;
pub mod validation;

pub use probe::{HttpProbe, Probe, ProbeError};
pub use retry::RetryController;
pub use scheduler::{OverlapPolicy, ResyncSummary, TargetScheduler};
pub use store::{MemoryRegistry, MemorySink, ResultSink, TargetRegistry};
pub use target::{CheckOutcome, Target, TargetId, TargetSpec};
pub use validation::{MAX_BACKOFF_S, MAX_INTERVAL_S, ValidationError, validate_spec};
