//! Outbound dispatch: operator sends and the scheduled-message sweep.

pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{DispatchOutcome, Dispatcher, SendRequest};
pub use scheduler::{Scheduler, SweepReport, spawn_ticker};
