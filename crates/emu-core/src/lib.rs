//! Core traits and types for tick-driven emulation.
//!
//! Components never see wall-clock time. A scheduler hands each one the
//! virtual time elapsed since its previous call, and the component answers
//! with how long it can sleep before it needs to run again.

mod observable;
mod schedule;
mod scheduler;
mod ticks;

pub use observable::{Observable, Value};
pub use schedule::{Schedulable, Schedule};
pub use scheduler::Scheduler;
pub use ticks::Ticks;
