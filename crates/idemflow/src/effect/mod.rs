//! Effect types for the units of work a coordinator sequences.
//!
//! This module provides the core types for describing effects:
//!
//! - [`Effect`] — A named local or external unit of work
//! - [`LocalTask`] / [`ExternalTask`] — Traits implemented by effect bodies
//! - [`EffectContext`] — Idempotency key and arguments handed to every task
//! - [`EffectResult`] — What a task asks the coordinator to record

mod context;
mod result;
mod task;

pub use context::EffectContext;
pub use result::EffectResult;
pub use task::{Effect, ExternalTask, LocalTask};
