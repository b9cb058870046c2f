//! Idempotent, resumable step sequencing.
//!
//! Idemflow runs an ordered list of named effects exactly once per business
//! operation, across process crashes and client retries:
//!
//! - **Idempotency keys** — Every operation is tied to a persisted record
//! - **Recovery points** — Each completed effect can record its name, and a
//!   retried operation resumes right after the last one
//! - **Cached responses** — Once an effect returns the final response, later
//!   invocations return it without running anything
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Coordinator<S, E>                              │
//! │                                                                         │
//! │   1. Look up or create and lease the record (reject mismatching args)   │
//! │   2. Finished? Return the stored response                               │
//! │   3. Skip effects up to the recorded recovery point                     │
//! │   4. For each remaining effect:                                         │
//! │        local:    begin → task(tx) → record → commit                     │
//! │        external: task → begin → record → commit                         │
//! │   5. Stop at the first response or the first failure                    │
//! │   6. Failed? Release the record's lease so a retry can resume           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use idemflow::{Coordinator, Effect, EffectContext, EffectResult, ExternalTask, MemoryStore};
//!
//! struct Charge;
//!
//! #[async_trait::async_trait]
//! impl ExternalTask<Order, Receipt, PaymentError> for Charge {
//!     async fn run(&self, ctx: EffectContext<'_, Order>) -> Result<EffectResult<Receipt>, PaymentError> {
//!         let receipt = charge_card(ctx.args, ctx.key.as_str()).await?;
//!         Ok(EffectResult::Response(receipt))
//!     }
//! }
//!
//! let coordinator = Coordinator::builder(Effect::local("reserve", ReserveStock))
//!     .effect(Effect::external("charge", Charge))
//!     .build()?;
//!
//! let store = MemoryStore::new();
//! let receipt = coordinator.run(&store.scope("request-42"), order).await?;
//! ```
//!
//! # Feature Flags
//!
//! - `postgres` — Enables [`PgStore`] for production use with PostgreSQL
//!
//! # Design Documentation
//!
//! See `DESIGN.md` for architectural decisions.

mod config;
mod coordinator;
pub mod effect;
mod error;
mod lifecycle;
mod recovery;
pub mod store;
mod transaction;

pub use config::{CoordinatorConfig, DEFAULT_FINAL_STEP, DEFAULT_FIRST_STEP};
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use effect::{Effect, EffectContext, EffectResult, ExternalTask, LocalTask};
pub use error::{BuildError, Error, InvariantViolation, StoreError};
pub use nonempty::NonEmpty;
#[cfg(feature = "postgres")]
pub use store::{PgScope, PgStore};
pub use store::{
    DEFAULT_LEASE_DURATION, IdempotencyKey, IdempotencyRecord, IdempotencyStore, MemoryOp,
    MemoryScope, MemoryStore, MemoryTransaction, TransactionProvider, TxOutcome,
};
