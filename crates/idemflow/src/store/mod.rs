//! Storage abstraction for idempotency records and transactions.
//!
//! This module provides the [`TransactionProvider`] and [`IdempotencyStore`]
//! traits that the coordinator drives. Two implementations are provided:
//!
//! - [`MemoryStore`] — in-process storage for tests and single-process use
//! - [`PgStore`] — PostgreSQL storage for production (requires `postgres` feature)
//!
//! Both are *scoped*: a store hands out one adapter per caller-derived lookup
//! token (e.g. an `Idempotency-Key` request header), and that adapter only ever
//! reads and writes the record behind its lookup.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

use std::future::Future;
use std::time::Duration;

pub use memory::{MemoryOp, MemoryScope, MemoryStore, MemoryTransaction};
#[cfg(feature = "postgres")]
pub use postgres::{PgScope, PgStore};

/// How long an invocation holds an in-flight record before another
/// invocation may take it over.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(30);

/// An idempotency key identifying one logical business operation.
///
/// Keys are minted by the store adapter when a lookup has no record yet, and
/// stay stable across every retry of the same operation.
///
/// # Example
///
/// ```
/// use idemflow::IdempotencyKey;
///
/// let key = IdempotencyKey::new("0190c8e4-charge");
/// assert_eq!(key.as_str(), "0190c8e4-charge");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Create a new idempotency key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for IdempotencyKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A persisted idempotency record as returned by a store lookup.
///
/// `step` holds the name of the last completed recovery point, or one of the
/// sentinels from [`CoordinatorConfig`](crate::CoordinatorConfig). Once `step`
/// is the final sentinel, `response` is present and never changes.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord<A, R> {
    /// The record's idempotency key.
    pub key: IdempotencyKey,
    /// Last completed step, or a sentinel.
    pub step: String,
    /// Arguments of the request that created the record.
    pub args: Option<A>,
    /// Final business result, set together with the final step.
    pub response: Option<R>,
}

impl<A, R> IdempotencyRecord<A, R> {
    /// Returns `true` if the record has reached `final_step`.
    pub fn is_finished(&self, final_step: &str) -> bool {
        self.step == final_step
    }
}

/// How a transaction is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Everything done in the transaction succeeded; make it durable.
    Commit,
    /// Something failed; discard the transaction's writes.
    Rollback,
}

/// Opens and closes units of work.
///
/// The coordinator opens one transaction for the initial lookup and one per
/// effect invocation, and closes each exactly once. A transaction handle is
/// owned by a single effect invocation and never shared.
///
/// Dropping a handle without passing it to [`close_transaction`](Self::close_transaction)
/// only happens when a `run` future is cancelled; implementations must treat
/// that as a rollback.
pub trait TransactionProvider: Send + Sync {
    /// The transaction handle type.
    type Transaction: Send;

    /// The error type of every adapter operation.
    ///
    /// Must implement `Display` so failed rollbacks can be logged.
    type Error: std::fmt::Display + Send + 'static;

    /// Open a new transaction.
    fn start_transaction(
        &self,
    ) -> impl Future<Output = Result<Self::Transaction, Self::Error>> + Send;

    /// Close a transaction, committing or rolling back its writes.
    ///
    /// Consumes the handle, so a transaction cannot be closed twice. A failed
    /// [`TxOutcome::Commit`] surfaces as the failure of whatever the
    /// transaction was recording.
    fn close_transaction(
        &self,
        tx: Self::Transaction,
        outcome: TxOutcome,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Reads and writes the idempotency record behind one caller-derived lookup.
///
/// Every operation except [`args_equal`](Self::args_equal) runs inside a
/// transaction obtained from [`TransactionProvider::start_transaction`].
///
/// # Concurrency
///
/// At most one invocation may be active per key. Adapters enforce this with a
/// lease: [`create_idempotency_key`](Self::create_idempotency_key) and
/// [`refresh_idempotency_key`](Self::refresh_idempotency_key) claim it and
/// fail while another invocation holds an unexpired one.
/// [`save_resp`](Self::save_resp) and
/// [`release_idempotency_key`](Self::release_idempotency_key) give it back.
///
/// Once a record holds its response, every write to it must fail.
pub trait IdempotencyStore: TransactionProvider {
    /// The business arguments of an operation.
    type Args: Send + Sync;

    /// The final business result of an operation.
    type Response: Send + Sync;

    /// Look up the record for this adapter's lookup, if one exists.
    fn get_idempotency_key(
        &self,
        tx: &mut Self::Transaction,
    ) -> impl Future<Output = Result<Option<IdempotencyRecord<Self::Args, Self::Response>>, Self::Error>>
    + Send;

    /// Compare stored arguments with incoming ones.
    fn args_equal(&self, stored: &Self::Args, incoming: &Self::Args) -> bool;

    /// Claim the lease on an in-flight record before resuming it.
    ///
    /// Fails if another invocation holds an unexpired lease.
    fn refresh_idempotency_key(
        &self,
        tx: &mut Self::Transaction,
        key: &IdempotencyKey,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Create a record positioned at `first_step`, leased to the caller, and
    /// return its new key.
    fn create_idempotency_key(
        &self,
        tx: &mut Self::Transaction,
        first_step: &str,
    ) -> impl Future<Output = Result<IdempotencyKey, Self::Error>> + Send;

    /// Advance the record's step to a completed recovery point.
    fn save_rec_point(
        &self,
        tx: &mut Self::Transaction,
        step: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Store the arguments the record was created for.
    fn save_args(
        &self,
        tx: &mut Self::Transaction,
        args: &Self::Args,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Store the final response, move the record to `final_step` and drop
    /// the lease.
    fn save_resp(
        &self,
        tx: &mut Self::Transaction,
        final_step: &str,
        response: &Self::Response,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Drop the lease on an in-flight record after a failed invocation, so a
    /// retry can resume it right away.
    fn release_idempotency_key(
        &self,
        tx: &mut Self::Transaction,
        key: &IdempotencyKey,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
