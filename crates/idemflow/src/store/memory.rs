//! In-memory store for tests and single-process use.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    DEFAULT_LEASE_DURATION, IdempotencyKey, IdempotencyRecord, IdempotencyStore,
    TransactionProvider, TxOutcome,
};
use crate::error::StoreError;

/// Store operations that can be made to fail once, for exercising failure paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    /// `start_transaction`
    Begin,
    /// `get_idempotency_key`
    Lookup,
    /// `create_idempotency_key`
    Create,
    /// `refresh_idempotency_key`
    Refresh,
    /// `save_rec_point`
    SaveRecPoint,
    /// `save_args`
    SaveArgs,
    /// `save_resp`
    SaveResp,
    /// `release_idempotency_key`
    Release,
    /// `close_transaction` with [`TxOutcome::Commit`]
    Commit,
}

#[derive(Debug, Clone)]
struct Row<A, R> {
    record: IdempotencyRecord<A, R>,
    refreshed_at: Option<OffsetDateTime>,
    leased_until: Option<OffsetDateTime>,
}

impl<A, R> Row<A, R> {
    fn is_leased(&self, now: OffsetDateTime) -> bool {
        self.leased_until.is_some_and(|until| until > now)
    }
}

struct Inner<A, R> {
    rows: RwLock<HashMap<String, Row<A, R>>>,
    failures: Mutex<Vec<MemoryOp>>,
    lease: Duration,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl<A, R> Inner<A, R> {
    fn check(&self, op: MemoryOp) -> Result<(), StoreError> {
        let mut failures = self.failures.lock();
        match failures.iter().position(|f| *f == op) {
            Some(index) => {
                failures.remove(index);
                Err(StoreError::Backend(format!("injected failure: {op:?}")))
            }
            None => Ok(()),
        }
    }
}

/// In-memory idempotency store.
///
/// Records are keyed by the caller-derived lookup token; use
/// [`scope`](Self::scope) to get the adapter for one lookup. Writes made in a
/// transaction are staged and only applied on commit, so a rolled back or
/// dropped transaction leaves no trace.
///
/// Like [`PgStore`](crate::PgStore), records are leased to the invocation
/// that created or resumed them until it finishes, fails, or the lease
/// expires.
///
/// Cloning is cheap and shares the underlying records.
pub struct MemoryStore<A, R> {
    inner: Arc<Inner<A, R>>,
}

impl<A, R> Clone for MemoryStore<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, R> Default for MemoryStore<A, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, R> MemoryStore<A, R> {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::with_lease_duration(DEFAULT_LEASE_DURATION)
    }

    /// Create a new empty store whose leases last `lease`.
    pub fn with_lease_duration(lease: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                rows: RwLock::new(HashMap::new()),
                failures: Mutex::new(Vec::new()),
                lease,
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            }),
        }
    }

    /// Get the adapter for the record behind `lookup`.
    pub fn scope(&self, lookup: impl Into<String>) -> MemoryScope<A, R> {
        MemoryScope {
            inner: Arc::clone(&self.inner),
            lookup: lookup.into(),
        }
    }

    /// Insert or replace the record behind `lookup`.
    ///
    /// Useful for seeding progress left behind by an earlier process.
    pub fn insert(&self, lookup: impl Into<String>, record: IdempotencyRecord<A, R>) {
        self.inner.rows.write().insert(
            lookup.into(),
            Row {
                record,
                refreshed_at: None,
                leased_until: None,
            },
        );
    }

    /// Make the next call of `op` fail with [`StoreError::Backend`].
    pub fn fail_next(&self, op: MemoryOp) {
        self.inner.failures.lock().push(op);
    }

    /// Number of transactions opened so far.
    pub fn transactions_opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Number of transactions closed so far (committed or rolled back).
    pub fn transactions_closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// When the record behind `lookup` was last refreshed, if ever.
    pub fn refreshed_at(&self, lookup: &str) -> Option<OffsetDateTime> {
        self.inner
            .rows
            .read()
            .get(lookup)
            .and_then(|row| row.refreshed_at)
    }

    /// Until when the record behind `lookup` is leased, if it is.
    pub fn leased_until(&self, lookup: &str) -> Option<OffsetDateTime> {
        self.inner
            .rows
            .read()
            .get(lookup)
            .and_then(|row| row.leased_until)
    }

    /// Get the number of stored records.
    pub fn len(&self) -> usize {
        self.inner.rows.read().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.rows.read().is_empty()
    }
}

impl<A: Clone, R: Clone> MemoryStore<A, R> {
    /// Get a copy of the committed record behind `lookup`.
    pub fn record(&self, lookup: &str) -> Option<IdempotencyRecord<A, R>> {
        self.inner
            .rows
            .read()
            .get(lookup)
            .map(|row| row.record.clone())
    }
}

enum LeaseWrite {
    Claim(OffsetDateTime),
    Clear,
}

/// Staged writes of one [`MemoryScope`] transaction.
pub struct MemoryTransaction<A, R> {
    created: Option<IdempotencyRecord<A, R>>,
    step: Option<String>,
    args: Option<A>,
    response: Option<R>,
    refreshed_at: Option<OffsetDateTime>,
    lease: Option<LeaseWrite>,
}

impl<A, R> MemoryTransaction<A, R> {
    fn is_empty(&self) -> bool {
        self.created.is_none() && !self.writes_record() && self.lease.is_none()
    }

    /// Whether anything but a lease release is staged for an existing record.
    fn writes_record(&self) -> bool {
        self.step.is_some()
            || self.args.is_some()
            || self.response.is_some()
            || self.refreshed_at.is_some()
            || matches!(self.lease, Some(LeaseWrite::Claim(_)))
    }
}

/// [`MemoryStore`] adapter for a single lookup.
pub struct MemoryScope<A, R> {
    inner: Arc<Inner<A, R>>,
    lookup: String,
}

impl<A, R> MemoryScope<A, R> {
    fn apply(&self, mut tx: MemoryTransaction<A, R>) -> Result<(), StoreError> {
        if tx.is_empty() {
            return Ok(());
        }

        let now = OffsetDateTime::now_utc();
        let mut rows = self.inner.rows.write();
        let created = tx.created.is_some();
        if let Some(record) = tx.created.take() {
            // Someone else created it first and holds its lease.
            if rows.contains_key(&self.lookup) {
                return Err(StoreError::Leased(self.lookup.clone()));
            }
            rows.insert(
                self.lookup.clone(),
                Row {
                    record,
                    refreshed_at: None,
                    leased_until: None,
                },
            );
        }

        let row = rows
            .get_mut(&self.lookup)
            .ok_or_else(|| StoreError::NotFound(self.lookup.clone()))?;
        if row.record.response.is_some() && tx.writes_record() {
            return Err(StoreError::Finished(self.lookup.clone()));
        }
        if !created && matches!(tx.lease, Some(LeaseWrite::Claim(_))) && row.is_leased(now) {
            return Err(StoreError::Leased(self.lookup.clone()));
        }

        if let Some(step) = tx.step {
            row.record.step = step;
        }
        if let Some(args) = tx.args {
            row.record.args = Some(args);
        }
        if let Some(response) = tx.response {
            row.record.response = Some(response);
        }
        if let Some(refreshed_at) = tx.refreshed_at {
            row.refreshed_at = Some(refreshed_at);
        }
        match tx.lease {
            Some(LeaseWrite::Claim(until)) => row.leased_until = Some(until),
            Some(LeaseWrite::Clear) => row.leased_until = None,
            None => {}
        }
        Ok(())
    }

    fn lease_until(&self, now: OffsetDateTime) -> OffsetDateTime {
        now + self.inner.lease
    }
}

impl<A, R> TransactionProvider for MemoryScope<A, R>
where
    A: Send + Sync,
    R: Send + Sync,
{
    type Transaction = MemoryTransaction<A, R>;
    type Error = StoreError;

    async fn start_transaction(&self) -> Result<Self::Transaction, Self::Error> {
        self.inner.check(MemoryOp::Begin)?;
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTransaction {
            created: None,
            step: None,
            args: None,
            response: None,
            refreshed_at: None,
            lease: None,
        })
    }

    async fn close_transaction(
        &self,
        tx: Self::Transaction,
        outcome: TxOutcome,
    ) -> Result<(), Self::Error> {
        self.inner.closed.fetch_add(1, Ordering::SeqCst);
        match outcome {
            TxOutcome::Commit => {
                self.inner.check(MemoryOp::Commit)?;
                self.apply(tx)
            }
            TxOutcome::Rollback => Ok(()),
        }
    }
}

impl<A, R> IdempotencyStore for MemoryScope<A, R>
where
    A: Clone + PartialEq + Send + Sync,
    R: Clone + Send + Sync,
{
    type Args = A;
    type Response = R;

    async fn get_idempotency_key(
        &self,
        _tx: &mut Self::Transaction,
    ) -> Result<Option<IdempotencyRecord<A, R>>, Self::Error> {
        self.inner.check(MemoryOp::Lookup)?;
        Ok(self
            .inner
            .rows
            .read()
            .get(&self.lookup)
            .map(|row| row.record.clone()))
    }

    fn args_equal(&self, stored: &A, incoming: &A) -> bool {
        stored == incoming
    }

    async fn refresh_idempotency_key(
        &self,
        tx: &mut Self::Transaction,
        _key: &IdempotencyKey,
    ) -> Result<(), Self::Error> {
        self.inner.check(MemoryOp::Refresh)?;
        let now = OffsetDateTime::now_utc();
        let held = self
            .inner
            .rows
            .read()
            .get(&self.lookup)
            .is_some_and(|row| row.is_leased(now));
        if held {
            return Err(StoreError::Leased(self.lookup.clone()));
        }
        tx.refreshed_at = Some(now);
        tx.lease = Some(LeaseWrite::Claim(self.lease_until(now)));
        Ok(())
    }

    async fn create_idempotency_key(
        &self,
        tx: &mut Self::Transaction,
        first_step: &str,
    ) -> Result<IdempotencyKey, Self::Error> {
        self.inner.check(MemoryOp::Create)?;
        let key = IdempotencyKey::new(Uuid::now_v7().to_string());
        tx.created = Some(IdempotencyRecord {
            key: key.clone(),
            step: first_step.to_owned(),
            args: None,
            response: None,
        });
        tx.lease = Some(LeaseWrite::Claim(self.lease_until(OffsetDateTime::now_utc())));
        Ok(key)
    }

    async fn save_rec_point(
        &self,
        tx: &mut Self::Transaction,
        step: &str,
    ) -> Result<(), Self::Error> {
        self.inner.check(MemoryOp::SaveRecPoint)?;
        tx.step = Some(step.to_owned());
        Ok(())
    }

    async fn save_args(&self, tx: &mut Self::Transaction, args: &A) -> Result<(), Self::Error> {
        self.inner.check(MemoryOp::SaveArgs)?;
        tx.args = Some(args.clone());
        Ok(())
    }

    async fn save_resp(
        &self,
        tx: &mut Self::Transaction,
        final_step: &str,
        response: &R,
    ) -> Result<(), Self::Error> {
        self.inner.check(MemoryOp::SaveResp)?;
        tx.step = Some(final_step.to_owned());
        tx.response = Some(response.clone());
        tx.lease = Some(LeaseWrite::Clear);
        Ok(())
    }

    async fn release_idempotency_key(
        &self,
        tx: &mut Self::Transaction,
        _key: &IdempotencyKey,
    ) -> Result<(), Self::Error> {
        self.inner.check(MemoryOp::Release)?;
        tx.lease = Some(LeaseWrite::Clear);
        Ok(())
    }
}
