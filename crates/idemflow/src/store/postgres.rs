//! PostgreSQL store implementation.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    DEFAULT_LEASE_DURATION, IdempotencyKey, IdempotencyRecord, IdempotencyStore,
    TransactionProvider, TxOutcome,
};
use crate::error::StoreError;

/// PostgreSQL-backed store for production use.
///
/// Every transaction locks the record with `SELECT ... FOR UPDATE`, but that
/// lock only lives as long as one transaction. Exclusion across a whole
/// invocation comes from a lease: creating or resuming a record sets
/// `locked_until = now() + lease`, and a resume is refused with
/// [`StoreError::Leased`] while another invocation's lease is unexpired. The
/// lease is cleared when the response is saved or the invocation fails, and
/// otherwise expires on its own (see [`PgStore::with_lease_duration`]).
///
/// Once a record holds its response, every further write to it fails with
/// [`StoreError::Finished`].
///
/// Args and responses are stored as JSONB.
///
/// # Database Schema
///
/// Requires the `idemflow` schema from `crates/idemflow/migrations`
/// (apply with [`PgStore::migrate`]):
///
/// | Column         | Purpose                                               |
/// |----------------|-------------------------------------------------------|
/// | `key`          | Idempotency key minted on first sight of a lookup     |
/// | `lookup`       | Caller-derived token the record is found by (unique)  |
/// | `step`         | Last completed recovery point, or a sentinel          |
/// | `args`         | Arguments of the creating request                     |
/// | `response`     | Final response, set together with the final step      |
/// | `locked_at`    | When an invocation last created or resumed the record |
/// | `locked_until` | End of the current lease, `NULL` when not held        |
///
/// # Example
///
/// ```ignore
/// use idemflow::PgStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://...").await?;
/// let store: PgStore<Order, Receipt> = PgStore::new(pool);
/// store.migrate().await?;
///
/// let receipt = coordinator.run(&store.scope(request_id), order).await?;
/// ```
pub struct PgStore<A, R> {
    pool: PgPool,
    lease: Duration,
    _marker: PhantomData<fn() -> (A, R)>,
}

impl<A, R> Clone for PgStore<A, R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            lease: self.lease,
            _marker: PhantomData,
        }
    }
}

impl<A, R> fmt::Debug for PgStore<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgStore")
            .field("pool", &self.pool)
            .field("lease", &self.lease)
            .finish()
    }
}

#[derive(sqlx::FromRow)]
struct KeyRow {
    key: String,
    step: String,
    args: Option<Value>,
    response: Option<Value>,
}

impl<A, R> PgStore<A, R> {
    /// Create a new PostgreSQL store from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease: DEFAULT_LEASE_DURATION,
            _marker: PhantomData,
        }
    }

    /// Set how long an invocation holds a record before a concurrent retry
    /// may take it over. Should exceed the longest expected run.
    ///
    /// Defaults to [`DEFAULT_LEASE_DURATION`].
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Apply the bundled migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(())
    }

    /// An adapter bound to the record behind `lookup`.
    pub fn scope(&self, lookup: impl Into<String>) -> PgScope<A, R> {
        PgScope {
            pool: self.pool.clone(),
            lookup: lookup.into(),
            lease: self.lease,
            _marker: PhantomData,
        }
    }
}

/// [`PgStore`] adapter for a single lookup.
pub struct PgScope<A, R> {
    pool: PgPool,
    lookup: String,
    lease: Duration,
    _marker: PhantomData<fn() -> (A, R)>,
}

impl<A, R> fmt::Debug for PgScope<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgScope")
            .field("lookup", &self.lookup)
            .finish_non_exhaustive()
    }
}

impl<A, R> PgScope<A, R> {
    fn lease_secs(&self) -> f64 {
        self.lease.as_secs_f64()
    }

    /// Turn an update that matched no row into the reason it did not.
    async fn expect_row(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        rows_affected: u64,
    ) -> Result<(), StoreError> {
        if rows_affected > 0 {
            return Ok(());
        }

        let finished: Option<bool> = sqlx::query_scalar(
            r#"SELECT response IS NOT NULL
               FROM idemflow.idempotency_keys
               WHERE lookup = $1"#,
        )
        .bind(&self.lookup)
        .fetch_optional(&mut **tx)
        .await?;

        Err(match finished {
            None => StoreError::NotFound(self.lookup.clone()),
            Some(true) => StoreError::Finished(self.lookup.clone()),
            Some(false) => StoreError::Leased(self.lookup.clone()),
        })
    }
}

impl<A, R> TransactionProvider for PgScope<A, R>
where
    A: Send + Sync,
    R: Send + Sync,
{
    type Transaction = Transaction<'static, Postgres>;
    type Error = StoreError;

    async fn start_transaction(&self) -> Result<Self::Transaction, Self::Error> {
        Ok(self.pool.begin().await?)
    }

    async fn close_transaction(
        &self,
        tx: Self::Transaction,
        outcome: TxOutcome,
    ) -> Result<(), Self::Error> {
        match outcome {
            TxOutcome::Commit => tx.commit().await?,
            TxOutcome::Rollback => tx.rollback().await?,
        }
        Ok(())
    }
}

impl<A, R> IdempotencyStore for PgScope<A, R>
where
    A: Serialize + DeserializeOwned + PartialEq + Send + Sync,
    R: Serialize + DeserializeOwned + Send + Sync,
{
    type Args = A;
    type Response = R;

    async fn get_idempotency_key(
        &self,
        tx: &mut Self::Transaction,
    ) -> Result<Option<IdempotencyRecord<A, R>>, Self::Error> {
        let row = sqlx::query_as::<_, KeyRow>(
            r#"SELECT key, step, args, response
               FROM idemflow.idempotency_keys
               WHERE lookup = $1
               FOR UPDATE"#,
        )
        .bind(&self.lookup)
        .fetch_optional(&mut **tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(IdempotencyRecord {
            key: IdempotencyKey::from(row.key),
            step: row.step,
            args: row.args.map(serde_json::from_value).transpose()?,
            response: row.response.map(serde_json::from_value).transpose()?,
        }))
    }

    fn args_equal(&self, stored: &A, incoming: &A) -> bool {
        stored == incoming
    }

    async fn refresh_idempotency_key(
        &self,
        tx: &mut Self::Transaction,
        key: &IdempotencyKey,
    ) -> Result<(), Self::Error> {
        // Lease timestamps are computed in the database to avoid clock skew.
        let result = sqlx::query(
            r#"UPDATE idemflow.idempotency_keys
               SET locked_at = now(),
                   locked_until = now() + ($2 * interval '1 second'),
                   updated_at = now()
               WHERE key = $1
                 AND response IS NULL
                 AND (locked_until IS NULL OR locked_until < now())"#,
        )
        .bind(key.as_str())
        .bind(self.lease_secs())
        .execute(&mut **tx)
        .await?;

        self.expect_row(tx, result.rows_affected()).await
    }

    async fn create_idempotency_key(
        &self,
        tx: &mut Self::Transaction,
        first_step: &str,
    ) -> Result<IdempotencyKey, Self::Error> {
        let key = IdempotencyKey::new(Uuid::now_v7().to_string());

        let result = sqlx::query(
            r#"INSERT INTO idemflow.idempotency_keys (key, lookup, step, locked_at, locked_until)
               VALUES ($1, $2, $3, now(), now() + ($4 * interval '1 second'))"#,
        )
        .bind(key.as_str())
        .bind(&self.lookup)
        .bind(first_step)
        .bind(self.lease_secs())
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => Ok(key),
            // A concurrent invocation created the record first and holds it.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Leased(self.lookup.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save_rec_point(
        &self,
        tx: &mut Self::Transaction,
        step: &str,
    ) -> Result<(), Self::Error> {
        let result = sqlx::query(
            r#"UPDATE idemflow.idempotency_keys
               SET step = $2, updated_at = now()
               WHERE lookup = $1 AND response IS NULL"#,
        )
        .bind(&self.lookup)
        .bind(step)
        .execute(&mut **tx)
        .await?;

        self.expect_row(tx, result.rows_affected()).await
    }

    async fn save_args(&self, tx: &mut Self::Transaction, args: &A) -> Result<(), Self::Error> {
        let args = serde_json::to_value(args)?;

        let result = sqlx::query(
            r#"UPDATE idemflow.idempotency_keys
               SET args = $2, updated_at = now()
               WHERE lookup = $1 AND response IS NULL"#,
        )
        .bind(&self.lookup)
        .bind(args)
        .execute(&mut **tx)
        .await?;

        self.expect_row(tx, result.rows_affected()).await
    }

    async fn save_resp(
        &self,
        tx: &mut Self::Transaction,
        final_step: &str,
        response: &R,
    ) -> Result<(), Self::Error> {
        let response = serde_json::to_value(response)?;

        // Step and response move together; a finished record is never rewritten.
        let result = sqlx::query(
            r#"UPDATE idemflow.idempotency_keys
               SET step = $2, response = $3, locked_until = NULL, updated_at = now()
               WHERE lookup = $1 AND response IS NULL"#,
        )
        .bind(&self.lookup)
        .bind(final_step)
        .bind(response)
        .execute(&mut **tx)
        .await?;

        self.expect_row(tx, result.rows_affected()).await
    }

    async fn release_idempotency_key(
        &self,
        tx: &mut Self::Transaction,
        key: &IdempotencyKey,
    ) -> Result<(), Self::Error> {
        // Nothing to release on a finished or vanished record.
        sqlx::query(
            r#"UPDATE idemflow.idempotency_keys
               SET locked_until = NULL, updated_at = now()
               WHERE key = $1 AND response IS NULL"#,
        )
        .bind(key.as_str())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}
