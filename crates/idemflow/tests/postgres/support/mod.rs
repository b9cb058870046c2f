use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use idemflow::{EffectContext, EffectResult, ExternalTask, LocalTask, PgScope, PgStore};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("idemflow=debug")
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub amount: i32,
}

impl Order {
    pub fn new(id: &str, amount: i32) -> Self {
        Self {
            id: id.to_owned(),
            amount,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("payment declined for order {0}")]
    Declined(String),
}

pub type Store = PgStore<Order, String>;
pub type Scope = PgScope<Order, String>;

/// Table the local effects write to, so rollbacks can be observed.
pub async fn create_reservations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("CREATE TABLE reservations (order_id TEXT NOT NULL, amount INT NOT NULL)")
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_reservations(pool: &PgPool) -> anyhow::Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM reservations")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn fetch_step(pool: &PgPool, lookup: &str) -> anyhow::Result<String> {
    let step = sqlx::query_scalar("SELECT step FROM idemflow.idempotency_keys WHERE lookup = $1")
        .bind(lookup)
        .fetch_one(pool)
        .await?;
    Ok(step)
}

pub async fn fetch_locked_until(
    pool: &PgPool,
    lookup: &str,
) -> anyhow::Result<Option<time::OffsetDateTime>> {
    let locked_until =
        sqlx::query_scalar("SELECT locked_until FROM idemflow.idempotency_keys WHERE lookup = $1")
            .bind(lookup)
            .fetch_one(pool)
            .await?;
    Ok(locked_until)
}

/// Inserts a reservation row inside the effect's transaction.
pub struct Reserve {
    /// Fail after writing, this many times.
    pub failures: AtomicUsize,
}

impl Reserve {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(times: usize) -> Self {
        Self {
            failures: AtomicUsize::new(times),
        }
    }
}

#[async_trait]
impl LocalTask<Scope, TestError> for Reserve {
    async fn run(
        &self,
        ctx: EffectContext<'_, Order>,
        tx: &mut Transaction<'static, Postgres>,
    ) -> Result<EffectResult<String>, TestError> {
        sqlx::query("INSERT INTO reservations (order_id, amount) VALUES ($1, $2)")
            .bind(&ctx.args.id)
            .bind(ctx.args.amount)
            .execute(&mut **tx)
            .await?;

        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(TestError::Declined(ctx.args.id.clone()));
        }
        Ok(EffectResult::RecoveryPoint)
    }
}

/// Pretends to call a payment provider and answers with a receipt.
pub struct Charge {
    pub calls: Arc<AtomicUsize>,
    pub declines: AtomicUsize,
    /// How long the provider takes to answer.
    pub latency: Duration,
}

impl Charge {
    pub fn new(calls: &Arc<AtomicUsize>) -> Self {
        Self::declining(calls, 0)
    }

    pub fn declining(calls: &Arc<AtomicUsize>, times: usize) -> Self {
        Self {
            calls: Arc::clone(calls),
            declines: AtomicUsize::new(times),
            latency: Duration::ZERO,
        }
    }

    pub fn slow(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl ExternalTask<Order, String, TestError> for Charge {
    async fn run(&self, ctx: EffectContext<'_, Order>) -> Result<EffectResult<String>, TestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let decline = self
            .declines
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if decline {
            return Err(TestError::Declined(ctx.args.id.clone()));
        }
        Ok(EffectResult::Response(format!(
            "receipt:{}:{}",
            ctx.args.id, ctx.key
        )))
    }
}
