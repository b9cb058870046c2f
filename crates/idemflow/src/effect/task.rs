//! Effect task traits and the effect descriptor.

use std::fmt;

use async_trait::async_trait;

use super::context::EffectContext;
use super::result::EffectResult;
use crate::store::IdempotencyStore;

/// Body of a local effect.
///
/// A local effect's side effect lives in the same datastore as the idempotency
/// record, so the task runs inside the transaction that will record its
/// result. If recording fails, the task's own writes roll back with it.
///
/// # Example
///
/// ```ignore
/// struct ReserveStock;
///
/// #[async_trait]
/// impl LocalTask<PgScope<Order, Receipt>, AppError> for ReserveStock {
///     async fn run(
///         &self,
///         ctx: EffectContext<'_, Order>,
///         tx: &mut Transaction<'static, Postgres>,
///     ) -> Result<EffectResult<Receipt>, AppError> {
///         sqlx::query("UPDATE stock SET reserved = reserved + $1 WHERE sku = $2")
///             .bind(ctx.args.quantity)
///             .bind(&ctx.args.sku)
///             .execute(&mut **tx)
///             .await?;
///         Ok(EffectResult::RecoveryPoint)
///     }
/// }
/// ```
#[async_trait]
pub trait LocalTask<S, E>: Send + Sync
where
    S: IdempotencyStore,
{
    /// Run the effect inside `tx`.
    async fn run(
        &self,
        ctx: EffectContext<'_, S::Args>,
        tx: &mut S::Transaction,
    ) -> Result<EffectResult<S::Response>, E>;
}

/// Body of an external effect.
///
/// An external effect talks to a system the local transaction cannot roll back
/// (a payment provider, an email gateway). The task runs with no transaction
/// open; only once it succeeds is a transaction opened to record the result.
#[async_trait]
pub trait ExternalTask<A, R, E>: Send + Sync {
    /// Run the effect.
    async fn run(&self, ctx: EffectContext<'_, A>) -> Result<EffectResult<R>, E>;
}

/// A named unit of work in a coordinator's sequence.
///
/// The name doubles as the recovery point recorded when the task returns
/// [`EffectResult::RecoveryPoint`], so it must be unique within a sequence and
/// stable across deployments.
pub enum Effect<S, E>
where
    S: IdempotencyStore,
{
    /// Runs inside the transaction that records its result.
    Local {
        /// Effect name, recorded as the step.
        name: String,
        /// The task to run.
        task: Box<dyn LocalTask<S, E>>,
    },
    /// Runs first; a transaction is opened only to record its result.
    External {
        /// Effect name, recorded as the step.
        name: String,
        /// The task to run.
        task: Box<dyn ExternalTask<S::Args, S::Response, E>>,
    },
}

impl<S, E> Effect<S, E>
where
    S: IdempotencyStore,
{
    /// Create a local (transactional) effect.
    pub fn local(name: impl Into<String>, task: impl LocalTask<S, E> + 'static) -> Self {
        Effect::Local {
            name: name.into(),
            task: Box::new(task),
        }
    }

    /// Create an external (non-transactional) effect.
    pub fn external(
        name: impl Into<String>,
        task: impl ExternalTask<S::Args, S::Response, E> + 'static,
    ) -> Self {
        Effect::External {
            name: name.into(),
            task: Box::new(task),
        }
    }

    /// The effect's name.
    pub fn name(&self) -> &str {
        match self {
            Effect::Local { name, .. } | Effect::External { name, .. } => name,
        }
    }

    /// Returns `true` for effects that run inside their recording transaction.
    pub fn is_local(&self) -> bool {
        match self {
            Effect::Local { .. } => true,
            Effect::External { .. } => false,
        }
    }
}

impl<S, E> fmt::Debug for Effect<S, E>
where
    S: IdempotencyStore,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("name", &self.name())
            .field("local", &self.is_local())
            .finish_non_exhaustive()
    }
}
