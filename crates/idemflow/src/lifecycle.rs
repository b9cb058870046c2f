//! Per-effect transaction lifecycle.
//!
//! Local and external effects differ only in *when* the transaction is
//! opened: before the task for local effects, after it for external ones.

use tracing::debug;

use crate::config::CoordinatorConfig;
use crate::effect::{Effect, EffectContext, EffectResult, LocalTask};
use crate::error::Error;
use crate::store::IdempotencyStore;
use crate::transaction::TxGuard;

/// Run one effect and record its result.
///
/// - **Local**: open a transaction, run the task with it, record the result in
///   the same transaction, close it.
/// - **External**: run the task with no transaction; only if it succeeds, open a
///   transaction, record the result, close it.
///
/// A failing task records nothing. The transaction, whenever one was opened,
/// is closed exactly once before this function returns.
pub(crate) async fn wire<S, E>(
    store: &S,
    config: &CoordinatorConfig,
    ctx: EffectContext<'_, S::Args>,
    effect: &Effect<S, E>,
) -> Result<EffectResult<S::Response>, Error<S::Error, E>>
where
    S: IdempotencyStore,
{
    match effect {
        Effect::Local { name, task } => {
            let mut guard = TxGuard::begin(store).await.map_err(Error::Store)?;
            let result = run_local(store, config, ctx, name, task.as_ref(), guard.tx()).await;
            guard.settle(result, Error::Store).await
        }
        Effect::External { name, task } => {
            let result = task
                .run(ctx)
                .await
                .map_err(|source| Error::effect(name, source))?;
            debug!(key = %ctx.key, effect = %name, "External effect done, recording result");

            let mut guard = TxGuard::begin(store).await.map_err(Error::Store)?;
            let recorded = record(store, config, guard.tx(), name, &result)
                .await
                .map(|()| result)
                .map_err(Error::Store);
            guard.settle(recorded, Error::Store).await
        }
    }
}

async fn run_local<S, E>(
    store: &S,
    config: &CoordinatorConfig,
    ctx: EffectContext<'_, S::Args>,
    name: &str,
    task: &dyn LocalTask<S, E>,
    tx: &mut S::Transaction,
) -> Result<EffectResult<S::Response>, Error<S::Error, E>>
where
    S: IdempotencyStore,
{
    let result = task
        .run(ctx, tx)
        .await
        .map_err(|source| Error::effect(name, source))?;
    record(store, config, tx, name, &result)
        .await
        .map_err(Error::Store)?;
    Ok(result)
}

/// Persist what an effect produced.
async fn record<S>(
    store: &S,
    config: &CoordinatorConfig,
    tx: &mut S::Transaction,
    name: &str,
    result: &EffectResult<S::Response>,
) -> Result<(), S::Error>
where
    S: IdempotencyStore,
{
    match result {
        EffectResult::RecoveryPoint => store.save_rec_point(tx, name).await,
        EffectResult::Response(response) => {
            store.save_resp(tx, &config.final_step, response).await
        }
        EffectResult::NoOp => Ok(()),
    }
}
