//! Recovery-point initialization.
//!
//! Decides, at the start of every invocation, whether the operation is new,
//! in flight, or already finished.

use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{Error, InvariantViolation};
use crate::store::{IdempotencyKey, IdempotencyRecord, IdempotencyStore};
use crate::transaction::TxGuard;

/// Where an invocation picks up.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Resumption<R> {
    /// No effect has completed yet; run the whole list.
    Start { key: IdempotencyKey },
    /// Resume after the effect named `step`.
    Resume { key: IdempotencyKey, step: String },
    /// The operation already finished; nothing runs.
    Completed { key: IdempotencyKey, response: R },
}

/// Look up, create or refresh the idempotency record for this invocation.
///
/// This function:
/// 1. Opens a transaction and looks up the record
/// 2. Creates a record at the first step (and stores `args`) if none exists
/// 3. Returns the stored response if the record is finished
/// 4. Otherwise rejects mismatching arguments, refreshes the record and
///    returns the step to resume after
///
/// The transaction is committed on success and rolled back on every failure.
pub(crate) async fn init<S, E>(
    store: &S,
    config: &CoordinatorConfig,
    args: &S::Args,
) -> Result<Resumption<S::Response>, Error<S::Error, E>>
where
    S: IdempotencyStore,
{
    let mut guard = TxGuard::begin(store).await.map_err(Error::Store)?;
    let result = resolve(store, config, args, guard.tx()).await;
    guard.settle(result, Error::Store).await
}

async fn resolve<S, E>(
    store: &S,
    config: &CoordinatorConfig,
    args: &S::Args,
    tx: &mut S::Transaction,
) -> Result<Resumption<S::Response>, Error<S::Error, E>>
where
    S: IdempotencyStore,
{
    let Some(record) = store.get_idempotency_key(tx).await.map_err(Error::Store)? else {
        let key = store
            .create_idempotency_key(tx, &config.first_step)
            .await
            .map_err(Error::Store)?;
        store.save_args(tx, args).await.map_err(Error::Store)?;
        debug!(key = %key, "Created idempotency key");
        return Ok(Resumption::Start { key });
    };

    if record.is_finished(&config.final_step) {
        let IdempotencyRecord { key, response, .. } = record;
        return match response {
            Some(response) => {
                info!(key = %key, "Operation already completed, returning stored response");
                Ok(Resumption::Completed { key, response })
            }
            None => Err(InvariantViolation::MissingStoredResponse { key }.into()),
        };
    }

    match &record.args {
        Some(stored) if !store.args_equal(stored, args) => {
            warn!(key = %record.key, step = %record.step, "Idempotency key reused with different args");
            return Err(Error::ArgsMismatch { key: record.key });
        }
        Some(_) => {}
        None => {
            warn!(key = %record.key, "No stored args to compare against, resuming unchecked");
        }
    }

    store
        .refresh_idempotency_key(tx, &record.key)
        .await
        .map_err(Error::Store)?;

    let IdempotencyRecord { key, step, .. } = record;
    if step == config.first_step {
        debug!(key = %key, "Restarting operation with no completed effect");
        Ok(Resumption::Start { key })
    } else {
        debug!(key = %key, step = %step, "Resuming operation after recovery point");
        Ok(Resumption::Resume { key, step })
    }
}

/// Give back the lease taken by [`init`] after the invocation failed.
///
/// Failures are logged and swallowed; the lease then simply expires.
pub(crate) async fn release<S>(store: &S, key: &IdempotencyKey)
where
    S: IdempotencyStore,
{
    match try_release(store, key).await {
        Ok(()) => debug!(key = %key, "Released idempotency key"),
        Err(e) => warn!(key = %key, error = %e, "Failed to release idempotency key"),
    }
}

async fn try_release<S>(store: &S, key: &IdempotencyKey) -> Result<(), S::Error>
where
    S: IdempotencyStore,
{
    let mut guard = TxGuard::begin(store).await?;
    let result = store.release_idempotency_key(guard.tx(), key).await;
    guard.settle(result, |e| e).await
}
