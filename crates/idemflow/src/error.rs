//! Error types for idemflow.

use thiserror::Error;

use crate::store::IdempotencyKey;

/// Errors returned by [`Coordinator::run`](crate::Coordinator::run).
///
/// Generic over the store adapter's error type `S` and the effects' error type
/// `E`, so callers can match on the exact failure an adapter or a task raised.
///
/// | Variant | Retryable | Meaning |
/// |---------|-----------|---------|
/// | `Store` | yes | The store or transaction provider failed |
/// | `Effect` | yes | An effect's task failed; nothing was recorded for it |
/// | `ArgsMismatch` | no | The key was reused for a different request |
/// | `Invariant` | no | The effect list does not match the persisted progress |
#[derive(Debug, Error)]
pub enum Error<S, E> {
    /// A store adapter or transaction provider operation failed.
    #[error("store error: {0}")]
    Store(#[source] S),

    /// An effect's task failed.
    #[error("effect `{name}` failed: {source}")]
    Effect {
        /// Name of the failing effect.
        name: String,
        /// The error returned by the task.
        source: E,
    },

    /// The incoming arguments differ from the ones stored for an in-flight key.
    #[error("args do not match for idempotency key {key}")]
    ArgsMismatch {
        /// The idempotency key that was reused.
        key: IdempotencyKey,
    },

    /// The effect list and the persisted progress disagree.
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl<S, E> Error<S, E> {
    /// Returns `true` if re-invoking the operation with the same arguments may succeed.
    ///
    /// Argument mismatches and invariant violations are caller errors and will
    /// fail the same way on every retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store(_) | Error::Effect { .. } => true,
            Error::ArgsMismatch { .. } | Error::Invariant(_) => false,
        }
    }

    pub(crate) fn effect(name: &str, source: E) -> Self {
        Error::Effect {
            name: name.to_owned(),
            source,
        }
    }
}

/// Persisted progress that the supplied effect list cannot honour.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// The persisted step leaves no effect to run.
    ///
    /// Either no effect in the list is named `step`, or it is the last one.
    #[error("panic: no effect executed although supposed to (resume step `{step}`)")]
    NoEffectExecuted {
        /// The step recorded in the store.
        step: String,
    },

    /// Every remaining effect ran but none returned a response.
    #[error("effect list exhausted without a response (last effect `{last}`)")]
    MissingResponse {
        /// Name of the final effect in the list.
        last: String,
    },

    /// The record is at the final step but carries no response.
    #[error("record {key} is finished but has no stored response")]
    MissingStoredResponse {
        /// The finished idempotency key.
        key: IdempotencyKey,
    },
}

/// Invalid effect list or configuration, rejected when building a coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Two effects share a name, so resumption could not tell them apart.
    #[error("duplicate effect name: {0}")]
    DuplicateEffectName(String),

    /// An effect is named after one of the step sentinels.
    #[error("effect name `{0}` is reserved as a step sentinel")]
    ReservedEffectName(String),

    /// The first and final step sentinels are equal.
    #[error("first and final step sentinels must differ (both `{0}`)")]
    IndistinctSentinels(String),
}

/// Errors raised by the bundled store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to serialize or deserialize stored args or responses.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// PostgreSQL storage error.
    ///
    /// Preserves the full `sqlx::Error` for matching on specific database
    /// error conditions (connection timeout, constraint violation, etc.).
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// No record exists for the scope's lookup.
    #[error("no idempotency record for lookup `{0}`")]
    NotFound(String),

    /// Another invocation holds the lease on the record.
    ///
    /// Retry once the holder finishes or its lease expires.
    #[error("idempotency record for lookup `{0}` is held by another invocation")]
    Leased(String),

    /// The record already carries its final response and cannot be changed.
    #[error("idempotency record for lookup `{0}` is already finished")]
    Finished(String),

    /// A storage backend error occurred.
    #[error("storage error: {0}")]
    Backend(String),
}
