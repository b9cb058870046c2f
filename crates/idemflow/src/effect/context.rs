//! Effect execution context with idempotency metadata.

use crate::store::IdempotencyKey;

/// Context provided to effect tasks during execution.
///
/// # Idempotency
///
/// Effects have **at-least-once** semantics per step: a crash between a task
/// succeeding and its recovery point being recorded runs the task again on
/// the next invocation. Pass [`key`](Self::key) to external APIs that accept
/// idempotency keys so those repeats are deduplicated downstream.
///
/// # Example
///
/// ```ignore
/// async fn run(&self, ctx: EffectContext<'_, ChargeArgs>) -> Result<EffectResult<Receipt>, PaymentError> {
///     self.payments
///         .charge(ctx.args.amount, ctx.key.as_str())
///         .await?;
///     Ok(EffectResult::RecoveryPoint)
/// }
/// ```
#[derive(Debug)]
pub struct EffectContext<'a, A> {
    /// The idempotency key of the operation being run.
    pub key: &'a IdempotencyKey,
    /// The business arguments of the operation.
    pub args: &'a A,
}

impl<'a, A> EffectContext<'a, A> {
    /// Create a new effect context.
    pub fn new(key: &'a IdempotencyKey, args: &'a A) -> Self {
        Self { key, args }
    }
}

impl<A> Clone for EffectContext<'_, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for EffectContext<'_, A> {}
