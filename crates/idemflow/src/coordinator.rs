//! The sequential executor.

use std::collections::HashSet;

use nonempty::NonEmpty;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::effect::{Effect, EffectContext, EffectResult};
use crate::error::{BuildError, Error, InvariantViolation};
use crate::lifecycle;
use crate::recovery::{self, Resumption};
use crate::store::{IdempotencyKey, IdempotencyStore};

/// What the sequential loop does after an effect.
enum Flow<R, X> {
    Continue,
    Terminate(R),
    Fail(X),
}

impl<R, X> From<Result<EffectResult<R>, X>> for Flow<R, X> {
    fn from(result: Result<EffectResult<R>, X>) -> Self {
        match result {
            Ok(EffectResult::NoOp) | Ok(EffectResult::RecoveryPoint) => Flow::Continue,
            Ok(EffectResult::Response(response)) => Flow::Terminate(response),
            Err(err) => Flow::Fail(err),
        }
    }
}

/// Runs an ordered list of effects exactly once per idempotency key.
///
/// Built once and reused for every invocation of the operation. Each
/// [`run`](Self::run) looks up the record for the store scope it is given,
/// returns the stored response if the operation already finished, and
/// otherwise runs the effects after the last recorded recovery point until
/// one of them returns a response.
///
/// # Example
///
/// ```ignore
/// let coordinator = Coordinator::builder(Effect::local("reserve", ReserveStock))
///     .effect(Effect::external("charge", ChargeCard { payments }))
///     .effect(Effect::local("ship", CreateShipment))
///     .build()?;
///
/// let scope = store.scope(request_id);
/// let receipt = coordinator.run(&scope, order).await?;
/// ```
pub struct Coordinator<S, E>
where
    S: IdempotencyStore,
{
    effects: NonEmpty<Effect<S, E>>,
    config: CoordinatorConfig,
}

impl<S, E> Coordinator<S, E>
where
    S: IdempotencyStore,
{
    /// Start building a coordinator whose sequence begins with `first`.
    pub fn builder(first: Effect<S, E>) -> CoordinatorBuilder<S, E> {
        CoordinatorBuilder {
            effects: NonEmpty::new(first),
            config: CoordinatorConfig::default(),
        }
    }

    /// Create a coordinator from a complete effect list.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] if two effects share a name, an effect is named
    /// after a step sentinel, or the sentinels are equal.
    pub fn new(
        effects: NonEmpty<Effect<S, E>>,
        config: CoordinatorConfig,
    ) -> Result<Self, BuildError> {
        config.validate()?;

        let mut seen = HashSet::new();
        for effect in effects.iter() {
            let name = effect.name();
            if config.is_sentinel(name) {
                return Err(BuildError::ReservedEffectName(name.to_owned()));
            }
            if !seen.insert(name) {
                return Err(BuildError::DuplicateEffectName(name.to_owned()));
            }
        }

        Ok(Self { effects, config })
    }

    /// The configuration this coordinator was built with.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Effect names in execution order.
    pub fn effect_names(&self) -> impl Iterator<Item = &str> {
        self.effects.iter().map(Effect::name)
    }

    /// Run the operation for the record `store` is scoped to.
    ///
    /// Returns the terminal response, either freshly produced by an effect or
    /// replayed from the store for an operation that already finished.
    ///
    /// # Errors
    ///
    /// - [`Error::Store`] if the store or a transaction fails
    /// - [`Error::Effect`] if a task fails; later effects are not run
    /// - [`Error::ArgsMismatch`] if `args` differ from the ones stored for an
    ///   in-flight key
    /// - [`Error::Invariant`] if the effect list does not fit the stored
    ///   progress, or runs out without a response
    ///
    /// `Store` and `Effect` failures can be retried by calling `run` again
    /// with the same args; the operation resumes after the last recovery point.
    /// While another invocation of the same key is in flight, `run` fails with
    /// a retryable [`Error::Store`] instead of running any effect.
    pub async fn run(&self, store: &S, args: S::Args) -> Result<S::Response, Error<S::Error, E>> {
        let (key, remaining) = match recovery::init::<S, E>(store, &self.config, &args).await? {
            Resumption::Completed { response, .. } => return Ok(response),
            Resumption::Start { key } => {
                let remaining = self.effects.iter().collect::<Vec<_>>();
                (key, remaining)
            }
            Resumption::Resume { key, step } => {
                let remaining = self.remaining_after(&step);
                if remaining.is_empty() {
                    warn!(key = %key, step = %step, "Stored step leaves no effect to run");
                    recovery::release(store, &key).await;
                    return Err(InvariantViolation::NoEffectExecuted { step }.into());
                }
                (key, remaining)
            }
        };

        let result = self.execute(store, &key, &args, remaining).await;
        if result.is_err() {
            recovery::release(store, &key).await;
        }
        result
    }

    /// Effects after the one named `step`, or none if no effect has that name.
    fn remaining_after(&self, step: &str) -> Vec<&Effect<S, E>> {
        match self.effects.iter().position(|effect| effect.name() == step) {
            Some(index) => self.effects.iter().skip(index + 1).collect(),
            None => Vec::new(),
        }
    }

    async fn execute(
        &self,
        store: &S,
        key: &IdempotencyKey,
        args: &S::Args,
        remaining: Vec<&Effect<S, E>>,
    ) -> Result<S::Response, Error<S::Error, E>> {
        let ctx = EffectContext::new(key, args);

        for effect in remaining {
            debug!(key = %key, effect = effect.name(), local = effect.is_local(), "Running effect");

            let result = lifecycle::wire(store, &self.config, ctx, effect).await;
            if let Ok(outcome) = &result {
                debug!(key = %key, effect = effect.name(), result = outcome.kind(), "Effect recorded");
            }

            match Flow::from(result) {
                Flow::Continue => {}
                Flow::Terminate(response) => {
                    info!(key = %key, effect = effect.name(), "Operation completed");
                    return Ok(response);
                }
                Flow::Fail(err) => {
                    warn!(key = %key, effect = effect.name(), "Effect failed, stopping operation");
                    return Err(err);
                }
            }
        }

        let last = self.effects.last().name().to_owned();
        warn!(key = %key, last = %last, "Effect list exhausted without a response");
        Err(InvariantViolation::MissingResponse { last }.into())
    }
}

impl<S, E> std::fmt::Debug for Coordinator<S, E>
where
    S: IdempotencyStore,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("effects", &self.effects)
            .field("config", &self.config)
            .finish()
    }
}

/// Builder for a [`Coordinator`].
pub struct CoordinatorBuilder<S, E>
where
    S: IdempotencyStore,
{
    effects: NonEmpty<Effect<S, E>>,
    config: CoordinatorConfig,
}

impl<S, E> CoordinatorBuilder<S, E>
where
    S: IdempotencyStore,
{
    /// Append an effect to the sequence.
    pub fn effect(mut self, effect: Effect<S, E>) -> Self {
        self.effects.push(effect);
        self
    }

    /// Replace the default configuration.
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the sequence and build the coordinator.
    pub fn build(self) -> Result<Coordinator<S, E>, BuildError> {
        Coordinator::new(self.effects, self.config)
    }
}
