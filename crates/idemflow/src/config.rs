//! Coordinator configuration.

use crate::error::BuildError;

/// Default sentinel step of a freshly created record.
pub const DEFAULT_FIRST_STEP: &str = "start";

/// Default sentinel step of a finished record.
pub const DEFAULT_FINAL_STEP: &str = "finish";

/// Configuration for a [`Coordinator`](crate::Coordinator).
///
/// The sentinels are written to the store's `step` column alongside effect
/// names, so they must not collide with any effect name and must stay stable
/// for as long as records written with them can be resumed.
///
/// # Example
///
/// ```
/// use idemflow::CoordinatorConfig;
///
/// let config = CoordinatorConfig {
///     final_step: "done".into(),
///     ..Default::default()
/// };
/// assert_eq!(config.first_step, "start");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Step of a record that exists but has no completed effect yet.
    ///
    /// Resuming from this step runs the whole effect list.
    /// Default: `"start"`.
    pub first_step: String,

    /// Step of a record whose response has been stored.
    ///
    /// Invocations finding this step return the stored response and run no
    /// effect. Default: `"finish"`.
    pub final_step: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            first_step: DEFAULT_FIRST_STEP.to_owned(),
            final_step: DEFAULT_FINAL_STEP.to_owned(),
        }
    }
}

impl CoordinatorConfig {
    /// Returns `true` if `name` is one of the sentinels.
    pub fn is_sentinel(&self, name: &str) -> bool {
        name == self.first_step || name == self.final_step
    }

    pub(crate) fn validate(&self) -> Result<(), BuildError> {
        if self.first_step == self.final_step {
            return Err(BuildError::IndistinctSentinels(self.first_step.clone()));
        }
        Ok(())
    }
}
