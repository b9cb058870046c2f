//! The outcome a task reports for its effect.

/// What an effect's task asks the coordinator to record.
///
/// | Variant | Persisted | Execution |
/// |---------|-----------|-----------|
/// | `NoOp` | nothing | continues with the next effect |
/// | `RecoveryPoint` | the effect's name as the new step | continues with the next effect |
/// | `Response(r)` | `r`, with the step moved to the final sentinel | stops, `r` is returned |
///
/// The last effect of a list must always produce a `Response`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectResult<R> {
    /// Nothing worth recording was produced.
    NoOp,
    /// The effect completed; resume after it from now on.
    RecoveryPoint,
    /// The final business result of the whole sequence.
    Response(R),
}

impl<R> EffectResult<R> {
    /// Short label for logs.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            EffectResult::NoOp => "no_op",
            EffectResult::RecoveryPoint => "recovery_point",
            EffectResult::Response(_) => "response",
        }
    }
}
