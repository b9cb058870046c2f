//! Scoped transaction ownership.

use tracing::warn;

use crate::store::{TransactionProvider, TxOutcome};

/// An open transaction, owned by exactly one effect invocation.
///
/// The handle is held by value and only leaves through [`settle`](Self::settle),
/// which consumes the guard, so every transaction is closed at most once. If
/// the guard is dropped instead (the enclosing future was cancelled), the
/// handle is dropped with it and the provider rolls it back.
pub(crate) struct TxGuard<'p, P: TransactionProvider> {
    provider: &'p P,
    tx: P::Transaction,
}

impl<'p, P: TransactionProvider> TxGuard<'p, P> {
    /// Open a transaction on `provider`.
    pub(crate) async fn begin(provider: &'p P) -> Result<Self, P::Error> {
        let tx = provider.start_transaction().await?;
        Ok(Self { provider, tx })
    }

    /// Borrow the handle for the work done inside the transaction.
    pub(crate) fn tx(&mut self) -> &mut P::Transaction {
        &mut self.tx
    }

    /// Close the transaction according to `result` and hand `result` back.
    ///
    /// `Ok` commits; a failed commit replaces the value with `lift(error)`.
    /// `Err` rolls back and keeps the original error: the first failure wins,
    /// a failing rollback is only logged.
    pub(crate) async fn settle<T, X>(
        self,
        result: Result<T, X>,
        lift: impl FnOnce(P::Error) -> X,
    ) -> Result<T, X> {
        match result {
            Ok(value) => {
                self.provider
                    .close_transaction(self.tx, TxOutcome::Commit)
                    .await
                    .map_err(lift)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self
                    .provider
                    .close_transaction(self.tx, TxOutcome::Rollback)
                    .await
                {
                    warn!(error = %rollback, "Transaction rollback failed");
                }
                Err(err)
            }
        }
    }
}
