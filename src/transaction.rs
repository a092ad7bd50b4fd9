//! Foundation transaction management.
//!
//! A transaction is the atomicity boundary for one business step: every
//! critical-data write and state-mutating protocol call inside it becomes
//! visible together or not at all. The engine opens one transiently around
//! each state-machine step; the guard returned here closes it on every
//! exit path, but only if this call was the one that opened it, so event
//! callbacks running inside a platform-opened transaction are safe to
//! nest.

use crate::errors::{EngineError, Result};
use crate::foundation::{CreateTransactionResult, Foundation};
use crate::signals::StopToken;
use std::sync::Arc;

/// Pump invoked when the platform refuses to open a transaction until
/// pending events are drained. May cooperatively yield.
pub type EventPump<'a> = &'a mut dyn FnMut() -> Result<()>;

/// Open transaction handle. Closes on drop if and only if this handle's
/// `open` call created the transaction.
pub struct TransientTransaction {
    foundation: Arc<dyn Foundation>,
    owns: bool,
}

impl TransientTransaction {
    /// True when this handle owns the close.
    pub fn owns(&self) -> bool {
        self.owns
    }
}

impl std::fmt::Debug for TransientTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientTransaction")
            .field("owns", &self.owns)
            .finish()
    }
}

impl Drop for TransientTransaction {
    fn drop(&mut self) {
        if self.owns {
            self.foundation.close_transaction();
        }
    }
}

/// Opens a transaction, re-entrant-safe.
///
/// If one is already open (including one opened implicitly by the platform
/// around event delivery) the returned handle is a no-op on close. On an
/// event-waiting refusal the pump drains events and the open is retried;
/// the stop flag is checked before and after each drain so a shutdown
/// requested during the wait raises [`EngineError::StopForced`] instead of
/// spinning. Any other refusal is fatal.
pub fn open(
    foundation: &Arc<dyn Foundation>,
    stop: &StopToken,
    pump: EventPump<'_>,
) -> Result<TransientTransaction> {
    if foundation.transaction_open() {
        return Ok(TransientTransaction {
            foundation: foundation.clone(),
            owns: false,
        });
    }

    loop {
        stop.check()?;
        match foundation.create_transaction() {
            CreateTransactionResult::Created => {
                return Ok(TransientTransaction {
                    foundation: foundation.clone(),
                    owns: true,
                });
            }
            CreateTransactionResult::EventWaitingForProcess => {
                tracing::debug!("transaction refused, draining pending events");
                pump()?;
                stop.check()?;
            }
            CreateTransactionResult::Failed(reason) => {
                tracing::error!(%reason, "transaction open failed");
                return Err(EngineError::Transaction(reason));
            }
        }
    }
}

/// Unconditionally closes the currently open transaction.
pub fn close(foundation: &Arc<dyn Foundation>) {
    foundation.close_transaction();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::{FoundationEvent, StandaloneFoundation};
    use crate::signals::stop_pair;

    fn as_foundation(f: &Arc<StandaloneFoundation>) -> Arc<dyn Foundation> {
        f.clone()
    }

    #[test]
    fn open_and_drop_balance() {
        let standalone = StandaloneFoundation::in_memory();
        let foundation = as_foundation(&standalone);
        let (_handle, token) = stop_pair();

        {
            let tx = open(&foundation, &token, &mut || Ok(())).unwrap();
            assert!(tx.owns());
            assert!(foundation.transaction_open());
        }
        assert!(!foundation.transaction_open());
        assert_eq!(
            standalone.transaction_opens(),
            standalone.transaction_closes()
        );
    }

    #[test]
    fn nested_open_does_not_close_the_outer_transaction() {
        let standalone = StandaloneFoundation::in_memory();
        let foundation = as_foundation(&standalone);
        let (_handle, token) = stop_pair();

        let outer = open(&foundation, &token, &mut || Ok(())).unwrap();
        {
            let inner = open(&foundation, &token, &mut || Ok(())).unwrap();
            assert!(!inner.owns());
        }
        assert!(foundation.transaction_open());
        drop(outer);
        assert!(!foundation.transaction_open());
    }

    #[test]
    fn event_waiting_refusal_drains_and_retries() {
        let standalone = StandaloneFoundation::in_memory();
        let foundation = as_foundation(&standalone);
        let (_handle, token) = stop_pair();
        standalone.post_event(FoundationEvent::Park);

        let standalone2 = standalone.clone();
        let mut pump = move || -> Result<()> {
            standalone2.process_events(&mut |_| Ok(()))?;
            Ok(())
        };
        let tx = open(&foundation, &token, &mut pump).unwrap();
        assert!(tx.owns());
    }

    #[test]
    fn stop_during_drain_raises_stop_forced() {
        let standalone = StandaloneFoundation::in_memory();
        let foundation = as_foundation(&standalone);
        let (handle, token) = stop_pair();
        standalone.post_event(FoundationEvent::Park);

        // The drain succeeds but a stop arrives while it runs; the retry
        // must observe it before opening.
        let standalone2 = standalone.clone();
        let mut pump = move || -> Result<()> {
            standalone2.process_events(&mut |_| Ok(()))?;
            handle.request();
            Ok(())
        };
        let err = open(&foundation, &token, &mut pump).unwrap_err();
        assert!(err.is_stop());
        assert!(!foundation.transaction_open());
    }
}
