//! Request/response correlation for the asynchronous protocol exchanges.
//!
//! Enroll, adjust-outcome and finalize are all fire-and-wait: the engine
//! issues the request, suspends, and the response arrives later as an
//! event. The correlator pairs the two through a durable response slot in
//! game-cycle critical data, so a restart mid-wait can still recover the
//! response, and through an in-memory one-shot interest that is armed
//! immediately before the request and disarmed on every exit path.

use crate::critical_data::CriticalDataScope;
use crate::errors::{EngineError, Result};
use crate::foundation::FoundationResponse;
use crate::shim::{paths, FoundationShim};
use crate::signals::StopToken;
use crossbeam_channel::{select, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// The three asynchronous exchanges. Mutually exclusive by engine phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeKind {
    Enroll,
    Outcome,
    Finalize,
}

fn kind_of(response: &FoundationResponse) -> ExchangeKind {
    match response {
        FoundationResponse::Enroll(_) => ExchangeKind::Enroll,
        FoundationResponse::Outcome(_) => ExchangeKind::Outcome,
        FoundationResponse::Finalize(_) => ExchangeKind::Finalize,
    }
}

#[derive(Default)]
struct Inner {
    armed: Mutex<Option<ExchangeKind>>,
    ready: AtomicBool,
}

/// One-shot exchange correlator. Owned by the engine; written to from the
/// event dispatch path on the same logic thread. Clones share state.
#[derive(Clone, Default)]
pub struct Correlator {
    inner: Arc<Inner>,
}

/// Armed interest in one exchange. Disarms on drop, so a failed wait can
/// never leak a stale subscription into the next exchange.
pub struct ArmedExchange {
    inner: Arc<Inner>,
}

impl Drop for ArmedExchange {
    fn drop(&mut self) {
        *self.inner.armed.lock().unwrap() = None;
        self.inner.ready.store(false, Ordering::SeqCst);
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms interest in one exchange. Arming while another exchange is
    /// armed is a modeling error: the engine never has two requests in
    /// flight.
    pub fn arm(&self, kind: ExchangeKind) -> Result<ArmedExchange> {
        let mut armed = self.inner.armed.lock().unwrap();
        if let Some(current) = *armed {
            return Err(EngineError::ProtocolViolation(format!(
                "exchange {kind:?} armed while {current:?} is still in flight"
            )));
        }
        *armed = Some(kind);
        self.inner.ready.store(false, Ordering::SeqCst);
        Ok(ArmedExchange {
            inner: self.inner.clone(),
        })
    }

    /// Called from event dispatch when a protocol response arrives.
    /// Persists it to the response slot (the delivery transaction is open)
    /// and marks the armed exchange ready.
    pub fn on_response(&self, shim: &FoundationShim, response: FoundationResponse) -> Result<()> {
        let armed = *self.inner.armed.lock().unwrap();
        let kind = kind_of(&response);
        match armed {
            Some(expected) if expected == kind => {}
            Some(expected) => {
                return Err(EngineError::ProtocolViolation(format!(
                    "{kind:?} response arrived while awaiting {expected:?}"
                )));
            }
            None => {
                return Err(EngineError::ProtocolViolation(format!(
                    "unsolicited {kind:?} response"
                )));
            }
        }

        if shim.exists(CriticalDataScope::GameCycle, paths::FOUNDATION_RESPONSE)? {
            return Err(EngineError::ProtocolViolation(
                "second response arrived with one still unconsumed".into(),
            ));
        }
        shim.write(
            CriticalDataScope::GameCycle,
            paths::FOUNDATION_RESPONSE,
            &response,
        )?;
        self.inner.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Suspends until the armed exchange's response has been persisted, a
    /// stop is requested, or `timeout` elapses. The stop signal wins
    /// whenever both it and the response are ready. Returns whether a
    /// response arrived; `Ok(false)` is only possible with a timeout.
    ///
    /// `pump` delivers any queued foundation events; it is what actually
    /// routes the response through [`Correlator::on_response`].
    pub fn suspend(
        &self,
        stop: &StopToken,
        signal: &Receiver<()>,
        timeout: Option<Duration>,
        pump: &mut dyn FnMut() -> Result<()>,
    ) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            // Events may already be queued from before the wait began.
            stop.check()?;
            pump()?;
            if self.inner.ready.load(Ordering::SeqCst) {
                return Ok(true);
            }

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    select! {
                        recv(stop.receiver()) -> _ => return Err(EngineError::StopForced),
                        recv(signal) -> msg => {
                            if msg.is_err() {
                                return Err(EngineError::ProtocolViolation(
                                    "foundation event channel closed".into(),
                                ));
                            }
                        }
                        default(deadline - now) => return Ok(false),
                    }
                }
                None => {
                    select! {
                        recv(stop.receiver()) -> _ => return Err(EngineError::StopForced),
                        recv(signal) -> msg => {
                            if msg.is_err() {
                                return Err(EngineError::ProtocolViolation(
                                    "foundation event channel closed".into(),
                                ));
                            }
                        }
                    }
                }
            }
            // Shutdown has priority over a simultaneously ready response.
            stop.check()?;
        }
    }

    /// Consumes the persisted response for `kind`, removing the slot
    /// entry. The removal is a critical-data write, so a transaction must
    /// be open. `None` means no response was ever persisted; the caller
    /// decides whether that is soft or fatal.
    pub fn take(&self, shim: &FoundationShim, kind: ExchangeKind) -> Result<Option<FoundationResponse>> {
        let response: Option<FoundationResponse> =
            shim.read(CriticalDataScope::GameCycle, paths::FOUNDATION_RESPONSE)?;
        let Some(response) = response else {
            return Ok(None);
        };
        if kind_of(&response) != kind {
            return Err(EngineError::ProtocolViolation(format!(
                "response slot holds {:?} but {kind:?} was awaited",
                kind_of(&response)
            )));
        }
        shim.remove(CriticalDataScope::GameCycle, paths::FOUNDATION_RESPONSE)?;
        Ok(Some(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::critical_data::PassthroughCriticalData;
    use crate::foundation::{
        CreateTransactionResult, EnrollResponse, Foundation, OutcomeResponse,
        StandaloneFoundation,
    };
    use crate::signals::stop_pair;
    use crossbeam_channel::unbounded;

    fn shim() -> (Arc<StandaloneFoundation>, FoundationShim) {
        let foundation = StandaloneFoundation::in_memory();
        let raw = Box::new(PassthroughCriticalData::new(foundation.clone()));
        let shim = FoundationShim::new(foundation.clone(), raw);
        (foundation, shim)
    }

    fn enroll_ok() -> FoundationResponse {
        FoundationResponse::Enroll(EnrollResponse { success: true })
    }

    #[test]
    fn response_round_trips_through_the_slot() {
        let (foundation, shim) = shim();
        let correlator = Correlator::new();
        let armed = correlator.arm(ExchangeKind::Enroll).unwrap();

        assert_eq!(
            foundation.create_transaction(),
            CreateTransactionResult::Created
        );
        correlator.on_response(&shim, enroll_ok()).unwrap();

        let taken = correlator.take(&shim, ExchangeKind::Enroll).unwrap();
        assert_eq!(taken, Some(enroll_ok()));
        foundation.close_transaction();

        // Consumed: the slot is empty again.
        assert!(!shim
            .exists(CriticalDataScope::GameCycle, paths::FOUNDATION_RESPONSE)
            .unwrap());
        drop(armed);
    }

    #[test]
    fn only_one_exchange_may_be_armed() {
        let correlator = Correlator::new();
        let armed = correlator.arm(ExchangeKind::Outcome).unwrap();
        assert!(correlator.arm(ExchangeKind::Finalize).is_err());
        drop(armed);
        assert!(correlator.arm(ExchangeKind::Finalize).is_ok());
    }

    #[test]
    fn unsolicited_response_is_a_protocol_violation() {
        let (foundation, shim) = shim();
        let correlator = Correlator::new();
        assert_eq!(
            foundation.create_transaction(),
            CreateTransactionResult::Created
        );
        let err = correlator.on_response(&shim, enroll_ok()).unwrap_err();
        assert!(err.to_string().contains("unsolicited"));
        foundation.close_transaction();
    }

    #[test]
    fn second_unconsumed_response_is_a_protocol_violation() {
        let (foundation, shim) = shim();
        let correlator = Correlator::new();
        let _armed = correlator.arm(ExchangeKind::Enroll).unwrap();

        assert_eq!(
            foundation.create_transaction(),
            CreateTransactionResult::Created
        );
        correlator.on_response(&shim, enroll_ok()).unwrap();
        let err = correlator.on_response(&shim, enroll_ok()).unwrap_err();
        assert!(err.to_string().contains("unconsumed"));
        foundation.close_transaction();
    }

    #[test]
    fn mismatched_slot_kind_is_a_protocol_violation() {
        let (foundation, shim) = shim();
        let correlator = Correlator::new();
        let _armed = correlator.arm(ExchangeKind::Outcome).unwrap();

        assert_eq!(
            foundation.create_transaction(),
            CreateTransactionResult::Created
        );
        correlator
            .on_response(
                &shim,
                FoundationResponse::Outcome(OutcomeResponse { accepted: true }),
            )
            .unwrap();

        let err = correlator.take(&shim, ExchangeKind::Finalize).unwrap_err();
        assert!(err.to_string().contains("awaited"));
        foundation.close_transaction();
    }

    #[test]
    fn stop_wins_over_a_simultaneously_ready_response() {
        let (_foundation, shim) = shim();
        let correlator = Correlator::new();
        let _armed = correlator.arm(ExchangeKind::Enroll).unwrap();
        let (handle, token) = stop_pair();
        let (signal_tx, signal_rx) = unbounded();

        // Both the response signal and the stop become ready before the
        // wait begins.
        signal_tx.send(()).unwrap();
        handle.request();

        let err = correlator
            .suspend(&token, &signal_rx, None, &mut || {
                panic!("pump must not run once a stop is pending")
            })
            .unwrap_err();
        assert!(err.is_stop());
        let _ = shim;
    }

    #[test]
    fn suspend_times_out_when_no_response_arrives() {
        let correlator = Correlator::new();
        let _armed = correlator.arm(ExchangeKind::Outcome).unwrap();
        let (_handle, token) = stop_pair();
        let (_signal_tx, signal_rx) = unbounded();

        let answered = correlator
            .suspend(
                &token,
                &signal_rx,
                Some(Duration::from_millis(20)),
                &mut || Ok(()),
            )
            .unwrap();
        assert!(!answered);
    }

    #[test]
    fn suspend_returns_once_the_response_is_persisted() {
        let (foundation, shim) = shim();
        let correlator = Correlator::new();
        let _armed = correlator.arm(ExchangeKind::Enroll).unwrap();
        let (_handle, token) = stop_pair();
        let signal = foundation.event_signal();

        foundation.post_event(crate::foundation::FoundationEvent::EnrollResponse(
            EnrollResponse { success: true },
        ));

        let foundation2 = foundation.clone();
        let correlator_ref = &correlator;
        let shim_ref = &shim;
        let answered = correlator
            .suspend(&token, &signal, None, &mut move || -> Result<()> {
                foundation2.process_events(&mut |event| match event {
                    crate::foundation::FoundationEvent::EnrollResponse(r) => {
                        correlator_ref.on_response(shim_ref, FoundationResponse::Enroll(r))
                    }
                    _ => Ok(()),
                })?;
                Ok(())
            })
            .unwrap();
        assert!(answered);

        assert_eq!(
            foundation.create_transaction(),
            CreateTransactionResult::Created
        );
        let taken = correlator.take(&shim, ExchangeKind::Enroll).unwrap();
        foundation.close_transaction();
        assert_eq!(taken, Some(enroll_ok()));
    }
}
