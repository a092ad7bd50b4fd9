//! In-process foundation simulator.
//!
//! Stands in for the regulated platform in standalone and test
//! deployments: it owns the transaction flag, enforces protocol call
//! ordering with a durable game-cycle state, queues response events, and
//! implements both the public critical-data surface and the privileged
//! internal cache. Counters over transaction opens/closes and protocol
//! queries exist so tests can assert balance and idempotency properties.

use crate::critical_data::{
    storage_key, CriticalDataInternals, CriticalDataScope, CriticalDataStore,
};
use crate::errors::{CriticalDataError, EngineError, Result};
use crate::foundation::{
    BetContext, CreateTransactionResult, EnrollResponse, EventHandler, FinalizeResponse,
    Foundation, FoundationEvent, GameCycleState, OutcomeList, OutcomeResponse,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Store key holding the simulator's durable cycle state. Outside the
/// `cd:` keyspace so it can never collide with game critical data.
const SIM_CYCLE_KEY: &[u8] = b"sim:cycle";

/// Behavior knobs for scripting failure paths in tests.
#[derive(Default)]
pub struct StandaloneBehavior {
    /// Enroll responses report failure.
    pub fail_enroll: AtomicBool,
    /// Bet commits are rejected.
    pub reject_bet: AtomicBool,
    /// Start-playing requests are rejected.
    pub reject_start_playing: AtomicBool,
    /// No enroll response is ever queued (standalone race window).
    pub suppress_enroll_response: AtomicBool,
    /// No outcome response is ever queued.
    pub suppress_outcome_response: AtomicBool,
    /// No finalize response is ever queued.
    pub suppress_finalize_response: AtomicBool,
    /// Ancillary (gamble) play is not permitted.
    pub deny_ancillary: AtomicBool,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SimCycle {
    state: GameCycleState,
    /// State to restore once a pending outcome response is delivered.
    resume_after_evaluate: GameCycleState,
}

/// In-process [`Foundation`] implementation over a pluggable store.
pub struct StandaloneFoundation {
    store: Arc<dyn CriticalDataStore>,
    pub behavior: StandaloneBehavior,

    tx_open: Mutex<bool>,
    opens: AtomicU64,
    closes: AtomicU64,

    queue: Mutex<VecDeque<FoundationEvent>>,
    signal_tx: Sender<()>,
    signal_rx: Receiver<()>,

    cycle: Mutex<SimCycle>,
    committed_bet: Mutex<Option<BetContext>>,

    ancillary_queries: AtomicU64,
    last_history_steps: AtomicU32,
    submitted: Mutex<Vec<(OutcomeList, bool)>>,
}

impl StandaloneFoundation {
    /// Opens a simulator over an existing store, restoring any durable
    /// cycle state. Responses to requests that were pending at the moment
    /// of a crash are re-queued for delivery, mirroring the real
    /// platform's post-restart behavior.
    pub fn new(store: Arc<dyn CriticalDataStore>) -> Arc<Self> {
        let (signal_tx, signal_rx) = unbounded();

        let cycle = match store.get(SIM_CYCLE_KEY) {
            Ok(Some(bytes)) => bincode::deserialize(&bytes).unwrap_or(SimCycle {
                state: GameCycleState::Idle,
                resume_after_evaluate: GameCycleState::Playing,
            }),
            _ => SimCycle {
                state: GameCycleState::Idle,
                resume_after_evaluate: GameCycleState::Playing,
            },
        };

        let foundation = Arc::new(Self {
            store,
            behavior: StandaloneBehavior::default(),
            tx_open: Mutex::new(false),
            opens: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            queue: Mutex::new(VecDeque::new()),
            signal_tx,
            signal_rx,
            cycle: Mutex::new(cycle),
            committed_bet: Mutex::new(None),
            ancillary_queries: AtomicU64::new(0),
            last_history_steps: AtomicU32::new(0),
            submitted: Mutex::new(Vec::new()),
        });

        foundation.requeue_pending_responses();
        foundation
    }

    pub fn in_memory() -> Arc<Self> {
        Self::new(Arc::new(crate::critical_data::MemoryStore::new()))
    }

    /// Re-queues the response for any request the durable cycle state
    /// records as pending.
    fn requeue_pending_responses(&self) {
        let state = self.cycle.lock().unwrap().state;
        match state {
            GameCycleState::EnrollPending => {
                if !self.behavior.suppress_enroll_response.load(Ordering::Relaxed) {
                    self.queue_event(FoundationEvent::EnrollResponse(EnrollResponse {
                        success: !self.behavior.fail_enroll.load(Ordering::Relaxed),
                    }));
                }
            }
            GameCycleState::EvaluatePending => {
                if !self
                    .behavior
                    .suppress_outcome_response
                    .load(Ordering::Relaxed)
                {
                    self.queue_event(FoundationEvent::OutcomeResponse(OutcomeResponse {
                        accepted: true,
                    }));
                }
            }
            GameCycleState::FinalizePending => {
                if !self
                    .behavior
                    .suppress_finalize_response
                    .load(Ordering::Relaxed)
                {
                    self.queue_event(FoundationEvent::FinalizeResponse(FinalizeResponse {
                        committed: true,
                    }));
                }
            }
            _ => {}
        }
    }

    /// Queues any foundation event for delivery; used by tests to inject
    /// park, shutdown or broadcast events.
    pub fn post_event(&self, event: FoundationEvent) {
        self.queue_event(event);
    }

    fn queue_event(&self, event: FoundationEvent) {
        self.queue.lock().unwrap().push_back(event);
        let _ = self.signal_tx.send(());
    }

    fn require_transaction(&self, what: &str) -> Result<()> {
        if *self.tx_open.lock().unwrap() {
            Ok(())
        } else {
            Err(EngineError::ProtocolViolation(format!(
                "{what} called outside an open transaction"
            )))
        }
    }

    fn set_cycle_state(&self, tracker: &mut SimCycle, state: GameCycleState) -> Result<()> {
        tracker.state = state;
        let bytes = bincode::serialize(&*tracker).map_err(|e| {
            EngineError::Transaction(format!("failed to persist simulator cycle state: {e}"))
        })?;
        self.store
            .put(SIM_CYCLE_KEY, &bytes)
            .map_err(EngineError::Transaction)?;
        Ok(())
    }

    fn expect_cycle_state(
        &self,
        tracker: &SimCycle,
        expected: &[GameCycleState],
        what: &str,
    ) -> Result<()> {
        if expected.contains(&tracker.state) {
            Ok(())
        } else {
            Err(EngineError::ProtocolViolation(format!(
                "{what} called in game-cycle state {:?}",
                tracker.state
            )))
        }
    }

    /// Applies the foundation-side state transition implied by delivering
    /// a response event.
    fn on_deliver(&self, event: &FoundationEvent) -> Result<()> {
        let mut tracker = self.cycle.lock().unwrap();
        match event {
            FoundationEvent::EnrollResponse(response) => {
                if tracker.state == GameCycleState::EnrollPending {
                    let next = if response.success {
                        GameCycleState::Enrolled
                    } else {
                        GameCycleState::Committed
                    };
                    self.set_cycle_state(&mut tracker, next)?;
                }
            }
            FoundationEvent::OutcomeResponse(_) => {
                if tracker.state == GameCycleState::EvaluatePending {
                    let resume = tracker.resume_after_evaluate;
                    self.set_cycle_state(&mut tracker, resume)?;
                }
            }
            FoundationEvent::FinalizeResponse(_) => {
                if tracker.state == GameCycleState::FinalizePending {
                    self.set_cycle_state(&mut tracker, GameCycleState::Finalized)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    // --- test observability ---

    pub fn transaction_opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn transaction_closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn ancillary_queries(&self) -> u64 {
        self.ancillary_queries.load(Ordering::SeqCst)
    }

    pub fn last_history_steps(&self) -> u32 {
        self.last_history_steps.load(Ordering::SeqCst)
    }

    pub fn submitted_outcomes(&self) -> Vec<(OutcomeList, bool)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn store(&self) -> &Arc<dyn CriticalDataStore> {
        &self.store
    }
}

impl Foundation for StandaloneFoundation {
    fn transaction_open(&self) -> bool {
        *self.tx_open.lock().unwrap()
    }

    fn create_transaction(&self) -> CreateTransactionResult {
        let mut open = self.tx_open.lock().unwrap();
        if *open {
            return CreateTransactionResult::Failed("transaction already open".into());
        }
        if !self.queue.lock().unwrap().is_empty() {
            return CreateTransactionResult::EventWaitingForProcess;
        }
        *open = true;
        self.opens.fetch_add(1, Ordering::SeqCst);
        CreateTransactionResult::Created
    }

    fn close_transaction(&self) {
        let mut open = self.tx_open.lock().unwrap();
        if *open {
            *open = false;
            self.closes.fetch_add(1, Ordering::SeqCst);
        } else {
            tracing::warn!("close_transaction called with no open transaction");
        }
    }

    fn event_signal(&self) -> Receiver<()> {
        self.signal_rx.clone()
    }

    fn process_events(&self, handler: EventHandler<'_>) -> Result<usize> {
        // Event delivery happens inside a transaction: the caller's if
        // one is already open, an implicit one otherwise.
        let implicit = {
            let mut open = self.tx_open.lock().unwrap();
            if *open {
                false
            } else {
                *open = true;
                self.opens.fetch_add(1, Ordering::SeqCst);
                true
            }
        };

        let mut delivered = 0usize;
        let result = loop {
            let event = self.queue.lock().unwrap().pop_front();
            let Some(event) = event else {
                break Ok(());
            };
            // Consume the ping that accompanied this event, if still there.
            let _ = self.signal_rx.try_recv();
            if let Err(e) = self.on_deliver(&event) {
                break Err(e);
            }
            delivered += 1;
            if let Err(e) = handler(event) {
                break Err(e);
            }
        };

        if implicit {
            self.close_transaction();
        }
        result.map(|_| delivered)
    }

    fn write_critical_data(&self, scope: CriticalDataScope, path: &str, data: &[u8]) -> Result<()> {
        self.require_transaction("write_critical_data")?;
        self.store
            .put(&storage_key(scope, path), data)
            .map_err(|reason| {
                CriticalDataError::Write {
                    scope,
                    path: path.into(),
                    reason,
                }
                .into()
            })
    }

    fn read_critical_data(&self, scope: CriticalDataScope, path: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(&storage_key(scope, path)).map_err(|reason| {
            CriticalDataError::Read {
                scope,
                path: path.into(),
                reason,
            }
            .into()
        })
    }

    fn remove_critical_data(&self, scope: CriticalDataScope, path: &str) -> Result<bool> {
        self.require_transaction("remove_critical_data")?;
        self.store
            .delete(&storage_key(scope, path))
            .map_err(|reason| {
                CriticalDataError::Write {
                    scope,
                    path: path.into(),
                    reason,
                }
                .into()
            })
    }

    fn game_cycle_state(&self) -> GameCycleState {
        self.cycle.lock().unwrap().state
    }

    fn commit_bet(&self, bet: &BetContext) -> Result<bool> {
        self.require_transaction("commit_bet")?;
        let mut tracker = self.cycle.lock().unwrap();
        self.expect_cycle_state(&tracker, &[GameCycleState::Idle], "commit_bet")?;
        if self.behavior.reject_bet.load(Ordering::Relaxed) {
            return Ok(false);
        }
        *self.committed_bet.lock().unwrap() = Some(*bet);
        self.set_cycle_state(&mut tracker, GameCycleState::Committed)?;
        Ok(true)
    }

    fn uncommit_bet(&self) -> Result<()> {
        self.require_transaction("uncommit_bet")?;
        let mut tracker = self.cycle.lock().unwrap();
        self.expect_cycle_state(&tracker, &[GameCycleState::Committed], "uncommit_bet")?;
        *self.committed_bet.lock().unwrap() = None;
        self.set_cycle_state(&mut tracker, GameCycleState::Idle)
    }

    fn commit_game_cycle(&self) -> Result<bool> {
        self.require_transaction("commit_game_cycle")?;
        let tracker = self.cycle.lock().unwrap();
        self.expect_cycle_state(&tracker, &[GameCycleState::Committed], "commit_game_cycle")?;
        Ok(true)
    }

    fn uncommit_game_cycle(&self) -> Result<()> {
        self.require_transaction("uncommit_game_cycle")?;
        let mut tracker = self.cycle.lock().unwrap();
        self.expect_cycle_state(
            &tracker,
            &[
                GameCycleState::Committed,
                GameCycleState::EnrollPending,
                GameCycleState::Enrolled,
            ],
            "uncommit_game_cycle",
        )?;
        self.set_cycle_state(&mut tracker, GameCycleState::Committed)
    }

    fn enroll_game_cycle(&self) -> Result<()> {
        self.require_transaction("enroll_game_cycle")?;
        {
            let mut tracker = self.cycle.lock().unwrap();
            self.expect_cycle_state(&tracker, &[GameCycleState::Committed], "enroll_game_cycle")?;
            self.set_cycle_state(&mut tracker, GameCycleState::EnrollPending)?;
        }
        if !self.behavior.suppress_enroll_response.load(Ordering::Relaxed) {
            self.queue_event(FoundationEvent::EnrollResponse(EnrollResponse {
                success: !self.behavior.fail_enroll.load(Ordering::Relaxed),
            }));
        }
        Ok(())
    }

    fn start_playing(&self) -> Result<bool> {
        self.require_transaction("start_playing")?;
        let mut tracker = self.cycle.lock().unwrap();
        self.expect_cycle_state(&tracker, &[GameCycleState::Enrolled], "start_playing")?;
        if self.behavior.reject_start_playing.load(Ordering::Relaxed) {
            return Ok(false);
        }
        self.set_cycle_state(&mut tracker, GameCycleState::Playing)?;
        Ok(true)
    }

    fn adjust_outcome(&self, outcome: &OutcomeList, is_final: bool) -> Result<()> {
        self.require_transaction("adjust_outcome")?;
        {
            let mut tracker = self.cycle.lock().unwrap();
            self.expect_cycle_state(
                &tracker,
                &[GameCycleState::Playing, GameCycleState::AncillaryPlaying],
                "adjust_outcome",
            )?;
            tracker.resume_after_evaluate = tracker.state;
            self.set_cycle_state(&mut tracker, GameCycleState::EvaluatePending)?;
        }
        self.submitted
            .lock()
            .unwrap()
            .push((outcome.clone(), is_final));
        if !self
            .behavior
            .suppress_outcome_response
            .load(Ordering::Relaxed)
        {
            self.queue_event(FoundationEvent::OutcomeResponse(OutcomeResponse {
                accepted: true,
            }));
        }
        Ok(())
    }

    fn ancillary_permitted(&self) -> Result<bool> {
        self.ancillary_queries.fetch_add(1, Ordering::SeqCst);
        Ok(!self.behavior.deny_ancillary.load(Ordering::Relaxed))
    }

    fn start_ancillary_play(&self) -> Result<bool> {
        self.require_transaction("start_ancillary_play")?;
        let mut tracker = self.cycle.lock().unwrap();
        self.expect_cycle_state(&tracker, &[GameCycleState::Playing], "start_ancillary_play")?;
        if self.behavior.deny_ancillary.load(Ordering::Relaxed) {
            return Ok(false);
        }
        self.set_cycle_state(&mut tracker, GameCycleState::AncillaryPlaying)?;
        Ok(true)
    }

    fn finalize_outcome(&self) -> Result<()> {
        self.require_transaction("finalize_outcome")?;
        {
            let mut tracker = self.cycle.lock().unwrap();
            self.expect_cycle_state(
                &tracker,
                &[GameCycleState::Playing, GameCycleState::AncillaryPlaying],
                "finalize_outcome",
            )?;
            self.set_cycle_state(&mut tracker, GameCycleState::FinalizePending)?;
        }
        if !self
            .behavior
            .suppress_finalize_response
            .load(Ordering::Relaxed)
        {
            self.queue_event(FoundationEvent::FinalizeResponse(FinalizeResponse {
                committed: true,
            }));
        }
        Ok(())
    }

    fn end_game_cycle(&self, history_steps: u32) -> Result<()> {
        self.require_transaction("end_game_cycle")?;
        let mut tracker = self.cycle.lock().unwrap();
        self.expect_cycle_state(&tracker, &[GameCycleState::Finalized], "end_game_cycle")?;
        self.last_history_steps.store(history_steps, Ordering::SeqCst);
        *self.committed_bet.lock().unwrap() = None;

        // The platform owns game-cycle scoped critical data and clears it
        // when the round closes.
        let prefix = storage_key(CriticalDataScope::GameCycle, "");
        self.store
            .delete_prefix(&prefix)
            .map_err(EngineError::Transaction)?;

        self.set_cycle_state(&mut tracker, GameCycleState::Idle)
    }
}

impl CriticalDataInternals for StandaloneFoundation {
    fn guard_transaction(&self) -> Result<()> {
        if self.transaction_open() {
            Ok(())
        } else {
            Err(CriticalDataError::NoTransaction {
                scope: CriticalDataScope::Payvar,
                path: String::new(),
            }
            .into())
        }
    }

    fn validate_access(&self, scope: CriticalDataScope) -> Result<()> {
        // History data is written through the platform's own history
        // mechanism, never through the privileged cache.
        if scope == CriticalDataScope::History {
            return Err(CriticalDataError::AccessDenied {
                scope,
                reason: "history scope is platform-managed".into(),
            }
            .into());
        }
        Ok(())
    }

    fn cache_write(&self, scope: CriticalDataScope, path: &str, data: &[u8]) -> Result<()> {
        self.store
            .put(&storage_key(scope, path), data)
            .map_err(|reason| {
                CriticalDataError::Write {
                    scope,
                    path: path.into(),
                    reason,
                }
                .into()
            })
    }

    fn cache_read(&self, scope: CriticalDataScope, path: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(&storage_key(scope, path)).map_err(|reason| {
            CriticalDataError::Read {
                scope,
                path: path.into(),
                reason,
            }
            .into()
        })
    }

    fn cache_remove(&self, scope: CriticalDataScope, path: &str) -> Result<bool> {
        self.store
            .delete(&storage_key(scope, path))
            .map_err(|reason| {
                CriticalDataError::Write {
                    scope,
                    path: path.into(),
                    reason,
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tx(foundation: &StandaloneFoundation) {
        assert_eq!(
            foundation.create_transaction(),
            CreateTransactionResult::Created
        );
    }

    #[test]
    fn create_transaction_refuses_while_events_pending() {
        let foundation = StandaloneFoundation::in_memory();
        foundation.post_event(FoundationEvent::Park);
        assert_eq!(
            foundation.create_transaction(),
            CreateTransactionResult::EventWaitingForProcess
        );
        let delivered = foundation.process_events(&mut |_| Ok(())).unwrap();
        assert_eq!(delivered, 1);
        open_tx(&foundation);
        foundation.close_transaction();
        assert_eq!(
            foundation.transaction_opens(),
            foundation.transaction_closes()
        );
    }

    #[test]
    fn protocol_calls_require_open_transaction() {
        let foundation = StandaloneFoundation::in_memory();
        let bet = BetContext {
            wager: 100,
            denomination: 1,
            lines: 20,
        };
        assert!(foundation.commit_bet(&bet).is_err());
        open_tx(&foundation);
        assert!(foundation.commit_bet(&bet).unwrap());
        foundation.close_transaction();
    }

    #[test]
    fn enroll_queues_a_response_and_delivery_advances_state() {
        let foundation = StandaloneFoundation::in_memory();
        open_tx(&foundation);
        let bet = BetContext {
            wager: 100,
            denomination: 1,
            lines: 20,
        };
        assert!(foundation.commit_bet(&bet).unwrap());
        assert!(foundation.commit_game_cycle().unwrap());
        foundation.enroll_game_cycle().unwrap();
        assert_eq!(foundation.game_cycle_state(), GameCycleState::EnrollPending);

        let mut seen = Vec::new();
        foundation
            .process_events(&mut |ev| {
                seen.push(ev);
                Ok(())
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![FoundationEvent::EnrollResponse(EnrollResponse {
                success: true
            })]
        );
        assert_eq!(foundation.game_cycle_state(), GameCycleState::Enrolled);
        foundation.close_transaction();
    }

    #[test]
    fn pending_response_is_requeued_after_restart() {
        let store: Arc<dyn CriticalDataStore> =
            Arc::new(crate::critical_data::MemoryStore::new());
        {
            let foundation = StandaloneFoundation::new(store.clone());
            open_tx(&foundation);
            let bet = BetContext {
                wager: 50,
                denomination: 1,
                lines: 5,
            };
            assert!(foundation.commit_bet(&bet).unwrap());
            assert!(foundation.commit_game_cycle().unwrap());
            foundation.enroll_game_cycle().unwrap();
            // Simulated crash: foundation dropped with the response
            // undelivered and the transaction still open.
        }
        let foundation = StandaloneFoundation::new(store);
        assert_eq!(foundation.game_cycle_state(), GameCycleState::EnrollPending);
        let mut seen = 0;
        foundation
            .process_events(&mut |_| {
                seen += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, 1);
        assert_eq!(foundation.game_cycle_state(), GameCycleState::Enrolled);
    }

    #[test]
    fn history_scope_is_denied_through_privileged_path() {
        let foundation = StandaloneFoundation::in_memory();
        assert!(foundation
            .validate_access(CriticalDataScope::History)
            .is_err());
        assert!(foundation
            .validate_access(CriticalDataScope::Payvar)
            .is_ok());
    }
}
