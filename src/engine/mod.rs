//! The game-cycle engine.
//!
//! A single logic thread drives one round at a time through a durable
//! state machine. Each step runs inside its own transient transaction and
//! persists the next state before the transaction closes, so after a
//! power loss the engine re-enters exactly the step it was in. Requests
//! whose responses arrive asynchronously (enroll, adjust-outcome,
//! finalize) are issued in the step that precedes the wait state, which
//! is what makes resume safe: re-entering a wait state never re-issues
//! the request.

pub mod meters;
pub mod outcome;

use self::meters::{AwardMeters, Rational};
use self::outcome::{build_gamble_list, build_outcome_list, GambleSubmission};
use crate::config::EngineConfig;
use crate::correlator::{ArmedExchange, Correlator, ExchangeKind};
use crate::critical_data::{CriticalDataScope, PassthroughCriticalData};
use crate::errors::{EngineError, Result};
use crate::foundation::{
    BetContext, Foundation, FoundationEvent, FoundationResponse, GameCycleState, GameMode,
};
use crate::logic::{DeInitReason, GameLogic, GambleOutcome, LogicOutcome};
use crate::shim::{paths, FoundationShim};
use crate::signals::{EngineStatus, StopToken};
use crate::transaction::{self, TransientTransaction};
use crossbeam_channel::{select, Receiver};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// How long a soft-absence deployment waits before declaring a protocol
/// response lost. Only applies when the configuration allows softness.
const SOFT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(200);

/// Durable engine states. The persisted value is the last transition that
/// durably completed; resume re-enters that state's step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Idle,
    AwaitEnrollComplete,
    StartGameCycle,
    AwaitOutcomeResponse,
    ShowResult,
    LogicGameComplete,
    OfferGamble,
    StartGamble,
    ContinueGamble,
    AwaitGambleOutcomeResponse,
    AwaitAbortGambleOutcomeResponse,
    ShowGambleResult,
    AwaitFinalize,
    Finalize,
    History,
    Utility,
}

/// In-flight round bookkeeping, persisted in game-cycle scope so a resumed
/// engine knows what the interrupted round was doing. Cleared by the
/// platform when the cycle ends.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct CycleContext {
    bet: BetContext,
    /// The last evaluate pass completed the base game.
    outcome_final: bool,
    /// Non-risk winnings of the pass awaiting its outcome response.
    pending_award: i64,
    /// Winnings of the gamble step awaiting its outcome response.
    pending_gamble_award: i64,
    /// The last gamble step ended the ancillary game.
    gamble_final: bool,
}

/// The engine. Owns the logic thread's entire world: the platform handle,
/// the typed critical-data view, the correlator and the game behind
/// [`GameLogic`].
pub struct GameEngine {
    config: EngineConfig,
    shim: FoundationShim,
    correlator: Correlator,
    logic: Box<dyn GameLogic>,
    stop: StopToken,
    start_rx: Receiver<()>,
    status: Arc<EngineStatus>,
    event_signal: Receiver<()>,

    armed: Option<ArmedExchange>,
    pending_mode: Option<GameMode>,
    meters: AwardMeters,
    history_steps: u32,
    /// Presentation payloads live only in memory; after a resume the
    /// corresponding show step is skipped and history carries the record.
    last_outcome: Option<LogicOutcome>,
    last_gamble: Option<GambleOutcome>,
}

impl GameEngine {
    /// Engine over the platform's public critical-data surface, as used
    /// in standalone and test deployments.
    pub fn new(
        config: EngineConfig,
        foundation: Arc<dyn Foundation>,
        logic: Box<dyn GameLogic>,
        stop: StopToken,
        start_rx: Receiver<()>,
        status: Arc<EngineStatus>,
    ) -> Self {
        let raw = Box::new(PassthroughCriticalData::new(foundation.clone()));
        Self::with_raw_access(config, foundation, raw, logic, stop, start_rx, status)
    }

    /// Engine over an explicit raw critical-data path. Platform bindings
    /// whose public surface withholds raw byte access pass
    /// [`crate::critical_data::PrivilegedCriticalData`] here.
    pub fn with_raw_access(
        config: EngineConfig,
        foundation: Arc<dyn Foundation>,
        raw: Box<dyn crate::critical_data::RawCriticalData>,
        logic: Box<dyn GameLogic>,
        stop: StopToken,
        start_rx: Receiver<()>,
        status: Arc<EngineStatus>,
    ) -> Self {
        let event_signal = foundation.event_signal();
        Self {
            config,
            shim: FoundationShim::new(foundation, raw),
            correlator: Correlator::new(),
            logic,
            stop,
            start_rx,
            status,
            event_signal,
            armed: None,
            pending_mode: None,
            meters: AwardMeters::default(),
            history_steps: 0,
            last_outcome: None,
            last_gamble: None,
        }
    }

    /// Runs the engine until a stop is requested or a fatal error occurs.
    /// The game is always torn down, with the reason it is being torn
    /// down for.
    pub fn run(&mut self) -> Result<()> {
        match self.run_inner() {
            Err(e) if e.is_stop() => {
                tracing::info!("engine stopping on request");
                self.logic.de_init(DeInitReason::StopRequested);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "engine faulted");
                self.logic.de_init(DeInitReason::Faulted);
                Err(e)
            }
            Ok(()) => {
                self.logic.de_init(DeInitReason::StopRequested);
                Ok(())
            }
        }
    }

    fn run_inner(&mut self) -> Result<()> {
        self.status.initialising.store(true, Ordering::SeqCst);
        let mut state: EngineState = self
            .shim
            .read(CriticalDataScope::Payvar, paths::ENGINE_STATE)?
            .unwrap_or(EngineState::Idle);
        self.meters = AwardMeters::load(&self.shim)?;
        self.history_steps = self
            .shim
            .read(CriticalDataScope::Payvar, paths::HISTORY_STEP_COUNT)?
            .unwrap_or(0);
        self.logic.init(GameMode::Play)?;
        self.logic.start()?;
        self.status
            .in_round
            .store(state != EngineState::Idle, Ordering::SeqCst);
        self.status.initialising.store(false, Ordering::SeqCst);
        tracing::info!(theme = %self.config.theme, mode = ?self.config.mode, "engine ready");
        if state != EngineState::Idle {
            tracing::info!(?state, "resuming an interrupted round");
        }

        loop {
            state = self.step(state)?;
        }
    }

    fn step(&mut self, state: EngineState) -> Result<EngineState> {
        tracing::debug!(?state, "engine step");
        match state {
            EngineState::Idle => self.step_idle(),
            EngineState::AwaitEnrollComplete => self.step_await_enroll(),
            EngineState::StartGameCycle => self.step_start_game_cycle(),
            EngineState::AwaitOutcomeResponse => self.step_await_outcome(),
            EngineState::ShowResult => self.step_show_result(),
            EngineState::LogicGameComplete => self.step_logic_game_complete(),
            EngineState::OfferGamble => self.step_offer_gamble(),
            EngineState::StartGamble => self.step_gamble(true),
            EngineState::ContinueGamble => self.step_gamble(false),
            EngineState::AwaitGambleOutcomeResponse => self.step_await_gamble_outcome(),
            EngineState::AwaitAbortGambleOutcomeResponse => self.step_await_abort_outcome(),
            EngineState::ShowGambleResult => self.step_show_gamble_result(),
            EngineState::AwaitFinalize => self.step_await_finalize(),
            EngineState::Finalize => self.step_finalize(),
            EngineState::History | EngineState::Utility => self.step_passive(state),
        }
    }

    // --- plumbing ---

    fn open_tx(&mut self) -> Result<TransientTransaction> {
        let foundation = self.shim.foundation();
        let stop = self.stop.clone();
        transaction::open(&foundation, &stop, &mut || self.pump_events())
    }

    /// Persists the completed transition, then closes the step's
    /// transaction. This ordering is the durability contract: a state is
    /// only ever read back if the whole step it concludes was committed.
    fn finish_step(
        &mut self,
        tx: TransientTransaction,
        next: EngineState,
    ) -> Result<EngineState> {
        self.shim
            .write(CriticalDataScope::Payvar, paths::ENGINE_STATE, &next)?;
        drop(tx);
        Ok(next)
    }

    fn pump_events(&mut self) -> Result<()> {
        let foundation = self.shim.foundation();
        foundation.process_events(&mut |event| self.handle_event(event))?;
        Ok(())
    }

    fn handle_event(&mut self, event: FoundationEvent) -> Result<()> {
        tracing::trace!(?event, "foundation event");
        match event {
            FoundationEvent::EnrollResponse(r) => self
                .correlator
                .on_response(&self.shim, FoundationResponse::Enroll(r)),
            FoundationEvent::OutcomeResponse(r) => self
                .correlator
                .on_response(&self.shim, FoundationResponse::Outcome(r)),
            FoundationEvent::FinalizeResponse(r) => self
                .correlator
                .on_response(&self.shim, FoundationResponse::Finalize(r)),
            FoundationEvent::Park => {
                self.status.paused.store(true, Ordering::SeqCst);
                Ok(())
            }
            FoundationEvent::Unpark => {
                self.status.paused.store(false, Ordering::SeqCst);
                Ok(())
            }
            FoundationEvent::Shutdown => Err(EngineError::StopForced),
            FoundationEvent::ThemeContextActivated(mode) => {
                self.pending_mode = Some(mode);
                Ok(())
            }
            FoundationEvent::ThemeContextInactivated => {
                self.pending_mode = Some(GameMode::Play);
                Ok(())
            }
            FoundationEvent::ProgressiveBroadcast(levels) => {
                self.logic.set_progressive_values(&levels);
                Ok(())
            }
            FoundationEvent::BankMetersChanged(m) => {
                self.logic.set_bank_meters(&m);
                Ok(())
            }
        }
    }

    /// Waits for the response of the armed exchange; arms it first if this
    /// is a resumed wait. Returns whether a response is available, which
    /// includes one persisted before a restart.
    fn wait_for_response(&mut self, kind: ExchangeKind) -> Result<bool> {
        if self.armed.is_none() {
            self.armed = Some(self.correlator.arm(kind)?);
        }
        if self
            .shim
            .exists(CriticalDataScope::GameCycle, paths::FOUNDATION_RESPONSE)?
        {
            return Ok(true);
        }
        let timeout = self
            .config
            .response_absence_is_soft()
            .then_some(SOFT_RESPONSE_TIMEOUT);
        let correlator = self.correlator.clone();
        let stop = self.stop.clone();
        let signal = self.event_signal.clone();
        correlator.suspend(&stop, &signal, timeout, &mut || self.pump_events())
    }

    /// Consumes the persisted response. Must run inside a transaction.
    fn consume_response(&mut self, kind: ExchangeKind) -> Result<Option<FoundationResponse>> {
        self.armed = None;
        self.correlator.take(&self.shim, kind)
    }

    fn read_context(&self) -> Result<CycleContext> {
        self.shim
            .read(CriticalDataScope::GameCycle, paths::CYCLE_CONTEXT)?
            .ok_or_else(|| {
                EngineError::ProtocolViolation("round in progress with no cycle context".into())
            })
    }

    fn write_context(&self, context: &CycleContext) -> Result<()> {
        self.shim
            .write(CriticalDataScope::GameCycle, paths::CYCLE_CONTEXT, context)
    }

    fn notify_awards(&mut self) {
        let cycle = self.meters.cycle.units();
        let total = self.meters.total.units();
        self.logic.set_award_values(cycle, total);
    }

    /// Resets all round-scoped state. Must run inside a transaction.
    fn clear_round(&mut self) -> Result<()> {
        self.shim
            .remove(CriticalDataScope::GameCycle, paths::CYCLE_CONTEXT)?;
        self.shim
            .remove(CriticalDataScope::GameCycle, paths::OFFER_GAMBLE)?;
        self.shim
            .remove(CriticalDataScope::GameCycle, paths::FOUNDATION_RESPONSE)?;
        self.meters.reset();
        self.meters.store(&self.shim)?;
        self.history_steps = 0;
        self.shim.write(
            CriticalDataScope::Payvar,
            paths::HISTORY_STEP_COUNT,
            &self.history_steps,
        )?;
        self.last_outcome = None;
        self.last_gamble = None;
        self.status.in_round.store(false, Ordering::SeqCst);
        self.notify_awards();
        Ok(())
    }

    /// Issues the finalize request unless a previous attempt already got
    /// it in flight (or through), which happens on resume.
    fn issue_finalize(&mut self) -> Result<()> {
        let foundation = self.shim.foundation();
        match foundation.game_cycle_state() {
            GameCycleState::FinalizePending | GameCycleState::Finalized => Ok(()),
            _ => {
                self.armed = Some(self.correlator.arm(ExchangeKind::Finalize)?);
                foundation.finalize_outcome()
            }
        }
    }

    /// A waited-for response never came. Soft deployments abandon the
    /// round; everywhere else this is a protocol violation.
    fn absent_response(&mut self, what: &str) -> Result<EngineState> {
        if !self.config.response_absence_is_soft() {
            return Err(EngineError::ProtocolViolation(format!(
                "{what} response never arrived"
            )));
        }
        tracing::warn!(what, "response absent, abandoning the round");
        let tx = self.open_tx()?;
        self.clear_round()?;
        self.finish_step(tx, EngineState::Idle)
    }

    // --- steps ---

    fn step_idle(&mut self) -> Result<EngineState> {
        self.pump_events()?;
        if let Some(mode) = self.pending_mode.take() {
            match mode {
                GameMode::History => {
                    self.logic.mode_changed(GameMode::History);
                    return Ok(EngineState::History);
                }
                GameMode::Utility => {
                    self.logic.mode_changed(GameMode::Utility);
                    return Ok(EngineState::Utility);
                }
                GameMode::Play => {}
            }
        }
        if !self.status.is_paused() {
            let stop = self.stop.clone();
            if let Some(bet) = self.logic.wait_for_play(&stop)? {
                return self.begin_round(bet);
            }
        }
        self.idle_wait()?;
        Ok(EngineState::Idle)
    }

    /// Blocks until something worth re-entering the idle step for: a stop,
    /// a host start poke, or a foundation event.
    fn idle_wait(&self) -> Result<()> {
        select! {
            recv(self.stop.receiver()) -> _ => return Err(EngineError::StopForced),
            recv(self.start_rx) -> msg => {
                // A disconnected start channel means the host is gone.
                if msg.is_err() {
                    return Err(EngineError::StopForced);
                }
            }
            recv(self.event_signal) -> msg => {
                if msg.is_err() {
                    return Err(EngineError::ProtocolViolation(
                        "foundation event channel closed".into(),
                    ));
                }
            }
        }
        self.stop.check()
    }

    fn begin_round(&mut self, bet: BetContext) -> Result<EngineState> {
        let tx = self.open_tx()?;
        let foundation = self.shim.foundation();

        if foundation.game_cycle_state() == GameCycleState::Idle
            && !foundation.commit_bet(&bet)?
        {
            tracing::info!(wager = bet.wager, "bet rejected");
            return self.finish_step(tx, EngineState::Idle);
        }
        if !foundation.commit_game_cycle()? {
            tracing::info!("game cycle rejected, releasing the bet");
            foundation.uncommit_bet()?;
            return self.finish_step(tx, EngineState::Idle);
        }

        self.status.in_round.store(true, Ordering::SeqCst);
        self.armed = Some(self.correlator.arm(ExchangeKind::Enroll)?);
        foundation.enroll_game_cycle()?;
        self.write_context(&CycleContext {
            bet,
            outcome_final: false,
            pending_award: 0,
            pending_gamble_award: 0,
            gamble_final: false,
        })?;
        self.finish_step(tx, EngineState::AwaitEnrollComplete)
    }

    fn step_await_enroll(&mut self) -> Result<EngineState> {
        let answered = self.wait_for_response(ExchangeKind::Enroll)?;
        let tx = self.open_tx()?;
        let response = if answered {
            self.consume_response(ExchangeKind::Enroll)?
        } else {
            self.armed = None;
            None
        };

        if let Some(FoundationResponse::Enroll(r)) = response {
            if r.success {
                // The round's accounting starts from zero at enrollment.
                self.meters.reset();
                self.meters.store(&self.shim)?;
                return self.finish_step(tx, EngineState::StartGameCycle);
            }
        }

        // Rejected, or the response never came: either way the round
        // unwinds without having played.
        tracing::info!("enrollment failed, returning to idle");
        let foundation = self.shim.foundation();
        if foundation.game_cycle_state() == GameCycleState::EnrollPending {
            foundation.uncommit_game_cycle()?;
        }
        if foundation.game_cycle_state() == GameCycleState::Committed {
            foundation.uncommit_bet()?;
        }
        self.clear_round()?;
        self.finish_step(tx, EngineState::Idle)
    }

    fn step_start_game_cycle(&mut self) -> Result<EngineState> {
        let tx = self.open_tx()?;
        let foundation = self.shim.foundation();
        if foundation.game_cycle_state() == GameCycleState::Enrolled
            && !foundation.start_playing()?
        {
            // Same soft unwind as a failed enrollment: the round ends
            // before it played.
            tracing::info!("start of play rejected, returning to idle");
            if foundation.game_cycle_state() == GameCycleState::Enrolled {
                foundation.uncommit_game_cycle()?;
            }
            if foundation.game_cycle_state() == GameCycleState::Committed {
                foundation.uncommit_bet()?;
            }
            self.clear_round()?;
            return self.finish_step(tx, EngineState::Idle);
        }

        let mut context = self.read_context()?;
        let evaluated = self.logic.start_game_cycle(&context.bet)?;
        let round = build_outcome_list(&evaluated)?;
        context.outcome_final = evaluated.is_final;
        context.pending_award = round.non_risk_total;
        self.write_context(&context)?;
        self.last_outcome = Some(evaluated);

        self.armed = Some(self.correlator.arm(ExchangeKind::Outcome)?);
        foundation.adjust_outcome(&round.list, context.outcome_final)?;
        self.finish_step(tx, EngineState::AwaitOutcomeResponse)
    }

    fn step_await_outcome(&mut self) -> Result<EngineState> {
        let answered = self.wait_for_response(ExchangeKind::Outcome)?;
        let tx = self.open_tx()?;
        let response = if answered {
            self.consume_response(ExchangeKind::Outcome)?
        } else {
            self.armed = None;
            None
        };

        match response {
            Some(FoundationResponse::Outcome(r)) if r.accepted => {
                let context = self.read_context()?;
                self.meters
                    .apply_step(Rational::from_units(context.pending_award));
                self.meters.store(&self.shim)?;
                self.notify_awards();
                self.finish_step(tx, EngineState::ShowResult)
            }
            Some(FoundationResponse::Outcome(_)) => Err(EngineError::ProtocolViolation(
                "outcome submission rejected".into(),
            )),
            Some(other) => Err(EngineError::ProtocolViolation(format!(
                "unexpected response {other:?} while awaiting outcome"
            ))),
            None => {
                drop(tx);
                self.absent_response("outcome")
            }
        }
    }

    fn step_show_result(&mut self) -> Result<EngineState> {
        let tx = self.open_tx()?;
        let context = self.read_context()?;
        if let Some(evaluated) = self.last_outcome.take() {
            self.logic.show_result(&evaluated)?;
        }
        self.history_steps += 1;
        self.shim.write(
            CriticalDataScope::Payvar,
            paths::HISTORY_STEP_COUNT,
            &self.history_steps,
        )?;
        let next = if context.outcome_final {
            EngineState::LogicGameComplete
        } else {
            EngineState::StartGameCycle
        };
        self.finish_step(tx, next)
    }

    fn step_logic_game_complete(&mut self) -> Result<EngineState> {
        let tx = self.open_tx()?;
        self.logic.end_game()?;

        // The offer decision is made exactly once per round; re-entry
        // after a restart reads the cached decision instead of asking the
        // platform again.
        let offered = match self
            .shim
            .read::<bool>(CriticalDataScope::GameCycle, paths::OFFER_GAMBLE)?
        {
            Some(cached) => cached,
            None => {
                let win = self.meters.total.units();
                let offered = win > 0 && self.shim.foundation().ancillary_permitted()?;
                self.shim
                    .write(CriticalDataScope::GameCycle, paths::OFFER_GAMBLE, &offered)?;
                offered
            }
        };

        self.meters.mark_wagerable();
        self.meters.store(&self.shim)?;

        if offered {
            self.finish_step(tx, EngineState::OfferGamble)
        } else {
            self.issue_finalize()?;
            self.finish_step(tx, EngineState::AwaitFinalize)
        }
    }

    fn step_offer_gamble(&mut self) -> Result<EngineState> {
        let tx = self.open_tx()?;
        let win = self.meters.total.units();
        if self.logic.offer_gamble(win)? {
            let foundation = self.shim.foundation();
            let started = foundation.game_cycle_state() == GameCycleState::AncillaryPlaying
                || foundation.start_ancillary_play()?;
            if started {
                return self.finish_step(tx, EngineState::StartGamble);
            }
            tracing::info!("ancillary play refused by the platform");
        }
        self.issue_finalize()?;
        self.finish_step(tx, EngineState::AwaitFinalize)
    }

    fn step_gamble(&mut self, first: bool) -> Result<EngineState> {
        let tx = self.open_tx()?;
        let mut context = self.read_context()?;
        let evaluated = self.logic.start_gamble(first)?;
        let submission = build_gamble_list(&evaluated, first)?;

        let next = match &submission {
            GambleSubmission::Resolved { win_total, .. } => {
                context.pending_gamble_award = *win_total;
                EngineState::AwaitGambleOutcomeResponse
            }
            GambleSubmission::Aborted { .. } => {
                context.pending_gamble_award = 0;
                EngineState::AwaitAbortGambleOutcomeResponse
            }
        };
        context.gamble_final = evaluated.is_final || evaluated.aborted;
        self.write_context(&context)?;
        self.last_gamble = Some(evaluated);

        self.armed = Some(self.correlator.arm(ExchangeKind::Outcome)?);
        self.shim
            .foundation()
            .adjust_outcome(submission.list(), context.gamble_final)?;
        self.finish_step(tx, next)
    }

    fn step_await_gamble_outcome(&mut self) -> Result<EngineState> {
        let answered = self.wait_for_response(ExchangeKind::Outcome)?;
        let tx = self.open_tx()?;
        let response = if answered {
            self.consume_response(ExchangeKind::Outcome)?
        } else {
            self.armed = None;
            None
        };

        match response {
            Some(FoundationResponse::Outcome(r)) if r.accepted => {
                let context = self.read_context()?;
                self.meters
                    .apply_step(Rational::from_units(context.pending_gamble_award));
                self.meters.store(&self.shim)?;
                self.notify_awards();
                self.finish_step(tx, EngineState::ShowGambleResult)
            }
            Some(FoundationResponse::Outcome(_)) => Err(EngineError::ProtocolViolation(
                "gamble outcome submission rejected".into(),
            )),
            Some(other) => Err(EngineError::ProtocolViolation(format!(
                "unexpected response {other:?} while awaiting gamble outcome"
            ))),
            None => {
                drop(tx);
                self.absent_response("gamble outcome")
            }
        }
    }

    fn step_await_abort_outcome(&mut self) -> Result<EngineState> {
        let answered = self.wait_for_response(ExchangeKind::Outcome)?;
        let tx = self.open_tx()?;
        let response = if answered {
            self.consume_response(ExchangeKind::Outcome)?
        } else {
            self.armed = None;
            None
        };

        match response {
            Some(FoundationResponse::Outcome(r)) if r.accepted => {
                self.issue_finalize()?;
                self.finish_step(tx, EngineState::AwaitFinalize)
            }
            Some(other) => Err(EngineError::ProtocolViolation(format!(
                "gamble abort not acknowledged: {other:?}"
            ))),
            None => {
                drop(tx);
                self.absent_response("gamble abort outcome")
            }
        }
    }

    fn step_show_gamble_result(&mut self) -> Result<EngineState> {
        let tx = self.open_tx()?;
        let context = self.read_context()?;
        if let Some(evaluated) = self.last_gamble.take() {
            self.logic.show_gamble_result(&evaluated)?;
        }
        self.history_steps += 1;
        self.shim.write(
            CriticalDataScope::Payvar,
            paths::HISTORY_STEP_COUNT,
            &self.history_steps,
        )?;
        if context.gamble_final {
            self.issue_finalize()?;
            self.finish_step(tx, EngineState::AwaitFinalize)
        } else {
            self.finish_step(tx, EngineState::ContinueGamble)
        }
    }

    fn step_await_finalize(&mut self) -> Result<EngineState> {
        let answered = self.wait_for_response(ExchangeKind::Finalize)?;
        let tx = self.open_tx()?;
        let response = if answered {
            self.consume_response(ExchangeKind::Finalize)?
        } else {
            self.armed = None;
            None
        };

        match response {
            Some(FoundationResponse::Finalize(r)) if r.committed => {
                self.finish_step(tx, EngineState::Finalize)
            }
            Some(other) => Err(EngineError::ProtocolViolation(format!(
                "finalize not committed: {other:?}"
            ))),
            None => {
                drop(tx);
                self.absent_response("finalize")
            }
        }
    }

    fn step_finalize(&mut self) -> Result<EngineState> {
        let tx = self.open_tx()?;
        self.logic.finalise()?;
        let foundation = self.shim.foundation();
        if foundation.game_cycle_state() == GameCycleState::Finalized {
            foundation.end_game_cycle(self.history_steps)?;
        }
        self.clear_round()?;
        let next = self.finish_step(tx, EngineState::Idle)?;
        // Play becomes possible again only once the round is fully closed.
        self.logic.start()?;
        Ok(next)
    }

    /// History and utility contexts: the engine holds its position and
    /// keeps servicing events until the context deactivates.
    fn step_passive(&mut self, state: EngineState) -> Result<EngineState> {
        self.pump_events()?;
        if let Some(mode) = self.pending_mode.take() {
            self.logic.mode_changed(mode);
            return Ok(match mode {
                GameMode::Play => EngineState::Idle,
                GameMode::History => EngineState::History,
                GameMode::Utility => EngineState::Utility,
            });
        }
        select! {
            recv(self.stop.receiver()) -> _ => return Err(EngineError::StopForced),
            recv(self.event_signal) -> msg => {
                if msg.is_err() {
                    return Err(EngineError::ProtocolViolation(
                        "foundation event channel closed".into(),
                    ));
                }
            }
        }
        self.stop.check()?;
        Ok(state)
    }
}
