//! The seam between the engine and a concrete game.
//!
//! The engine owns protocol sequencing, persistence and recovery; the
//! game behind [`GameLogic`] owns presentation and evaluation. Every call
//! arrives on the logic thread, inside whatever transaction the current
//! step holds, so implementations may freely use the critical-data
//! surface they were constructed with.

use crate::errors::Result;
use crate::foundation::{BankMeters, BetContext, GameMode, ProgressiveLevel};
use crate::signals::StopToken;

/// A single prize produced by evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prize {
    pub name: String,
    pub amount: i64,
    /// Amount staked to win this prize; zero for line/scatter wins.
    pub risk_amount: i64,
    /// Progressive level this prize pays from, if any.
    pub progressive_level: Option<u32>,
}

impl Prize {
    pub fn new(name: impl Into<String>, amount: i64) -> Self {
        Self {
            name: name.into(),
            amount,
            risk_amount: 0,
            progressive_level: None,
        }
    }
}

/// Result of evaluating one step of base play.
#[derive(Clone, Debug, Default)]
pub struct LogicOutcome {
    pub prizes: Vec<Prize>,
    /// False when the game wants another evaluate/adjust pass (free
    /// spins, multi-stage bonuses) before the outcome is complete.
    pub is_final: bool,
    /// Index of the feature this outcome belongs to.
    pub feature_index: u32,
}

/// A prize staked in a gamble step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GamblePrize {
    pub name: String,
    pub amount: i64,
    pub risk_amount: i64,
}

/// Result of evaluating one gamble step.
#[derive(Clone, Debug, Default)]
pub struct GambleOutcome {
    pub prizes: Vec<GamblePrize>,
    /// False when the player may gamble again on the result.
    pub is_final: bool,
    /// The player backed out instead of resolving the step.
    pub aborted: bool,
}

/// Why the engine is tearing the game down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeInitReason {
    /// Orderly shutdown requested by the host.
    StopRequested,
    /// The engine hit a fatal error and is unwinding.
    Faulted,
}

/// Behavior the engine requires from a game.
///
/// The default-implemented notification methods push display state at the
/// game; a presentation-less game (and the test doubles here) can ignore
/// them.
pub trait GameLogic: Send {
    /// One-time setup after the engine's stores are ready.
    fn init(&mut self, mode: GameMode) -> Result<()>;

    /// Called whenever play becomes possible (fresh start and after each
    /// completed round).
    fn start(&mut self) -> Result<()>;

    /// Blocks until the player commits a bet, a stop arrives, or the game
    /// declines to play. `None` means no round starts.
    fn wait_for_play(&mut self, stop: &StopToken) -> Result<Option<BetContext>>;

    /// Evaluates the committed bet. Called again for each non-final pass.
    fn start_game_cycle(&mut self, bet: &BetContext) -> Result<LogicOutcome>;

    /// Presents the (possibly partial) result to the player.
    fn show_result(&mut self, outcome: &LogicOutcome) -> Result<()>;

    /// Whether the player takes the gamble offer. Only called when the
    /// platform permits ancillary play and there is a win to stake.
    fn offer_gamble(&mut self, win_amount: i64) -> Result<bool>;

    /// Evaluates one gamble step. `first` is true for the opening step,
    /// where an abort must still produce a zero-amount cancel record.
    fn start_gamble(&mut self, first: bool) -> Result<GambleOutcome>;

    /// Presents a gamble step result.
    fn show_gamble_result(&mut self, outcome: &GambleOutcome) -> Result<()>;

    /// The round is complete; presentation may settle.
    fn end_game(&mut self) -> Result<()>;

    /// Awards are being committed to the meters.
    fn finalise(&mut self) -> Result<()>;

    /// Teardown. Must not fail; the engine may already be unwinding.
    fn de_init(&mut self, reason: DeInitReason);

    /// The active presentation context changed (play, history replay,
    /// operator utility). The engine issues no state-mutating platform
    /// calls outside of [`GameMode::Play`]; what to present in the other
    /// contexts is the game's concern.
    fn mode_changed(&mut self, _mode: GameMode) {}

    /// Current cycle/total award values changed.
    fn set_award_values(&mut self, _cycle: i64, _total: i64) {}

    /// Bank meters changed.
    fn set_bank_meters(&mut self, _meters: &BankMeters) {}

    /// Progressive level values changed.
    fn set_progressive_values(&mut self, _levels: &[ProgressiveLevel]) {}

    /// Operator display message changed.
    fn set_display_message(&mut self, _message: &str) {}
}

#[cfg(test)]
pub(crate) mod scripted {
    //! A deterministic game for engine tests: a script of rounds is
    //! played back verbatim and every lifecycle call is journaled.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug)]
    pub enum GambleChoice {
        Decline,
        Play(Vec<GambleOutcome>),
        AbortFirst,
    }

    #[derive(Clone, Debug)]
    pub struct ScriptedRound {
        pub bet: BetContext,
        pub passes: Vec<LogicOutcome>,
        pub gamble: GambleChoice,
    }

    impl ScriptedRound {
        pub fn simple(wager: u64, prizes: Vec<Prize>) -> Self {
            Self {
                bet: BetContext {
                    wager,
                    denomination: 1,
                    lines: 1,
                },
                passes: vec![LogicOutcome {
                    prizes,
                    is_final: true,
                    feature_index: 0,
                }],
                gamble: GambleChoice::Decline,
            }
        }
    }

    #[derive(Default)]
    pub struct Journal {
        pub calls: Vec<String>,
        pub award_updates: Vec<(i64, i64)>,
        pub de_init: Option<DeInitReason>,
    }

    pub struct ScriptedGame {
        rounds: VecDeque<ScriptedRound>,
        current: Option<ScriptedRound>,
        pass: usize,
        gamble_step: usize,
        pub journal: Arc<Mutex<Journal>>,
    }

    impl ScriptedGame {
        pub fn new(rounds: Vec<ScriptedRound>) -> Self {
            Self {
                rounds: rounds.into(),
                current: None,
                pass: 0,
                gamble_step: 0,
                journal: Arc::new(Mutex::new(Journal::default())),
            }
        }

        fn log(&self, call: &str) {
            self.journal.lock().unwrap().calls.push(call.to_string());
        }
    }

    impl GameLogic for ScriptedGame {
        fn init(&mut self, _mode: GameMode) -> Result<()> {
            self.log("init");
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            self.log("start");
            Ok(())
        }

        fn wait_for_play(&mut self, _stop: &StopToken) -> Result<Option<BetContext>> {
            self.log("wait_for_play");
            self.pass = 0;
            self.gamble_step = 0;
            self.current = self.rounds.pop_front();
            Ok(self.current.as_ref().map(|round| round.bet.clone()))
        }

        fn start_game_cycle(&mut self, _bet: &BetContext) -> Result<LogicOutcome> {
            self.log("start_game_cycle");
            let round = self.current.as_ref().ok_or_else(|| {
                crate::errors::EngineError::Logic("no scripted round active".into())
            })?;
            let outcome = round.passes[self.pass].clone();
            self.pass += 1;
            Ok(outcome)
        }

        fn show_result(&mut self, _outcome: &LogicOutcome) -> Result<()> {
            self.log("show_result");
            Ok(())
        }

        fn offer_gamble(&mut self, _win_amount: i64) -> Result<bool> {
            self.log("offer_gamble");
            // A round resumed after a restart has no script left; decline.
            Ok(self
                .current
                .as_ref()
                .is_some_and(|round| !matches!(round.gamble, GambleChoice::Decline)))
        }

        fn start_gamble(&mut self, first: bool) -> Result<GambleOutcome> {
            self.log("start_gamble");
            let round = self.current.as_ref().ok_or_else(|| {
                crate::errors::EngineError::Logic("no scripted round active".into())
            })?;
            match &round.gamble {
                GambleChoice::Decline => Err(crate::errors::EngineError::Logic(
                    "gamble started after decline".into(),
                )),
                GambleChoice::AbortFirst => {
                    assert!(first, "abort script only covers the first step");
                    Ok(GambleOutcome {
                        prizes: vec![],
                        is_final: true,
                        aborted: true,
                    })
                }
                GambleChoice::Play(steps) => {
                    let outcome = steps[self.gamble_step].clone();
                    self.gamble_step += 1;
                    Ok(outcome)
                }
            }
        }

        fn show_gamble_result(&mut self, _outcome: &GambleOutcome) -> Result<()> {
            self.log("show_gamble_result");
            Ok(())
        }

        fn end_game(&mut self) -> Result<()> {
            self.log("end_game");
            Ok(())
        }

        fn finalise(&mut self) -> Result<()> {
            self.log("finalise");
            Ok(())
        }

        fn de_init(&mut self, reason: DeInitReason) {
            self.log("de_init");
            self.journal.lock().unwrap().de_init = Some(reason);
        }

        fn set_award_values(&mut self, cycle: i64, total: i64) {
            self.journal
                .lock()
                .unwrap()
                .award_updates
                .push((cycle, total));
        }
    }
}
