//! The platform boundary.
//!
//! [`Foundation`] is everything the engine consumes from the regulated
//! platform: transaction open/close, the public critical-data surface, the
//! game-cycle protocol calls and asynchronous event delivery. The engine
//! never talks to the platform except through this trait, so a standalone
//! in-process simulator ([`StandaloneFoundation`]) can stand in for the
//! real thing in tests and unregulated deployments.

mod standalone;

pub use standalone::{StandaloneBehavior, StandaloneFoundation};

use crate::critical_data::CriticalDataScope;
use crate::errors::Result;
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

/// Result of asking the platform for a new transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateTransactionResult {
    /// Transaction opened.
    Created,
    /// The platform refuses to open while delivery-pending events exist;
    /// the caller must drain them and retry.
    EventWaitingForProcess,
    /// Any other failure. Fatal.
    Failed(String),
}

/// Foundation-side view of the game-cycle lifecycle, queryable by the
/// engine. Used on post-crash resume to decide whether an in-flight request
/// was already accepted and must not be re-issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameCycleState {
    Idle,
    Committed,
    EnrollPending,
    Enrolled,
    Playing,
    EvaluatePending,
    AncillaryPlaying,
    FinalizePending,
    Finalized,
}

/// Bet parameters the player committed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetContext {
    /// Total wager in base units.
    pub wager: u64,
    /// Credit denomination in base units.
    pub denomination: u64,
    /// Number of active lines.
    pub lines: u32,
}

/// Enroll response. Absence of this response after a wait is a soft
/// failure: the engine treats it like a rejected enrollment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollResponse {
    pub success: bool,
}

/// Acknowledgment of an adjust-outcome submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeResponse {
    pub accepted: bool,
}

/// Acknowledgment that the round's payout may be committed to meters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub committed: bool,
}

/// The one pending protocol response, persisted in the response slot.
/// Variants are mutually exclusive by engine phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoundationResponse {
    Enroll(EnrollResponse),
    Outcome(OutcomeResponse),
    Finalize(FinalizeResponse),
}

/// Classification of a single gamble prize against its staked amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GambleResult {
    Win,
    Tie,
    Loss,
    /// Formal conclusion of an ancillary game that was aborted before any
    /// prize resolved; keeps the ledger from silently dropping the game.
    Cancel,
}

/// Progressive hit attached to a feature award.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressiveAward {
    pub level: u32,
    pub amount: u64,
}

/// One entry of an outcome list submitted to the foundation.
///
/// Risk awards use a different regulatory accounting bucket than ordinary
/// feature wins, which is why they are distinct records rather than
/// feature awards with a flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AwardRecord {
    Feature {
        feature_index: u32,
        name: String,
        amount: u64,
        progressive: Option<ProgressiveAward>,
    },
    Risk {
        name: String,
        amount: u64,
        risk_amount: u64,
    },
    Ancillary {
        result: GambleResult,
        amount: u64,
        risk_amount: u64,
    },
}

/// Outcome list for one adjust-outcome exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeList {
    pub records: Vec<AwardRecord>,
}

impl OutcomeList {
    pub fn new(records: Vec<AwardRecord>) -> Self {
        Self { records }
    }
}

/// Presentation modes a theme context can activate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMode {
    Play,
    History,
    Utility,
}

/// Broadcast value of one progressive level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressiveLevel {
    pub level: u32,
    pub amount: u64,
}

/// Player-bank meters pushed by the foundation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankMeters {
    pub bank: u64,
    pub wagerable: u64,
    pub paid: u64,
}

/// Asynchronous events delivered by the foundation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FoundationEvent {
    EnrollResponse(EnrollResponse),
    OutcomeResponse(OutcomeResponse),
    FinalizeResponse(FinalizeResponse),
    Park,
    Unpark,
    Shutdown,
    ThemeContextActivated(GameMode),
    ThemeContextInactivated,
    ProgressiveBroadcast(Vec<ProgressiveLevel>),
    BankMetersChanged(BankMeters),
}

/// Handler invoked once per delivered event, inside whatever transaction is
/// open during delivery.
pub type EventHandler<'a> = &'a mut dyn FnMut(FoundationEvent) -> Result<()>;

/// The platform/runtime that owns game-cycle transactional state and
/// critical-data persistence.
///
/// State-mutating protocol calls and critical-data writes require an open
/// transaction; implementations must reject them otherwise.
pub trait Foundation: Send + Sync {
    // --- transactions ---

    fn transaction_open(&self) -> bool;

    fn create_transaction(&self) -> CreateTransactionResult;

    fn close_transaction(&self);

    // --- events ---

    /// Signal channel pinged whenever an event is queued for delivery.
    fn event_signal(&self) -> Receiver<()>;

    /// Delivers every queued event to `handler`, opening an implicit
    /// transaction around delivery if none is open. Returns the number of
    /// events delivered; stops early if the handler fails.
    fn process_events(&self, handler: EventHandler<'_>) -> Result<usize>;

    // --- public critical-data surface ---

    fn write_critical_data(&self, scope: CriticalDataScope, path: &str, data: &[u8]) -> Result<()>;

    fn read_critical_data(&self, scope: CriticalDataScope, path: &str) -> Result<Option<Vec<u8>>>;

    fn remove_critical_data(&self, scope: CriticalDataScope, path: &str) -> Result<bool>;

    // --- game-cycle protocol ---

    fn game_cycle_state(&self) -> GameCycleState;

    /// Reserves the bet; `false` means the platform rejected it.
    fn commit_bet(&self, bet: &BetContext) -> Result<bool>;

    fn uncommit_bet(&self) -> Result<()>;

    /// Commits the wager to the cycle; `false` means rejection.
    fn commit_game_cycle(&self) -> Result<bool>;

    fn uncommit_game_cycle(&self) -> Result<()>;

    /// Issues the asynchronous enroll request; the response arrives as an
    /// [`FoundationEvent::EnrollResponse`].
    fn enroll_game_cycle(&self) -> Result<()>;

    /// Asks the platform to let play begin; `false` means rejection.
    fn start_playing(&self) -> Result<bool>;

    /// Submits a computed outcome; the ack arrives as an
    /// [`FoundationEvent::OutcomeResponse`].
    fn adjust_outcome(&self, outcome: &OutcomeList, is_final: bool) -> Result<()>;

    /// Read-only query: would the platform allow an ancillary (gamble)
    /// round for the current cycle?
    fn ancillary_permitted(&self) -> Result<bool>;

    fn start_ancillary_play(&self) -> Result<bool>;

    /// Issues the asynchronous finalize request; the response arrives as an
    /// [`FoundationEvent::FinalizeResponse`].
    fn finalize_outcome(&self) -> Result<()>;

    /// Closes the round; `history_steps` tells the history log how many
    /// presentation steps to retain. Clears game-cycle scoped critical
    /// data.
    fn end_game_cycle(&self, history_steps: u32) -> Result<()>;
}
