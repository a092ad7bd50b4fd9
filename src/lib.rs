//! Spindle binds a slot game's logic to a regulated gaming platform.
//!
//! The platform owns money, meters and durability; the game owns
//! evaluation and presentation. Spindle sits between them: it drives one
//! round at a time through a durable state machine, wraps every business
//! step in a platform transaction, correlates asynchronous protocol
//! responses, and records enough in critical data that a power loss at
//! any instant resumes the round instead of losing it.
//!
//! A host embeds the crate through [`EngineController`], which runs the
//! engine on a dedicated logic thread against a [`Foundation`]
//! implementation, either the real platform binding or the in-process
//! [`StandaloneFoundation`] simulator. The game plugs in behind
//! [`GameLogic`].
//!
//! [`Foundation`]: foundation::Foundation
//! [`StandaloneFoundation`]: foundation::StandaloneFoundation
//! [`GameLogic`]: logic::GameLogic

pub mod config;
pub mod controller;
pub mod correlator;
pub mod critical_data;
pub mod engine;
pub mod errors;
pub mod foundation;
pub mod logic;
pub mod shim;
pub mod signals;
pub mod transaction;

pub use config::{DeploymentMode, EngineConfig};
pub use controller::EngineController;
pub use engine::{EngineState, GameEngine};
pub use errors::{EngineError, Result};

/// Installs the process-wide tracing subscriber, filtered by `RUST_LOG`.
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
