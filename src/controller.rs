//! Host-side handle over the logic thread.
//!
//! The host never touches the engine directly: it spawns the thread
//! through [`EngineController`], pokes it when play should be attempted,
//! reads the advisory status flags, and requests a stop when tearing the
//! process down.

use crate::config::EngineConfig;
use crate::engine::GameEngine;
use crate::errors::{EngineError, Result};
use crate::foundation::Foundation;
use crate::logic::GameLogic;
use crate::signals::{stop_pair, EngineStatus, StopHandle};
use crossbeam_channel::{unbounded, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Running engine. Dropping the controller without [`request_stop`] makes
/// the logic thread exit the next time it reaches idle.
///
/// [`request_stop`]: EngineController::request_stop
pub struct EngineController {
    stop: StopHandle,
    start_tx: Sender<()>,
    status: Arc<EngineStatus>,
    last_error: Arc<Mutex<Option<String>>>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl EngineController {
    /// Validates the configuration and spawns the logic thread.
    pub fn spawn(
        config: EngineConfig,
        foundation: Arc<dyn Foundation>,
        logic: Box<dyn GameLogic>,
    ) -> Result<Self> {
        config.validate()?;
        let (stop, token) = stop_pair();
        let (start_tx, start_rx) = unbounded();
        let status = Arc::new(EngineStatus::default());

        let mut engine = GameEngine::new(
            config,
            foundation,
            logic,
            token,
            start_rx,
            status.clone(),
        );
        let last_error = Arc::new(Mutex::new(None));
        let error_slot = last_error.clone();
        let thread = std::thread::Builder::new()
            .name("game-logic".into())
            .spawn(move || {
                let result = engine.run();
                if let Err(e) = &result {
                    *error_slot.lock().unwrap() = Some(e.to_string());
                }
                result
            })
            .map_err(|e| EngineError::Logic(format!("failed to spawn logic thread: {e}")))?;

        Ok(Self {
            stop,
            start_tx,
            status,
            last_error,
            thread: Some(thread),
        })
    }

    /// Nudges the idle engine to ask the game for a bet. Harmless when a
    /// round is already in progress.
    pub fn start_game(&self) {
        let _ = self.start_tx.send(());
    }

    /// Requests an orderly stop. Returns immediately; use [`join`] to wait
    /// for the thread.
    ///
    /// [`join`]: EngineController::join
    pub fn request_stop(&self) {
        self.stop.request();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_requested()
    }

    /// Advisory status flags. Informational only.
    pub fn status(&self) -> Arc<EngineStatus> {
        self.status.clone()
    }

    /// The fatal error the logic thread died with, if any. Readable
    /// without joining.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    /// Waits for the logic thread to exit and returns its verdict: `Ok`
    /// for an orderly stop, the fatal error otherwise. Idempotent; later
    /// calls return `Ok`.
    pub fn join(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        thread
            .join()
            .map_err(|_| EngineError::Logic("logic thread panicked".into()))?
    }
}

impl Drop for EngineController {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop.request();
            let _ = self.join();
        }
    }
}
