//! Cooperative signalling between the host thread and the logic thread.
//!
//! The host never shares mutable state with the logic thread; it requests
//! a stop through [`StopHandle`], pokes the start-game channel, and reads
//! advisory status flags that tolerate staleness by design.

use crate::errors::{EngineError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Host-side end of the stop signal.
///
/// Requesting a stop sets the flag and disconnects the paired channel, so
/// a logic thread blocked in a `select` wakes immediately.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    sender: Arc<Mutex<Option<Sender<()>>>>,
}

impl StopHandle {
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // Dropping the sender disconnects the channel, which makes every
        // pending and future receive ready.
        self.sender.lock().unwrap().take();
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Logic-thread end of the stop signal.
#[derive(Clone)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
    receiver: Receiver<()>,
}

impl StopToken {
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Raises the forced-stop signal if a stop has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_requested() {
            Err(EngineError::StopForced)
        } else {
            Ok(())
        }
    }

    /// Channel that becomes permanently ready once a stop is requested.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

/// Creates a connected stop handle/token pair.
pub fn stop_pair() -> (StopHandle, StopToken) {
    // Capacity zero: the channel is only ever used via disconnection.
    let (tx, rx) = bounded(0);
    let flag = Arc::new(AtomicBool::new(false));
    (
        StopHandle {
            flag: flag.clone(),
            sender: Arc::new(Mutex::new(Some(tx))),
        },
        StopToken {
            flag,
            receiver: rx,
        },
    )
}

/// Advisory status flags readable lock-free from the host thread.
///
/// These are informational only; the host must not base correctness
/// decisions on them.
#[derive(Debug, Default)]
pub struct EngineStatus {
    pub initialising: AtomicBool,
    pub paused: AtomicBool,
    pub in_round: AtomicBool,
}

impl EngineStatus {
    pub fn is_initialising(&self) -> bool {
        self.initialising.load(Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn is_in_round(&self) -> bool {
        self.in_round.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::select;
    use std::time::Duration;

    #[test]
    fn stop_request_sets_flag_and_wakes_receiver() {
        let (handle, token) = stop_pair();
        assert!(!token.is_requested());
        assert!(token.check().is_ok());

        handle.request();
        assert!(token.is_requested());
        assert!(matches!(token.check(), Err(EngineError::StopForced)));

        // A blocked select must wake via the disconnected channel.
        select! {
            recv(token.receiver()) -> _ => {}
            default(Duration::from_secs(1)) => panic!("stop did not wake the receiver"),
        }
    }

    #[test]
    fn stop_works_across_clones() {
        let (handle, token) = stop_pair();
        let handle2 = handle.clone();
        let token2 = token.clone();
        handle2.request();
        assert!(token.is_requested());
        assert!(token2.is_requested());
    }
}
