//! Typed critical-data access for the engine.
//!
//! `FoundationShim` wraps the raw byte store with serde/bincode encoding
//! and a 1-byte sentinel that distinguishes a logically-null value from a
//! present one, because the underlying store cannot represent "key exists
//! but value is semantically absent" any other way.

use crate::critical_data::{CriticalDataScope, RawCriticalData};
use crate::errors::{CriticalDataError, Result};
use crate::foundation::Foundation;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Critical-data paths used by the engine core.
pub mod paths {
    /// Payvar scope: last durably completed state-machine transition.
    pub const ENGINE_STATE: &str = "EngineState";
    /// GameCycle scope: the single pending protocol response.
    pub const FOUNDATION_RESPONSE: &str = "FoundationResponse";
    /// Payvar scope: cycle/total/wagerable award rationals.
    pub const TOTAL_AWARD: &str = "TotalAward";
    /// Payvar scope: presentation steps shown this round.
    pub const HISTORY_STEP_COUNT: &str = "HistoryStepCount";
    /// GameCycle scope: whether a gamble was offered this cycle.
    pub const OFFER_GAMBLE: &str = "OfferGamble";
    /// GameCycle scope: in-flight round bookkeeping for crash recovery.
    pub const CYCLE_CONTEXT: &str = "CycleContext";
}

const SENTINEL_PRESENT: u8 = 0;
const SENTINEL_NULL: u8 = 1;

/// Typed view over raw critical data, plus access to the foundation the
/// data belongs to.
pub struct FoundationShim {
    foundation: Arc<dyn Foundation>,
    raw: Box<dyn RawCriticalData>,
}

impl FoundationShim {
    pub fn new(foundation: Arc<dyn Foundation>, raw: Box<dyn RawCriticalData>) -> Self {
        Self { foundation, raw }
    }

    pub fn foundation(&self) -> Arc<dyn Foundation> {
        self.foundation.clone()
    }

    /// Writes a present value. Requires an open transaction.
    pub fn write<T: Serialize>(
        &self,
        scope: CriticalDataScope,
        path: &str,
        value: &T,
    ) -> Result<()> {
        let payload = bincode::serialize(value).map_err(|e| CriticalDataError::Write {
            scope,
            path: path.into(),
            reason: e.to_string(),
        })?;
        let mut bytes = Vec::with_capacity(1 + payload.len());
        bytes.push(SENTINEL_PRESENT);
        bytes.extend_from_slice(&payload);
        tracing::trace!(
            ?scope,
            path,
            payload = %hex::encode(&bytes),
            "critical data write"
        );
        self.raw.write(scope, path, &bytes)
    }

    /// Writes the logically-null marker: the key exists, the value does
    /// not.
    pub fn write_null(&self, scope: CriticalDataScope, path: &str) -> Result<()> {
        self.raw.write(scope, path, &[SENTINEL_NULL])
    }

    /// Reads a value; `None` covers both a missing key and a
    /// logically-null one.
    pub fn read<T: DeserializeOwned>(
        &self,
        scope: CriticalDataScope,
        path: &str,
    ) -> Result<Option<T>> {
        let Some(bytes) = self.raw.read(scope, path)? else {
            return Ok(None);
        };
        match bytes.split_first() {
            Some((&SENTINEL_NULL, [])) => Ok(None),
            Some((&SENTINEL_PRESENT, payload)) => {
                let value = bincode::deserialize(payload).map_err(|e| {
                    CriticalDataError::Corrupted {
                        scope,
                        path: path.into(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(value))
            }
            _ => Err(CriticalDataError::Corrupted {
                scope,
                path: path.into(),
                reason: format!("bad sentinel in {} byte record", bytes.len()),
            }
            .into()),
        }
    }

    /// True when the key exists at all, logically-null included.
    pub fn exists(&self, scope: CriticalDataScope, path: &str) -> Result<bool> {
        Ok(self.raw.read(scope, path)?.is_some())
    }

    /// Removes the key; returns whether it existed.
    pub fn remove(&self, scope: CriticalDataScope, path: &str) -> Result<bool> {
        self.raw.remove(scope, path)
    }
}
