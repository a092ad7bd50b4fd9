//! Scope-keyed durable byte storage.
//!
//! Critical data is the only state guaranteed to survive power loss and is
//! therefore the only place the engine may record anything it needs for
//! crash recovery. Values are raw bytes keyed by `(scope, path)`; typed
//! access and the null-sentinel convention are layered on top by
//! [`crate::shim::FoundationShim`].

mod passthrough;
mod privileged;
mod store;

pub use passthrough::PassthroughCriticalData;
pub use privileged::{CriticalDataInternals, PrivilegedCriticalData};
pub use store::{storage_key, CriticalDataStore, MemoryStore, RocksStore};

use crate::errors::Result;
use serde::{Deserialize, Serialize};

/// Storage scope of a critical-data item.
///
/// Scopes partition the store by lifetime: `Theme` and `Payvar` data
/// persist across rounds, `GameCycle` data is cleared by the foundation
/// when a round ends, `History` data feeds the regulator-facing replay log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CriticalDataScope {
    Theme,
    Payvar,
    GameCycle,
    History,
}

impl CriticalDataScope {
    /// Stable key prefix for the scope. Exhaustive by construction so a
    /// new scope cannot be added without choosing a prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            CriticalDataScope::Theme => "theme",
            CriticalDataScope::Payvar => "payvar",
            CriticalDataScope::GameCycle => "cycle",
            CriticalDataScope::History => "history",
        }
    }
}

/// Raw byte-level access to critical data.
///
/// Two implementations exist: [`PassthroughCriticalData`] forwards to the
/// platform's public critical-data surface (standalone and test
/// deployments), and [`PrivilegedCriticalData`] uses the platform client's
/// declared internal capability for SDK bookkeeping that the public typed
/// API deliberately does not expose.
pub trait RawCriticalData: Send {
    fn write(&self, scope: CriticalDataScope, path: &str, data: &[u8]) -> Result<()>;

    fn read(&self, scope: CriticalDataScope, path: &str) -> Result<Option<Vec<u8>>>;

    /// Removes the item; returns whether it existed.
    fn remove(&self, scope: CriticalDataScope, path: &str) -> Result<bool>;
}
