//! Privileged critical-data access.
//!
//! The platform's public typed API deliberately withholds raw byte-level
//! access from ordinary games, but SDK-internal bookkeeping (engine state,
//! award meters, the response slot) needs exactly that. Rather than
//! introspecting private members of the platform client, the client is
//! required to expose the capability as an explicit internal trait,
//! [`CriticalDataInternals`], whose write path performs the same
//! transaction-guard and access-scope validation as the public typed path
//! before touching the low-level cache.

use crate::critical_data::{CriticalDataScope, RawCriticalData};
use crate::errors::Result;
use std::sync::Arc;

/// Internal capability of a platform client: the same cache the typed
/// serialization layer writes through, minus the serialization.
///
/// A platform lacking this hook cannot host the privileged access path;
/// such an integration must surface an equivalent API explicitly instead of
/// falling back to reflection-style tricks.
pub trait CriticalDataInternals: Send + Sync {
    /// Fails unless a transaction is currently open.
    fn guard_transaction(&self) -> Result<()>;

    /// Fails unless the scope is writable in the current context.
    fn validate_access(&self, scope: CriticalDataScope) -> Result<()>;

    fn cache_write(&self, scope: CriticalDataScope, path: &str, data: &[u8]) -> Result<()>;

    fn cache_read(&self, scope: CriticalDataScope, path: &str) -> Result<Option<Vec<u8>>>;

    fn cache_remove(&self, scope: CriticalDataScope, path: &str) -> Result<bool>;
}

/// Raw access routed through the platform client's internal cache,
/// subject to the same transaction and access validation as the typed path.
pub struct PrivilegedCriticalData {
    internals: Arc<dyn CriticalDataInternals>,
}

impl PrivilegedCriticalData {
    pub fn new(internals: Arc<dyn CriticalDataInternals>) -> Self {
        Self { internals }
    }
}

impl RawCriticalData for PrivilegedCriticalData {
    fn write(&self, scope: CriticalDataScope, path: &str, data: &[u8]) -> Result<()> {
        self.internals.guard_transaction()?;
        self.internals.validate_access(scope)?;
        self.internals.cache_write(scope, path, data)
    }

    fn read(&self, scope: CriticalDataScope, path: &str) -> Result<Option<Vec<u8>>> {
        self.internals.validate_access(scope)?;
        self.internals.cache_read(scope, path)
    }

    fn remove(&self, scope: CriticalDataScope, path: &str) -> Result<bool> {
        self.internals.guard_transaction()?;
        self.internals.validate_access(scope)?;
        self.internals.cache_remove(scope, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::{CreateTransactionResult, Foundation, StandaloneFoundation};

    #[test]
    fn writes_are_transaction_guarded() {
        let foundation = StandaloneFoundation::in_memory();
        let privileged = PrivilegedCriticalData::new(foundation.clone());

        let err = privileged
            .write(CriticalDataScope::Payvar, "EngineState", &[1])
            .unwrap_err();
        assert!(err.to_string().contains("no open transaction"));

        assert_eq!(
            foundation.create_transaction(),
            CreateTransactionResult::Created
        );
        privileged
            .write(CriticalDataScope::Payvar, "EngineState", &[1])
            .unwrap();
        foundation.close_transaction();

        // Reads are allowed outside a transaction.
        assert_eq!(
            privileged
                .read(CriticalDataScope::Payvar, "EngineState")
                .unwrap(),
            Some(vec![1])
        );
    }

    #[test]
    fn platform_managed_scopes_are_denied() {
        let foundation = StandaloneFoundation::in_memory();
        let privileged = PrivilegedCriticalData::new(foundation.clone());
        assert_eq!(
            foundation.create_transaction(),
            CreateTransactionResult::Created
        );
        let err = privileged
            .write(CriticalDataScope::History, "Step0", &[1])
            .unwrap_err();
        assert!(err.to_string().contains("denied"));
        foundation.close_transaction();
    }
}
