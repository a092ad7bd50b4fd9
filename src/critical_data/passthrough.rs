//! Pass-through critical-data access.

use crate::critical_data::{CriticalDataScope, RawCriticalData};
use crate::errors::Result;
use crate::foundation::Foundation;
use std::sync::Arc;

/// Forwards every operation to the platform's public critical-data surface.
///
/// Used in standalone and test deployments, where the public surface
/// already allows raw byte access.
pub struct PassthroughCriticalData {
    foundation: Arc<dyn Foundation>,
}

impl PassthroughCriticalData {
    pub fn new(foundation: Arc<dyn Foundation>) -> Self {
        Self { foundation }
    }
}

impl RawCriticalData for PassthroughCriticalData {
    fn write(&self, scope: CriticalDataScope, path: &str, data: &[u8]) -> Result<()> {
        self.foundation.write_critical_data(scope, path, data)
    }

    fn read(&self, scope: CriticalDataScope, path: &str) -> Result<Option<Vec<u8>>> {
        self.foundation.read_critical_data(scope, path)
    }

    fn remove(&self, scope: CriticalDataScope, path: &str) -> Result<bool> {
        self.foundation.remove_critical_data(scope, path)
    }
}
