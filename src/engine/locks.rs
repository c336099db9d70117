use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::EngineError;

/// One async mutex per candidate, serializing install, uninstall and
/// default changes within that candidate.
///
/// The set of candidates is fixed at startup, so the map is built once and
/// never needs its own lock.
pub(crate) struct OperationLocks {
    locks: HashMap<String, Arc<Mutex<()>>>,
}

impl OperationLocks {
    pub(crate) fn new<'a>(candidates: impl IntoIterator<Item = &'a str>) -> Self {
        let locks = candidates
            .into_iter()
            .map(|id| (id.to_string(), Arc::new(Mutex::new(()))))
            .collect();
        Self { locks }
    }

    /// Wait for exclusive access to `candidate`
    pub(crate) async fn acquire(&self, candidate: &str) -> Result<OwnedMutexGuard<()>, EngineError> {
        let lock = self
            .locks
            .get(candidate)
            .ok_or_else(|| EngineError::UnknownCandidate(candidate.to_string()))?;
        Ok(Arc::clone(lock).lock_owned().await)
    }
}
