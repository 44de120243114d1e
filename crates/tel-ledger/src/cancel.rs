use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::LedgerError;

/// Cooperative cancellation flag for long-running reads.
///
/// Clones share the flag. Verification and export check it between entries;
/// since they mutate nothing, stopping early leaves no partial state.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<(), LedgerError> {
        if self.is_cancelled() {
            Err(LedgerError::Cancelled)
        } else {
            Ok(())
        }
    }
}
