use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::AnalyticsError;
use crate::AnalyticsResult;

/// Shared flag checked between independent units of work (frontier targets,
/// simulation paths, per-ticker statistics). Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> AnalyticsResult<()> {
        if self.is_cancelled() {
            Err(AnalyticsError::Cancelled)
        } else {
            Ok(())
        }
    }
}
