use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ParamError;

/// Token for cooperative cancellation of a step or materialization.
///
/// Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Fail with [`ParamError::Interrupted`] if cancellation was requested.
    pub fn check(&self, doing: &str) -> Result<(), ParamError> {
        if self.is_cancelled() {
            Err(ParamError::Interrupted(doing.to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(token.check("copying").is_ok());
        other.cancel();
        assert!(token.is_cancelled());
        let err = token.check("copying").unwrap_err();
        assert!(err.is_interrupted());
        assert_eq!(err.to_string(), "Interrupted while copying");
    }
}
