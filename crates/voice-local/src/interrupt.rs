use crate::error::{Result, VoiceError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag set from a signal handler and polled at every
/// blocking point.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// `Err(Interrupted)` once triggered.
    pub fn check(&self) -> Result<()> {
        if self.is_set() {
            Err(VoiceError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let a = Interrupt::new();
        let b = a.clone();
        assert!(a.check().is_ok());
        b.trigger();
        assert!(a.is_set());
        assert!(matches!(a.check(), Err(VoiceError::Interrupted)));
        a.clear();
        assert!(!b.is_set());
    }
}
