//! Pause and cancel requests shared between a session and its engine.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative control flags observed by the engine at checkpoint boundaries.
///
/// Cancellation is idempotent: only the first reason is kept.
#[derive(Default)]
pub struct ControlToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    paused: AtomicBool,
}

impl ControlToken {
    /// Creates a new token with no requests pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.reason.write() = Some(reason.into());
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Requests a pause at the next boundary. Returns false if already paused.
    pub fn pause(&self) -> bool {
        !self.paused.swap(true, Ordering::SeqCst)
    }

    /// Clears a pause request. Returns false if not paused.
    pub fn resume(&self) -> bool {
        self.paused.swap(false, Ordering::SeqCst)
    }

    /// Returns whether a pause is in effect.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Clears every request.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
        *self.reason.write() = None;
        self.paused.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ControlToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .field("paused", &self.is_paused())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_default() {
        let token = ControlToken::new();
        assert!(!token.is_cancelled());
        assert!(!token.is_paused());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_cancel_first_reason_wins() {
        let token = ControlToken::new();
        token.cancel("First reason");
        token.cancel("Second reason");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("First reason".to_string()));
    }

    #[test]
    fn test_pause_resume() {
        let token = ControlToken::new();
        assert!(token.pause());
        assert!(!token.pause());
        assert!(token.is_paused());

        assert!(token.resume());
        assert!(!token.resume());
        assert!(!token.is_paused());
    }

    #[test]
    fn test_reset_clears_everything() {
        let token = ControlToken::new();
        token.cancel("stop");
        token.pause();
        token.reset();

        assert!(!token.is_cancelled());
        assert!(!token.is_paused());
        assert!(token.reason().is_none());
    }
}
