//! Shared draining state.
//!
//! A [`DrainSwitch`] is handed to both the orchestrator (the only writer) and
//! the health-check proxy (a reader on every request). Once flipped it stays
//! flipped: a draining sidecar is shutting down and never returns to service.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct DrainSwitch {
    draining: Arc<AtomicBool>,
}

impl DrainSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the sidecar as draining.
    ///
    /// Returns `true` only for the call that performed the transition, so
    /// repeated triggers can be told apart from the first one.
    pub fn drain(&self) -> bool {
        !self.draining.swap(true, Ordering::AcqRel)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_service() {
        assert!(!DrainSwitch::new().is_draining());
    }

    #[test]
    fn drain_is_idempotent() {
        let switch = DrainSwitch::new();
        assert!(switch.drain());
        assert!(!switch.drain());
        assert!(switch.is_draining());
    }

    #[test]
    fn clones_share_state() {
        let writer = DrainSwitch::new();
        let reader = writer.clone();
        writer.drain();
        assert!(reader.is_draining());
    }

    #[tokio::test]
    async fn drain_is_visible_across_tasks() {
        let switch = DrainSwitch::new();
        let reader = switch.clone();
        switch.drain();
        let seen = tokio::spawn(async move { reader.is_draining() })
            .await
            .unwrap();
        assert!(seen);
    }
}
