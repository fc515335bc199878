//! Application lifecycle events.
//!
//! The host shell reports window focus changes here; resolvers subscribe and
//! refresh stale answers when the application comes back to the foreground.

use tokio::sync::broadcast;
use tracing::debug;

/// Foreground/background transitions reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The application window regained focus.
    FocusGained,
    /// The application window lost focus.
    FocusLost,
}

/// Fan-out of lifecycle events to every subscribed resolver.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Create a lifecycle hub with no subscribers.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(16);
        Self { tx }
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Report that the application regained focus.
    pub fn focus_gained(&self) {
        self.emit(LifecycleEvent::FocusGained);
    }

    /// Report that the application lost focus.
    pub fn focus_lost(&self) {
        self.emit(LifecycleEvent::FocusLost);
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine: nothing is running that cares.
        if self.tx.send(event).is_err() {
            debug!(?event, "Lifecycle event with no subscribers");
        }
    }
}

/// Wait for the next event, skipping over lag. Pends forever once the hub is
/// gone so callers can keep it in a `select!` loop.
pub(crate) async fn next_event(
    rx: &mut Option<broadcast::Receiver<LifecycleEvent>>,
) -> LifecycleEvent {
    loop {
        let Some(receiver) = rx.as_mut() else {
            return std::future::pending().await;
        };
        match receiver.recv().await {
            Ok(event) => return event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Lifecycle receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => *rx = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_focus_events() {
        let lifecycle = Lifecycle::new();
        let mut rx = Some(lifecycle.subscribe());
        lifecycle.focus_lost();
        lifecycle.focus_gained();
        assert_eq!(next_event(&mut rx).await, LifecycleEvent::FocusLost);
        assert_eq!(next_event(&mut rx).await, LifecycleEvent::FocusGained);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_harmless() {
        Lifecycle::new().focus_gained();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_hub_pends_instead_of_spinning() {
        let lifecycle = Lifecycle::new();
        let mut rx = Some(lifecycle.subscribe());
        drop(lifecycle);

        let waited =
            tokio::time::timeout(std::time::Duration::from_secs(1), next_event(&mut rx)).await;
        assert!(waited.is_err());
        assert!(rx.is_none());
    }
}
