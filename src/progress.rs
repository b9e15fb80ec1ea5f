//! Fire-and-forget progress notifications, one last-value channel per session.

use crate::domain::phase::SessionPhase;
use crate::domain::types::{AgentKind, SessionId, TimestampUtc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub session_id: SessionId,
    pub agent: Option<AgentKind>,
    pub phase: SessionPhase,
    pub message: String,
    /// 0..=100.
    pub percentage: u8,
    pub at: TimestampUtc,
}

#[derive(Debug, Default)]
pub struct ProgressPublisher {
    channels: RwLock<HashMap<SessionId, watch::Sender<Option<ProgressUpdate>>>>,
}

impl ProgressPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the session's last value. Never fails; having no subscribers
    /// is fine.
    pub fn publish(
        &self,
        session_id: SessionId,
        agent: Option<AgentKind>,
        phase: SessionPhase,
        message: impl Into<String>,
        percentage: u8,
    ) {
        let update = ProgressUpdate {
            session_id,
            agent,
            phase,
            message: message.into(),
            percentage: percentage.min(100),
            at: TimestampUtc::now(),
        };

        if let Ok(channels) = self.channels.read() {
            if let Some(tx) = channels.get(&session_id) {
                tx.send_replace(Some(update));
                return;
            }
        }
        match self.channels.write() {
            Ok(mut channels) => {
                channels
                    .entry(session_id)
                    .or_insert_with(|| watch::channel(None).0)
                    .send_replace(Some(update));
            }
            Err(_) => tracing::debug!(session_id = %session_id, "progress channels poisoned, dropping update"),
        }
    }

    /// Receiver seeded with the last published value, if any.
    pub fn subscribe(&self, session_id: SessionId) -> Option<watch::Receiver<Option<ProgressUpdate>>> {
        let mut channels = self.channels.write().ok()?;
        let tx = channels
            .entry(session_id)
            .or_insert_with(|| watch::channel(None).0);
        Some(tx.subscribe())
    }

    /// Drops the session's channel. Existing receivers see the sender close.
    pub fn remove(&self, session_id: SessionId) {
        if let Ok(mut channels) = self.channels.write() {
            channels.remove(&session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn late_subscriber_sees_last_value() {
        let publisher = ProgressPublisher::new();
        let id = SessionId::new();

        publisher.publish(id, Some(AgentKind::Organizing), SessionPhase::OrganizingDialogue, "first", 0);
        publisher.publish(id, Some(AgentKind::Organizing), SessionPhase::OrganizingProposing, "second", 7);

        let rx = publisher.subscribe(id).unwrap();
        let latest = rx.borrow().clone().unwrap();
        assert_eq!(latest.message, "second");
        assert_eq!(latest.percentage, 7);
    }

    #[tokio::test]
    async fn subscriber_is_notified_of_new_values() {
        let publisher = ProgressPublisher::new();
        let id = SessionId::new();
        let mut rx = publisher.subscribe(id).unwrap();
        assert!(rx.borrow().is_none());

        publisher.publish(id, None, SessionPhase::Completed, "done", 250);

        rx.changed().await.unwrap();
        let update = rx.borrow().clone().unwrap();
        assert_eq!(update.phase, SessionPhase::Completed);
        assert_eq!(update.percentage, 100);
    }

    #[tokio::test]
    async fn sessions_are_isolated_and_removal_closes_the_channel() {
        let publisher = ProgressPublisher::new();
        let a = SessionId::new();
        let b = SessionId::new();
        let mut rx = publisher.subscribe(a).unwrap();
        publisher.publish(a, None, SessionPhase::OrganizingDialogue, "a", 0);
        assert!(publisher.subscribe(b).unwrap().borrow().is_none());

        publisher.remove(a);
        rx.changed().await.unwrap();
        assert!(rx.changed().await.is_err());
        assert_eq!(rx.borrow().clone().unwrap().message, "a");
        assert!(publisher.subscribe(a).unwrap().borrow().is_none());
    }
}
