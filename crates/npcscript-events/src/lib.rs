/// Dialog notification types for npcscript
///
/// This crate holds the types shared between the scripting host and the
/// server layer that talks to remote peers, so that neither side has to
/// depend on the other.
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

// ============================================================================
// Identities
// ============================================================================

/// Identifies the player session an interaction is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

/// Identifies the scripted entity (NPC) that owns an interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

// ============================================================================
// Dialog Events
// ============================================================================

/// A dialog state change the remote peer has to be told about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogEvent {
    /// Show a line of text in the dialog box
    Message {
        session: SessionId,
        entity: EntityId,
        text: String,
    },
    /// The current message is complete; the peer may ask for the next one
    Advance { session: SessionId, entity: EntityId },
    /// The dialog box should be closed
    Close { session: SessionId, entity: EntityId },
}

impl DialogEvent {
    /// Session the event is addressed to
    pub fn session(&self) -> SessionId {
        match self {
            DialogEvent::Message { session, .. }
            | DialogEvent::Advance { session, .. }
            | DialogEvent::Close { session, .. } => *session,
        }
    }

    /// Entity the event originates from
    pub fn entity(&self) -> EntityId {
        match self {
            DialogEvent::Message { entity, .. }
            | DialogEvent::Advance { entity, .. }
            | DialogEvent::Close { entity, .. } => *entity,
        }
    }
}

// ============================================================================
// Notification Sink
// ============================================================================

/// Receives dialog notifications produced by running scripts
///
/// Implementations forward them to whatever protocol layer addresses the
/// remote peer. Calls happen synchronously from inside script execution, so
/// implementations must not block.
pub trait DialogSink: Send + Sync + 'static {
    /// A message should be displayed to the session
    fn notify_message(&self, session: SessionId, entity: EntityId, text: &str);

    /// The session may advance to the next message
    fn notify_advance(&self, session: SessionId, entity: EntityId);

    /// The dialog should be closed
    fn notify_close(&self, session: SessionId, entity: EntityId);
}

/// Sink that forwards every notification as a [`DialogEvent`] over a channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    event_tx: UnboundedSender<DialogEvent>,
}

impl ChannelSink {
    pub fn new(event_tx: UnboundedSender<DialogEvent>) -> Self {
        Self { event_tx }
    }

    fn send(&self, event: DialogEvent) {
        if self.event_tx.send(event).is_err() {
            debug!(target: "scripting", "Dialog event dropped, receiver is gone");
        }
    }
}

impl DialogSink for ChannelSink {
    fn notify_message(&self, session: SessionId, entity: EntityId, text: &str) {
        self.send(DialogEvent::Message {
            session,
            entity,
            text: text.to_string(),
        });
    }

    fn notify_advance(&self, session: SessionId, entity: EntityId) {
        self.send(DialogEvent::Advance { session, entity });
    }

    fn notify_close(&self, session: SessionId, entity: EntityId) {
        self.send(DialogEvent::Close { session, entity });
    }
}

/// Receiving end of a [`ChannelSink`]
pub type DialogReceiver = UnboundedReceiver<DialogEvent>;

/// Create a channel sink together with the receiver its events arrive on
pub fn dialog_channel() -> (ChannelSink, DialogReceiver) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (ChannelSink::new(event_tx), event_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_forwards_in_order() {
        let (sink, mut rx) = dialog_channel();
        let session = SessionId(7);
        let entity = EntityId(110);

        sink.notify_message(session, entity, "Hello");
        sink.notify_advance(session, entity);
        sink.notify_close(session, entity);

        assert_eq!(
            rx.try_recv().unwrap(),
            DialogEvent::Message {
                session,
                entity,
                text: "Hello".to_string()
            }
        );
        assert_eq!(rx.try_recv().unwrap(), DialogEvent::Advance { session, entity });
        assert_eq!(rx.try_recv().unwrap(), DialogEvent::Close { session, entity });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sink_survives_dropped_receiver() {
        let (sink, rx) = dialog_channel();
        drop(rx);

        // Should not panic
        sink.notify_message(SessionId(1), EntityId(2), "nobody listening");
        sink.notify_close(SessionId(1), EntityId(2));
    }

    #[test]
    fn test_event_accessors() {
        let event = DialogEvent::Advance {
            session: SessionId(3),
            entity: EntityId(4),
        };
        assert_eq!(event.session(), SessionId(3));
        assert_eq!(event.entity(), EntityId(4));
    }

    #[test]
    fn test_id_display() {
        assert_eq!(SessionId(12).to_string(), "session#12");
        assert_eq!(EntityId(5).to_string(), "entity#5");
    }
}
