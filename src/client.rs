//! Member struct definition
//!
//! Represents a joined client: its name, session ID, outbound queue and the
//! signal the room uses to force it off.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use crate::error::DeliveryError;
use crate::message::ServerMessage;
use crate::types::ClientId;

/// Joined client information
///
/// Owned by the room. The session keeps its own clone of the sender for
/// messages it writes itself (prompt, diagnostics).
#[derive(Debug)]
pub struct Member {
    /// Session that owns this membership
    pub id: ClientId,
    /// Name chosen during the join handshake
    pub name: String,
    /// Server → Client message queue, drained by the writer task
    sender: mpsc::Sender<ServerMessage>,
    /// Raised to make the session terminate
    disconnect: Arc<Notify>,
    /// Set once `disconnect` has been raised
    kicked: bool,
}

impl Member {
    /// Create a new member with the given identity, queue and disconnect signal
    pub fn new(
        id: ClientId,
        name: String,
        sender: mpsc::Sender<ServerMessage>,
        disconnect: Arc<Notify>,
    ) -> Self {
        Self {
            id,
            name,
            sender,
            disconnect,
            kicked: false,
        }
    }

    /// Enqueue a message for this member without waiting
    ///
    /// A full queue means the client stopped reading; the member is kicked
    /// and the error returned so the caller can log it.
    pub fn deliver(&mut self, msg: ServerMessage) -> Result<(), DeliveryError> {
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.kick();
                Err(DeliveryError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Ask the owning session to disconnect
    pub fn kick(&mut self) {
        if !self.kicked {
            self.kicked = true;
            self.disconnect.notify_one();
        }
    }

    /// Whether the member has been told to disconnect
    pub fn is_kicked(&self) -> bool {
        self.kicked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(capacity: usize) -> (Member, mpsc::Receiver<ServerMessage>, Arc<Notify>) {
        let (tx, rx) = mpsc::channel(capacity);
        let notify = Arc::new(Notify::new());
        let member = Member::new(ClientId::new(), "alice".to_string(), tx, notify.clone());
        (member, rx, notify)
    }

    #[tokio::test]
    async fn test_deliver_enqueues() {
        let (mut member, mut rx, _) = member(4);

        member
            .deliver(ServerMessage::Joined { name: "bob".into() })
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::Joined { name: "bob".into() })
        );
        assert!(!member.is_kicked());
    }

    #[tokio::test]
    async fn test_full_queue_kicks() {
        let (mut member, _rx, notify) = member(1);

        member.deliver(ServerMessage::Prompt).unwrap();
        let err = member.deliver(ServerMessage::Prompt).unwrap_err();

        assert_eq!(err, DeliveryError::Full);
        assert!(member.is_kicked());
        // The permit is stored, so a later waiter still wakes up
        tokio::time::timeout(std::time::Duration::from_secs(1), notify.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (mut member, rx, _) = member(1);
        drop(rx);

        let err = member.deliver(ServerMessage::Prompt).unwrap_err();
        assert_eq!(err, DeliveryError::Closed);
        assert!(!member.is_kicked());
    }
}
