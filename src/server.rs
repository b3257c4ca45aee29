//! RoomServer actor implementation
//!
//! The single task that owns the `Room`. Sessions talk to it through a
//! `RoomHandle`; commands are applied strictly one after another, so every
//! join, leave and broadcast is atomic with respect to the others.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::client::Member;
use crate::error::{AppError, JoinError};
use crate::room::Room;
use crate::types::ClientId;

/// Channel buffer size for room commands
pub const COMMAND_BUFFER_SIZE: usize = 256;

/// Commands sent from sessions to the RoomServer actor
#[derive(Debug)]
pub enum RoomCommand {
    /// Admit a member if its name is free
    Join {
        member: Member,
        reply: oneshot::Sender<Result<Vec<String>, JoinError>>,
    },
    /// Remove a member and announce it
    Leave { client_id: ClientId, name: String },
    /// Relay a chat line to everyone but the sender
    Chat {
        client_id: ClientId,
        name: String,
        text: String,
    },
    /// Report the current member names
    Members { reply: oneshot::Sender<Vec<String>> },
}

/// The room actor
///
/// Owns the membership map and processes commands from session handlers.
pub struct RoomServer {
    room: Room,
    /// Command receiver channel
    receiver: mpsc::Receiver<RoomCommand>,
}

impl RoomServer {
    /// Create a new RoomServer with the given command receiver
    pub fn new(receiver: mpsc::Receiver<RoomCommand>) -> Self {
        Self {
            room: Room::new(),
            receiver,
        }
    }

    /// Create an actor and the handle that drives it
    pub fn channel() -> (Self, RoomHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        (Self::new(rx), RoomHandle { sender: tx })
    }

    /// Spawn the actor on the current runtime and return its handle
    pub fn spawn() -> RoomHandle {
        let (server, handle) = Self::channel();
        tokio::spawn(server.run());
        handle
    }

    /// Run the RoomServer event loop
    ///
    /// Continuously receives and processes commands until all handles are dropped.
    pub async fn run(mut self) {
        info!("RoomServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("RoomServer shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join { member, reply } => self.handle_join(member, reply),
            RoomCommand::Leave { client_id, name } => self.handle_leave(client_id, &name),
            RoomCommand::Chat {
                client_id,
                name,
                text,
            } => self.handle_chat(client_id, &name, &text),
            RoomCommand::Members { reply } => {
                let _ = reply.send(self.room.names());
            }
        }
    }

    fn handle_join(
        &mut self,
        member: Member,
        reply: oneshot::Sender<Result<Vec<String>, JoinError>>,
    ) {
        let client_id = member.id;
        let result = self.room.try_join(member);

        match &result {
            Ok(_) => info!("Client {} joined, {} in room", client_id, self.room.len()),
            Err(e) => debug!("Client {} refused: {}", client_id, e),
        }

        // The member stays joined even if the session stopped waiting; its
        // own leave will clean up.
        let _ = reply.send(result);
    }

    fn handle_leave(&mut self, client_id: ClientId, name: &str) {
        if self.room.leave(client_id, name) {
            info!(
                "Client {} ({}) left, {} in room",
                client_id,
                name,
                self.room.len()
            );
            if self.room.is_empty() {
                debug!("Room is empty");
            }
        }
    }

    fn handle_chat(&mut self, client_id: ClientId, name: &str, text: &str) {
        if !self.room.broadcast(client_id, name, text) {
            debug!("Dropped chat from non-member {}", client_id);
        }
    }
}

/// Cloneable handle to the RoomServer actor
#[derive(Debug, Clone)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Ask the room to admit `member`
    ///
    /// `Ok(Ok(names))` means joined; `names` are the members who were
    /// present before, already sent to the member as its welcome line.
    pub async fn try_join(
        &self,
        member: Member,
    ) -> Result<Result<Vec<String>, JoinError>, AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Join { member, reply }).await?;
        rx.await.map_err(|_| AppError::ServerClosed)
    }

    /// Remove `name` if `client_id` holds it
    pub async fn leave(&self, client_id: ClientId, name: String) -> Result<(), AppError> {
        self.send(RoomCommand::Leave { client_id, name }).await
    }

    /// Relay `text` from `name` to the rest of the room
    pub async fn broadcast(
        &self,
        client_id: ClientId,
        name: String,
        text: String,
    ) -> Result<(), AppError> {
        self.send(RoomCommand::Chat {
            client_id,
            name,
            text,
        })
        .await
    }

    /// Snapshot of current member names, sorted
    pub async fn members(&self) -> Result<Vec<String>, AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Members { reply }).await?;
        rx.await.map_err(|_| AppError::ServerClosed)
    }

    async fn send(&self, cmd: RoomCommand) -> Result<(), AppError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| AppError::ServerClosed)
    }
}
