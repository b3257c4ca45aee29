//! budgetchat: a line-oriented TCP chat room
//!
//! Clients connect, are asked for a name, and once admitted every line they
//! send is relayed to everyone else in the single room. Presence changes are
//! announced with lines starting with `*`.
//!
//! # Features
//! - Name handshake with validation (1-20 ASCII letters or digits)
//! - Unique names, enforced atomically
//! - Join, leave and chat broadcasts that never reach the sender
//! - Bounded per-client output queues; clients that stop reading are dropped
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `RoomServer` is the single task that owns the membership map
//! - Each connection has a session task talking to it through a `RoomHandle`
//! - Each connection has a writer task draining its outbound queue
//! - No locks needed - every room operation is one command, applied in order
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use budget_chat::{serve, Config, RoomServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8899").await.unwrap();
//!     let room = RoomServer::spawn();
//!     serve(listener, room, Config::default()).await;
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod room;
pub mod server;
pub mod types;
pub mod validate;

// Re-export main types for convenience
pub use client::Member;
pub use config::Config;
pub use error::{AppError, DeliveryError, JoinError, NameError};
pub use handler::{handle_connection, run_session, serve};
pub use message::ServerMessage;
pub use room::Room;
pub use server::{RoomCommand, RoomHandle, RoomServer};
pub use types::ClientId;
pub use validate::{validate_name, MAX_NAME_LEN};
