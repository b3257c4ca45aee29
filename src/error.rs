//! Error types for the chat server
//!
//! Defines session-level errors, name and join rejections, and per-recipient
//! delivery errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Session-level errors
///
/// Every variant ends the session that produced it. None of them is ever
/// reported to another connection.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error on the client's socket (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Client sent a line longer than the configured limit
    #[error("Line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// The room actor is gone (server shutting down)
    #[error("Room server closed")]
    ServerClosed,

    /// Outbound side is gone: the queue overflowed or the socket write failed
    #[error("Outbound stream closed")]
    Disconnected,

    /// Proposed name failed validation
    #[error("Invalid name: {0}")]
    Name(#[from] NameError),

    /// Proposed name was refused by the room
    #[error("Join refused: {0}")]
    Join(#[from] JoinError),
}

/// Reasons a proposed name is illegal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("name must not be empty")]
    Empty,

    #[error("name is {len} characters long, at most {max} allowed")]
    TooLong { len: usize, max: usize },

    #[error("name contains {0:?}, only ASCII letters and digits are allowed")]
    InvalidCharacter(char),
}

/// Reasons the room refuses a join
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// Another joined member already holds the name
    #[error("name '{0}' is already taken")]
    DuplicateName(String),
}

/// Message delivery errors
///
/// Occurs when enqueueing onto a member's outbound queue fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The queue is at capacity (client not reading)
    #[error("Outbound queue full")]
    Full,

    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    Closed,
}
