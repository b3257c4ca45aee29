//! Wire protocol definitions
//!
//! Every server → client message is one line of ASCII text. `Display`
//! renders the line without its terminator; the writer task appends `\n`.

use std::fmt;

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Sent as soon as a connection is accepted
    Prompt,
    /// Sent to a newly joined client, listing everyone already present
    Welcome { members: Vec<String> },
    /// Another client joined the room
    Joined { name: String },
    /// Another client left the room
    Left { name: String },
    /// Chat line relayed from another client
    Chat { from: String, text: String },
    /// Diagnostic sent right before a rejected client is disconnected
    Rejected { reason: String },
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Prompt => write!(f, "Welcome to budgetchat! What shall I call you?"),
            ServerMessage::Welcome { members } => {
                write!(f, "* The room contains: {}", members.join(", "))
            }
            ServerMessage::Joined { name } => write!(f, "* {} has entered the room", name),
            ServerMessage::Left { name } => write!(f, "* {} has left the room", name),
            ServerMessage::Chat { from, text } => write!(f, "[{}] {}", from, text),
            ServerMessage::Rejected { reason } => write!(f, "* {}", reason),
        }
    }
}
