//! Session identity
//!
//! A name only identifies a member while it is joined. Once it leaves,
//! another connection may take the same name, so room operations carry the
//! `ClientId` of the session that issued them as well.

use std::fmt;

use uuid::Uuid;

/// Identifier of one connection's session, random per connection
///
/// Shows up in the `session` log span and is checked by the room before a
/// leave or chat line is applied under a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Fresh id for a newly accepted connection
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
