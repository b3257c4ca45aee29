//! Name validation
//!
//! Checked before the room is contacted, so illegal names never reach the
//! shared registry.

use crate::error::NameError;

/// Longest name a client may choose, in characters
pub const MAX_NAME_LEN: usize = 20;

/// Check that `candidate` is 1..=20 ASCII letters or digits
pub fn validate_name(candidate: &str) -> Result<(), NameError> {
    if candidate.is_empty() {
        return Err(NameError::Empty);
    }

    let len = candidate.chars().count();
    if len > MAX_NAME_LEN {
        return Err(NameError::TooLong {
            len,
            max: MAX_NAME_LEN,
        });
    }

    match candidate.chars().find(|c| !c.is_ascii_alphanumeric()) {
        Some(c) => Err(NameError::InvalidCharacter(c)),
        None => Ok(()),
    }
}
