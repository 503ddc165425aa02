//! Join tokens.
//!
//! A room is addressed by a 4-character code that doubles as the rendezvous
//! namespace suffix on the discovery substrate. Generation sticks to A-Z so
//! codes are easy to shout across a room; validation also accepts digits so
//! externally minted codes keep working.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ROOM_CODE_LEN: usize = 4;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomCodeError {
    #[error("join code must be {ROOM_CODE_LEN} characters, got {0}")]
    BadLength(usize),
    #[error("join code may only contain A-Z and 0-9, got {0:?}")]
    BadCharacter(char),
}

/// A validated, uppercase join token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomCode(String);

impl RoomCode {
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code: String = (0..ROOM_CODE_LEN)
            .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
            .collect();
        RoomCode(code)
    }

    /// Parses user input: uppercases, then checks length and charset.
    pub fn parse(input: &str) -> Result<Self, RoomCodeError> {
        let code = input.trim().to_ascii_uppercase();
        let len = code.chars().count();
        if len != ROOM_CODE_LEN {
            return Err(RoomCodeError::BadLength(len));
        }
        if let Some(bad) = code
            .chars()
            .find(|c| !c.is_ascii_uppercase() && !c.is_ascii_digit())
        {
            return Err(RoomCodeError::BadCharacter(bad));
        }
        Ok(RoomCode(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
