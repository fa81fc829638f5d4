//! Tally panel command messages
//!
//! Every command sent to the panel is four ASCII bytes:
//!
//! ```text
//! Q <tally> <state> W
//! ```
//!
//! `tally` is one of `123456789ABCDEF` and `state` is one of `01234`. A full
//! cycle walks every tally (outer) through every state (inner), 75 messages.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tally identifiers, in send order
pub const TALLIES: &[u8; 15] = b"123456789ABCDEF";

/// State identifiers, in send order
pub const STATES: &[u8; 5] = b"01234";

/// Number of messages in one full cycle
pub const CYCLE_LEN: usize = TALLIES.len() * STATES.len();

/// Length of every message on the wire
pub const MESSAGE_LEN: usize = 4;

const PREFIX: u8 = b'Q';
const SUFFIX: u8 = b'W';

/// Errors for messages built from user input
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("invalid tally '{0}', expected one of {tallies}", tallies = alphabet(TALLIES))]
    InvalidTally(char),

    #[error("invalid state '{0}', expected one of {states}", states = alphabet(STATES))]
    InvalidState(char),

    #[error("malformed message \"{0}\", expected Q<tally><state>W")]
    Malformed(String),
}

fn alphabet(chars: &[u8]) -> &str {
    // Both alphabets are ASCII literals.
    std::str::from_utf8(chars).unwrap_or_default()
}

/// A single tally/state command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Message {
    tally: u8,
    state: u8,
}

impl Message {
    /// Build a message from tally and state characters.
    ///
    /// Lowercase hex letters are accepted for the tally.
    pub fn new(tally: char, state: char) -> Result<Self, MessageError> {
        let t = tally.to_ascii_uppercase();
        if !t.is_ascii() || !TALLIES.contains(&(t as u8)) {
            return Err(MessageError::InvalidTally(tally));
        }
        if !state.is_ascii() || !STATES.contains(&(state as u8)) {
            return Err(MessageError::InvalidState(state));
        }

        Ok(Self {
            tally: t as u8,
            state: state as u8,
        })
    }

    /// Message at `index` within a cycle, wrapping past the end
    pub fn at(index: usize) -> Self {
        let index = index % CYCLE_LEN;
        Self {
            tally: TALLIES[index / STATES.len()],
            state: STATES[index % STATES.len()],
        }
    }

    pub fn tally(&self) -> char {
        self.tally as char
    }

    pub fn state(&self) -> char {
        self.state as char
    }

    /// Wire encoding
    pub fn to_bytes(&self) -> [u8; MESSAGE_LEN] {
        [PREFIX, self.tally, self.state, SUFFIX]
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}{}W", self.tally(), self.state())
    }
}

impl FromStr for Message {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chars: Vec<char> = s.chars().collect();
        match chars.as_slice() {
            ['Q', tally, state, 'W'] => Self::new(*tally, *state),
            _ => Err(MessageError::Malformed(s.to_string())),
        }
    }
}

/// Iterator over one full cycle of messages
#[derive(Debug, Clone, Default)]
pub struct Cycle {
    next: usize,
}

impl Cycle {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Iterator for Cycle {
    type Item = Message;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= CYCLE_LEN {
            return None;
        }
        let message = Message::at(self.next);
        self.next += 1;
        Some(message)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = CYCLE_LEN - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Cycle {}

/// Endless repetition of the cycle
pub fn sequence() -> impl Iterator<Item = Message> {
    (0..).map(Message::at)
}
