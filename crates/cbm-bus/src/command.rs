//! Control bytes sent under ATN.
//!
//! | Byte        | Command                   |
//! |-------------|---------------------------|
//! | `$20-$3E`   | LISTEN unit (low 5 bits)  |
//! | `$3F`       | UNLISTEN                  |
//! | `$40-$5E`   | TALK unit (low 5 bits)    |
//! | `$5F`       | UNTALK                    |
//! | `$60-$6F`   | REOPEN channel (low 4)    |
//! | `$E0-$EF`   | CLOSE channel (low 4)     |
//! | `$F0-$FF`   | OPEN channel (low 4)      |

use std::fmt;

use crate::error::BusError;

const LISTEN: u8 = 0x20;
const TALK: u8 = 0x40;
const UNLISTEN: u8 = 0x3F;
const UNTALK: u8 = 0x5F;
const REOPEN: u8 = 0x60;
const CLOSE: u8 = 0xE0;
const OPEN: u8 = 0xF0;

/// A decoded control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Command {
    Listen(u8),
    Talk(u8),
    Unlisten,
    Untalk,
    /// Secondary address: select a channel for data transfer.
    Reopen(u8),
    Close(u8),
    /// Secondary address: open a channel, name follows as data.
    Open(u8),
}

impl Command {
    /// Classify a byte received under ATN.
    pub fn parse(byte: u8) -> Result<Self, BusError> {
        // Exact codes first: they fall inside the listen/talk ranges.
        match byte {
            UNLISTEN => return Ok(Command::Unlisten),
            UNTALK => return Ok(Command::Untalk),
            _ => {}
        }
        match byte & 0xE0 {
            LISTEN => return Ok(Command::Listen(byte & 0x1F)),
            TALK => return Ok(Command::Talk(byte & 0x1F)),
            _ => {}
        }
        match byte & 0xF0 {
            REOPEN => Ok(Command::Reopen(byte & 0x0F)),
            CLOSE => Ok(Command::Close(byte & 0x0F)),
            OPEN => Ok(Command::Open(byte & 0x0F)),
            _ => Err(BusError::InvalidCommand(byte)),
        }
    }

    /// Encode back to the control byte.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            Command::Listen(unit) => LISTEN | (unit & 0x1F),
            Command::Talk(unit) => TALK | (unit & 0x1F),
            Command::Unlisten => UNLISTEN,
            Command::Untalk => UNTALK,
            Command::Reopen(channel) => REOPEN | (channel & 0x0F),
            Command::Close(channel) => CLOSE | (channel & 0x0F),
            Command::Open(channel) => OPEN | (channel & 0x0F),
        }
    }

    /// Unit or channel nibble carried by the command, zero for unlisten/untalk.
    #[must_use]
    pub fn address(self) -> u8 {
        match self {
            Command::Listen(a)
            | Command::Talk(a)
            | Command::Reopen(a)
            | Command::Close(a)
            | Command::Open(a) => a,
            Command::Unlisten | Command::Untalk => 0,
        }
    }

    /// Primary (addressing) commands select who talks or listens.
    #[must_use]
    pub fn is_primary(self) -> bool {
        matches!(
            self,
            Command::Listen(_) | Command::Talk(_) | Command::Unlisten | Command::Untalk
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Listen(unit) => write!(f, "LISTEN {unit}"),
            Command::Talk(unit) => write!(f, "TALK {unit}"),
            Command::Unlisten => f.write_str("UNLISTEN"),
            Command::Untalk => f.write_str("UNTALK"),
            Command::Reopen(ch) => write!(f, "REOPEN {ch}"),
            Command::Close(ch) => write!(f, "CLOSE {ch}"),
            Command::Open(ch) => write!(f, "OPEN {ch}"),
        }
    }
}

/// The command being handled plus its streamed parameter bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: Option<Command>,
    /// Filename for OPEN, payload for REOPEN as listener.
    pub params: Vec<u8>,
}

impl ParsedCommand {
    /// Channel or unit nibble of the current command.
    #[must_use]
    pub fn address(&self) -> u8 {
        self.command.map_or(0, Command::address)
    }

    pub fn clear(&mut self) {
        self.command = None;
        self.params.clear();
    }
}
