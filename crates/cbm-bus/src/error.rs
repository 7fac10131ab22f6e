//! Errors raised while wiring or decoding, never from inside a tick.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    /// Another accessor already answers to this unit number.
    #[error("unit {0} is already attached to the bus")]
    UnitInUse(u8),

    /// Device units are five-bit addresses; 31 is reserved for unlisten/untalk.
    #[error("unit {0} is outside the device address range 0-30")]
    InvalidUnit(u8),

    /// A byte received under ATN matched no command pattern.
    #[error("invalid control byte {0:#04X}")]
    InvalidCommand(u8),
}
