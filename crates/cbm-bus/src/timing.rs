//! Bus timing and device configuration.
//!
//! All values are in scheduler ticks (microseconds of bus time). Defaults
//! are the nominal figures of the CBM serial bus.

use emu_core::Ticks;

use crate::bus::Unit;

/// Handshake timing shared by every participant on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BusTiming {
    /// How often a waiting participant samples the lines.
    pub poll_interval: Ticks,
    /// Talker: data bit on DAT before releasing CLK (Ts).
    pub pre_bit_setup: Ticks,
    /// Talker: CLK released while the bit is valid (Tv).
    pub bit_valid: Ticks,
    /// Talker: minimum gap between frame acknowledge and next byte (Tbb).
    pub inter_byte: Ticks,
    /// Talker: longest wait for the listener's frame acknowledge (Tf).
    pub frame_ack_timeout: Ticks,
    /// Listener: how long the frame acknowledge is held before the byte is
    /// handed upward.
    pub frame_ack_hold: Ticks,
    /// Listener: CLK idle this long after ready-for-data signals EOI (Tye).
    pub eoi_timeout: Ticks,
    /// Listener: length of the EOI acknowledge pulse on DAT (Tei).
    pub eoi_ack_hold: Ticks,
    /// Talker: settle time after the EOI acknowledge before the first bit (Try).
    pub eoi_hold: Ticks,
    /// New talker: CLK held after turnaround before the first byte (Tda).
    pub turnaround_hold: Ticks,
    /// Listener: waiting for the next CLK edge within a byte longer than
    /// this gives up on the byte.
    pub bit_livelock: Ticks,
    /// Controller: longest wait for a device to acknowledge ATN (Tat).
    pub attention_timeout: Ticks,
    /// Controller: ATN held after the last byte under it, before release (Tr).
    pub attention_release: Ticks,
    /// Controller: every line released this long after a transaction,
    /// before ATN may be asserted again.
    pub bus_free: Ticks,
    /// Controller: longest time one bus action may make no progress.
    pub stall_timeout: Ticks,
}

impl Default for BusTiming {
    fn default() -> Self {
        Self {
            poll_interval: Ticks(5),
            pre_bit_setup: Ticks(60),
            bit_valid: Ticks(60),
            inter_byte: Ticks(100),
            frame_ack_timeout: Ticks(1000),
            frame_ack_hold: Ticks(20),
            eoi_timeout: Ticks(200),
            eoi_ack_hold: Ticks(60),
            eoi_hold: Ticks(30),
            turnaround_hold: Ticks(80),
            bit_livelock: Ticks(5000),
            attention_timeout: Ticks(1000),
            attention_release: Ticks(40),
            bus_free: Ticks(100),
            stall_timeout: Ticks(3000),
        }
    }
}

/// How bits are clocked onto the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Clocking {
    /// Bits clocked by the CLK handshake in software.
    #[default]
    Internal,
    /// Fast serial: bits shifted by an external clock on SRQ. Not modeled.
    External,
}

/// Configuration for constructing a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceConfig {
    pub unit: Unit,
    pub timing: BusTiming,
    pub clocking: Clocking,
}

impl DeviceConfig {
    /// Default timing and clocking for `unit`.
    #[must_use]
    pub fn new(unit: Unit) -> Self {
        Self {
            unit,
            timing: BusTiming::default(),
            clocking: Clocking::default(),
        }
    }
}
