//! Byte-level handshake: one byte in or out over CLK and DAT.
//!
//! # Receiving
//!
//! ```text
//! Init     hold DAT (not ready), wait for talker to release CLK
//! Ready    release DAT (ready for data), wait for CLK low
//!          CLK still released after eoi_timeout -> Eoi
//! Eoi      pulse DAT low for eoi_ack_hold, back to Ready
//! BitWait  wait for CLK released, sample DAT (released = 1)
//! BitDone  wait for CLK low; 8 bits -> Frame, else BitWait
//! Frame    hold DAT (frame acknowledge), report the byte
//! ```
//!
//! # Transmitting
//!
//! ```text
//! Init      hold CLK for inter_byte until a listener holds DAT, release CLK
//! Ready     wait for DAT released; last byte -> Eoi, else CLK low, BitWait
//! Eoi       wait for the listener's DAT pulse
//! EoiAck    wait for DAT released again plus eoi_hold, CLK low
//! BitWait   bit on DAT for pre_bit_setup, release CLK
//! BitDone   bit valid for bit_valid, CLK low, release DAT
//! Frame     CLK low, DAT released
//! FrameWait listener pulls DAT within frame_ack_timeout
//! ```
//!
//! The only receive state that gives up on its own is `BitDone`.

use std::fmt;

use emu_core::Ticks;
use tracing::{trace, warn};

use crate::bus::PinAccessor;
use crate::signal::Line;
use crate::timing::BusTiming;
use crate::transceiver::Transceiver;

/// Handshake phase of the byte in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum State {
    #[default]
    Idle,
    Init,
    Ready,
    Eoi,
    EoiAck,
    BitWait,
    BitDone,
    Frame,
    FrameWait,
}

impl State {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            State::Idle => "Idle",
            State::Init => "Init",
            State::Ready => "Ready",
            State::Eoi => "Eoi",
            State::EoiAck => "EoiAck",
            State::BitWait => "BitWait",
            State::BitDone => "BitDone",
            State::Frame => "Frame",
            State::FrameWait => "FrameWait",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one receive pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    /// More bits needed.
    Pending,
    /// A full byte arrived and has been acknowledged.
    Byte { value: u8, last: bool },
    /// The talker stopped clocking mid-byte.
    Aborted,
}

/// Result of one transmit pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Pending,
    /// The listener acknowledged the frame.
    Sent,
    /// No frame acknowledge within `frame_ack_timeout`. The byte is lost.
    FrameTimeout,
}

/// One participant's side of the byte handshake.
#[derive(Debug, Clone, Default)]
pub struct Link {
    state: State,
    /// Time spent in the current state.
    elapsed: Ticks,
    xcvr: Transceiver,
}

impl Link {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Time spent in the current state.
    #[must_use]
    pub fn elapsed(&self) -> Ticks {
        self.elapsed
    }

    #[must_use]
    pub fn transceiver(&self) -> &Transceiver {
        &self.xcvr
    }

    /// Account for virtual time passed since the last tick.
    pub fn add_elapsed(&mut self, elapsed: Ticks) {
        self.elapsed += elapsed;
    }

    /// Restart the state timer without changing state.
    pub fn restart_timer(&mut self) {
        self.elapsed = Ticks::ZERO;
    }

    fn enter(&mut self, state: State) {
        trace!(from = %self.state, to = %state, "link");
        self.state = state;
        self.elapsed = Ticks::ZERO;
    }

    /// Drop any byte in flight.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.elapsed = Ticks::ZERO;
        self.xcvr.reset();
    }

    /// Begin listening for a byte.
    pub fn start_receive(&mut self) {
        self.xcvr.reset();
        self.enter(State::Init);
    }

    /// Begin sending `value`, flagged as the stream's final byte if `last`.
    pub fn start_transmit(&mut self, value: u8, last: bool) {
        self.xcvr.load(value, last);
        self.enter(State::Init);
    }

    /// Count the byte in flight as delivered if the listener already holds
    /// its frame acknowledge.
    pub fn confirm_frame(&mut self, pins: &PinAccessor) -> bool {
        if self.state == State::FrameWait && pins.is_active(Line::Dat) {
            self.xcvr.ready = true;
        }
        self.xcvr.ready
    }

    /// Advance the listener side as far as the lines allow.
    pub fn receive(&mut self, pins: &mut PinAccessor, timing: &BusTiming) -> RxOutcome {
        loop {
            match self.state {
                State::Idle => return RxOutcome::Pending,
                State::Init => {
                    pins.drive(Line::Dat);
                    if pins.is_active(Line::Clk) {
                        return RxOutcome::Pending;
                    }
                    self.enter(State::Ready);
                }
                State::Ready => {
                    pins.release(Line::Dat);
                    if pins.is_active(Line::Clk) {
                        self.enter(State::BitWait);
                    } else if !self.xcvr.last && self.elapsed.reached(timing.eoi_timeout) {
                        self.xcvr.last = true;
                        self.enter(State::Eoi);
                    } else {
                        return RxOutcome::Pending;
                    }
                }
                State::Eoi => {
                    pins.drive(Line::Dat);
                    if !self.elapsed.reached(timing.eoi_ack_hold) {
                        return RxOutcome::Pending;
                    }
                    pins.release(Line::Dat);
                    self.enter(State::Ready);
                }
                State::BitWait => {
                    if pins.is_active(Line::Clk) {
                        return RxOutcome::Pending;
                    }
                    let bit = !pins.is_active(Line::Dat);
                    self.xcvr.shift_in(bit);
                    self.enter(State::BitDone);
                }
                State::BitDone => {
                    if pins.is_active(Line::Clk) {
                        if self.xcvr.complete() {
                            self.enter(State::Frame);
                        } else {
                            self.enter(State::BitWait);
                        }
                    } else if self.elapsed.reached(timing.bit_livelock) {
                        warn!(
                            unit = %pins.unit(),
                            bits = self.xcvr.cursor,
                            "clock stalled mid-byte, dropping byte"
                        );
                        pins.release(Line::Dat);
                        self.reset();
                        return RxOutcome::Aborted;
                    } else {
                        return RxOutcome::Pending;
                    }
                }
                State::Frame => {
                    pins.drive(Line::Dat);
                    if !self.elapsed.reached(timing.frame_ack_hold) {
                        return RxOutcome::Pending;
                    }
                    let value = self.xcvr.value;
                    let last = self.xcvr.last;
                    self.enter(State::Idle);
                    return RxOutcome::Byte { value, last };
                }
                // Talker-only states.
                State::EoiAck | State::FrameWait => return RxOutcome::Pending,
            }
        }
    }

    /// Advance the talker side as far as the lines allow.
    pub fn transmit(&mut self, pins: &mut PinAccessor, timing: &BusTiming) -> TxOutcome {
        loop {
            match self.state {
                State::Idle => return TxOutcome::Pending,
                State::Init => {
                    pins.drive(Line::Clk);
                    pins.release(Line::Dat);
                    if !self.elapsed.reached(timing.inter_byte) || !pins.is_active(Line::Dat) {
                        return TxOutcome::Pending;
                    }
                    pins.release(Line::Clk);
                    self.enter(State::Ready);
                }
                State::Ready => {
                    if pins.is_active(Line::Dat) {
                        return TxOutcome::Pending;
                    }
                    if self.xcvr.last {
                        self.enter(State::Eoi);
                    } else {
                        pins.drive(Line::Clk);
                        self.enter(State::BitWait);
                    }
                }
                State::Eoi => {
                    if !pins.is_active(Line::Dat) {
                        return TxOutcome::Pending;
                    }
                    self.enter(State::EoiAck);
                }
                State::EoiAck => {
                    if pins.is_active(Line::Dat) {
                        // Hold time counts from the end of the pulse.
                        self.restart_timer();
                        return TxOutcome::Pending;
                    }
                    if !self.elapsed.reached(timing.eoi_hold) {
                        return TxOutcome::Pending;
                    }
                    pins.drive(Line::Clk);
                    self.enter(State::BitWait);
                }
                State::BitWait => {
                    pins.drive(Line::Clk);
                    pins.set_line(Line::Dat, !self.xcvr.next_bit());
                    if !self.elapsed.reached(timing.pre_bit_setup) {
                        return TxOutcome::Pending;
                    }
                    pins.release(Line::Clk);
                    self.enter(State::BitDone);
                }
                State::BitDone => {
                    if !self.elapsed.reached(timing.bit_valid) {
                        return TxOutcome::Pending;
                    }
                    pins.drive(Line::Clk);
                    pins.release(Line::Dat);
                    self.xcvr.advance();
                    if self.xcvr.complete() {
                        self.enter(State::Frame);
                    } else {
                        self.enter(State::BitWait);
                    }
                }
                State::Frame => {
                    pins.drive(Line::Clk);
                    pins.release(Line::Dat);
                    self.enter(State::FrameWait);
                }
                State::FrameWait => {
                    if pins.is_active(Line::Dat) {
                        self.xcvr.ready = true;
                        self.enter(State::Idle);
                        return TxOutcome::Sent;
                    }
                    if !self.elapsed.reached(timing.frame_ack_timeout) {
                        return TxOutcome::Pending;
                    }
                    warn!(
                        unit = %pins.unit(),
                        value = self.xcvr.value,
                        "no frame acknowledge from listener"
                    );
                    pins.release(Line::Clk);
                    pins.release(Line::Dat);
                    self.reset();
                    return TxOutcome::FrameTimeout;
                }
            }
        }
    }
}
