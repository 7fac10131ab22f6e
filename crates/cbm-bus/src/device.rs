//! Protocol engine of a device on the serial bus.
//!
//! The engine follows the controller through a command cycle:
//!
//! ```text
//! Idle ──ATN+CLK──▶ Command ──LISTEN/TALK us──▶ Secondary
//!                      │                          │ ATN released
//!              not us / bad byte           ┌──────┴───────┐
//!                      ▼                listener        talker
//!                     Wait                   ▼             ▼
//!                      │ ATN released       Data      Turnaround ─▶ TurnHold ─▶ Talker
//!                      ▼                     │ATN+CLK                               │
//!                     Idle                Command                                Idle
//! ```
//!
//! Several phases may complete within a single tick. `advance` evaluates
//! the current phase once and reports whether the next phase should be
//! evaluated straight away; `tick` keeps calling it until it yields.

use std::fmt;

use emu_core::{Observable, Schedulable, Schedule, Ticks, Value};
use tracing::{debug, trace, warn};

use crate::bus::{Bus, PinAccessor, Unit};
use crate::command::{Command, ParsedCommand};
use crate::error::BusError;
use crate::link::{Link, RxOutcome, State, TxOutcome};
use crate::signal::{Line, SignalSet};
use crate::storage::{ReadResult, Storage};
use crate::timing::{Clocking, DeviceConfig};

/// Upper bound on phases evaluated in one tick.
const MAX_CHAIN: usize = 32;

/// Protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    #[default]
    Idle,
    /// Receiving primary addresses under ATN.
    Command,
    /// Addressed; receiving secondary addresses under ATN.
    Secondary,
    /// Listening to data after ATN was released.
    Data,
    /// Waiting for the controller to hand over CLK.
    Turnaround,
    /// Holding CLK after taking it over, before the first byte.
    TurnHold,
    /// Sending data.
    Talker,
    /// Not addressed; sitting out the rest of the ATN cycle.
    Wait,
}

impl Mode {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Mode::Idle => "Idle",
            Mode::Command => "Command",
            Mode::Secondary => "Secondary",
            Mode::Data => "Data",
            Mode::Turnaround => "Turnaround",
            Mode::TurnHold => "TurnHold",
            Mode::Talker => "Talker",
            Mode::Wait => "Wait",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Role after address negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Role {
    #[default]
    Passive,
    Listener,
    Talker,
}

impl Role {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Role::Passive => "Passive",
            Role::Listener => "Listener",
            Role::Talker => "Talker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a secondary command ran or waits for its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    Done,
    /// Parameters stream in during `Data`; runs once they end.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Yield,
}

/// A device on the bus: protocol engine plus the storage behind it.
pub struct Device<S: Storage = Box<dyn Storage>> {
    pins: PinAccessor,
    config: DeviceConfig,
    storage: S,
    mode: Mode,
    role: Role,
    link: Link,
    command: ParsedCommand,
    /// Secondary command waiting for its parameter bytes.
    deferred: Option<Command>,
    /// Channel selected by the last secondary address.
    channel: u8,
    clocking_warned: bool,
}

impl<S: Storage> Device<S> {
    /// Wire a device onto `bus`.
    ///
    /// Fails if the unit is already taken or is not a device unit.
    pub fn new(bus: &Bus, config: DeviceConfig, storage: S) -> Result<Self, BusError> {
        if config.unit.is_master() {
            return Err(BusError::InvalidUnit(config.unit.number()));
        }
        let pins = bus.attach(config.unit)?;
        Ok(Self {
            pins,
            config,
            storage,
            mode: Mode::Idle,
            role: Role::Passive,
            link: Link::new(),
            command: ParsedCommand::default(),
            deferred: None,
            channel: 0,
            clocking_warned: false,
        })
    }

    #[must_use]
    pub fn unit(&self) -> Unit {
        self.config.unit
    }

    #[must_use]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Handshake state of the byte in flight.
    #[must_use]
    pub fn state(&self) -> State {
        self.link.state()
    }

    #[must_use]
    pub fn command(&self) -> &ParsedCommand {
        &self.command
    }

    /// Channel selected by the last secondary address.
    #[must_use]
    pub fn channel(&self) -> u8 {
        self.channel
    }

    #[must_use]
    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Lines this device is driving.
    #[must_use]
    pub fn own_lines(&self) -> SignalSet {
        self.pins.own()
    }

    /// Return to `Idle` and release the bus.
    pub fn reset(&mut self) {
        self.go_idle();
    }

    /// Decode a byte received under ATN. Invalid bytes are logged.
    #[must_use]
    pub fn parse_command(&self, byte: u8) -> Option<Command> {
        match Command::parse(byte) {
            Ok(command) => Some(command),
            Err(err) => {
                warn!(unit = %self.unit(), %err, "ignoring control byte");
                None
            }
        }
    }

    /// Apply an addressing command and return the resulting role.
    ///
    /// LISTEN and TALK make this device listener or talker only when they
    /// carry its own unit number; anything else leaves it passive.
    /// Secondary commands leave the role alone.
    pub fn process_command(&mut self, command: Command) -> Role {
        let own = self.unit().number();
        let role = match command {
            Command::Listen(unit) if unit == own => Role::Listener,
            Command::Talk(unit) if unit == own => Role::Talker,
            Command::Listen(_) | Command::Talk(_) | Command::Unlisten | Command::Untalk => {
                Role::Passive
            }
            Command::Open(_) | Command::Close(_) | Command::Reopen(_) => return self.role,
        };
        if role != self.role {
            debug!(unit = %self.unit(), %command, from = %self.role, to = %role, "role");
        }
        self.role = role;
        role
    }

    /// Run a secondary command, or defer it until its data has arrived.
    pub fn process_secondary(&mut self, command: Command) -> Execution {
        match (command, self.role) {
            (_, Role::Passive) => Execution::Done,
            (Command::Open(channel) | Command::Reopen(channel), Role::Listener) => {
                self.channel = channel;
                self.deferred = Some(command);
                Execution::Deferred
            }
            (Command::Open(channel), Role::Talker) => {
                self.channel = channel;
                debug!(unit = %self.unit(), channel, "open for talk");
                self.storage.open(channel, &self.command.params);
                Execution::Done
            }
            (Command::Reopen(channel), Role::Talker) => {
                self.channel = channel;
                Execution::Done
            }
            (Command::Close(channel), _) => {
                debug!(unit = %self.unit(), channel, "close");
                self.storage.close(channel);
                Execution::Done
            }
            _ => Execution::Done,
        }
    }

    /// Run the deferred secondary command with the parameters gathered so far.
    fn flush_deferred(&mut self) {
        let Some(command) = self.deferred.take() else {
            return;
        };
        let params = std::mem::take(&mut self.command.params);
        match command {
            Command::Open(channel) => {
                debug!(
                    unit = %self.unit(),
                    channel,
                    name = %String::from_utf8_lossy(&params),
                    "open"
                );
                self.storage.open(channel, &params);
            }
            Command::Reopen(channel) if !params.is_empty() => {
                debug!(unit = %self.unit(), channel, len = params.len(), "write");
                self.storage.write(channel, &params);
            }
            _ => {}
        }
    }

    fn set_mode(&mut self, mode: Mode) {
        if mode != self.mode {
            trace!(unit = %self.unit(), from = %self.mode, to = %mode, "mode");
        }
        self.mode = mode;
        self.link.restart_timer();
    }

    fn go_idle(&mut self) {
        self.pins.release_all();
        self.link.reset();
        self.role = Role::Passive;
        self.command.clear();
        self.deferred = None;
        self.set_mode(Mode::Idle);
    }

    fn enter_wait(&mut self) {
        self.pins.release_all();
        self.link.reset();
        self.set_mode(Mode::Wait);
    }

    fn begin_command(&mut self) {
        self.flush_deferred();
        self.command.clear();
        self.link.start_receive();
        self.set_mode(Mode::Command);
    }

    /// Evaluate the current phase once.
    fn advance(&mut self) -> Step {
        if self.pins.is_active(Line::Rst) {
            if self.mode != Mode::Idle || !self.pins.own().all_released() {
                debug!(unit = %self.unit(), "bus reset");
                self.go_idle();
            }
            return Step::Yield;
        }

        match self.mode {
            Mode::Idle => self.idle(),
            Mode::Command | Mode::Secondary => self.attention(),
            Mode::Data => self.data(),
            Mode::Turnaround => self.turnaround(),
            Mode::TurnHold => self.turn_hold(),
            Mode::Talker => self.talk(),
            Mode::Wait => self.wait(),
        }
    }

    fn idle(&mut self) -> Step {
        if self.pins.is_active(Line::Atn) && self.pins.is_active(Line::Clk) {
            self.begin_command();
            Step::Continue
        } else {
            Step::Yield
        }
    }

    /// Command and Secondary: bytes under ATN.
    fn attention(&mut self) -> Step {
        // A byte in its frame acknowledge still completes after ATN goes.
        if !self.pins.is_active(Line::Atn) && self.link.state() != State::Frame {
            return match self.link.state() {
                State::Idle | State::Init => self.attention_released(),
                state => {
                    debug!(unit = %self.unit(), %state, "ATN released mid-byte");
                    self.go_idle();
                    Step::Continue
                }
            };
        }

        match self.link.receive(&mut self.pins, &self.config.timing) {
            RxOutcome::Pending => Step::Yield,
            RxOutcome::Aborted => {
                self.go_idle();
                Step::Continue
            }
            RxOutcome::Byte { value, .. } => {
                self.attention_byte(value);
                Step::Continue
            }
        }
    }

    fn attention_byte(&mut self, byte: u8) {
        let Some(command) = self.parse_command(byte) else {
            self.enter_wait();
            return;
        };
        trace!(unit = %self.unit(), %command, "under ATN");

        if self.role == Role::Passive && !command.is_primary() {
            // Secondary address meant for whoever was addressed.
            self.enter_wait();
            return;
        }

        self.flush_deferred();
        self.command.clear();
        self.command.command = Some(command);
        if command.is_primary() {
            if self.process_command(command) == Role::Passive {
                self.enter_wait();
                return;
            }
        } else if self.process_secondary(command) == Execution::Deferred {
            trace!(unit = %self.unit(), %command, "waiting for data");
        }

        self.link.start_receive();
        self.set_mode(Mode::Secondary);
    }

    fn has_secondary(&self) -> bool {
        self.command.command.is_some_and(|command| !command.is_primary())
    }

    fn attention_released(&mut self) -> Step {
        if self.role != Role::Passive && !self.has_secondary() {
            // No secondary address: the default data channel.
            self.process_secondary(Command::Reopen(0));
        }
        match self.role {
            Role::Passive => self.go_idle(),
            Role::Listener => {
                self.link.start_receive();
                self.set_mode(Mode::Data);
            }
            Role::Talker => {
                self.link.reset();
                self.set_mode(Mode::Turnaround);
            }
        }
        Step::Continue
    }

    fn data(&mut self) -> Step {
        // Finish acknowledging the final byte before answering ATN.
        if self.pins.is_active(Line::Atn) && self.link.state() != State::Frame {
            if self.pins.is_active(Line::Clk) {
                self.begin_command();
                return Step::Continue;
            }
            return Step::Yield;
        }

        match self.link.receive(&mut self.pins, &self.config.timing) {
            RxOutcome::Pending => Step::Yield,
            RxOutcome::Aborted => {
                self.go_idle();
                Step::Continue
            }
            RxOutcome::Byte { value, last } => {
                if self.deferred.is_none() {
                    self.deferred = Some(Command::Reopen(self.channel));
                }
                self.command.params.push(value);
                if last {
                    self.flush_deferred();
                }
                self.link.start_receive();
                Step::Continue
            }
        }
    }

    fn turnaround(&mut self) -> Step {
        if self.pins.is_active(Line::Atn) {
            if self.pins.is_active(Line::Clk) {
                self.begin_command();
                return Step::Continue;
            }
            return Step::Yield;
        }
        if self.pins.is_active(Line::Clk) {
            return Step::Yield;
        }

        // Controller let go of CLK and holds DAT: take over as talker.
        self.pins.drive(Line::Clk);
        self.pins.release(Line::Dat);
        self.set_mode(Mode::TurnHold);
        Step::Continue
    }

    fn turn_hold(&mut self) -> Step {
        if self.pins.is_active(Line::Atn) {
            self.abort_talk();
            return Step::Continue;
        }
        if !self.link.elapsed().reached(self.config.timing.turnaround_hold) {
            return Step::Yield;
        }
        if self.send_next() {
            self.set_mode(Mode::Talker);
        } else {
            // Controller sees no byte and times out on its own.
            debug!(unit = %self.unit(), channel = self.channel, "nothing to send");
            self.go_idle();
        }
        Step::Continue
    }

    /// Load the next byte from storage. `false` at end of stream.
    fn send_next(&mut self) -> bool {
        match self.storage.read(self.channel) {
            ReadResult::Byte(value) => self.link.start_transmit(value, false),
            ReadResult::Last(value) => self.link.start_transmit(value, true),
            ReadResult::EndOfStream => return false,
        }
        true
    }

    fn talk(&mut self) -> Step {
        if self.pins.is_active(Line::Atn) {
            self.link.confirm_frame(&self.pins);
            self.abort_talk();
            return Step::Continue;
        }

        match self.link.transmit(&mut self.pins, &self.config.timing) {
            TxOutcome::Pending => Step::Yield,
            TxOutcome::Sent => {
                if self.link.transceiver().last {
                    debug!(unit = %self.unit(), channel = self.channel, "stream sent");
                    self.go_idle();
                } else if !self.send_next() {
                    debug!(unit = %self.unit(), channel = self.channel, "stream ended without EOI");
                    self.go_idle();
                }
                Step::Continue
            }
            TxOutcome::FrameTimeout => {
                warn!(unit = %self.unit(), channel = self.channel, "talk abandoned");
                self.go_idle();
                Step::Continue
            }
        }
    }

    /// ATN while talking: drop off the bus, keeping an unconsumed byte.
    fn abort_talk(&mut self) {
        let xcvr = self.link.transceiver();
        if !xcvr.ready {
            debug!(
                unit = %self.unit(),
                channel = self.channel,
                value = xcvr.value,
                "ATN during talk, pushing back unsent byte"
            );
            self.storage.push_back(self.channel);
        }
        self.go_idle();
    }

    fn wait(&mut self) -> Step {
        if self.pins.is_active(Line::Atn) {
            Step::Yield
        } else {
            self.go_idle();
            Step::Continue
        }
    }
}

impl<S: Storage> Schedulable for Device<S> {
    fn tick(&mut self, elapsed: Ticks) -> Schedule {
        let poll = self.config.timing.poll_interval;
        if self.config.clocking != Clocking::Internal {
            if !self.clocking_warned {
                warn!(
                    unit = %self.unit(),
                    clocking = ?self.config.clocking,
                    "bit clocking mode not modeled, device stays idle"
                );
                self.clocking_warned = true;
            }
            return Schedule::After(poll);
        }

        self.link.add_elapsed(elapsed);
        for _ in 0..MAX_CHAIN {
            if self.advance() == Step::Yield {
                return Schedule::After(poll);
            }
        }
        warn!(unit = %self.unit(), mode = %self.mode, "phase chain did not settle this tick");
        Schedule::After(poll)
    }
}

impl<S: Storage> Observable for Device<S> {
    /// Line paths report `true` when the line is active (low).
    fn query(&self, path: &str) -> Option<Value> {
        let lines = self.pins.lines();
        let own = self.pins.own();
        match path {
            "unit" => Some(self.unit().number().into()),
            "mode" => Some(self.mode.name().into()),
            "role" => Some(self.role.name().into()),
            "state" => Some(self.link.state().name().into()),
            "channel" => Some(self.channel.into()),
            "elapsed" => Some(self.link.elapsed().get().into()),
            "lines.atn" => Some(lines.is_active(Line::Atn).into()),
            "lines.clk" => Some(lines.is_active(Line::Clk).into()),
            "lines.dat" => Some(lines.is_active(Line::Dat).into()),
            "own.clk" => Some(own.is_active(Line::Clk).into()),
            "own.dat" => Some(own.is_active(Line::Dat).into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "unit",
            "mode",
            "role",
            "state",
            "channel",
            "elapsed",
            "lines.atn",
            "lines.clk",
            "lines.dat",
            "own.clk",
            "own.dat",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn device(bus: &Bus, unit: u8) -> Device<MemoryStorage> {
        let config = DeviceConfig::new(Unit::device(unit).unwrap());
        Device::new(bus, config, MemoryStorage::new()).unwrap()
    }

    #[test]
    fn talk_and_listen_address_only_own_unit() {
        let bus = Bus::new();
        let mut dev = device(&bus, 8);
        assert_eq!(dev.process_command(Command::Listen(8)), Role::Listener);
        assert_eq!(dev.process_command(Command::Talk(8)), Role::Talker);
        assert_eq!(dev.process_command(Command::Talk(9)), Role::Passive);
        assert_eq!(dev.process_command(Command::Listen(30)), Role::Passive);
    }

    #[test]
    fn unlisten_and_untalk_always_passive() {
        let bus = Bus::new();
        let mut dev = device(&bus, 8);
        dev.process_command(Command::Listen(8));
        assert_eq!(dev.process_command(Command::Unlisten), Role::Passive);
        dev.process_command(Command::Talk(8));
        assert_eq!(dev.process_command(Command::Untalk), Role::Passive);
    }

    #[test]
    fn byte_0x48_makes_only_unit_8_talker() {
        let bus = Bus::new();
        let mut devices: Vec<_> = [8, 9, 10].into_iter().map(|u| device(&bus, u)).collect();
        for dev in &mut devices {
            let command = dev.parse_command(0x48).unwrap();
            dev.process_command(command);
        }
        let roles: Vec<_> = devices.iter().map(Device::role).collect();
        assert_eq!(roles, [Role::Talker, Role::Passive, Role::Passive]);
    }

    #[test]
    fn invalid_control_byte_parses_to_none() {
        let bus = Bus::new();
        let dev = device(&bus, 8);
        assert_eq!(dev.parse_command(0x80), None);
        assert_eq!(dev.parse_command(0xF2), Some(Command::Open(2)));
    }

    #[test]
    fn listener_open_is_deferred_until_data() {
        let bus = Bus::new();
        let mut dev = device(&bus, 8);
        dev.process_command(Command::Listen(8));
        assert_eq!(dev.process_secondary(Command::Open(2)), Execution::Deferred);
        assert_eq!(dev.channel(), 2);
        assert!(!dev.storage().is_open(2));

        dev.command.params.extend_from_slice(b"FILE");
        dev.flush_deferred();
        assert_eq!(dev.storage().name(2), Some(&b"FILE"[..]));
    }

    #[test]
    fn close_and_talker_reopen_run_immediately() {
        let bus = Bus::new();
        let mut dev = device(&bus, 8);
        dev.storage_mut().open(3, b"X");
        dev.process_command(Command::Listen(8));
        assert_eq!(dev.process_secondary(Command::Close(3)), Execution::Done);
        assert!(!dev.storage().is_open(3));

        dev.process_command(Command::Talk(8));
        assert_eq!(dev.process_secondary(Command::Reopen(5)), Execution::Done);
        assert_eq!(dev.channel(), 5);
    }

    #[test]
    fn passive_device_ignores_secondary() {
        let bus = Bus::new();
        let mut dev = device(&bus, 8);
        dev.storage_mut().open(1, b"KEEP");
        assert_eq!(dev.process_secondary(Command::Close(1)), Execution::Done);
        assert!(dev.storage().is_open(1));
    }

    #[test]
    fn duplicate_unit_is_rejected_at_wiring() {
        let bus = Bus::new();
        let _first = device(&bus, 8);
        let config = DeviceConfig::new(Unit::device(8).unwrap());
        let second = Device::new(&bus, config, MemoryStorage::new());
        assert!(matches!(second, Err(BusError::UnitInUse(8))));
    }

    #[test]
    fn master_unit_is_not_a_device() {
        let bus = Bus::new();
        let config = DeviceConfig::new(Unit::MASTER);
        let dev = Device::new(&bus, config, MemoryStorage::new());
        assert!(matches!(dev, Err(BusError::InvalidUnit(0xFF))));
    }

    #[test]
    fn command_mode_needs_atn_and_clk() {
        let bus = Bus::new();
        let mut host = bus.attach(Unit::MASTER).unwrap();
        let mut dev = device(&bus, 8);

        host.drive(Line::Atn);
        dev.tick(Ticks(5));
        assert_eq!(dev.mode(), Mode::Idle);

        host.drive(Line::Clk);
        dev.tick(Ticks(5));
        assert_eq!(dev.mode(), Mode::Command);
        assert_eq!(dev.state(), State::Init);
        assert!(dev.own_lines().is_active(Line::Dat));
    }

    #[test]
    fn reset_line_returns_to_idle() {
        let bus = Bus::new();
        let mut host = bus.attach(Unit::MASTER).unwrap();
        let mut dev = device(&bus, 8);
        host.drive(Line::Atn);
        host.drive(Line::Clk);
        dev.tick(Ticks(5));
        assert_eq!(dev.mode(), Mode::Command);

        host.drive(Line::Rst);
        dev.tick(Ticks(5));
        assert_eq!(dev.mode(), Mode::Idle);
        assert!(dev.own_lines().all_released());

        // Held in reset even though ATN and CLK are still active.
        dev.tick(Ticks(5));
        assert_eq!(dev.mode(), Mode::Idle);
    }

    #[test]
    fn external_clocking_is_a_no_op() {
        let bus = Bus::new();
        let mut host = bus.attach(Unit::MASTER).unwrap();
        let mut config = DeviceConfig::new(Unit::device(8).unwrap());
        config.clocking = Clocking::External;
        let mut dev = Device::new(&bus, config, MemoryStorage::new()).unwrap();

        host.drive(Line::Atn);
        host.drive(Line::Clk);
        assert_eq!(dev.tick(Ticks(5)), Schedule::After(Ticks(5)));
        assert_eq!(dev.tick(Ticks(5)), Schedule::After(Ticks(5)));
        assert_eq!(dev.mode(), Mode::Idle);
        assert!(dev.own_lines().all_released());
    }

    #[test]
    fn boxed_storage_is_the_default() {
        let bus = Bus::new();
        let config = DeviceConfig::new(Unit::device(9).unwrap());
        let storage: Box<dyn Storage> = Box::new(MemoryStorage::new());
        let dev: Device = Device::new(&bus, config, storage).unwrap();
        assert_eq!(dev.unit().number(), 9);
    }

    /// A device already talking channel 0, first byte loaded.
    fn talking(bus: &Bus, stream: &[u8]) -> Device<MemoryStorage> {
        let mut dev = device(bus, 8);
        dev.storage_mut().load_channel(0, stream);
        dev.process_command(Command::Talk(8));
        dev.set_mode(Mode::Talker);
        assert!(dev.send_next());
        dev
    }

    #[test]
    fn atn_while_talking_chains_into_command_in_one_tick() {
        let bus = Bus::new();
        let mut host = bus.attach(Unit::MASTER).unwrap();
        let mut dev = talking(&bus, b"AB");

        host.drive(Line::Atn);
        host.drive(Line::Clk);
        dev.tick(Ticks(5));

        // Talker -> Idle -> Command without another tick.
        assert_eq!(dev.mode(), Mode::Command);
        assert_eq!(dev.state(), State::Init);
        assert_eq!(dev.role(), Role::Passive);
        assert!(dev.own_lines().is_active(Line::Dat));
        assert_eq!(dev.storage_mut().read(0), ReadResult::Byte(b'A'));
    }

    #[test]
    fn atn_during_frame_acknowledge_keeps_byte_delivered() {
        let bus = Bus::new();
        let mut host = bus.attach(Unit::MASTER).unwrap();
        let mut dev = talking(&bus, b"AB");
        let timing = dev.config().timing;
        let mut listener = Link::new();
        listener.start_receive();

        let mut guard = 0;
        while !(dev.state() == State::FrameWait && listener.state() == State::Frame) {
            dev.tick(Ticks(5));
            listener.add_elapsed(Ticks(5));
            assert_eq!(listener.receive(&mut host, &timing), RxOutcome::Pending);
            guard += 1;
            assert!(guard < 1000, "never reached the frame acknowledge");
        }
        assert!(bus.merged().is_active(Line::Dat));

        host.drive(Line::Atn);
        dev.tick(Ticks(5));
        assert_eq!(dev.mode(), Mode::Idle);

        let mut value = None;
        while value.is_none() {
            listener.add_elapsed(Ticks(5));
            if let RxOutcome::Byte { value: byte, .. } = listener.receive(&mut host, &timing) {
                value = Some(byte);
            }
            guard += 1;
            assert!(guard < 1000, "frame acknowledge never finished");
        }
        assert_eq!(value, Some(b'A'));
        // Not pushed back: the stream continues after the delivered byte.
        assert_eq!(dev.storage_mut().read(0), ReadResult::Last(b'B'));
    }

    #[test]
    fn missing_frame_acknowledge_drops_talker_to_idle() {
        let bus = Bus::new();
        let mut host = bus.attach(Unit::MASTER).unwrap();
        let mut dev = talking(&bus, b"AB");

        // Listener present but never acknowledges the frame.
        host.drive(Line::Dat);
        let mut guard = 0;
        while dev.state() != State::Ready {
            dev.tick(Ticks(5));
            guard += 1;
            assert!(guard < 1000, "talker never released CLK");
        }
        host.release(Line::Dat);

        while dev.mode() != Mode::Idle {
            dev.tick(Ticks(5));
            guard += 1;
            assert!(guard < 2000, "talker never gave up");
        }
        assert_eq!(dev.role(), Role::Passive);
        assert!(dev.own_lines().all_released());
        assert!(bus.merged().all_released());
        // The byte is lost, not pushed back.
        assert_eq!(dev.storage_mut().read(0), ReadResult::Last(b'B'));
    }

    #[test]
    fn query_reports_phase() {
        let bus = Bus::new();
        let dev = device(&bus, 8);
        assert_eq!(dev.query("mode"), Some(Value::Str("Idle")));
        assert_eq!(dev.query("unit"), Some(Value::U8(8)));
        assert_eq!(dev.query("lines.atn"), Some(Value::Bool(false)));
        assert_eq!(dev.query("nope"), None);
        for path in dev.query_paths() {
            assert!(dev.query(path).is_some(), "{path}");
        }
    }
}
