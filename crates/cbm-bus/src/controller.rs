//! Scripted bus master.
//!
//! The controller plays the computer's side of the bus. Each request
//! queues a transaction of primitive actions which are worked off one by
//! one as the lines allow:
//!
//! | Request   | Under ATN                    | After ATN                   |
//! |-----------|------------------------------|-----------------------------|
//! | `open`    | LISTEN u, OPEN ch            | name, then UNLISTEN         |
//! | `close`   | LISTEN u, CLOSE ch, UNLISTEN |                             |
//! | `listen`  | LISTEN u, REOPEN ch          | data, then UNLISTEN         |
//! | `talk`    | TALK u, REOPEN ch            | turnaround, receive, UNTALK |
//! | `command` | raw bytes                    |                             |
//!
//! A failed action sets a [`Status`] bit and skips to the end of its
//! transaction, which always leaves every line released.

use std::collections::VecDeque;

use bitflags::bitflags;
use emu_core::{Observable, Schedulable, Schedule, Ticks, Value};
use tracing::{debug, trace, warn};

use crate::bus::{Bus, PinAccessor, Unit};
use crate::command::Command;
use crate::error::BusError;
use crate::link::{Link, RxOutcome, State, TxOutcome};
use crate::signal::Line;
use crate::timing::BusTiming;

const MAX_CHAIN: usize = 32;

bitflags! {
    /// Outcome of the most recent transaction, laid out like the KERNAL
    /// status byte.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Status: u8 {
        const TIMEOUT_WRITE = 0x01;
        const TIMEOUT_READ = 0x02;
        /// The talker flagged its last byte.
        const EOI = 0x40;
        const DEVICE_NOT_PRESENT = 0x80;
    }
}

/// A byte received from a talker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub value: u8,
    /// Sent with end-or-identify.
    pub eoi: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    /// Clear status and received data.
    Begin,
    /// Assert ATN and CLK, wait for a device to hold DAT. At the start of
    /// a transaction DAT must first be seen released, so a frame
    /// acknowledge left over on the bus is not taken for an answer.
    Attention { fresh: bool },
    Send { byte: u8, last: bool },
    /// Hold ATN a little longer, then release it. CLK stays driven.
    ReleaseAttention,
    /// Hand CLK to the addressed talker.
    Turnaround,
    /// Receive bytes until EOI.
    Receive,
    /// Release every line and keep the bus free for `bus_free`.
    Finish,
}

/// Bus master driving devices through open/close/listen/talk transactions.
pub struct Controller {
    pins: PinAccessor,
    timing: BusTiming,
    link: Link,
    queue: VecDeque<Action>,
    current: Option<Action>,
    received: Vec<Received>,
    status: Status,
}

impl Controller {
    /// Attach a controller to `bus` as a master.
    pub fn new(bus: &Bus, timing: BusTiming) -> Result<Self, BusError> {
        Ok(Self {
            pins: bus.attach(Unit::MASTER)?,
            timing,
            link: Link::new(),
            queue: VecDeque::new(),
            current: None,
            received: Vec::new(),
            status: Status::empty(),
        })
    }

    /// No transaction queued or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }

    /// Status of the most recent transaction.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn received(&self) -> &[Received] {
        &self.received
    }

    #[must_use]
    pub fn received_bytes(&self) -> Vec<u8> {
        self.received.iter().map(|r| r.value).collect()
    }

    /// Open `channel` on `unit`, sending `name` as the parameter bytes.
    pub fn open(&mut self, unit: u8, channel: u8, name: &[u8]) {
        self.queue_listen(unit, Command::Open(channel), name);
    }

    pub fn close(&mut self, unit: u8, channel: u8) {
        self.queue_listen(unit, Command::Close(channel), &[]);
    }

    /// Send `data` to `channel` on `unit`.
    pub fn listen(&mut self, unit: u8, channel: u8, data: &[u8]) {
        self.queue_listen(unit, Command::Reopen(channel), data);
    }

    /// Read `channel` on `unit` until the device signals EOI.
    pub fn talk(&mut self, unit: u8, channel: u8) {
        self.queue.extend([Action::Begin, Action::Attention { fresh: true }]);
        self.queue_command(Command::Talk(unit));
        self.queue_command(Command::Reopen(channel));
        self.queue.extend([
            Action::ReleaseAttention,
            Action::Turnaround,
            Action::Receive,
            Action::Attention { fresh: false },
        ]);
        self.queue_command(Command::Untalk);
        self.queue.push_back(Action::Finish);
    }

    /// Send raw bytes under ATN, then release the bus.
    pub fn command(&mut self, bytes: &[u8]) {
        self.queue.extend([Action::Begin, Action::Attention { fresh: true }]);
        self.queue
            .extend(bytes.iter().map(|&byte| Action::Send { byte, last: false }));
        self.queue.push_back(Action::Finish);
    }

    fn queue_command(&mut self, command: Command) {
        self.queue.push_back(Action::Send {
            byte: command.to_byte(),
            last: false,
        });
    }

    fn queue_listen(&mut self, unit: u8, secondary: Command, data: &[u8]) {
        self.queue.extend([Action::Begin, Action::Attention { fresh: true }]);
        self.queue_command(Command::Listen(unit));
        self.queue_command(secondary);
        if let Some((&final_byte, rest)) = data.split_last() {
            self.queue.push_back(Action::ReleaseAttention);
            self.queue
                .extend(rest.iter().map(|&byte| Action::Send { byte, last: false }));
            self.queue.push_back(Action::Send {
                byte: final_byte,
                last: true,
            });
            // The listener still holds its frame acknowledge and keeps DAT
            // down into the command cycle.
            self.queue.push_back(Action::Attention { fresh: false });
        }
        self.queue_command(Command::Unlisten);
        self.queue.push_back(Action::Finish);
    }

    fn start(&mut self, action: Action) {
        trace!(?action, "controller");
        match action {
            Action::Begin => {}
            Action::Attention { .. } => {
                self.pins.release(Line::Dat);
                self.pins.drive(Line::Atn);
                self.pins.drive(Line::Clk);
                self.link.reset();
            }
            Action::Send { byte, last } => self.link.start_transmit(byte, last),
            Action::ReleaseAttention => {
                self.pins.drive(Line::Clk);
                self.link.reset();
            }
            Action::Turnaround => {
                self.pins.drive(Line::Dat);
                self.pins.release(Line::Clk);
                self.link.reset();
            }
            Action::Receive => self.link.start_receive(),
            Action::Finish => {
                self.pins.release_all();
                self.link.reset();
            }
        }
        self.current = Some(action);
    }

    fn done(&mut self) -> bool {
        self.current = None;
        true
    }

    /// Record a failure and skip the rest of the transaction.
    fn fail(&mut self, flag: Status) -> bool {
        warn!(status = ?flag, action = ?self.current, "transaction aborted");
        self.status.insert(flag);
        while let Some(&next) = self.queue.front() {
            if next == Action::Finish {
                break;
            }
            self.queue.pop_front();
        }
        self.done()
    }

    fn stalled(&self) -> bool {
        self.link.elapsed().reached(self.timing.stall_timeout)
    }

    /// Work on the current action. `true` if the next one may start now.
    fn advance(&mut self) -> bool {
        let action = match self.current {
            Some(action) => action,
            None => match self.queue.pop_front() {
                Some(action) => {
                    self.start(action);
                    action
                }
                None => return false,
            },
        };

        match action {
            Action::Begin => {
                self.status = Status::empty();
                self.received.clear();
                self.done()
            }
            Action::Attention { fresh } => {
                let dat = self.pins.is_active(Line::Dat);
                if fresh && !dat {
                    self.current = Some(Action::Attention { fresh: false });
                }
                if dat && !fresh {
                    self.done()
                } else if self.link.elapsed().reached(self.timing.attention_timeout) {
                    self.fail(Status::DEVICE_NOT_PRESENT)
                } else {
                    false
                }
            }
            Action::Send { .. } => match self.link.transmit(&mut self.pins, &self.timing) {
                TxOutcome::Sent => self.done(),
                TxOutcome::FrameTimeout => self.fail(Status::TIMEOUT_WRITE),
                TxOutcome::Pending if self.stalled() => {
                    // Nobody took up the byte under ATN: the unit is absent.
                    let absent =
                        self.pins.own().is_active(Line::Atn) && self.link.state() == State::Init;
                    self.link.reset();
                    if absent {
                        self.fail(Status::DEVICE_NOT_PRESENT)
                    } else {
                        self.fail(Status::TIMEOUT_WRITE)
                    }
                }
                TxOutcome::Pending => false,
            },
            Action::ReleaseAttention => {
                if self.link.elapsed().reached(self.timing.attention_release) {
                    self.pins.release(Line::Atn);
                    self.done()
                } else {
                    false
                }
            }
            Action::Turnaround => {
                if self.pins.is_active(Line::Clk) {
                    self.done()
                } else if self.stalled() {
                    self.fail(Status::TIMEOUT_READ)
                } else {
                    false
                }
            }
            Action::Receive => self.receive(),
            Action::Finish => {
                if !self.link.elapsed().reached(self.timing.bus_free) {
                    return false;
                }
                debug!(
                    status = ?self.status,
                    received = self.received.len(),
                    "transaction finished"
                );
                self.done()
            }
        }
    }

    fn receive(&mut self) -> bool {
        match self.link.receive(&mut self.pins, &self.timing) {
            RxOutcome::Byte { value, last } => {
                self.received.push(Received { value, eoi: last });
                if last {
                    self.status.insert(Status::EOI);
                    self.done()
                } else {
                    self.link.start_receive();
                    true
                }
            }
            RxOutcome::Aborted => self.read_timeout(),
            RxOutcome::Pending if self.stalled() => self.read_timeout(),
            RxOutcome::Pending => false,
        }
    }

    /// The talker went quiet. Untalk is still sent.
    fn read_timeout(&mut self) -> bool {
        warn!(received = self.received.len(), "talker stopped sending");
        self.status.insert(Status::TIMEOUT_READ);
        self.link.reset();
        self.done()
    }
}

impl Schedulable for Controller {
    fn tick(&mut self, elapsed: Ticks) -> Schedule {
        self.link.add_elapsed(elapsed);
        for _ in 0..MAX_CHAIN {
            if !self.advance() {
                break;
            }
        }
        Schedule::After(self.timing.poll_interval)
    }
}

impl Observable for Controller {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "idle" => Some(self.is_idle().into()),
            "status" => Some(self.status.bits().into()),
            "state" => Some(self.link.state().name().into()),
            "received" => Some((self.received.len() as u64).into()),
            "lines.atn" => Some(self.pins.is_active(Line::Atn).into()),
            "lines.clk" => Some(self.pins.is_active(Line::Clk).into()),
            "lines.dat" => Some(self.pins.is_active(Line::Dat).into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "idle",
            "status",
            "state",
            "received",
            "lines.atn",
            "lines.clk",
            "lines.dat",
        ]
    }
}
