//! Commodore serial bus (IEC) emulation.
//!
//! Five open-collector lines shared by every participant, a byte-level
//! handshake on CLK and DAT, and the protocol engine that lets a device
//! take part in LISTEN/TALK command cycles. Everything runs in virtual
//! time: components implement [`emu_core::Schedulable`] and never block.
//!
//! ```
//! use cbm_bus::{Bus, Controller, Device, DeviceConfig, MemoryStorage, Unit};
//! use emu_core::{Schedulable, Scheduler, Ticks};
//!
//! let bus = Bus::new();
//! let mut storage = MemoryStorage::new();
//! storage.load_channel(0, b"HI");
//! let mut drive = Device::new(&bus, DeviceConfig::new(Unit::device(8)?), storage)?;
//! let mut host = Controller::new(&bus, Default::default())?;
//!
//! host.talk(8, 0);
//! let mut scheduler = Scheduler::new();
//! let mut parts: [&mut dyn Schedulable; 2] = [&mut host, &mut drive];
//! scheduler.run_for(Ticks(20_000), &mut parts);
//! assert_eq!(host.received_bytes(), b"HI");
//! # Ok::<(), cbm_bus::BusError>(())
//! ```

mod bus;
mod command;
mod controller;
mod device;
mod error;
mod link;
mod signal;
mod storage;
mod timing;
mod transceiver;

pub use bus::{AccessorId, Bus, PinAccessor, Unit};
pub use command::{Command, ParsedCommand};
pub use controller::{Controller, Received, Status};
pub use device::{Device, Execution, Mode, Role};
pub use error::BusError;
pub use link::{Link, RxOutcome, State, TxOutcome};
pub use signal::{Line, SignalSet};
pub use storage::{CHANNELS, MemoryStorage, ReadResult, Storage};
pub use timing::{BusTiming, Clocking, DeviceConfig};
pub use transceiver::Transceiver;
