#![allow(dead_code)]

use cbm_bus::{Bus, BusTiming, Controller, Device, DeviceConfig, Mode, ReadResult, Storage, Unit};
use ctor::ctor;
use emu_core::{Schedulable, Scheduler, Ticks};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[ctor]
fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_file(true)
        .with_line_number(true)
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

/// Upper bound for any single scenario, in ticks.
pub const LIMIT: Ticks = Ticks(200_000);

/// Storage that serves one stream and records every call.
#[derive(Debug, Default)]
pub struct RecordingStorage {
    pub stream: Vec<u8>,
    pub position: usize,
    /// Channel of every `read` call.
    pub reads: Vec<u8>,
    pub push_backs: Vec<u8>,
    pub opens: Vec<(u8, Vec<u8>)>,
    pub closes: Vec<u8>,
    pub writes: Vec<(u8, Vec<u8>)>,
}

impl RecordingStorage {
    pub fn with_stream(stream: &[u8]) -> Self {
        Self {
            stream: stream.to_vec(),
            ..Self::default()
        }
    }
}

impl Storage for RecordingStorage {
    fn open(&mut self, channel: u8, name: &[u8]) {
        self.opens.push((channel, name.to_vec()));
    }

    fn close(&mut self, channel: u8) {
        self.closes.push(channel);
    }

    fn read(&mut self, channel: u8) -> ReadResult {
        self.reads.push(channel);
        let Some(&byte) = self.stream.get(self.position) else {
            return ReadResult::EndOfStream;
        };
        self.position += 1;
        if self.position == self.stream.len() {
            ReadResult::Last(byte)
        } else {
            ReadResult::Byte(byte)
        }
    }

    fn push_back(&mut self, channel: u8) {
        self.push_backs.push(channel);
        self.position = self.position.saturating_sub(1);
    }

    fn write(&mut self, channel: u8, data: &[u8]) {
        self.writes.push((channel, data.to_vec()));
    }
}

/// A controller and some devices on one bus, stepped together.
pub struct Harness {
    pub bus: Bus,
    pub controller: Controller,
    pub devices: Vec<Device<RecordingStorage>>,
    pub scheduler: Scheduler,
}

impl Harness {
    pub fn new(units: &[u8]) -> Self {
        let bus = Bus::new();
        let controller = Controller::new(&bus, BusTiming::default()).unwrap();
        let devices = units
            .iter()
            .map(|&unit| {
                let config = DeviceConfig::new(Unit::device(unit).unwrap());
                Device::new(&bus, config, RecordingStorage::default()).unwrap()
            })
            .collect();
        Self {
            bus,
            controller,
            devices,
            scheduler: Scheduler::new(),
        }
    }

    pub fn device(&self, unit: u8) -> &Device<RecordingStorage> {
        self.devices
            .iter()
            .find(|d| d.unit().number() == unit)
            .expect("no such unit")
    }

    pub fn storage(&self, unit: u8) -> &RecordingStorage {
        self.device(unit).storage()
    }

    /// Give `unit` a stream to talk.
    pub fn load(&mut self, unit: u8, stream: &[u8]) {
        let device = self
            .devices
            .iter_mut()
            .find(|d| d.unit().number() == unit)
            .expect("no such unit");
        *device.storage_mut() = RecordingStorage::with_stream(stream);
    }

    /// Tick whichever component is due next.
    pub fn step(&mut self) {
        let mut parts: Vec<&mut dyn Schedulable> = Vec::with_capacity(1 + self.devices.len());
        parts.push(&mut self.controller);
        for device in &mut self.devices {
            parts.push(device);
        }
        self.scheduler.step(&mut parts);
    }

    /// Step until `done` holds. `false` if [`LIMIT`] passes first.
    pub fn run_until(&mut self, done: impl Fn(&Self) -> bool) -> bool {
        while self.scheduler.now() < LIMIT {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }

    /// Run until the controller has drained its queue and every device is idle.
    pub fn finish(&mut self) {
        let settled = self.run_until(|h| {
            h.controller.is_idle() && h.devices.iter().all(|d| d.mode() == Mode::Idle)
        });
        assert!(settled, "bus did not settle by {LIMIT}");
        assert!(self.bus.merged().all_released(), "lines left driven");
    }
}
