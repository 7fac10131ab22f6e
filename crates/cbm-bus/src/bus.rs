//! Shared bus state and the accessors wired onto it.
//!
//! The bus keeps a registry of slots, one per attached accessor. A slot
//! holds the accessor's unit number and its private signal set; the slot
//! index is the accessor's stable handle. The merged line state is the
//! wired-AND of every occupied slot and is recomputed synchronously on
//! every write, so a pin change is visible to all participants before the
//! writer's call returns.
//!
//! Accessors register when created through [`Bus::attach`] and deregister
//! when dropped. There is no other way to free a slot, so a handle can
//! never outlive its registration.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::BusError;
use crate::signal::{Line, SignalSet};

/// A participant's unit number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Unit(u8);

impl Unit {
    /// Shared by bus masters that are not addressable devices. Any number
    /// of accessors may attach with it.
    pub const MASTER: Unit = Unit(0xFF);

    /// Highest addressable device unit; 31 encodes unlisten/untalk.
    pub const MAX_DEVICE: u8 = 30;

    /// A device unit in `0..=30`.
    pub fn device(number: u8) -> Result<Self, BusError> {
        if number <= Self::MAX_DEVICE {
            Ok(Self(number))
        } else {
            Err(BusError::InvalidUnit(number))
        }
    }

    #[must_use]
    pub const fn number(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn is_master(self) -> bool {
        self.0 == Self::MASTER.0
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_master() {
            f.write_str("master")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Stable handle of an attached accessor: its slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessorId(usize);

#[derive(Debug)]
struct Slot {
    unit: Unit,
    lines: SignalSet,
}

#[derive(Debug, Default)]
struct Registry {
    merged: SignalSet,
    slots: Vec<Option<Slot>>,
}

impl Registry {
    fn recompute(&mut self) {
        self.merged = self
            .slots
            .iter()
            .flatten()
            .fold(SignalSet::RELEASED, |acc, slot| acc.wired_and(slot.lines));
    }
}

/// Handle to one physical bus. Clones share the same lines.
#[derive(Debug, Clone, Default)]
pub struct Bus {
    inner: Rc<RefCell<Registry>>,
}

impl Bus {
    /// Create a bus with nothing attached and every line released.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire a new participant onto the bus.
    ///
    /// Fails with [`BusError::UnitInUse`] if a device with the same unit
    /// number is already attached; the caller must not use this bus for
    /// that device.
    pub fn attach(&self, unit: Unit) -> Result<PinAccessor, BusError> {
        let id = {
            let mut registry = self.inner.borrow_mut();
            let taken = !unit.is_master()
                && registry.slots.iter().flatten().any(|slot| slot.unit == unit);
            if taken {
                return Err(BusError::UnitInUse(unit.number()));
            }

            let slot = Slot {
                unit,
                lines: SignalSet::RELEASED,
            };
            match registry.slots.iter().position(Option::is_none) {
                Some(index) => {
                    registry.slots[index] = Some(slot);
                    index
                }
                None => {
                    registry.slots.push(Some(slot));
                    registry.slots.len() - 1
                }
            }
        };
        debug!(%unit, slot = id, "accessor attached");

        Ok(PinAccessor {
            bus: self.clone(),
            id: AccessorId(id),
            unit,
        })
    }

    /// Remove a participant. Equivalent to dropping the accessor.
    pub fn detach(&self, accessor: PinAccessor) {
        drop(accessor);
    }

    fn release_slot(&self, id: AccessorId) {
        let mut registry = self.inner.borrow_mut();
        if let Some(slot) = registry.slots.get_mut(id.0).and_then(Option::take) {
            debug!(unit = %slot.unit, slot = id.0, "accessor detached");
        }
        registry.recompute();
    }

    /// Fold every attached signal set into the merged state.
    pub fn recompute(&self) {
        self.inner.borrow_mut().recompute();
    }

    /// The merged line state as every participant sees it.
    #[must_use]
    pub fn merged(&self) -> SignalSet {
        self.inner.borrow().merged
    }

    /// Unit numbers of every attached accessor, in slot order.
    #[must_use]
    pub fn units(&self) -> Vec<Unit> {
        self.inner
            .borrow()
            .slots
            .iter()
            .flatten()
            .map(|slot| slot.unit)
            .collect()
    }

    /// Whether a device with this unit number is attached.
    #[must_use]
    pub fn is_attached(&self, unit: Unit) -> bool {
        self.units().contains(&unit)
    }

    /// Number of attached accessors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().slots.iter().flatten().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn own_lines(&self, id: AccessorId) -> SignalSet {
        self.inner
            .borrow()
            .slots
            .get(id.0)
            .and_then(Option::as_ref)
            .map_or(SignalSet::RELEASED, |slot| slot.lines)
    }

    fn write(&self, id: AccessorId, update: impl FnOnce(&mut SignalSet)) {
        let mut registry = self.inner.borrow_mut();
        if let Some(slot) = registry.slots.get_mut(id.0).and_then(Option::as_mut) {
            update(&mut slot.lines);
        }
        registry.recompute();
    }
}

/// One participant's view of the bus.
///
/// Reads see the merged lines; writes change only this participant's own
/// lines and recompute the merged state before returning.
#[derive(Debug)]
pub struct PinAccessor {
    bus: Bus,
    id: AccessorId,
    unit: Unit,
}

impl PinAccessor {
    #[must_use]
    pub fn unit(&self) -> Unit {
        self.unit
    }

    #[must_use]
    pub fn id(&self) -> AccessorId {
        self.id
    }

    #[must_use]
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Merged bus lines.
    #[must_use]
    pub fn lines(&self) -> SignalSet {
        self.bus.merged()
    }

    /// Whether `line` is driven low by anyone on the bus.
    #[must_use]
    pub fn is_active(&self, line: Line) -> bool {
        self.bus.merged().is_active(line)
    }

    /// This participant's own lines.
    #[must_use]
    pub fn own(&self) -> SignalSet {
        self.bus.own_lines(self.id)
    }

    /// Drive `line` low (`active = true`) or release it.
    pub fn set_line(&mut self, line: Line, active: bool) {
        self.bus.write(self.id, |lines| lines.set(line, !active));
    }

    pub fn drive(&mut self, line: Line) {
        self.set_line(line, true);
    }

    pub fn release(&mut self, line: Line) {
        self.set_line(line, false);
    }

    /// Release every line this participant holds.
    pub fn release_all(&mut self) {
        self.bus.write(self.id, |lines| *lines = SignalSet::RELEASED);
    }
}

impl Drop for PinAccessor {
    fn drop(&mut self) {
        self.bus.release_slot(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn unit(n: u8) -> Unit {
        Unit::device(n).unwrap()
    }

    #[test]
    fn lines_start_released() {
        let bus = Bus::new();
        assert!(bus.merged().all_released());
        assert!(bus.is_empty());
    }

    #[test]
    fn write_is_visible_to_other_accessors() {
        let bus = Bus::new();
        let mut host = bus.attach(Unit::MASTER).unwrap();
        let drive = bus.attach(unit(8)).unwrap();
        host.drive(Line::Atn);
        assert!(drive.is_active(Line::Atn));
        assert!(drive.own().all_released());
    }

    #[test]
    fn line_stays_low_until_every_holder_releases() {
        let bus = Bus::new();
        let mut a = bus.attach(unit(8)).unwrap();
        let mut b = bus.attach(unit(9)).unwrap();
        a.drive(Line::Clk);
        b.drive(Line::Clk);
        a.release(Line::Clk);
        assert!(bus.merged().is_active(Line::Clk));
        b.release(Line::Clk);
        assert!(!bus.merged().is_active(Line::Clk));
    }

    #[test]
    fn duplicate_unit_is_rejected() {
        let bus = Bus::new();
        let _first = bus.attach(unit(8)).unwrap();
        assert_eq!(bus.attach(unit(8)).unwrap_err(), BusError::UnitInUse(8));
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn master_sentinel_may_attach_twice() {
        let bus = Bus::new();
        let _a = bus.attach(Unit::MASTER).unwrap();
        let _b = bus.attach(Unit::MASTER).unwrap();
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn dropping_accessor_releases_its_lines_and_unit() {
        let bus = Bus::new();
        let mut drive = bus.attach(unit(8)).unwrap();
        drive.drive(Line::Dat);
        assert!(bus.merged().is_active(Line::Dat));

        bus.detach(drive);
        assert!(bus.merged().all_released());
        assert!(!bus.is_attached(unit(8)));
        assert!(bus.attach(unit(8)).is_ok());
    }

    #[test]
    fn freed_slot_is_reused() {
        let bus = Bus::new();
        let a = bus.attach(unit(8)).unwrap();
        let first = a.id();
        drop(a);
        let b = bus.attach(unit(9)).unwrap();
        assert_eq!(b.id(), first);
    }

    #[test]
    fn device_unit_range() {
        assert!(Unit::device(30).is_ok());
        assert_eq!(Unit::device(31), Err(BusError::InvalidUnit(31)));
    }

    proptest! {
        #[test]
        fn merged_line_is_active_iff_any_holder_drives_it(
            pulls in proptest::collection::vec(any::<[bool; 5]>(), 1..6)
        ) {
            let bus = Bus::new();
            let mut accessors: Vec<PinAccessor> = (0..pulls.len())
                .map(|n| bus.attach(unit(n as u8)).unwrap())
                .collect();
            for (accessor, pull) in accessors.iter_mut().zip(&pulls) {
                for (line, active) in Line::ALL.into_iter().zip(pull) {
                    accessor.set_line(line, *active);
                }
            }

            let merged = bus.merged();
            for (index, line) in Line::ALL.into_iter().enumerate() {
                let any = pulls.iter().any(|pull| pull[index]);
                prop_assert_eq!(merged.is_active(line), any);
            }
        }
    }
}
