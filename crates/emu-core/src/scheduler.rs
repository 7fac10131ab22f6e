//! Minimal cooperative scheduler over virtual time.
//!
//! Components are borrowed per call rather than owned, so callers can
//! inspect them between steps. The slice passed in must keep the same
//! order from call to call: slot `i` of the scheduler tracks component `i`.

use crate::{Schedulable, Schedule, Ticks};

#[derive(Debug, Clone, Copy)]
struct Slot {
    /// Virtual time at which the component wants its next call.
    due: Ticks,
    /// Virtual time of the component's previous call.
    last: Ticks,
    halted: bool,
}

/// Runs components in due-time order, one tick at a time.
#[derive(Debug, Default)]
pub struct Scheduler {
    now: Ticks,
    slots: Vec<Slot>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> Ticks {
        self.now
    }

    /// Whether component `index` has returned [`Schedule::Halt`].
    #[must_use]
    pub fn is_halted(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|slot| slot.halted)
    }

    fn sync(&mut self, count: usize) {
        let now = self.now;
        self.slots.resize(
            count,
            Slot {
                due: now,
                last: now,
                halted: false,
            },
        );
    }

    fn next_due(&self) -> Option<(usize, Ticks)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.halted)
            .min_by_key(|(_, slot)| slot.due)
            .map(|(index, slot)| (index, slot.due))
    }

    /// Tick the earliest-due component.
    ///
    /// Ties go to the lower index. Returns the index ticked, or `None` once
    /// every component has halted.
    pub fn step(&mut self, components: &mut [&mut dyn Schedulable]) -> Option<usize> {
        self.sync(components.len());
        let (index, due) = self.next_due()?;
        self.now = self.now.max(due);

        let slot = &mut self.slots[index];
        let elapsed = self.now - slot.last;
        slot.last = self.now;
        match components[index].tick(elapsed) {
            // Zero-length sleeps would stall virtual time.
            Schedule::After(delay) => slot.due = self.now + delay.max(Ticks::ONE),
            Schedule::Halt => slot.halted = true,
        }
        Some(index)
    }

    /// Run every component whose due time is at or before `deadline`.
    ///
    /// Leaves the clock at `deadline` (or later, if it was already past).
    pub fn run_until(&mut self, deadline: Ticks, components: &mut [&mut dyn Schedulable]) -> Ticks {
        self.sync(components.len());
        while let Some((_, due)) = self.next_due() {
            if due > deadline {
                break;
            }
            self.step(components);
        }
        self.now = self.now.max(deadline);
        self.now
    }

    /// Run for `duration` ticks from the current time.
    pub fn run_for(&mut self, duration: Ticks, components: &mut [&mut dyn Schedulable]) -> Ticks {
        let deadline = self.now + duration;
        self.run_until(deadline, components)
    }
}
