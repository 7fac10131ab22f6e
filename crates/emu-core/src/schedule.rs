//! The tick contract between a scheduler and the components it drives.

use crate::Ticks;

/// What a component wants after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Call again once this much virtual time has passed.
    After(Ticks),
    /// Stop scheduling this component.
    Halt,
}

impl Schedule {
    /// Delay until the next call, or `None` for [`Schedule::Halt`].
    #[must_use]
    pub fn delay(self) -> Option<Ticks> {
        match self {
            Schedule::After(ticks) => Some(ticks),
            Schedule::Halt => None,
        }
    }
}

/// A component advanced by explicit scheduler calls.
///
/// Implementations never block. Every call returns promptly, having done
/// all the work that `elapsed` makes possible.
pub trait Schedulable {
    /// Advance by `elapsed` ticks of virtual time since the previous call.
    fn tick(&mut self, elapsed: Ticks) -> Schedule;
}

impl<T: Schedulable + ?Sized> Schedulable for Box<T> {
    fn tick(&mut self, elapsed: Ticks) -> Schedule {
        (**self).tick(elapsed)
    }
}
