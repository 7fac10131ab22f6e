//! The five open-collector lines of the serial bus.
//!
//! Each line has a pull-up resistor: it reads released (high) unless some
//! participant drives it low. A signal set stores `true` for released, so
//! combining the sets of every participant is a plain logical AND.

use std::fmt;

/// One bus line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Line {
    /// Service request. Carried but unused by the handshake.
    Srq,
    /// Attention: the controller is sending command bytes.
    Atn,
    /// Clock, driven by the talker.
    Clk,
    /// Data, driven by the talker for bits and by listeners for handshakes.
    Dat,
    /// Reset.
    Rst,
}

impl Line {
    pub const ALL: [Line; 5] = [Line::Srq, Line::Atn, Line::Clk, Line::Dat, Line::Rst];

    fn letter(self) -> char {
        match self {
            Line::Srq => 's',
            Line::Atn => 'a',
            Line::Clk => 'c',
            Line::Dat => 'd',
            Line::Rst => 'r',
        }
    }
}

/// State of all five lines. `true` = released (high).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignalSet {
    pub srq: bool,
    pub atn: bool,
    pub clk: bool,
    pub dat: bool,
    pub rst: bool,
}

impl SignalSet {
    /// Every line released.
    pub const RELEASED: Self = Self {
        srq: true,
        atn: true,
        clk: true,
        dat: true,
        rst: true,
    };

    /// Whether `line` is released (high).
    #[must_use]
    pub fn get(&self, line: Line) -> bool {
        match line {
            Line::Srq => self.srq,
            Line::Atn => self.atn,
            Line::Clk => self.clk,
            Line::Dat => self.dat,
            Line::Rst => self.rst,
        }
    }

    /// Set `line` to released (`true`) or active (`false`).
    pub fn set(&mut self, line: Line, released: bool) {
        match line {
            Line::Srq => self.srq = released,
            Line::Atn => self.atn = released,
            Line::Clk => self.clk = released,
            Line::Dat => self.dat = released,
            Line::Rst => self.rst = released,
        }
    }

    /// Whether `line` is driven low.
    #[must_use]
    pub fn is_active(&self, line: Line) -> bool {
        !self.get(line)
    }

    /// Wired-AND of two sets: a line stays released only if both release it.
    #[must_use]
    pub fn wired_and(self, other: Self) -> Self {
        Self {
            srq: self.srq && other.srq,
            atn: self.atn && other.atn,
            clk: self.clk && other.clk,
            dat: self.dat && other.dat,
            rst: self.rst && other.rst,
        }
    }

    #[must_use]
    pub fn all_released(&self) -> bool {
        *self == Self::RELEASED
    }
}

impl Default for SignalSet {
    fn default() -> Self {
        Self::RELEASED
    }
}

/// Five letters in `s a c d r` order; upper case means the line is active.
impl fmt::Display for SignalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in Line::ALL {
            let c = line.letter();
            let c = if self.is_active(line) {
                c.to_ascii_uppercase()
            } else {
                c
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_start_released() {
        let set = SignalSet::default();
        for line in Line::ALL {
            assert!(set.get(line));
        }
        assert!(set.all_released());
    }

    #[test]
    fn set_touches_only_one_line() {
        let mut set = SignalSet::default();
        set.set(Line::Atn, false);
        assert!(set.is_active(Line::Atn));
        assert!(!set.is_active(Line::Clk));
        assert!(!set.is_active(Line::Dat));
    }

    #[test]
    fn wired_and_keeps_any_active_line() {
        let mut a = SignalSet::default();
        let mut b = SignalSet::default();
        a.set(Line::Clk, false);
        b.set(Line::Dat, false);
        let merged = a.wired_and(b);
        assert!(merged.is_active(Line::Clk));
        assert!(merged.is_active(Line::Dat));
        assert!(!merged.is_active(Line::Atn));
    }

    #[test]
    fn display_marks_active_lines() {
        let mut set = SignalSet::default();
        set.set(Line::Atn, false);
        set.set(Line::Dat, false);
        assert_eq!(set.to_string(), "sAcDr");
    }
}
