//! Shift register for the byte currently on the wire.
//!
//! Bits travel LSB first. A transmitter loads a byte and pops bits; a
//! receiver shifts bits in until eight have arrived.

/// Byte in flight, its EOI flag and the bit cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transceiver {
    pub value: u8,
    /// End-or-identify: this is the final byte of the stream.
    pub last: bool,
    /// No byte is in flight; a new one may be loaded.
    pub ready: bool,
    /// Bits moved so far (0-8).
    pub cursor: u8,
}

impl Transceiver {
    pub const BITS: u8 = 8;

    /// An empty, ready transceiver.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: 0,
            last: false,
            ready: true,
            cursor: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Load a byte for transmission. The byte is in flight until reset.
    pub fn load(&mut self, value: u8, last: bool) {
        self.value = value;
        self.last = last;
        self.ready = false;
        self.cursor = 0;
    }

    /// Next bit to transmit, without advancing.
    #[must_use]
    pub fn next_bit(&self) -> bool {
        (self.value >> self.cursor) & 1 != 0
    }

    /// Advance past the bit returned by [`Transceiver::next_bit`].
    pub fn advance(&mut self) {
        self.cursor = (self.cursor + 1).min(Self::BITS);
    }

    /// Store a received bit at the cursor and advance.
    pub fn shift_in(&mut self, bit: bool) {
        if self.cursor < Self::BITS {
            self.value = (self.value & !(1 << self.cursor)) | (u8::from(bit) << self.cursor);
        }
        self.advance();
    }

    /// All eight bits have moved.
    #[must_use]
    pub fn complete(&self) -> bool {
        self.cursor >= Self::BITS
    }
}

impl Default for Transceiver {
    fn default() -> Self {
        Self::new()
    }
}
