//! The peripheral behind a device: what channels mean is its business.
//!
//! The protocol engine only moves bytes. It calls into a [`Storage`] with
//! channel numbers and never interprets names or contents.

use std::collections::HashMap;

use tracing::debug;

/// Outcome of reading one byte from a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    /// A byte with more to follow.
    Byte(u8),
    /// The final byte of the stream; send it with EOI.
    Last(u8),
    /// Nothing to send at all.
    EndOfStream,
}

impl ReadResult {
    /// The data byte, if any.
    #[must_use]
    pub fn byte(self) -> Option<u8> {
        match self {
            ReadResult::Byte(b) | ReadResult::Last(b) => Some(b),
            ReadResult::EndOfStream => None,
        }
    }

    #[must_use]
    pub fn is_last(self) -> bool {
        matches!(self, ReadResult::Last(_))
    }
}

/// Channel operations a device forwards to its peripheral.
pub trait Storage {
    /// Open `channel`. `name` is the raw parameter bytes sent after OPEN.
    fn open(&mut self, channel: u8, name: &[u8]);

    fn close(&mut self, channel: u8);

    /// Fetch the next byte to send on `channel`.
    fn read(&mut self, channel: u8) -> ReadResult;

    /// Un-read the byte most recently returned by `read`; the listener never
    /// consumed it.
    fn push_back(&mut self, channel: u8);

    /// Accept data received on `channel`.
    fn write(&mut self, channel: u8, data: &[u8]);
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn open(&mut self, channel: u8, name: &[u8]) {
        (**self).open(channel, name);
    }

    fn close(&mut self, channel: u8) {
        (**self).close(channel);
    }

    fn read(&mut self, channel: u8) -> ReadResult {
        (**self).read(channel)
    }

    fn push_back(&mut self, channel: u8) {
        (**self).push_back(channel);
    }

    fn write(&mut self, channel: u8, data: &[u8]) {
        (**self).write(channel, data);
    }
}

/// Number of secondary-address channels.
pub const CHANNELS: usize = 16;

#[derive(Debug, Clone, Default)]
struct Channel {
    name: Option<Vec<u8>>,
    data: Vec<u8>,
    position: usize,
}

/// In-memory backend: one byte stream per channel.
///
/// Opening a channel with the name of an inserted file loads that file for
/// reading. Writes append to the channel's stream.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: HashMap<Vec<u8>, Vec<u8>>,
    channels: [Channel; CHANNELS],
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `contents` available under `name`.
    pub fn insert_file(&mut self, name: &[u8], contents: &[u8]) {
        self.files.insert(name.to_vec(), contents.to_vec());
    }

    /// Replace a channel's stream directly and rewind it.
    pub fn load_channel(&mut self, channel: u8, data: &[u8]) {
        let ch = self.channel_mut(channel);
        ch.data = data.to_vec();
        ch.position = 0;
    }

    /// Name the channel was last opened with.
    #[must_use]
    pub fn name(&self, channel: u8) -> Option<&[u8]> {
        self.channels[Self::index(channel)].name.as_deref()
    }

    /// Full stream of a channel, including bytes already read.
    #[must_use]
    pub fn data(&self, channel: u8) -> &[u8] {
        &self.channels[Self::index(channel)].data
    }

    #[must_use]
    pub fn is_open(&self, channel: u8) -> bool {
        self.name(channel).is_some()
    }

    fn index(channel: u8) -> usize {
        usize::from(channel) % CHANNELS
    }

    fn channel_mut(&mut self, channel: u8) -> &mut Channel {
        &mut self.channels[Self::index(channel)]
    }
}

impl Storage for MemoryStorage {
    fn open(&mut self, channel: u8, name: &[u8]) {
        let contents = self.files.get(name).cloned().unwrap_or_default();
        debug!(channel, name = %String::from_utf8_lossy(name), len = contents.len(), "open");
        let ch = self.channel_mut(channel);
        ch.name = Some(name.to_vec());
        ch.data = contents;
        ch.position = 0;
    }

    fn close(&mut self, channel: u8) {
        let ch = self.channel_mut(channel);
        if let Some(name) = ch.name.take() {
            debug!(channel, name = %String::from_utf8_lossy(&name), "close");
        }
    }

    fn read(&mut self, channel: u8) -> ReadResult {
        let ch = self.channel_mut(channel);
        let Some(&byte) = ch.data.get(ch.position) else {
            return ReadResult::EndOfStream;
        };
        ch.position += 1;
        if ch.position == ch.data.len() {
            ReadResult::Last(byte)
        } else {
            ReadResult::Byte(byte)
        }
    }

    fn push_back(&mut self, channel: u8) {
        let ch = self.channel_mut(channel);
        ch.position = ch.position.saturating_sub(1);
    }

    fn write(&mut self, channel: u8, data: &[u8]) {
        self.channel_mut(channel).data.extend_from_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_marks_final_byte() {
        let mut storage = MemoryStorage::new();
        storage.load_channel(2, b"ABC");
        assert_eq!(storage.read(2), ReadResult::Byte(b'A'));
        assert_eq!(storage.read(2), ReadResult::Byte(b'B'));
        assert_eq!(storage.read(2), ReadResult::Last(b'C'));
        assert_eq!(storage.read(2), ReadResult::EndOfStream);
    }

    #[test]
    fn empty_channel_is_end_of_stream() {
        let mut storage = MemoryStorage::new();
        assert_eq!(storage.read(0), ReadResult::EndOfStream);
    }

    #[test]
    fn push_back_replays_byte() {
        let mut storage = MemoryStorage::new();
        storage.load_channel(0, b"XY");
        assert_eq!(storage.read(0), ReadResult::Byte(b'X'));
        storage.push_back(0);
        assert_eq!(storage.read(0), ReadResult::Byte(b'X'));
    }

    #[test]
    fn open_loads_named_file() {
        let mut storage = MemoryStorage::new();
        storage.insert_file(b"HELLO", b"hi");
        storage.open(3, b"HELLO");
        assert!(storage.is_open(3));
        assert_eq!(storage.name(3), Some(&b"HELLO"[..]));
        assert_eq!(storage.read(3), ReadResult::Byte(b'h'));
        storage.close(3);
        assert!(!storage.is_open(3));
    }

    #[test]
    fn write_appends() {
        let mut storage = MemoryStorage::new();
        storage.write(1, b"AB");
        storage.write(1, b"C");
        assert_eq!(storage.data(1), b"ABC");
    }

    #[test]
    fn boxed_storage_forwards() {
        let mut boxed: Box<dyn Storage> = Box::new(MemoryStorage::new());
        boxed.write(1, b"Z");
        assert_eq!(boxed.read(1), ReadResult::Last(b'Z'));
    }
}
