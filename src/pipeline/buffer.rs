//! Packet buffer
//!
//! Accepted entries accumulate until `buffer_size` is reached; the buffer is
//! then drained in arrival order into packets of at most `packet_size`.
//! [`PacketBuffer::flush`] emits whatever is left at end of input.

use std::collections::VecDeque;

use crate::ack::Entry;

/// Entries queried together, never empty
pub type Packet = Vec<Entry>;

#[derive(Debug)]
pub struct PacketBuffer {
    entries: VecDeque<Entry>,
    buffer_size: usize,
    packet_size: usize,
}

impl PacketBuffer {
    pub fn new(buffer_size: usize, packet_size: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(buffer_size),
            buffer_size: buffer_size.max(1),
            packet_size: packet_size.max(1),
        }
    }

    /// Add an entry; returns the drained packets once the buffer is full
    pub fn push(&mut self, entry: Entry) -> Option<Vec<Packet>> {
        self.entries.push_back(entry);
        if self.entries.len() >= self.buffer_size {
            Some(self.drain())
        } else {
            None
        }
    }

    /// Drain the remaining entries
    pub fn flush(&mut self) -> Vec<Packet> {
        self.drain()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn drain(&mut self) -> Vec<Packet> {
        let mut packets = Vec::with_capacity(self.entries.len().div_ceil(self.packet_size));
        while !self.entries.is_empty() {
            let take = self.packet_size.min(self.entries.len());
            packets.push(self.entries.drain(..take).collect());
        }
        packets
    }
}
