// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Many-to-one ring buffer for client commands.
//!
//! Lives in the CnC file's to-driver region. Any number of client processes
//! claim space with a CAS on the tail counter and commit a record by writing
//! its length with release; the conductor is the single consumer. Records
//! are `{length:i32, msg_type_id:i32, payload}` aligned to 8 bytes; a record
//! never wraps, padding fills the tail of the buffer instead.

use crate::rt::align;
use crate::rt::buffer::AtomicBuffer;

/// Trailer appended to the data region: tail and head counters, each on its
/// own cache line.
pub const RING_TRAILER_LENGTH: usize = 128;

const TAIL_COUNTER_OFFSET: usize = 0;
const HEAD_COUNTER_OFFSET: usize = 64;

const RECORD_HEADER_LENGTH: usize = 8;
const RECORD_ALIGNMENT: usize = 8;

/// Message type id of padding records.
pub const PADDING_MSG_TYPE_ID: i32 = -1;

pub struct ManyToOneRingBuffer {
    buffer: AtomicBuffer,
    capacity: usize,
    mask: usize,
    tail_offset: usize,
    head_offset: usize,
}

impl ManyToOneRingBuffer {
    /// Wrap a region whose data capacity (`len - trailer`) is a power of two.
    ///
    /// # Panics
    /// Panics when the capacity is not a power of two.
    pub fn new(buffer: AtomicBuffer) -> Self {
        let capacity = buffer.capacity() - RING_TRAILER_LENGTH;
        assert!(
            capacity.is_power_of_two(),
            "ring capacity must be a power of 2: {}",
            capacity
        );

        Self {
            buffer,
            capacity,
            mask: capacity - 1,
            tail_offset: capacity + TAIL_COUNTER_OFFSET,
            head_offset: capacity + HEAD_COUNTER_OFFSET,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Claim space and write one message; false when the ring lacks space.
    pub fn write(&self, msg_type_id: i32, payload: &[u8]) -> bool {
        let record_length = RECORD_HEADER_LENGTH + payload.len();
        let required = align(record_length, RECORD_ALIGNMENT);
        assert!(required <= self.capacity / 2, "message larger than ring");

        let record_index = match self.claim(required) {
            Some(index) => index,
            None => return false,
        };

        self.buffer.put_i32(record_index + 4, msg_type_id);
        self.buffer
            .put_bytes(record_index + RECORD_HEADER_LENGTH, payload);
        self.buffer.put_i32_ordered(record_index, record_length as i32);

        true
    }

    fn claim(&self, required: usize) -> Option<usize> {
        loop {
            let tail = self.buffer.get_i64_volatile(self.tail_offset);
            let head = self.buffer.get_i64_volatile(self.head_offset);
            let available = self.capacity as i64 - (tail - head);

            let tail_index = (tail as usize) & self.mask;
            let to_end = self.capacity - tail_index;

            if required <= to_end {
                if (required as i64) > available {
                    return None;
                }
                if self
                    .buffer
                    .compare_and_set_i64(self.tail_offset, tail, tail + required as i64)
                {
                    return Some(tail_index);
                }
            } else {
                // Record would wrap: pad to the end and start at index 0.
                let total = to_end + required;
                if (total as i64) > available {
                    return None;
                }
                if self
                    .buffer
                    .compare_and_set_i64(self.tail_offset, tail, tail + total as i64)
                {
                    self.buffer.put_i32(tail_index + 4, PADDING_MSG_TYPE_ID);
                    self.buffer.put_i32_ordered(tail_index, to_end as i32);
                    return Some(0);
                }
            }
        }
    }

    /// Consume up to `message_limit` committed messages.
    ///
    /// The consumed region is zeroed before the head counter advances, which
    /// is what lets producers commit by writing a non-zero length.
    pub fn read(&self, mut handler: impl FnMut(i32, &[u8]), message_limit: usize) -> usize {
        let mut messages_read = 0;
        let head = self.buffer.get_i64(self.head_offset);
        let mut bytes_consumed = 0usize;

        while messages_read < message_limit {
            let record_index = ((head as usize) + bytes_consumed) & self.mask;
            let record_length = self.buffer.get_i32_volatile(record_index);
            if record_length <= 0 {
                break;
            }

            let aligned = align(record_length as usize, RECORD_ALIGNMENT);
            let msg_type_id = self.buffer.get_i32(record_index + 4);

            if msg_type_id != PADDING_MSG_TYPE_ID {
                let payload_length = record_length as usize - RECORD_HEADER_LENGTH;
                let mut payload = vec![0u8; payload_length];
                self.buffer
                    .get_bytes(record_index + RECORD_HEADER_LENGTH, &mut payload);
                handler(msg_type_id, &payload);
                messages_read += 1;
            }

            self.buffer.set_memory(record_index, aligned, 0);
            bytes_consumed += aligned;
        }

        if bytes_consumed > 0 {
            self.buffer
                .put_i64_ordered(self.head_offset, head + bytes_consumed as i64);
        }

        messages_read
    }

    /// Producer-side heartbeat slot used for driver liveness (epoch ms).
    pub fn consumer_heartbeat_time(&self) -> i64 {
        self.buffer.get_i64_volatile(self.head_offset + 8)
    }

    pub fn set_consumer_heartbeat_time(&self, time_ms: i64) {
        self.buffer.put_i64_ordered(self.head_offset + 8, time_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rt::buffer::AlignedBuffer;

    fn ring(capacity: usize) -> (AlignedBuffer, ManyToOneRingBuffer) {
        let backing = AlignedBuffer::new(capacity + RING_TRAILER_LENGTH);
        let ring = ManyToOneRingBuffer::new(backing.buffer());
        (backing, ring)
    }

    #[test]
    fn test_write_read_round_trip() {
        let (_backing, ring) = ring(1024);

        assert!(ring.write(7, b"hello"));
        assert!(ring.write(8, b"world!!"));

        let mut seen = Vec::new();
        let count = ring.read(|t, p| seen.push((t, p.to_vec())), 10);
        assert_eq!(count, 2);
        assert_eq!(seen[0], (7, b"hello".to_vec()));
        assert_eq!(seen[1], (8, b"world!!".to_vec()));

        // Ring drained.
        assert_eq!(ring.read(|_, _| {}, 10), 0);
    }

    #[test]
    fn test_message_limit_respected() {
        let (_backing, ring) = ring(1024);
        for i in 0..5 {
            assert!(ring.write(i, &[i as u8]));
        }

        assert_eq!(ring.read(|_, _| {}, 2), 2);
        assert_eq!(ring.read(|_, _| {}, 10), 3);
    }

    #[test]
    fn test_fills_up_and_recovers() {
        let (_backing, ring) = ring(256);
        let payload = [0u8; 56];

        let mut written = 0;
        while ring.write(1, &payload) {
            written += 1;
        }
        assert!(written > 0);

        assert_eq!(ring.read(|_, _| {}, 100), written);
        assert!(ring.write(1, &payload));
    }

    #[test]
    fn test_wraps_with_padding() {
        let (_backing, ring) = ring(256);

        // Fill and drain to move the tail near the end of the buffer.
        for _ in 0..3 {
            assert!(ring.write(1, &[0u8; 56]));
        }
        ring.read(|_, _| {}, 100);

        // This record does not fit before the wrap point.
        assert!(ring.write(2, &[9u8; 100]));
        let mut seen = Vec::new();
        ring.read(|t, p| seen.push((t, p.len())), 10);
        assert_eq!(seen, vec![(2, 100)]);
    }

    #[test]
    fn test_consumer_heartbeat() {
        let (_backing, ring) = ring(256);
        assert_eq!(ring.consumer_heartbeat_time(), 0);
        ring.set_consumer_heartbeat_time(1234);
        assert_eq!(ring.consumer_heartbeat_time(), 1234);
    }
}
