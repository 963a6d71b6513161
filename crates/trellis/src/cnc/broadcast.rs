// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One-to-many broadcast for driver-to-client responses.
//!
//! The conductor is the single writer; any number of client receivers follow
//! with their own cursors and may be lapped. Records are `{length:i32,
//! msg_type_id:i32, payload}` aligned to 8 bytes. The writer stamps
//! `tail_intent` before mutating a record and `tail` after, so a receiver can
//! detect that the region it copied was overwritten and resynchronize.

use crate::rt::align;
use crate::rt::buffer::AtomicBuffer;

pub const BROADCAST_TRAILER_LENGTH: usize = 128;

const TAIL_INTENT_OFFSET: usize = 0;
const TAIL_OFFSET: usize = 8;

const RECORD_HEADER_LENGTH: usize = 8;
const RECORD_ALIGNMENT: usize = 8;
const PADDING_MSG_TYPE_ID: i32 = -1;

pub struct BroadcastTransmitter {
    buffer: AtomicBuffer,
    capacity: usize,
    mask: usize,
    tail_intent_offset: usize,
    tail_offset: usize,
}

impl BroadcastTransmitter {
    pub fn new(buffer: AtomicBuffer) -> Self {
        let capacity = buffer.capacity() - BROADCAST_TRAILER_LENGTH;
        assert!(
            capacity.is_power_of_two(),
            "broadcast capacity must be a power of 2: {}",
            capacity
        );

        Self {
            buffer,
            capacity,
            mask: capacity - 1,
            tail_intent_offset: capacity + TAIL_INTENT_OFFSET,
            tail_offset: capacity + TAIL_OFFSET,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Transmit one message; older records are overwritten unconditionally.
    pub fn transmit(&self, msg_type_id: i32, payload: &[u8]) {
        let record_length = RECORD_HEADER_LENGTH + payload.len();
        let aligned = align(record_length, RECORD_ALIGNMENT);
        assert!(aligned <= self.capacity / 2, "message larger than broadcast buffer");

        let mut tail = self.buffer.get_i64(self.tail_offset);
        let mut record_index = (tail as usize) & self.mask;
        let to_end = self.capacity - record_index;

        if aligned > to_end {
            // Pad out the end of the buffer and wrap.
            self.buffer
                .put_i64_ordered(self.tail_intent_offset, tail + to_end as i64 + aligned as i64);
            self.buffer.put_i32(record_index + 4, PADDING_MSG_TYPE_ID);
            self.buffer.put_i32(record_index, to_end as i32);
            tail += to_end as i64;
            record_index = 0;
        } else {
            self.buffer
                .put_i64_ordered(self.tail_intent_offset, tail + aligned as i64);
        }

        self.buffer.put_i32(record_index, record_length as i32);
        self.buffer.put_i32(record_index + 4, msg_type_id);
        self.buffer
            .put_bytes(record_index + RECORD_HEADER_LENGTH, payload);

        self.buffer
            .put_i64_ordered(self.tail_offset, tail + aligned as i64);
    }
}

/// A receiver cursor over a broadcast buffer.
///
/// `receive` copies out the next record and reports `None` when caught up.
/// A lapped receiver (overwritten before it copied) resynchronizes to the
/// latest tail and counts the loss.
pub struct BroadcastReceiver {
    buffer: AtomicBuffer,
    capacity: usize,
    mask: usize,
    tail_intent_offset: usize,
    tail_offset: usize,
    cursor: i64,
    lapped_count: u64,
}

impl BroadcastReceiver {
    pub fn new(buffer: AtomicBuffer) -> Self {
        let capacity = buffer.capacity() - BROADCAST_TRAILER_LENGTH;
        assert!(capacity.is_power_of_two());

        let tail_offset = capacity + TAIL_OFFSET;
        let cursor = buffer.get_i64_volatile(tail_offset);

        Self {
            buffer,
            capacity,
            mask: capacity - 1,
            tail_intent_offset: capacity + TAIL_INTENT_OFFSET,
            tail_offset,
            cursor,
            lapped_count: 0,
        }
    }

    pub fn lapped_count(&self) -> u64 {
        self.lapped_count
    }

    /// Copy out the next record, if any.
    pub fn receive(&mut self) -> Option<(i32, Vec<u8>)> {
        loop {
            let tail = self.buffer.get_i64_volatile(self.tail_offset);
            if self.cursor == tail {
                return None;
            }

            if self.is_lapped() {
                self.resync();
                continue;
            }

            let record_index = (self.cursor as usize) & self.mask;
            let record_length = self.buffer.get_i32(record_index);
            let msg_type_id = self.buffer.get_i32(record_index + 4);
            if record_length <= 0 {
                // Writer is mid-record; try again next poll.
                return None;
            }

            let aligned = align(record_length as usize, RECORD_ALIGNMENT) as i64;

            if msg_type_id == PADDING_MSG_TYPE_ID {
                self.cursor += record_length as i64;
                continue;
            }

            let payload_length = record_length as usize - RECORD_HEADER_LENGTH;
            let mut payload = vec![0u8; payload_length];
            self.buffer
                .get_bytes(record_index + RECORD_HEADER_LENGTH, &mut payload);

            // The copy is only valid if the writer has not reclaimed the
            // region while we were reading it.
            if self.is_lapped() {
                self.resync();
                continue;
            }

            self.cursor += aligned;
            return Some((msg_type_id, payload));
        }
    }

    fn is_lapped(&self) -> bool {
        let tail_intent = self.buffer.get_i64_volatile(self.tail_intent_offset);
        tail_intent - self.cursor > self.capacity as i64
    }

    fn resync(&mut self) {
        self.cursor = self.buffer.get_i64_volatile(self.tail_offset);
        self.lapped_count += 1;
        log::warn!("[Broadcast] receiver lapped; resynchronized to tail");
    }
}
