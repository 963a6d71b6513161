// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Counters: labelled i64 slots in the CnC file.
//!
//! Labels live in one region (length-prefixed UTF-8, fixed slot size), values
//! in another (8 bytes used per 64-byte slot so hot counters do not share
//! cache lines). Each counter has a single writing agent; readers use
//! acquire loads through [`Position`].

use crate::rt::buffer::AtomicBuffer;
use crate::rt::position::Position;

pub const COUNTER_LABEL_LENGTH: usize = 256;
pub const COUNTER_VALUE_LENGTH: usize = 64;

pub struct CountersManager {
    labels: AtomicBuffer,
    values: AtomicBuffer,
    next_id: i32,
    free_list: Vec<i32>,
}

impl CountersManager {
    pub fn new(labels: AtomicBuffer, values: AtomicBuffer) -> Self {
        Self {
            labels,
            values,
            next_id: 0,
            free_list: Vec::new(),
        }
    }

    pub fn max_counters(&self) -> i32 {
        (self.values.capacity() / COUNTER_VALUE_LENGTH) as i32
    }

    /// Allocate a counter slot with a label; panics if the regions are full.
    pub fn allocate(&mut self, label: &str) -> i32 {
        let id = self.free_list.pop().unwrap_or_else(|| {
            let id = self.next_id;
            self.next_id += 1;
            id
        });
        assert!(id < self.max_counters(), "counters exhausted");

        let label_offset = id as usize * COUNTER_LABEL_LENGTH;
        let label_bytes = label.as_bytes();
        let label_length = label_bytes.len().min(COUNTER_LABEL_LENGTH - 4);
        self.labels
            .put_bytes(label_offset + 4, &label_bytes[..label_length]);
        self.labels.put_i32(label_offset, label_length as i32);

        self.values
            .put_i64_ordered(id as usize * COUNTER_VALUE_LENGTH, 0);

        id
    }

    /// Release a slot for reuse; the value is zeroed.
    pub fn free(&mut self, id: i32) {
        self.labels.put_i32(id as usize * COUNTER_LABEL_LENGTH, 0);
        self.values
            .put_i64_ordered(id as usize * COUNTER_VALUE_LENGTH, 0);
        self.free_list.push(id);
    }

    pub fn label(&self, id: i32) -> String {
        let label_offset = id as usize * COUNTER_LABEL_LENGTH;
        let length = self.labels.get_i32(label_offset) as usize;
        let mut bytes = vec![0u8; length];
        self.labels.get_bytes(label_offset + 4, &mut bytes);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Handle onto a counter's value slot.
    pub fn position(&self, id: i32) -> Position {
        Position::new(self.values, id as usize * COUNTER_VALUE_LENGTH, id)
    }
}

/// A counter incremented by its single owning agent.
#[derive(Clone, Copy)]
pub struct Counter {
    position: Position,
}

impl Counter {
    pub fn new(position: Position) -> Self {
        Self { position }
    }

    pub fn id(&self) -> i32 {
        self.position.id()
    }

    /// Single-writer increment (plain read, release store).
    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, delta: i64) {
        self.position.set_ordered(self.position.get() + delta);
    }

    pub fn get(&self) -> i64 {
        self.position.get_volatile()
    }
}

/// The driver's fixed set of system counters.
pub struct SystemCounters {
    pub bytes_sent: Counter,
    pub bytes_received: Counter,
    pub naks_sent: Counter,
    pub naks_received: Counter,
    pub nak_overruns: Counter,
    pub status_messages_sent: Counter,
    pub status_messages_received: Counter,
    pub heartbeats_sent: Counter,
    pub heartbeats_received: Counter,
    pub retransmits_sent: Counter,
    pub flow_control_under_runs: Counter,
    pub flow_control_over_runs: Counter,
    pub invalid_packets: Counter,
    pub errors: Counter,
    pub short_sends: Counter,
    pub client_keepalives: Counter,
}

impl SystemCounters {
    pub fn new(manager: &mut CountersManager) -> Self {
        let mut counter = |label: &str| {
            let id = manager.allocate(label);
            Counter::new(manager.position(id))
        };

        Self {
            bytes_sent: counter("bytes sent"),
            bytes_received: counter("bytes received"),
            naks_sent: counter("NAKs sent"),
            naks_received: counter("NAKs received"),
            nak_overruns: counter("NAK retransmit overruns"),
            status_messages_sent: counter("status messages sent"),
            status_messages_received: counter("status messages received"),
            heartbeats_sent: counter("heartbeats sent"),
            heartbeats_received: counter("heartbeats received"),
            retransmits_sent: counter("retransmits sent"),
            flow_control_under_runs: counter("flow control under runs"),
            flow_control_over_runs: counter("flow control over runs"),
            invalid_packets: counter("invalid packets"),
            errors: counter("errors"),
            short_sends: counter("short sends"),
            client_keepalives: counter("client keepalives"),
        }
    }
}
