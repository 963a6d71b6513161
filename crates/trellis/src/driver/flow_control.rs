// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sender-side flow control strategies.
//!
//! A strategy observes status messages and yields the byte position the
//! sender may transmit up to. Unicast takes the last SM at face value.
//! Multicast keeps an active set of receivers with per-source liveness and
//! reports the minimum window across the set, so the slowest live receiver
//! paces the group.

use std::net::SocketAddr;

use crate::config::FLOW_CONTROL_RECEIVER_TIMEOUT_NS;
use crate::logbuffer::descriptor::compute_position;

/// One received status message, already decoded.
#[derive(Debug, Clone, Copy)]
pub struct StatusMessage {
    pub consumption_term_id: i32,
    pub consumption_term_offset: i32,
    pub receiver_window: i32,
    pub receiver_id: Option<i64>,
}

pub trait FlowControl: Send {
    /// Process an SM and return the new sender position limit.
    fn on_status_message(&mut self, sm: &StatusMessage, src: SocketAddr, now_ns: i64) -> i64;

    /// Position limit before any SM has arrived.
    fn initial_position_limit(&self) -> i64;

    /// Periodic housekeeping; returns the (possibly reduced) limit.
    fn on_idle(&mut self, _now_ns: i64, current_limit: i64) -> i64 {
        current_limit
    }
}

/// Last SM wins.
pub struct UnicastFlowControl {
    initial_term_id: i32,
    position_bits_to_shift: u32,
    initial_window: i64,
}

impl UnicastFlowControl {
    pub fn new(initial_term_id: i32, term_length: usize, initial_window: usize) -> Self {
        Self {
            initial_term_id,
            position_bits_to_shift: term_length.trailing_zeros(),
            initial_window: initial_window as i64,
        }
    }
}

impl FlowControl for UnicastFlowControl {
    fn on_status_message(&mut self, sm: &StatusMessage, _src: SocketAddr, _now_ns: i64) -> i64 {
        compute_position(
            sm.consumption_term_id,
            sm.consumption_term_offset,
            self.position_bits_to_shift,
            self.initial_term_id,
        ) + sm.receiver_window as i64
    }

    fn initial_position_limit(&self) -> i64 {
        self.initial_window
    }
}

struct ReceiverState {
    key: ReceiverKey,
    limit: i64,
    time_of_last_sm_ns: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiverKey {
    Id(i64),
    Address(SocketAddr),
}

/// Min-across-receivers with liveness timeout.
///
/// New receivers widen the group; a receiver silent for the timeout is
/// dropped. With no live receivers the limit holds so the sender does not
/// run away from a group in flux.
pub struct MinMulticastFlowControl {
    initial_term_id: i32,
    position_bits_to_shift: u32,
    initial_window: i64,
    receiver_timeout_ns: i64,
    receivers: Vec<ReceiverState>,
}

impl MinMulticastFlowControl {
    pub fn new(initial_term_id: i32, term_length: usize, initial_window: usize) -> Self {
        Self {
            initial_term_id,
            position_bits_to_shift: term_length.trailing_zeros(),
            initial_window: initial_window as i64,
            receiver_timeout_ns: FLOW_CONTROL_RECEIVER_TIMEOUT_NS,
            receivers: Vec::new(),
        }
    }

    #[cfg(test)]
    fn with_receiver_timeout(mut self, timeout_ns: i64) -> Self {
        self.receiver_timeout_ns = timeout_ns;
        self
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    fn min_limit(&self, fallback: i64) -> i64 {
        self.receivers
            .iter()
            .map(|r| r.limit)
            .min()
            .unwrap_or(fallback)
    }
}

impl FlowControl for MinMulticastFlowControl {
    fn on_status_message(&mut self, sm: &StatusMessage, src: SocketAddr, now_ns: i64) -> i64 {
        let key = match sm.receiver_id {
            Some(id) => ReceiverKey::Id(id),
            None => ReceiverKey::Address(src),
        };
        let limit = compute_position(
            sm.consumption_term_id,
            sm.consumption_term_offset,
            self.position_bits_to_shift,
            self.initial_term_id,
        ) + sm.receiver_window as i64;

        match self.receivers.iter_mut().find(|r| r.key == key) {
            Some(receiver) => {
                receiver.limit = limit;
                receiver.time_of_last_sm_ns = now_ns;
            }
            None => {
                self.receivers.push(ReceiverState {
                    key,
                    limit,
                    time_of_last_sm_ns: now_ns,
                });
                log::debug!("[FlowControl] multicast receiver joined: {:?}", key);
            }
        }

        self.min_limit(limit)
    }

    fn initial_position_limit(&self) -> i64 {
        self.initial_window
    }

    fn on_idle(&mut self, now_ns: i64, current_limit: i64) -> i64 {
        let timeout = self.receiver_timeout_ns;
        let before = self.receivers.len();
        self.receivers
            .retain(|r| now_ns - r.time_of_last_sm_ns <= timeout);
        if self.receivers.len() != before {
            log::debug!(
                "[FlowControl] timed out {} multicast receiver(s)",
                before - self.receivers.len()
            );
        }

        self.min_limit(current_limit)
    }
}
