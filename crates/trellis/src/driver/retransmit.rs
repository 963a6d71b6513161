// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Retransmit handling for a publication.
//!
//! Each outstanding NAK range `(term_id, term_offset)` runs a small state
//! machine with feedback suppression (RFC 5401 terms):
//!
//! | State     | Enter on              | Leave on       | Action      |
//! |-----------|-----------------------|----------------|-------------|
//! | DELAYED   | NAK with delay > 0    | delay expires  | resend      |
//! | LINGERING | resend performed      | linger expires | forget      |
//!
//! A zero delay resends immediately and goes straight to LINGERING. NAKs for
//! a range already DELAYED or LINGERING are suppressed. Seeing the range
//! retransmitted on the wire (another retransmitter on multicast) cancels a
//! DELAYED entry. Concurrent entries are bounded; overflow drops the NAK and
//! counts it.

use std::collections::HashMap;

use super::feedback::FeedbackDelayGenerator;
use crate::cnc::Counter;
use crate::config::MAX_RETRANSMITS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Delayed,
    Lingering,
}

struct RetransmitAction {
    state: State,
    expiry_ns: i64,
    length: i32,
}

/// Callback that transmits the requested range.
pub trait RetransmitSender {
    fn resend(&mut self, term_id: i32, term_offset: i32, length: i32);
}

impl<F: FnMut(i32, i32, i32)> RetransmitSender for F {
    fn resend(&mut self, term_id: i32, term_offset: i32, length: i32) {
        self(term_id, term_offset, length)
    }
}

pub struct RetransmitHandler {
    active: HashMap<(i32, i32), RetransmitAction>,
    delay_generator: Box<dyn FeedbackDelayGenerator>,
    linger_generator: Box<dyn FeedbackDelayGenerator>,
    term_length: i32,
    nak_overruns: Counter,
}

impl RetransmitHandler {
    pub fn new(
        delay_generator: Box<dyn FeedbackDelayGenerator>,
        linger_generator: Box<dyn FeedbackDelayGenerator>,
        term_length: usize,
        nak_overruns: Counter,
    ) -> Self {
        Self {
            active: HashMap::with_capacity(MAX_RETRANSMITS),
            delay_generator,
            linger_generator,
            term_length: term_length as i32,
            nak_overruns,
        }
    }

    /// Handle a NAK for `(term_id, term_offset, length)` at `now_ns`.
    pub fn on_nak(
        &mut self,
        term_id: i32,
        term_offset: i32,
        length: i32,
        now_ns: i64,
        sender: &mut impl RetransmitSender,
    ) {
        let key = (term_id, term_offset);
        if self.active.contains_key(&key) {
            // Suppressed: a retransmission for this range is pending or just
            // happened.
            return;
        }

        if self.active.len() >= MAX_RETRANSMITS {
            self.nak_overruns.increment();
            log::debug!(
                "[Retransmit] dropped NAK, ring full: term_id={} term_offset={}",
                term_id,
                term_offset
            );
            return;
        }

        let length = length.min(self.term_length - term_offset);
        let delay_ns = self.delay_generator.generate_delay_ns();

        if delay_ns == 0 {
            sender.resend(term_id, term_offset, length);
            self.active.insert(
                key,
                RetransmitAction {
                    state: State::Lingering,
                    expiry_ns: now_ns + self.linger_generator.generate_delay_ns(),
                    length,
                },
            );
        } else {
            self.active.insert(
                key,
                RetransmitAction {
                    state: State::Delayed,
                    expiry_ns: now_ns + delay_ns,
                    length,
                },
            );
        }
    }

    /// A retransmission for this range was seen on the wire; cancel a pending
    /// resend of ours.
    pub fn on_retransmit_received(&mut self, term_id: i32, term_offset: i32) {
        let key = (term_id, term_offset);
        if let Some(action) = self.active.get(&key) {
            if action.state == State::Delayed {
                self.active.remove(&key);
            }
        }
    }

    /// Fire expired delays (resend, then linger) and expire lingers.
    pub fn process_timeouts(&mut self, now_ns: i64, sender: &mut impl RetransmitSender) -> usize {
        let mut work_count = 0;
        let mut to_resend: Vec<(i32, i32, i32)> = Vec::new();
        let mut to_remove: Vec<(i32, i32)> = Vec::new();

        for (&(term_id, term_offset), action) in &self.active {
            if now_ns < action.expiry_ns {
                continue;
            }
            match action.state {
                State::Delayed => to_resend.push((term_id, term_offset, action.length)),
                State::Lingering => to_remove.push((term_id, term_offset)),
            }
        }

        // Resend lowest offsets first so ranges go out in stream order.
        to_resend.sort_unstable();
        for (term_id, term_offset, length) in to_resend {
            sender.resend(term_id, term_offset, length);
            let linger = self.linger_generator.generate_delay_ns();
            if let Some(action) = self.active.get_mut(&(term_id, term_offset)) {
                action.state = State::Lingering;
                action.expiry_ns = now_ns + linger;
            }
            work_count += 1;
        }

        for key in to_remove {
            self.active.remove(&key);
            work_count += 1;
        }

        work_count
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
