// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receiver-side state for one publication image.
//!
//! Created by the conductor when the receiver sees a SETUP for a subscribed
//! stream. The receiver rebuilds incoming frames into the image log,
//! advances the rebuild position over contiguous committed bytes, NAKs gaps
//! under a feedback delay, and advertises the receiver window with status
//! messages. Lifecycle: INIT -> ACTIVE -> INACTIVE -> LINGER -> removed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::feedback::FeedbackDelayGenerator;
use crate::cnc::SystemCounters;
use crate::logbuffer::descriptor::{self, FRAME_ALIGNMENT};
use crate::logbuffer::scanner::scan_for_gap;
use crate::logbuffer::{rebuilder, RawLog};
use crate::protocol::data::DATA_HEADER_LENGTH;
use crate::protocol::nak::{encode_nak, NAK_HEADER_LENGTH};
use crate::protocol::status::{encode_status_message, SM_HEADER_LENGTH};
use crate::rt::align;
use crate::rt::position::Position;
use crate::transport::ReceiveChannelEndpoint;

pub const IMAGE_INIT: u8 = 0;
pub const IMAGE_ACTIVE: u8 = 1;
pub const IMAGE_INACTIVE: u8 = 2;
pub const IMAGE_LINGER: u8 = 3;

#[derive(Clone, Copy, PartialEq, Eq)]
struct Gap {
    term_id: i32,
    term_offset: i32,
    length: i32,
}

struct ReceiverState {
    window_length: i32,
    window_threshold: i32,
    status_message_timeout_ns: i64,
    last_sm_position: i64,
    sm_deadline_ns: i64,
    sm_pending: bool,
    delay_generator: Box<dyn FeedbackDelayGenerator>,
    active_gap: Option<Gap>,
    gap_deadline_ns: i64,
}

pub struct ImageParams {
    pub correlation_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub initial_term_id: i32,
    pub active_term_id: i32,
    pub initial_term_offset: i32,
    pub initial_window_length: usize,
    pub status_message_timeout_ns: i64,
}

pub struct PublicationImage {
    correlation_id: i64,
    session_id: i32,
    stream_id: i32,
    initial_term_id: i32,
    term_length: usize,
    position_bits_to_shift: u32,
    raw_log: RawLog,
    control_address: SocketAddr,
    source_address: SocketAddr,
    rebuild_position: Position,
    hwm_position: Position,
    subscriber_positions: Vec<Position>,
    receiver: Mutex<ReceiverState>,
    state: AtomicU8,
    time_of_last_state_change_ns: AtomicI64,
    last_packet_time_ns: AtomicI64,
    counters: Arc<SystemCounters>,
}

impl PublicationImage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: ImageParams,
        raw_log: RawLog,
        control_address: SocketAddr,
        source_address: SocketAddr,
        rebuild_position: Position,
        hwm_position: Position,
        subscriber_positions: Vec<Position>,
        delay_generator: Box<dyn FeedbackDelayGenerator>,
        counters: Arc<SystemCounters>,
        now_ns: i64,
    ) -> Arc<Self> {
        let term_length = raw_log.term_length();
        let position_bits_to_shift = descriptor::position_bits_to_shift(term_length);

        let meta_data = raw_log.meta_data();
        descriptor::set_initial_term_id(&meta_data, params.initial_term_id);
        descriptor::set_active_partition_index_ordered(
            &meta_data,
            descriptor::index_by_term(params.initial_term_id, params.active_term_id),
        );

        let joining_position = descriptor::compute_position(
            params.active_term_id,
            params.initial_term_offset,
            position_bits_to_shift,
            params.initial_term_id,
        );
        rebuild_position.set_ordered(joining_position);
        hwm_position.set_ordered(joining_position);
        for position in &subscriber_positions {
            position.set_ordered(joining_position);
        }

        let window_length = (params.initial_window_length as i32).min(term_length as i32 / 2);

        Arc::new(Self {
            correlation_id: params.correlation_id,
            session_id: params.session_id,
            stream_id: params.stream_id,
            initial_term_id: params.initial_term_id,
            term_length,
            position_bits_to_shift,
            raw_log,
            control_address,
            source_address,
            rebuild_position,
            hwm_position,
            subscriber_positions,
            receiver: Mutex::new(ReceiverState {
                window_length,
                window_threshold: window_length / 4,
                status_message_timeout_ns: params.status_message_timeout_ns,
                last_sm_position: joining_position,
                sm_deadline_ns: now_ns,
                // A fresh image owes the publisher an SM straight away.
                sm_pending: true,
                delay_generator,
                active_gap: None,
                gap_deadline_ns: 0,
            }),
            state: AtomicU8::new(IMAGE_INIT),
            time_of_last_state_change_ns: AtomicI64::new(now_ns),
            last_packet_time_ns: AtomicI64::new(now_ns),
            counters,
        })
    }

    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn source_address(&self) -> SocketAddr {
        self.source_address
    }

    pub fn raw_log(&self) -> &RawLog {
        &self.raw_log
    }

    pub fn rebuild_position_value(&self) -> i64 {
        self.rebuild_position.get_volatile()
    }

    pub fn hwm_position_value(&self) -> i64 {
        self.hwm_position.get_volatile()
    }

    pub fn subscriber_position_ids(&self) -> Vec<i32> {
        self.subscriber_positions.iter().map(|p| p.id()).collect()
    }

    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn transition(&self, state: u8, now_ns: i64) {
        self.state.store(state, Ordering::Release);
        self.time_of_last_state_change_ns
            .store(now_ns, Ordering::Release);
    }

    pub fn time_of_last_state_change_ns(&self) -> i64 {
        self.time_of_last_state_change_ns.load(Ordering::Acquire)
    }

    /// Mark inactive (liveness timeout or explicit teardown).
    pub fn go_inactive(&self, now_ns: i64) {
        if self.state() != IMAGE_INACTIVE && self.state() != IMAGE_LINGER {
            self.transition(IMAGE_INACTIVE, now_ns);
            log::debug!(
                "[Image] inactive: session_id={} stream_id={}",
                self.session_id,
                self.stream_id
            );
        }
    }

    pub fn go_linger(&self, now_ns: i64) {
        self.transition(IMAGE_LINGER, now_ns);
    }

    /// Has the source gone silent past the liveness timeout?
    pub fn is_liveness_expired(&self, now_ns: i64, liveness_timeout_ns: i64) -> bool {
        now_ns - self.last_packet_time_ns.load(Ordering::Acquire) > liveness_timeout_ns
    }

    // ===== receiver data path =====

    /// Insert one DATA/PAD frame; returns a work contribution.
    pub fn insert_packet(&self, term_id: i32, term_offset: i32, frame: &[u8], now_ns: i64) -> usize {
        let frame_length = crate::protocol::frame_length(frame);
        let aligned_length = align(frame_length as usize, FRAME_ALIGNMENT) as i64;
        let is_heartbeat = frame_length as usize == DATA_HEADER_LENGTH
            && crate::protocol::frame_type(frame) == crate::protocol::HDR_TYPE_DATA;

        if term_offset < 0
            || term_offset % FRAME_ALIGNMENT as i32 != 0
            || term_offset as usize + frame_length as usize > self.term_length
        {
            self.counters.invalid_packets.increment();
            return 0;
        }

        let packet_position = descriptor::compute_position(
            term_id,
            term_offset,
            self.position_bits_to_shift,
            self.initial_term_id,
        );
        let rebuild_position = self.rebuild_position.get();

        // Outside the rebuild window in either direction is not rebuildable.
        if packet_position < rebuild_position.saturating_sub(self.term_length as i64) {
            self.counters.flow_control_under_runs.increment();
            return 0;
        }
        if packet_position + aligned_length
            > rebuild_position + 2 * self.term_length as i64
        {
            self.counters.flow_control_over_runs.increment();
            return 0;
        }

        self.last_packet_time_ns.store(now_ns, Ordering::Release);
        if self.state() == IMAGE_INIT {
            self.transition(IMAGE_ACTIVE, now_ns);
        }

        let proposed_hwm = if is_heartbeat {
            self.counters.heartbeats_received.increment();
            packet_position
        } else {
            packet_position + aligned_length
        };

        let index = descriptor::index_by_term(self.initial_term_id, term_id);
        let term = self.raw_log.term_buffer(index);
        rebuilder::insert(&term, term_offset, frame);

        if self.hwm_position.propose_max_ordered(proposed_hwm) {
            self.receiver.lock().sm_pending = true;
        }

        1
    }

    /// Advance the rebuild position over contiguous committed bytes and NAK
    /// the first gap, at most once per feedback-delay interval.
    pub fn rebuild_and_scan_for_gaps(
        &self,
        endpoint: &Arc<ReceiveChannelEndpoint>,
        now_ns: i64,
    ) -> usize {
        let rebuild = self.rebuild_position.get();
        let hwm = self.hwm_position.get();
        if hwm <= rebuild {
            return 0;
        }

        let term_count = rebuild >> self.position_bits_to_shift;
        let term_id = (term_count as i32).wrapping_add(self.initial_term_id);
        let index = descriptor::index_by_term_count(term_count);
        let term = self.raw_log.term_buffer(index);

        let term_begin = rebuild - (rebuild & (self.term_length as i64 - 1));
        let rebuild_offset = (rebuild - term_begin) as i32;
        let hwm_offset = (hwm - term_begin).min(self.term_length as i64) as i32;

        let mut observed_gap = None;
        let new_offset = scan_for_gap(
            &term,
            term_id,
            rebuild_offset,
            hwm_offset,
            |gap_term_id, gap_offset, gap_length| {
                observed_gap = Some(Gap {
                    term_id: gap_term_id,
                    term_offset: gap_offset,
                    length: gap_length,
                });
            },
        );

        let mut work_count = 0;
        if new_offset > rebuild_offset {
            self.rebuild_position
                .set_ordered(term_begin + new_offset as i64);
            work_count += 1;
        }

        let mut state = self.receiver.lock();
        match observed_gap {
            Some(gap) => {
                if state.active_gap != Some(gap) {
                    let delay = state.delay_generator.generate_delay_ns();
                    state.active_gap = Some(gap);
                    state.gap_deadline_ns = now_ns + delay;
                }
                if now_ns >= state.gap_deadline_ns {
                    drop(state);
                    self.send_nak(endpoint, gap);
                    let mut state = self.receiver.lock();
                    let retry = state.delay_generator.generate_delay_ns().max(1);
                    state.gap_deadline_ns = now_ns + retry;
                    work_count += 1;
                }
            }
            None => state.active_gap = None,
        }

        work_count
    }

    fn send_nak(&self, endpoint: &Arc<ReceiveChannelEndpoint>, gap: Gap) {
        let mut buf = [0u8; NAK_HEADER_LENGTH];
        let encoded = encode_nak(
            &mut buf,
            self.session_id,
            self.stream_id,
            gap.term_id,
            gap.term_offset,
            gap.length,
        )
        .expect("nak buffer sized to header");

        if endpoint.send_to(&buf[..encoded], self.control_address) == encoded {
            self.counters.naks_sent.increment();
            log::debug!(
                "[Image] NAK session_id={} stream_id={} term_id={} offset={} length={}",
                self.session_id,
                self.stream_id,
                gap.term_id,
                gap.term_offset,
                gap.length
            );
        }
    }

    /// Consumption point driving the status message: the slowest subscriber,
    /// or the rebuild position when no subscriber counters are attached.
    fn consumption_position(&self) -> i64 {
        self.subscriber_positions
            .iter()
            .map(|p| p.get_volatile())
            .min()
            .unwrap_or_else(|| self.rebuild_position.get())
    }

    /// Send a pending or overdue status message.
    pub fn send_pending_status_message(
        &self,
        endpoint: &Arc<ReceiveChannelEndpoint>,
        now_ns: i64,
    ) -> usize {
        if self.state() == IMAGE_INACTIVE || self.state() == IMAGE_LINGER {
            return 0;
        }

        let mut state = self.receiver.lock();
        let consumption = self.consumption_position();
        let window_advanced =
            consumption - state.last_sm_position >= state.window_threshold as i64;
        let overdue = now_ns >= state.sm_deadline_ns;
        if !(state.sm_pending || window_advanced || overdue) {
            return 0;
        }

        let term_id = descriptor::compute_term_id_from_position(
            consumption,
            self.position_bits_to_shift,
            self.initial_term_id,
        );
        let term_offset = (consumption & (self.term_length as i64 - 1)) as i32;

        let mut buf = [0u8; SM_HEADER_LENGTH + 8];
        let encoded = encode_status_message(
            &mut buf,
            self.session_id,
            self.stream_id,
            term_id,
            term_offset,
            state.window_length,
            None,
            0,
        )
        .expect("sm buffer sized to header");

        if endpoint.send_to(&buf[..encoded], self.control_address) == encoded {
            state.sm_pending = false;
            state.last_sm_position = consumption;
            state.sm_deadline_ns = now_ns + state.status_message_timeout_ns;
            self.counters.status_messages_sent.increment();
            descriptor::set_time_of_last_status_message(
                &self.raw_log.meta_data(),
                crate::rt::epoch_ms(),
            );
            return 1;
        }

        0
    }
}
