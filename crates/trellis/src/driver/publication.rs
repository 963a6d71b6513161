// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sender-side state for one publication.
//!
//! Owned by the conductor, driven by the sender. The producer appends into
//! the active term; the sender scans committed bytes from the sender
//! position and transmits within the flow-control limit, emitting SETUP
//! until the first status message arrives and heartbeats while idle.
//! Inbound SM updates the limit through the flow-control strategy; inbound
//! NAK feeds the retransmit handler.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::flow_control::{FlowControl, StatusMessage};
use super::retransmit::RetransmitHandler;
use crate::cnc::SystemCounters;
use crate::config::{PUBLICATION_HEARTBEAT_TIMEOUT_NS, PUBLICATION_SETUP_TIMEOUT_NS};
use crate::logbuffer::appender::{self, AppendResult};
use crate::logbuffer::descriptor;
use crate::logbuffer::scanner::block_scan;
use crate::logbuffer::RawLog;
use crate::protocol::data::{DataHeader, DATA_HEADER_LENGTH};
use crate::protocol::setup::{encode_setup, SETUP_HEADER_LENGTH};
use crate::rt::position::Position;
use crate::transport::SendChannelEndpoint;

/// Non-blocking result of the producer offer path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Appended; the stream is now at this position.
    NewStreamPosition(i64),
    /// Would pass the sender position limit; retry after the window opens.
    BackPressured,
    /// The term rotated; retry immediately.
    AdminAction,
    /// Publication closed.
    Closed,
    /// The log cannot advance further.
    MaxPositionExceeded,
}

/// Publication lifecycle as seen by the conductor.
pub const PUBLICATION_ACTIVE: u8 = 0;
pub const PUBLICATION_LINGER: u8 = 1;
pub const PUBLICATION_CLOSED: u8 = 2;

pub struct PublicationParams {
    pub registration_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub initial_term_id: i32,
    pub mtu_length: usize,
}

struct ProducerState {
    active_term_id: i32,
    active_index: usize,
}

struct SenderState {
    flow_control: Box<dyn FlowControl>,
    retransmit: RetransmitHandler,
    time_of_last_setup_ns: i64,
    time_of_last_activity_ns: i64,
    trigger_setup: bool,
}

pub struct NetworkPublication {
    registration_id: i64,
    session_id: i32,
    stream_id: i32,
    initial_term_id: i32,
    term_length: usize,
    position_bits_to_shift: u32,
    max_possible_position: i64,
    mtu_length: usize,
    max_payload_length: usize,
    header: DataHeader,
    default_header: [u8; DATA_HEADER_LENGTH],
    raw_log: RawLog,
    endpoint: Arc<SendChannelEndpoint>,
    sender_position: Position,
    sender_limit: Position,
    producer: Mutex<ProducerState>,
    sender: Mutex<SenderState>,
    is_connected: AtomicBool,
    status: AtomicU8,
    ref_count: AtomicI32,
    counters: Arc<SystemCounters>,
}

impl NetworkPublication {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: PublicationParams,
        raw_log: RawLog,
        endpoint: Arc<SendChannelEndpoint>,
        flow_control: Box<dyn FlowControl>,
        retransmit: RetransmitHandler,
        sender_position: Position,
        sender_limit: Position,
        counters: Arc<SystemCounters>,
    ) -> Arc<Self> {
        let term_length = raw_log.term_length();
        let header = DataHeader {
            session_id: params.session_id,
            stream_id: params.stream_id,
        };
        let default_header = header.default_header();

        let meta_data = raw_log.meta_data();
        descriptor::set_initial_term_id(&meta_data, params.initial_term_id);
        descriptor::set_mtu_length(&meta_data, params.mtu_length as i32);
        descriptor::set_end_of_stream_position(&meta_data, i64::MAX);
        descriptor::store_default_frame_header(&meta_data, &default_header);
        descriptor::set_active_partition_index_ordered(&meta_data, 0);

        sender_limit.set_ordered(flow_control.initial_position_limit());

        let position_bits_to_shift = descriptor::position_bits_to_shift(term_length);

        Arc::new(Self {
            registration_id: params.registration_id,
            session_id: params.session_id,
            stream_id: params.stream_id,
            initial_term_id: params.initial_term_id,
            term_length,
            position_bits_to_shift,
            max_possible_position: (term_length as i64) << 31,
            mtu_length: params.mtu_length,
            max_payload_length: appender::max_payload_length(params.mtu_length),
            header,
            default_header,
            raw_log,
            endpoint,
            sender_position,
            sender_limit,
            producer: Mutex::new(ProducerState {
                active_term_id: params.initial_term_id,
                active_index: 0,
            }),
            sender: Mutex::new(SenderState {
                flow_control,
                retransmit,
                time_of_last_setup_ns: i64::MIN / 2,
                time_of_last_activity_ns: 0,
                trigger_setup: false,
            }),
            is_connected: AtomicBool::new(false),
            status: AtomicU8::new(PUBLICATION_ACTIVE),
            ref_count: AtomicI32::new(1),
            counters,
        })
    }

    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    pub fn raw_log(&self) -> &RawLog {
        &self.raw_log
    }

    pub fn endpoint(&self) -> &Arc<SendChannelEndpoint> {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Acquire)
    }

    pub fn sender_position_value(&self) -> i64 {
        self.sender_position.get_volatile()
    }

    pub fn sender_limit_value(&self) -> i64 {
        self.sender_limit.get_volatile()
    }

    pub fn sender_position_counter_id(&self) -> i32 {
        self.sender_position.id()
    }

    pub fn sender_limit_counter_id(&self) -> i32 {
        self.sender_limit.id()
    }

    pub fn status(&self) -> u8 {
        self.status.load(Ordering::Acquire)
    }

    pub fn set_status(&self, status: u8) {
        self.status.store(status, Ordering::Release);
    }

    pub fn increment_ref(&self) -> i32 {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn decrement_ref(&self) -> i32 {
        self.ref_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    // ===== producer path =====

    /// Append a message; zero-length payloads are carried by heartbeats and
    /// do not consume log space.
    pub fn offer(&self, payload: &[u8]) -> OfferOutcome {
        if self.status() == PUBLICATION_CLOSED {
            return OfferOutcome::Closed;
        }

        let producer = self.producer.lock();
        let position = self.producer_position_locked(&producer);

        if payload.is_empty() {
            return OfferOutcome::NewStreamPosition(position);
        }
        if position >= self.max_possible_position {
            return OfferOutcome::MaxPositionExceeded;
        }
        if position >= self.sender_limit.get_volatile() {
            return OfferOutcome::BackPressured;
        }

        let term = self.raw_log.term_buffer(producer.active_index);
        let meta_data = self.raw_log.meta_data();
        let result = if payload.len() > self.max_payload_length {
            appender::append_fragmented(
                &term,
                &meta_data,
                producer.active_index,
                producer.active_term_id,
                &self.default_header,
                payload,
                self.max_payload_length,
            )
        } else {
            appender::append_unfragmented(
                &term,
                &meta_data,
                producer.active_index,
                producer.active_term_id,
                &self.default_header,
                payload,
            )
        };

        match result {
            AppendResult::Appended { new_tail } => {
                let term_begin = descriptor::compute_term_begin_position(
                    producer.active_term_id,
                    self.position_bits_to_shift,
                    self.initial_term_id,
                );
                OfferOutcome::NewStreamPosition(term_begin + new_tail as i64)
            }
            AppendResult::TripPadding | AppendResult::Overflow => {
                self.rotate_term(producer);
                OfferOutcome::AdminAction
            }
        }
    }

    fn producer_position_locked(&self, producer: &ProducerState) -> i64 {
        let raw_tail =
            descriptor::raw_tail_volatile(&self.raw_log.meta_data(), producer.active_index);
        let tail = raw_tail.min(self.term_length as i64);
        descriptor::compute_term_begin_position(
            producer.active_term_id,
            self.position_bits_to_shift,
            self.initial_term_id,
        ) + tail
    }

    /// Producer-side stream position (committed or claimed).
    pub fn producer_position(&self) -> i64 {
        let producer = self.producer.lock();
        self.producer_position_locked(&producer)
    }

    /// Record the final stream position when the publication retires.
    pub fn end_of_stream(&self) {
        descriptor::set_end_of_stream_position(
            &self.raw_log.meta_data(),
            self.producer_position(),
        );
    }

    fn rotate_term(&self, mut producer: parking_lot::MutexGuard<'_, ProducerState>) {
        let next_index = descriptor::next_partition_index(producer.active_index);
        let next_term = self.raw_log.term_buffer(next_index);

        // Scrub before the partition becomes active again.
        next_term.set_memory(0, self.term_length, 0);
        let meta_data = self.raw_log.meta_data();
        descriptor::set_raw_tail_ordered(&meta_data, next_index, 0);

        producer.active_index = next_index;
        producer.active_term_id = producer.active_term_id.wrapping_add(1);
        descriptor::set_active_partition_index_ordered(&meta_data, next_index);
    }

    /// Complete a claimed-but-uncommitted region at the consumed position as
    /// padding so consumers can advance past a stuck producer.
    pub fn unblock_at_consumed_position(&self) -> bool {
        let producer = self.producer.lock();
        let consumed = self.sender_position.get_volatile();
        let term_count = consumed >> self.position_bits_to_shift;
        let term_id = (term_count as i32).wrapping_add(self.initial_term_id);
        let index = descriptor::index_by_term_count(term_count);
        let term_offset = (consumed & (self.term_length as i64 - 1)) as i32;

        let meta_data = self.raw_log.meta_data();
        let tail = descriptor::raw_tail_volatile(&meta_data, index).min(self.term_length as i64);
        if tail <= term_offset as i64 {
            return false;
        }

        let term = self.raw_log.term_buffer(index);
        if term.get_i32_volatile(term_offset as usize) != 0 {
            return false;
        }

        let blocked_length = (tail - term_offset as i64) as i32;
        let mut padding = [0u8; DATA_HEADER_LENGTH];
        if crate::protocol::data::encode_padding(
            &mut padding,
            self.session_id,
            self.stream_id,
            term_id,
            term_offset,
            blocked_length as usize,
        )
        .is_err()
        {
            return false;
        }
        term.put_bytes(term_offset as usize + 4, &padding[4..]);
        term.put_i32_ordered(term_offset as usize, blocked_length);
        drop(producer);

        log::warn!(
            "[Publication] unblocked session_id={} stream_id={} at position {} length={}",
            self.session_id,
            self.stream_id,
            consumed,
            blocked_length
        );

        true
    }

    // ===== sender path =====

    /// One sender tick: SETUP until connected, then scan-and-send within the
    /// window, heartbeat when idle, fire retransmit timeouts.
    pub fn send(&self, now_ns: i64) -> usize {
        let mut state = self.sender.lock();
        let mut work_count = 0;

        if !self.is_connected() || state.trigger_setup {
            if now_ns - state.time_of_last_setup_ns >= PUBLICATION_SETUP_TIMEOUT_NS
                || state.trigger_setup
            {
                self.send_setup(&mut state, now_ns);
                work_count += 1;
            }
        }

        if self.is_connected() {
            let bytes_sent = self.send_data(&mut state, now_ns);
            if bytes_sent == 0
                && now_ns - state.time_of_last_activity_ns >= PUBLICATION_HEARTBEAT_TIMEOUT_NS
            {
                self.send_heartbeat(&mut state, now_ns);
                work_count += 1;
            }
            work_count += bytes_sent;
        }

        let current_limit = self.sender_limit.get();
        let idle_limit = state.flow_control.on_idle(now_ns, current_limit);
        if idle_limit != current_limit {
            self.sender_limit.set_ordered(idle_limit);
        }

        work_count += state
            .retransmit
            .process_timeouts(now_ns, &mut Resend { publication: self });

        work_count
    }

    fn send_setup(&self, state: &mut SenderState, now_ns: i64) {
        let position = self.sender_position.get();
        let active_term_id = descriptor::compute_term_id_from_position(
            position,
            self.position_bits_to_shift,
            self.initial_term_id,
        );
        let term_offset = (position & (self.term_length as i64 - 1)) as i32;

        let mut buf = [0u8; SETUP_HEADER_LENGTH];
        let encoded = encode_setup(
            &mut buf,
            term_offset,
            self.session_id,
            self.stream_id,
            self.initial_term_id,
            active_term_id,
            self.term_length as i32,
            self.mtu_length as i32,
            self.endpoint.udp_channel().ttl(),
        )
        .expect("setup buffer sized to header");

        if self.endpoint.default_send(&buf[..encoded]) == encoded {
            state.time_of_last_setup_ns = now_ns;
            state.trigger_setup = false;
        }
    }

    fn send_data(&self, state: &mut SenderState, now_ns: i64) -> usize {
        let position = self.sender_position.get();
        let limit = self.sender_limit.get_volatile();
        let available_window = limit - position;
        if available_window <= 0 {
            return 0;
        }

        let term_count = position >> self.position_bits_to_shift;
        let index = descriptor::index_by_term_count(term_count);
        let term = self.raw_log.term_buffer(index);
        let term_offset = (position & (self.term_length as i64 - 1)) as i32;

        // Padding travels as a header-only frame; the position advances over
        // the whole padded region regardless of the MTU.
        let first_frame_length = term.get_i32_volatile(term_offset as usize);
        if first_frame_length > 0
            && term.get_u16(term_offset as usize + crate::protocol::TYPE_OFFSET)
                == crate::protocol::HDR_TYPE_PAD
        {
            let bytes = term.slice_at(term_offset as usize, DATA_HEADER_LENGTH);
            if self.endpoint.default_send(bytes) == DATA_HEADER_LENGTH {
                let aligned = crate::rt::align(
                    first_frame_length as usize,
                    descriptor::FRAME_ALIGNMENT,
                ) as i64;
                self.sender_position.set_ordered(position + aligned);
                self.counters.bytes_sent.add(DATA_HEADER_LENGTH as i64);
                state.time_of_last_activity_ns = now_ns;
                return DATA_HEADER_LENGTH;
            }
            return 0;
        }

        let scan_limit = (term_offset as i64 + (available_window).min(self.mtu_length as i64))
            .min(self.term_length as i64) as i32;
        let end_offset = block_scan(&term, term_offset, scan_limit);
        let length = (end_offset - term_offset) as usize;
        if length == 0 {
            return 0;
        }

        let bytes = term.slice_at(term_offset as usize, length);
        let sent = self.endpoint.default_send(bytes);
        if sent == length {
            self.sender_position.set_ordered(position + length as i64);
            self.counters.bytes_sent.add(length as i64);
            state.time_of_last_activity_ns = now_ns;
            return length;
        }

        0
    }

    fn send_heartbeat(&self, state: &mut SenderState, now_ns: i64) {
        let position = self.sender_position.get();
        let term_id = descriptor::compute_term_id_from_position(
            position,
            self.position_bits_to_shift,
            self.initial_term_id,
        );
        let term_offset = (position & (self.term_length as i64 - 1)) as i32;

        let mut buf = [0u8; DATA_HEADER_LENGTH];
        let encoded = self
            .header
            .encode_heartbeat(&mut buf, term_id, term_offset)
            .expect("heartbeat buffer sized to header");

        if self.endpoint.default_send(&buf[..encoded]) == encoded {
            self.counters.heartbeats_sent.increment();
            state.time_of_last_activity_ns = now_ns;
        }
    }

    /// Inbound status message (sender thread, via the send endpoint).
    pub fn on_status_message(
        &self,
        sm: &StatusMessage,
        send_setup: bool,
        src: SocketAddr,
        now_ns: i64,
    ) {
        let mut state = self.sender.lock();
        let limit = state.flow_control.on_status_message(sm, src, now_ns);
        self.sender_limit.set_ordered(limit);
        if send_setup {
            state.trigger_setup = true;
        }
        drop(state);

        descriptor::set_time_of_last_status_message(
            &self.raw_log.meta_data(),
            crate::rt::epoch_ms(),
        );

        if !self.is_connected.swap(true, Ordering::AcqRel) {
            log::debug!(
                "[Publication] connected: session_id={} stream_id={} from {}",
                self.session_id,
                self.stream_id,
                src
            );
        }
    }

    /// Inbound NAK (sender thread, via the send endpoint).
    pub fn on_nak(&self, term_id: i32, term_offset: i32, length: i32, now_ns: i64) {
        let mut state = self.sender.lock();
        let SenderState { retransmit, .. } = &mut *state;
        retransmit.on_nak(
            term_id,
            term_offset,
            length,
            now_ns,
            &mut Resend { publication: self },
        );
    }

    /// A retransmission for this range was observed on the wire.
    pub fn on_retransmit_received(&self, term_id: i32, term_offset: i32) {
        self.sender
            .lock()
            .retransmit
            .on_retransmit_received(term_id, term_offset);
    }

    /// Transmit a committed range again, split at the MTU.
    fn resend_range(&self, term_id: i32, term_offset: i32, length: i32) {
        let index = descriptor::index_by_term(self.initial_term_id, term_id);
        let term = self.raw_log.term_buffer(index);

        let end = (term_offset + length).min(self.term_length as i32);
        let mut offset = term_offset;
        while offset < end {
            let frame_length = term.get_i32_volatile(offset as usize);
            if frame_length > 0
                && term.get_u16(offset as usize + crate::protocol::TYPE_OFFSET)
                    == crate::protocol::HDR_TYPE_PAD
            {
                // Padding retransmits as a header-only frame.
                let bytes = term.slice_at(offset as usize, DATA_HEADER_LENGTH);
                if self.endpoint.default_send(bytes) != DATA_HEADER_LENGTH {
                    break;
                }
                self.counters.retransmits_sent.increment();
                offset +=
                    crate::rt::align(frame_length as usize, descriptor::FRAME_ALIGNMENT) as i32;
                continue;
            }

            let scan_limit = (offset + self.mtu_length as i32).min(end);
            let scan_end = block_scan(&term, offset, scan_limit);
            if scan_end <= offset {
                break;
            }

            let bytes = term.slice_at(offset as usize, (scan_end - offset) as usize);
            let sent = self.endpoint.default_send(bytes);
            if sent != bytes.len() {
                break;
            }
            self.counters.retransmits_sent.increment();
            self.counters.bytes_sent.add(bytes.len() as i64);
            offset = scan_end;
        }
    }
}

struct Resend<'a> {
    publication: &'a NetworkPublication,
}

impl super::retransmit::RetransmitSender for Resend<'_> {
    fn resend(&mut self, term_id: i32, term_offset: i32, length: i32) {
        self.publication.resend_range(term_id, term_offset, length);
    }
}
