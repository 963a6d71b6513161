// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Term appender: the producer side of a log buffer.
//!
//! Space is reserved by fetch-add on the active partition's tail counter.
//! The payload is written first; the frame length is written last with
//! release semantics, which commits the frame. A reservation that crosses
//! the end of the partition writes a padding frame over the remainder and
//! reports a trip so the caller rotates and retries in the next partition.

use super::descriptor::{self, FRAME_ALIGNMENT};
use crate::protocol::data::{
    BEGIN_AND_END_FLAGS, BEGIN_FLAG, DATA_HEADER_LENGTH, END_FLAG, RESERVED_VALUE_FIELD_OFFSET,
    TERM_ID_FIELD_OFFSET, TERM_OFFSET_FIELD_OFFSET,
};
use crate::protocol::{FLAGS_OFFSET, HDR_TYPE_PAD, TYPE_OFFSET};
use crate::rt::buffer::AtomicBuffer;
use crate::rt::align;

/// Outcome of one append attempt on the active partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendResult {
    /// Frame(s) committed; the partition tail is now at `new_tail`.
    Appended { new_tail: i32 },
    /// The reservation crossed the partition end; padding was written and the
    /// term must rotate.
    TripPadding,
    /// The reservation lies entirely beyond the partition (another producer
    /// call already tripped it).
    Overflow,
}

/// Maximum payload per fragment: `mtu - header` rounded down to alignment.
pub fn max_payload_length(mtu_length: usize) -> usize {
    (mtu_length - DATA_HEADER_LENGTH) & !(FRAME_ALIGNMENT - 1)
}

/// Bytes that an unfragmented append of `payload_length` occupies.
pub fn aligned_frame_length(payload_length: usize) -> usize {
    align(DATA_HEADER_LENGTH + payload_length, FRAME_ALIGNMENT)
}

/// Total reservation for a message fragmented at `max_payload` bytes.
pub fn required_length(payload_length: usize, max_payload: usize) -> usize {
    let full_frames = payload_length / max_payload;
    let remainder = payload_length - full_frames * max_payload;

    let mut required = full_frames * (DATA_HEADER_LENGTH + max_payload);
    if remainder > 0 || payload_length == 0 {
        required += aligned_frame_length(remainder);
    }

    required
}

/// Append one unfragmented message to the active partition.
pub fn append_unfragmented(
    term: &AtomicBuffer,
    meta_data: &AtomicBuffer,
    partition_index: usize,
    term_id: i32,
    default_header: &[u8; DATA_HEADER_LENGTH],
    payload: &[u8],
) -> AppendResult {
    let frame_length = DATA_HEADER_LENGTH + payload.len();
    let aligned_length = align(frame_length, FRAME_ALIGNMENT);

    let raw_tail = meta_data.get_and_add_i64(
        descriptor::tail_counter_offset(partition_index),
        aligned_length as i64,
    );
    let term_length = term.capacity() as i64;

    if raw_tail + aligned_length as i64 > term_length {
        return handle_end_of_term(term, term_id, default_header, raw_tail, term_length);
    }

    let offset = raw_tail as usize;
    write_frame_header(term, offset, term_id, default_header, BEGIN_AND_END_FLAGS);
    term.put_bytes(offset + DATA_HEADER_LENGTH, payload);
    term.put_i32_ordered(offset, frame_length as i32);

    AppendResult::Appended {
        new_tail: (offset + aligned_length) as i32,
    }
}

/// Append a message fragmented at the MTU boundary.
///
/// The whole message is reserved in one fetch-add so fragments are
/// contiguous; each fragment commits individually in order.
pub fn append_fragmented(
    term: &AtomicBuffer,
    meta_data: &AtomicBuffer,
    partition_index: usize,
    term_id: i32,
    default_header: &[u8; DATA_HEADER_LENGTH],
    payload: &[u8],
    max_payload: usize,
) -> AppendResult {
    let required = required_length(payload.len(), max_payload);
    let raw_tail = meta_data.get_and_add_i64(
        descriptor::tail_counter_offset(partition_index),
        required as i64,
    );
    let term_length = term.capacity() as i64;

    if raw_tail + required as i64 > term_length {
        return handle_end_of_term(term, term_id, default_header, raw_tail, term_length);
    }

    let mut offset = raw_tail as usize;
    let mut remaining = payload;
    let mut flags = BEGIN_FLAG;
    loop {
        let chunk_length = remaining.len().min(max_payload);
        let chunk = &remaining[..chunk_length];
        remaining = &remaining[chunk_length..];
        if remaining.is_empty() {
            flags |= END_FLAG;
        }

        let frame_length = DATA_HEADER_LENGTH + chunk_length;
        write_frame_header(term, offset, term_id, default_header, flags);
        term.put_bytes(offset + DATA_HEADER_LENGTH, chunk);
        term.put_i32_ordered(offset, frame_length as i32);

        offset += align(frame_length, FRAME_ALIGNMENT);
        if remaining.is_empty() {
            break;
        }
        flags = 0;
    }

    AppendResult::Appended {
        new_tail: offset as i32,
    }
}

fn write_frame_header(
    term: &AtomicBuffer,
    offset: usize,
    term_id: i32,
    default_header: &[u8; DATA_HEADER_LENGTH],
    flags: u8,
) {
    // Header template first (length field stays 0 until the commit), then the
    // per-frame fields.
    term.put_bytes(offset + 4, &default_header[4..]);
    term.put_u8(offset + FLAGS_OFFSET, flags);
    term.put_i32(offset + TERM_OFFSET_FIELD_OFFSET, offset as i32);
    term.put_i32(offset + TERM_ID_FIELD_OFFSET, term_id);
    term.put_i64(offset + RESERVED_VALUE_FIELD_OFFSET, 0);
}

fn handle_end_of_term(
    term: &AtomicBuffer,
    term_id: i32,
    default_header: &[u8; DATA_HEADER_LENGTH],
    raw_tail: i64,
    term_length: i64,
) -> AppendResult {
    if raw_tail >= term_length {
        return AppendResult::Overflow;
    }

    // Pad the remainder of the partition so consumers skip to the rotation.
    let offset = raw_tail as usize;
    let padding_length = (term_length - raw_tail) as i32;
    write_frame_header(term, offset, term_id, default_header, 0);
    term.put_u16(
        offset + TYPE_OFFSET,
        HDR_TYPE_PAD,
    );
    term.put_i32_ordered(offset, padding_length);

    AppendResult::TripPadding
}
