// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Term rebuilder: the receiver side of a log buffer.
//!
//! Incoming DATA/PAD frames are written into the image's term at their
//! offset. A slot is written when empty; a resident heartbeat is overwritten
//! by any strictly longer frame. Committed data is never overwritten, so
//! retransmitted duplicates and late heartbeats are harmless.

use crate::protocol::data::DATA_HEADER_LENGTH;
use crate::protocol::frame_length;
use crate::rt::buffer::AtomicBuffer;

/// Insert a received frame at `term_offset`.
///
/// Returns `true` when the frame was written (commit via release store of the
/// frame length).
pub fn insert(term: &AtomicBuffer, term_offset: i32, frame: &[u8]) -> bool {
    let offset = term_offset as usize;
    let incoming_length = frame_length(frame);
    let existing_length = term.get_i32_volatile(offset);

    let write = match existing_length {
        0 => true,
        // Resident heartbeat: data always wins, another heartbeat does not.
        len if len as usize == DATA_HEADER_LENGTH => {
            incoming_length as usize > DATA_HEADER_LENGTH
        }
        _ => false,
    };

    if !write {
        return false;
    }

    // Padding frames travel as a bare header whose length covers the padded
    // region; copy only the bytes that arrived.
    let copy_length = (incoming_length as usize).min(frame.len());
    term.put_bytes(offset + 4, &frame[4..copy_length]);
    term.put_i32_ordered(offset, incoming_length);

    true
}
