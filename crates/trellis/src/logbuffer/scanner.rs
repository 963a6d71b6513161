// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Term scanners.
//!
//! The gap scanner walks a term from the rebuild point and reports the first
//! gap between committed frames below the high-water mark; it drives NAK
//! generation. The block scanner consumes contiguous committed frames
//! (padding included) up to a byte limit without splitting a frame; it
//! drives the sender's transmit path.

use super::descriptor::FRAME_ALIGNMENT;
use crate::rt::align;
use crate::rt::buffer::AtomicBuffer;

/// Scan for the first gap between `rebuild_offset` and `hwm_offset`.
///
/// Returns the offset up to which frames are contiguously committed (the new
/// rebuild offset). When a zero slot is followed by a committed frame below
/// the high-water mark, `on_gap(term_id, gap_offset, gap_length)` fires once.
/// A high-water mark inside a padding frame is not a gap: padding is
/// committed like any other frame.
pub fn scan_for_gap(
    term: &AtomicBuffer,
    term_id: i32,
    rebuild_offset: i32,
    hwm_offset: i32,
    mut on_gap: impl FnMut(i32, i32, i32),
) -> i32 {
    let mut offset = rebuild_offset;

    while offset < hwm_offset {
        let frame_length = term.get_i32_volatile(offset as usize);
        if frame_length <= 0 {
            break;
        }
        offset += align(frame_length as usize, FRAME_ALIGNMENT) as i32;
    }

    if offset >= hwm_offset {
        return hwm_offset.min(offset);
    }

    let gap_begin = offset;
    let mut cursor = gap_begin;
    while cursor < hwm_offset && term.get_i32_volatile(cursor as usize) == 0 {
        cursor += FRAME_ALIGNMENT as i32;
    }

    if cursor < hwm_offset {
        on_gap(term_id, gap_begin, cursor - gap_begin);
    }

    gap_begin
}

/// Consume contiguous committed frames from `offset` up to `limit`.
///
/// Returns the offset after the last complete frame; a frame is never split.
pub fn block_scan(term: &AtomicBuffer, offset: i32, limit: i32) -> i32 {
    let mut scan_offset = offset;

    loop {
        let frame_length = term.get_i32_volatile(scan_offset as usize);
        if frame_length <= 0 {
            break;
        }

        let aligned_frame_length = align(frame_length as usize, FRAME_ALIGNMENT) as i32;
        scan_offset += aligned_frame_length;
        if scan_offset >= limit {
            if scan_offset > limit {
                scan_offset -= aligned_frame_length;
            }
            break;
        }
    }

    scan_offset
}
