// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Log buffer layout and position arithmetic.
//!
//! A log is `3 x term_length` bytes of term partitions followed by one page
//! of metadata. Exactly one partition is active at any instant; partitions
//! rotate as terms fill, and a partition is scrubbed before it becomes active
//! again.
//!
//! Metadata layout:
//!
//! ```text
//! 0   tail_counters[3]            i64 x 3
//! 24  active_partition_index      i32
//! 32  time_of_last_status_message i64
//! 40  end_of_stream_position      i64
//! 48  initial_term_id             i32
//! 52  mtu_length                  i32
//! 64  default_frame_header        32 bytes
//! ```

use crate::error::{Error, Result};
use crate::rt::buffer::AtomicBuffer;

pub const PARTITION_COUNT: usize = 3;

pub const TERM_MIN_LENGTH: usize = 64 * 1024;
pub const TERM_MAX_LENGTH: usize = 1024 * 1024 * 1024;

/// Frames are aligned to this boundary in terms and on the wire.
pub const FRAME_ALIGNMENT: usize = 32;

pub const LOG_META_DATA_LENGTH: usize = 4096;

pub const TERM_TAIL_COUNTERS_OFFSET: usize = 0;
pub const LOG_ACTIVE_PARTITION_INDEX_OFFSET: usize = 24;
pub const LOG_TIME_OF_LAST_SM_OFFSET: usize = 32;
pub const LOG_END_OF_STREAM_POSITION_OFFSET: usize = 40;
pub const LOG_INITIAL_TERM_ID_OFFSET: usize = 48;
pub const LOG_MTU_LENGTH_OFFSET: usize = 52;
pub const LOG_DEFAULT_FRAME_HEADER_OFFSET: usize = 64;

/// Validate a term length: power of two within [64 KiB, 1 GiB].
pub fn check_term_length(term_length: usize) -> Result<()> {
    if !(TERM_MIN_LENGTH..=TERM_MAX_LENGTH).contains(&term_length)
        || !term_length.is_power_of_two()
    {
        return Err(Error::Config(format!(
            "term length must be a power of 2 in [{}, {}]: {}",
            TERM_MIN_LENGTH, TERM_MAX_LENGTH, term_length
        )));
    }

    Ok(())
}

/// Total file length for a log with the given term length.
pub fn compute_log_length(term_length: usize) -> usize {
    PARTITION_COUNT * term_length + LOG_META_DATA_LENGTH
}

/// Number of bits to shift when converting between positions and term counts.
pub fn position_bits_to_shift(term_length: usize) -> u32 {
    term_length.trailing_zeros()
}

/// Absolute byte position of `(term_id, term_offset)` in the stream.
pub fn compute_position(
    term_id: i32,
    term_offset: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    let term_count = (term_id.wrapping_sub(initial_term_id)) as i64;
    (term_count << position_bits_to_shift) + term_offset as i64
}

/// Position at which `term_id` begins.
pub fn compute_term_begin_position(
    term_id: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    compute_position(term_id, 0, position_bits_to_shift, initial_term_id)
}

/// Term id active at `position`.
pub fn compute_term_id_from_position(
    position: i64,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i32 {
    ((position >> position_bits_to_shift) as i32).wrapping_add(initial_term_id)
}

/// Offset within the term active at `position`.
pub fn compute_term_offset_from_position(position: i64, term_length: usize) -> i32 {
    (position & (term_length as i64 - 1)) as i32
}

/// Partition index for `term_id`.
pub fn index_by_term(initial_term_id: i32, term_id: i32) -> usize {
    (term_id.wrapping_sub(initial_term_id)).rem_euclid(PARTITION_COUNT as i32) as usize
}

/// Partition index for a term count (`position >> bits`).
pub fn index_by_term_count(term_count: i64) -> usize {
    term_count.rem_euclid(PARTITION_COUNT as i64) as usize
}

pub fn next_partition_index(index: usize) -> usize {
    (index + 1) % PARTITION_COUNT
}

// ===== metadata accessors =====

pub fn tail_counter_offset(partition_index: usize) -> usize {
    TERM_TAIL_COUNTERS_OFFSET + partition_index * 8
}

pub fn raw_tail_volatile(meta_data: &AtomicBuffer, partition_index: usize) -> i64 {
    meta_data.get_i64_volatile(tail_counter_offset(partition_index))
}

pub fn set_raw_tail_ordered(meta_data: &AtomicBuffer, partition_index: usize, tail: i64) {
    meta_data.put_i64_ordered(tail_counter_offset(partition_index), tail);
}

pub fn active_partition_index(meta_data: &AtomicBuffer) -> usize {
    meta_data.get_i32_volatile(LOG_ACTIVE_PARTITION_INDEX_OFFSET) as usize
}

pub fn set_active_partition_index_ordered(meta_data: &AtomicBuffer, index: usize) {
    meta_data.put_i32_ordered(LOG_ACTIVE_PARTITION_INDEX_OFFSET, index as i32);
}

pub fn time_of_last_status_message(meta_data: &AtomicBuffer) -> i64 {
    meta_data.get_i64_volatile(LOG_TIME_OF_LAST_SM_OFFSET)
}

pub fn set_time_of_last_status_message(meta_data: &AtomicBuffer, time_ms: i64) {
    meta_data.put_i64_ordered(LOG_TIME_OF_LAST_SM_OFFSET, time_ms);
}

pub fn end_of_stream_position(meta_data: &AtomicBuffer) -> i64 {
    meta_data.get_i64_volatile(LOG_END_OF_STREAM_POSITION_OFFSET)
}

pub fn set_end_of_stream_position(meta_data: &AtomicBuffer, position: i64) {
    meta_data.put_i64_ordered(LOG_END_OF_STREAM_POSITION_OFFSET, position);
}

pub fn initial_term_id(meta_data: &AtomicBuffer) -> i32 {
    meta_data.get_i32(LOG_INITIAL_TERM_ID_OFFSET)
}

pub fn set_initial_term_id(meta_data: &AtomicBuffer, term_id: i32) {
    meta_data.put_i32(LOG_INITIAL_TERM_ID_OFFSET, term_id);
}

pub fn mtu_length(meta_data: &AtomicBuffer) -> i32 {
    meta_data.get_i32(LOG_MTU_LENGTH_OFFSET)
}

pub fn set_mtu_length(meta_data: &AtomicBuffer, mtu: i32) {
    meta_data.put_i32(LOG_MTU_LENGTH_OFFSET, mtu);
}

pub fn default_frame_header(meta_data: &AtomicBuffer) -> [u8; 32] {
    let mut header = [0u8; 32];
    meta_data.get_bytes(LOG_DEFAULT_FRAME_HEADER_OFFSET, &mut header);
    header
}

pub fn store_default_frame_header(meta_data: &AtomicBuffer, header: &[u8; 32]) {
    meta_data.put_bytes(LOG_DEFAULT_FRAME_HEADER_OFFSET, header);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_term_length() {
        assert!(check_term_length(64 * 1024).is_ok());
        assert!(check_term_length(1024 * 1024 * 1024).is_ok());
        assert!(check_term_length(32 * 1024).is_err());
        assert!(check_term_length(96 * 1024).is_err());
        assert!(check_term_length(2 * 1024 * 1024 * 1024).is_err());
    }

    #[test]
    fn test_position_round_trip() {
        let term_length = 64 * 1024;
        let bits = position_bits_to_shift(term_length);
        let initial = 1000;

        for (term_id, offset) in [(1000, 0), (1000, 4096), (1001, 0), (1005, 32 * 1024)] {
            let position = compute_position(term_id, offset, bits, initial);
            assert_eq!(compute_term_id_from_position(position, bits, initial), term_id);
            assert_eq!(compute_term_offset_from_position(position, term_length), offset);
        }
    }

    #[test]
    fn test_position_math() {
        let bits = position_bits_to_shift(64 * 1024);
        assert_eq!(compute_position(1000, 0, bits, 1000), 0);
        assert_eq!(compute_position(1001, 96, bits, 1000), 64 * 1024 + 96);
        assert_eq!(compute_term_begin_position(1002, bits, 1000), 2 * 64 * 1024);
    }

    #[test]
    fn test_index_by_term() {
        assert_eq!(index_by_term(1000, 1000), 0);
        assert_eq!(index_by_term(1000, 1001), 1);
        assert_eq!(index_by_term(1000, 1002), 2);
        assert_eq!(index_by_term(1000, 1003), 0);
        assert_eq!(next_partition_index(2), 0);
    }

    #[test]
    fn test_metadata_accessors() {
        let backing = crate::rt::buffer::AlignedBuffer::new(LOG_META_DATA_LENGTH);
        let meta = backing.buffer();

        set_initial_term_id(&meta, 77);
        set_mtu_length(&meta, 1408);
        set_active_partition_index_ordered(&meta, 2);
        set_raw_tail_ordered(&meta, 1, 4096);
        set_time_of_last_status_message(&meta, 123);
        set_end_of_stream_position(&meta, i64::MAX);

        assert_eq!(initial_term_id(&meta), 77);
        assert_eq!(mtu_length(&meta), 1408);
        assert_eq!(active_partition_index(&meta), 2);
        assert_eq!(raw_tail_volatile(&meta, 1), 4096);
        assert_eq!(raw_tail_volatile(&meta, 0), 0);
        assert_eq!(time_of_last_status_message(&meta), 123);
        assert_eq!(end_of_stream_position(&meta), i64::MAX);
    }
}
