// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Status message (SM) codec: a receiver's window advertisement
//! `(consumption_term_id, consumption_term_offset, receiver_window)` to a
//! publisher, optionally tagged with a receiver id.

use super::{check_capacity, get_i32, get_i64, put_header, put_i32, put_i64};
use crate::error::Result;

/// Fixed SM header length; the receiver id is appended when present.
pub const SM_HEADER_LENGTH: usize = 28;

/// Receiver requests a SETUP resend (lost the original).
pub const SEND_SETUP_FLAG: u8 = 0x80;
/// A receiver id field follows the fixed header.
pub const RECEIVER_ID_FLAG: u8 = 0x40;

pub const SESSION_ID_FIELD_OFFSET: usize = 8;
pub const STREAM_ID_FIELD_OFFSET: usize = 12;
pub const CONSUMPTION_TERM_ID_FIELD_OFFSET: usize = 16;
pub const CONSUMPTION_TERM_OFFSET_FIELD_OFFSET: usize = 20;
pub const RECEIVER_WINDOW_FIELD_OFFSET: usize = 24;
pub const RECEIVER_ID_FIELD_OFFSET: usize = 28;

#[derive(Clone, Copy)]
pub struct StatusMessageFrame<'a> {
    buf: &'a [u8],
}

impl<'a> StatusMessageFrame<'a> {
    pub fn wrap(buf: &'a [u8]) -> Self {
        debug_assert!(buf.len() >= SM_HEADER_LENGTH);
        Self { buf }
    }

    pub fn flags(&self) -> u8 {
        super::frame_flags(self.buf)
    }

    pub fn session_id(&self) -> i32 {
        get_i32(self.buf, SESSION_ID_FIELD_OFFSET)
    }

    pub fn stream_id(&self) -> i32 {
        get_i32(self.buf, STREAM_ID_FIELD_OFFSET)
    }

    pub fn consumption_term_id(&self) -> i32 {
        get_i32(self.buf, CONSUMPTION_TERM_ID_FIELD_OFFSET)
    }

    pub fn consumption_term_offset(&self) -> i32 {
        get_i32(self.buf, CONSUMPTION_TERM_OFFSET_FIELD_OFFSET)
    }

    pub fn receiver_window(&self) -> i32 {
        get_i32(self.buf, RECEIVER_WINDOW_FIELD_OFFSET)
    }

    /// Receiver id when the flag is set and the frame carries the field.
    pub fn receiver_id(&self) -> Option<i64> {
        if self.flags() & RECEIVER_ID_FLAG != 0
            && self.buf.len() >= RECEIVER_ID_FIELD_OFFSET + 8
        {
            return Some(get_i64(self.buf, RECEIVER_ID_FIELD_OFFSET));
        }

        None
    }

    pub fn is_send_setup(&self) -> bool {
        self.flags() & SEND_SETUP_FLAG != 0
    }
}

/// Encode an SM; appends the receiver id field when `receiver_id` is set.
#[allow(clippy::too_many_arguments)]
pub fn encode_status_message(
    buf: &mut [u8],
    session_id: i32,
    stream_id: i32,
    consumption_term_id: i32,
    consumption_term_offset: i32,
    receiver_window: i32,
    receiver_id: Option<i64>,
    flags: u8,
) -> Result<usize> {
    let frame_length = if receiver_id.is_some() {
        SM_HEADER_LENGTH + 8
    } else {
        SM_HEADER_LENGTH
    };
    check_capacity(buf, frame_length)?;

    let flags = if receiver_id.is_some() {
        flags | RECEIVER_ID_FLAG
    } else {
        flags
    };

    put_header(buf, frame_length as i32, flags, super::HDR_TYPE_SM);
    put_i32(buf, SESSION_ID_FIELD_OFFSET, session_id);
    put_i32(buf, STREAM_ID_FIELD_OFFSET, stream_id);
    put_i32(buf, CONSUMPTION_TERM_ID_FIELD_OFFSET, consumption_term_id);
    put_i32(buf, CONSUMPTION_TERM_OFFSET_FIELD_OFFSET, consumption_term_offset);
    put_i32(buf, RECEIVER_WINDOW_FIELD_OFFSET, receiver_window);
    if let Some(id) = receiver_id {
        put_i64(buf, RECEIVER_ID_FIELD_OFFSET, id);
    }

    Ok(frame_length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{check_frame, frame_length, HDR_TYPE_SM};

    #[test]
    fn test_round_trip_without_receiver_id() {
        let mut buf = [0u8; 64];
        let len = encode_status_message(&mut buf, 1, 10, 5, 4096, 65536, None, 0).unwrap();
        assert_eq!(len, SM_HEADER_LENGTH);
        assert_eq!(frame_length(&buf) as usize, SM_HEADER_LENGTH);

        assert_eq!(check_frame(&buf).unwrap(), HDR_TYPE_SM);
        let sm = StatusMessageFrame::wrap(&buf);
        assert_eq!(sm.session_id(), 1);
        assert_eq!(sm.stream_id(), 10);
        assert_eq!(sm.consumption_term_id(), 5);
        assert_eq!(sm.consumption_term_offset(), 4096);
        assert_eq!(sm.receiver_window(), 65536);
        assert_eq!(sm.receiver_id(), None);
        assert!(!sm.is_send_setup());
    }

    #[test]
    fn test_receiver_id_appended() {
        let mut buf = [0u8; 64];
        let len = encode_status_message(&mut buf, 1, 10, 5, 0, 1024, Some(77), 0).unwrap();
        assert_eq!(len, SM_HEADER_LENGTH + 8);

        let sm = StatusMessageFrame::wrap(&buf[..len]);
        assert_eq!(sm.receiver_id(), Some(77));
    }

    #[test]
    fn test_send_setup_flag() {
        let mut buf = [0u8; 64];
        encode_status_message(&mut buf, 1, 10, 0, 0, 0, None, SEND_SETUP_FLAG).unwrap();
        assert!(StatusMessageFrame::wrap(&buf).is_send_setup());
    }
}
