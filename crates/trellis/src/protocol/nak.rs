// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! NAK frame codec: a receiver's selective request for retransmission of a
//! missing `(term_id, term_offset, length)` range.

use super::{check_capacity, get_i32, put_header, put_i32};
use crate::error::Result;

pub const NAK_HEADER_LENGTH: usize = 28;

pub const SESSION_ID_FIELD_OFFSET: usize = 8;
pub const STREAM_ID_FIELD_OFFSET: usize = 12;
pub const TERM_ID_FIELD_OFFSET: usize = 16;
pub const TERM_OFFSET_FIELD_OFFSET: usize = 20;
pub const LENGTH_FIELD_OFFSET: usize = 24;

#[derive(Clone, Copy)]
pub struct NakFrame<'a> {
    buf: &'a [u8],
}

impl<'a> NakFrame<'a> {
    pub fn wrap(buf: &'a [u8]) -> Self {
        debug_assert!(buf.len() >= NAK_HEADER_LENGTH);
        Self { buf }
    }

    pub fn session_id(&self) -> i32 {
        get_i32(self.buf, SESSION_ID_FIELD_OFFSET)
    }

    pub fn stream_id(&self) -> i32 {
        get_i32(self.buf, STREAM_ID_FIELD_OFFSET)
    }

    pub fn term_id(&self) -> i32 {
        get_i32(self.buf, TERM_ID_FIELD_OFFSET)
    }

    pub fn term_offset(&self) -> i32 {
        get_i32(self.buf, TERM_OFFSET_FIELD_OFFSET)
    }

    pub fn length(&self) -> i32 {
        get_i32(self.buf, LENGTH_FIELD_OFFSET)
    }
}

pub fn encode_nak(
    buf: &mut [u8],
    session_id: i32,
    stream_id: i32,
    term_id: i32,
    term_offset: i32,
    length: i32,
) -> Result<usize> {
    check_capacity(buf, NAK_HEADER_LENGTH)?;

    put_header(buf, NAK_HEADER_LENGTH as i32, 0, super::HDR_TYPE_NAK);
    put_i32(buf, SESSION_ID_FIELD_OFFSET, session_id);
    put_i32(buf, STREAM_ID_FIELD_OFFSET, stream_id);
    put_i32(buf, TERM_ID_FIELD_OFFSET, term_id);
    put_i32(buf, TERM_OFFSET_FIELD_OFFSET, term_offset);
    put_i32(buf, LENGTH_FIELD_OFFSET, length);

    Ok(NAK_HEADER_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{check_frame, HDR_TYPE_NAK};

    #[test]
    fn test_round_trip() {
        let mut buf = [0u8; NAK_HEADER_LENGTH];
        encode_nak(&mut buf, 1, 10, 0x7F00_3355, 1024, 96).unwrap();

        assert_eq!(check_frame(&buf).unwrap(), HDR_TYPE_NAK);
        let nak = NakFrame::wrap(&buf);
        assert_eq!(nak.session_id(), 1);
        assert_eq!(nak.stream_id(), 10);
        assert_eq!(nak.term_id(), 0x7F00_3355);
        assert_eq!(nak.term_offset(), 1024);
        assert_eq!(nak.length(), 96);
    }

    #[test]
    fn test_short_buffer() {
        let mut buf = [0u8; 16];
        assert!(encode_nak(&mut buf, 0, 0, 0, 0, 0).is_err());
    }
}
