// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DATA and PAD frame codec.
//!
//! 32-byte header followed by the payload. A heartbeat is a DATA frame with a
//! zero-length payload (`frame_length == DATA_HEADER_LENGTH`), sent to keep a
//! stream live and to advance the receiver high-water mark.

use super::{check_capacity, get_i32, get_i64, put_header, put_i32, put_i64};
use crate::error::Result;

/// Full DATA/PAD header length.
pub const DATA_HEADER_LENGTH: usize = 32;

/// First fragment of a message.
pub const BEGIN_FLAG: u8 = 0x80;
/// Last fragment of a message.
pub const END_FLAG: u8 = 0x40;
/// Unfragmented message.
pub const BEGIN_AND_END_FLAGS: u8 = BEGIN_FLAG | END_FLAG;

pub const TERM_OFFSET_FIELD_OFFSET: usize = 8;
pub const SESSION_ID_FIELD_OFFSET: usize = 12;
pub const STREAM_ID_FIELD_OFFSET: usize = 16;
pub const TERM_ID_FIELD_OFFSET: usize = 20;
pub const RESERVED_VALUE_FIELD_OFFSET: usize = 24;

/// Zero-copy view over a DATA or PAD frame.
#[derive(Clone, Copy)]
pub struct DataFrame<'a> {
    buf: &'a [u8],
}

impl<'a> DataFrame<'a> {
    /// Wrap a frame whose common header was already validated by
    /// [`super::check_frame`].
    pub fn wrap(buf: &'a [u8]) -> Self {
        debug_assert!(buf.len() >= DATA_HEADER_LENGTH);
        Self { buf }
    }

    pub fn frame_length(&self) -> i32 {
        super::frame_length(self.buf)
    }

    pub fn flags(&self) -> u8 {
        super::frame_flags(self.buf)
    }

    pub fn term_offset(&self) -> i32 {
        get_i32(self.buf, TERM_OFFSET_FIELD_OFFSET)
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

    pub fn reserved_value(&self) -> i64 {
        get_i64(self.buf, RESERVED_VALUE_FIELD_OFFSET)
    }

    /// Offset of the payload within the frame.
    pub fn data_offset(&self) -> usize {
        DATA_HEADER_LENGTH
    }

    pub fn payload(&self) -> &'a [u8] {
        let end = (self.frame_length() as usize).min(self.buf.len());
        &self.buf[DATA_HEADER_LENGTH..end.max(DATA_HEADER_LENGTH)]
    }

    /// Zero-length payload.
    pub fn is_heartbeat(&self) -> bool {
        self.frame_length() as usize == DATA_HEADER_LENGTH
    }
}

/// Fields common to every outbound DATA header of one stream.
#[derive(Clone, Copy)]
pub struct DataHeader {
    pub session_id: i32,
    pub stream_id: i32,
}

impl DataHeader {
    /// Encode a header for a frame carrying `payload_length` bytes.
    ///
    /// `frame_length` covers header plus payload; the caller writes the
    /// payload at [`DATA_HEADER_LENGTH`].
    pub fn encode(
        &self,
        buf: &mut [u8],
        term_id: i32,
        term_offset: i32,
        payload_length: usize,
        flags: u8,
    ) -> Result<usize> {
        check_capacity(buf, DATA_HEADER_LENGTH + payload_length)?;

        let frame_length = (DATA_HEADER_LENGTH + payload_length) as i32;
        put_header(buf, frame_length, flags, super::HDR_TYPE_DATA);
        put_i32(buf, TERM_OFFSET_FIELD_OFFSET, term_offset);
        put_i32(buf, SESSION_ID_FIELD_OFFSET, self.session_id);
        put_i32(buf, STREAM_ID_FIELD_OFFSET, self.stream_id);
        put_i32(buf, TERM_ID_FIELD_OFFSET, term_id);
        put_i64(buf, RESERVED_VALUE_FIELD_OFFSET, 0);

        Ok(DATA_HEADER_LENGTH + payload_length)
    }

    /// Encode a heartbeat: a DATA header with no payload at the stream's
    /// current position.
    pub fn encode_heartbeat(&self, buf: &mut [u8], term_id: i32, term_offset: i32) -> Result<usize> {
        self.encode(buf, term_id, term_offset, 0, BEGIN_AND_END_FLAGS)
    }

    /// 32-byte header template stored in log metadata and used by the term
    /// appender for every appended frame.
    pub fn default_header(&self) -> [u8; DATA_HEADER_LENGTH] {
        let mut template = [0u8; DATA_HEADER_LENGTH];
        // frame_length and term fields are filled per append.
        put_header(&mut template, 0, BEGIN_AND_END_FLAGS, super::HDR_TYPE_DATA);
        put_i32(&mut template, SESSION_ID_FIELD_OFFSET, self.session_id);
        put_i32(&mut template, STREAM_ID_FIELD_OFFSET, self.stream_id);
        template
    }
}

/// Encode a PAD frame covering `frame_length` bytes of a term tail.
pub fn encode_padding(
    buf: &mut [u8],
    session_id: i32,
    stream_id: i32,
    term_id: i32,
    term_offset: i32,
    frame_length: usize,
) -> Result<usize> {
    check_capacity(buf, DATA_HEADER_LENGTH)?;

    put_header(buf, frame_length as i32, 0, super::HDR_TYPE_PAD);
    put_i32(buf, TERM_OFFSET_FIELD_OFFSET, term_offset);
    put_i32(buf, SESSION_ID_FIELD_OFFSET, session_id);
    put_i32(buf, STREAM_ID_FIELD_OFFSET, stream_id);
    put_i32(buf, TERM_ID_FIELD_OFFSET, term_id);
    put_i64(buf, RESERVED_VALUE_FIELD_OFFSET, 0);

    Ok(DATA_HEADER_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{check_frame, HDR_TYPE_DATA, HDR_TYPE_PAD};

    #[test]
    fn test_encode_decode_round_trip() {
        let header = DataHeader {
            session_id: 0x5E55_101D,
            stream_id: 10,
        };
        let payload = b"Hello World! ";
        let mut buf = [0u8; 64];

        let frame_len = header
            .encode(&mut buf, 7, 96, payload.len(), BEGIN_AND_END_FLAGS)
            .unwrap();
        buf[DATA_HEADER_LENGTH..frame_len].copy_from_slice(payload);

        assert_eq!(check_frame(&buf).unwrap(), HDR_TYPE_DATA);
        let frame = DataFrame::wrap(&buf);
        assert_eq!(frame.frame_length() as usize, DATA_HEADER_LENGTH + 13);
        assert_eq!(frame.flags(), BEGIN_AND_END_FLAGS);
        assert_eq!(frame.term_id(), 7);
        assert_eq!(frame.term_offset(), 96);
        assert_eq!(frame.session_id(), 0x5E55_101D);
        assert_eq!(frame.stream_id(), 10);
        assert_eq!(frame.reserved_value(), 0);
        assert_eq!(frame.payload(), payload);
        assert!(!frame.is_heartbeat());
    }

    #[test]
    fn test_heartbeat_has_no_payload() {
        let header = DataHeader {
            session_id: 1,
            stream_id: 2,
        };
        let mut buf = [0u8; DATA_HEADER_LENGTH];

        let len = header.encode_heartbeat(&mut buf, 3, 128).unwrap();
        assert_eq!(len, DATA_HEADER_LENGTH);

        let frame = DataFrame::wrap(&buf);
        assert!(frame.is_heartbeat());
        assert!(frame.payload().is_empty());
        assert_eq!(frame.term_offset(), 128);
    }

    #[test]
    fn test_encode_short_buffer() {
        let header = DataHeader {
            session_id: 1,
            stream_id: 2,
        };
        let mut buf = [0u8; 16];
        assert!(header.encode(&mut buf, 0, 0, 0, 0).is_err());
    }

    #[test]
    fn test_padding_frame() {
        let mut buf = [0u8; DATA_HEADER_LENGTH];
        encode_padding(&mut buf, 1, 2, 3, 960, 64 * 32).unwrap();

        assert_eq!(check_frame(&buf).unwrap(), HDR_TYPE_PAD);
        let frame = DataFrame::wrap(&buf);
        assert_eq!(frame.frame_length(), 64 * 32);
        assert_eq!(frame.term_offset(), 960);
    }

    #[test]
    fn test_default_header_template() {
        let header = DataHeader {
            session_id: 42,
            stream_id: 7,
        };
        let template = header.default_header();

        let frame = DataFrame::wrap(&template);
        assert_eq!(frame.session_id(), 42);
        assert_eq!(frame.stream_id(), 7);
        assert_eq!(super::super::frame_length(&template), 0);
    }
}
