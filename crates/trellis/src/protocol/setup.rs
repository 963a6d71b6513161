// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SETUP frame codec: a publisher announcing stream parameters so receivers
//! can build an image before any data arrives.

use super::{check_capacity, get_i32, put_header, put_i32};
use crate::error::Result;

pub const SETUP_HEADER_LENGTH: usize = 40;

pub const TERM_OFFSET_FIELD_OFFSET: usize = 8;
pub const SESSION_ID_FIELD_OFFSET: usize = 12;
pub const STREAM_ID_FIELD_OFFSET: usize = 16;
pub const INITIAL_TERM_ID_FIELD_OFFSET: usize = 20;
pub const ACTIVE_TERM_ID_FIELD_OFFSET: usize = 24;
pub const TERM_LENGTH_FIELD_OFFSET: usize = 28;
pub const MTU_LENGTH_FIELD_OFFSET: usize = 32;
pub const TTL_FIELD_OFFSET: usize = 36;

#[derive(Clone, Copy)]
pub struct SetupFrame<'a> {
    buf: &'a [u8],
}

impl<'a> SetupFrame<'a> {
    pub fn wrap(buf: &'a [u8]) -> Self {
        debug_assert!(buf.len() >= SETUP_HEADER_LENGTH);
        Self { buf }
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

    pub fn initial_term_id(&self) -> i32 {
        get_i32(self.buf, INITIAL_TERM_ID_FIELD_OFFSET)
    }

    pub fn active_term_id(&self) -> i32 {
        get_i32(self.buf, ACTIVE_TERM_ID_FIELD_OFFSET)
    }

    pub fn term_length(&self) -> i32 {
        get_i32(self.buf, TERM_LENGTH_FIELD_OFFSET)
    }

    pub fn mtu_length(&self) -> i32 {
        get_i32(self.buf, MTU_LENGTH_FIELD_OFFSET)
    }

    pub fn ttl(&self) -> i32 {
        get_i32(self.buf, TTL_FIELD_OFFSET)
    }
}

#[allow(clippy::too_many_arguments)]
pub fn encode_setup(
    buf: &mut [u8],
    term_offset: i32,
    session_id: i32,
    stream_id: i32,
    initial_term_id: i32,
    active_term_id: i32,
    term_length: i32,
    mtu_length: i32,
    ttl: i32,
) -> Result<usize> {
    check_capacity(buf, SETUP_HEADER_LENGTH)?;

    put_header(buf, SETUP_HEADER_LENGTH as i32, 0, super::HDR_TYPE_SETUP);
    put_i32(buf, TERM_OFFSET_FIELD_OFFSET, term_offset);
    put_i32(buf, SESSION_ID_FIELD_OFFSET, session_id);
    put_i32(buf, STREAM_ID_FIELD_OFFSET, stream_id);
    put_i32(buf, INITIAL_TERM_ID_FIELD_OFFSET, initial_term_id);
    put_i32(buf, ACTIVE_TERM_ID_FIELD_OFFSET, active_term_id);
    put_i32(buf, TERM_LENGTH_FIELD_OFFSET, term_length);
    put_i32(buf, MTU_LENGTH_FIELD_OFFSET, mtu_length);
    put_i32(buf, TTL_FIELD_OFFSET, ttl);

    Ok(SETUP_HEADER_LENGTH)
}
