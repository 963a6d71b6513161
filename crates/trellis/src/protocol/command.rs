// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control protocol between clients and the driver.
//!
//! Client commands travel the to-driver ring in the CnC file; driver
//! responses travel the to-clients broadcast. Every message begins with a
//! correlation id followed by the issuing client id. Strings are
//! length-prefixed UTF-8.

use super::{get_i32, get_i64, put_i32, put_i64};
use crate::error::{Error, ErrorCode, Result};

// ===== message type ids =====

pub const ADD_PUBLICATION: i32 = 0x01;
pub const REMOVE_PUBLICATION: i32 = 0x02;
pub const ADD_SUBSCRIPTION: i32 = 0x04;
pub const REMOVE_SUBSCRIPTION: i32 = 0x05;
pub const CLIENT_KEEPALIVE: i32 = 0x0B;

pub const ON_ERROR: i32 = 0x0F01;
pub const ON_OPERATION_SUCCESS: i32 = 0x0F02;
pub const ON_NEW_PUBLICATION: i32 = 0x0F03;
pub const ON_NEW_IMAGE: i32 = 0x0F06;

fn check_length(buf: &[u8], required: usize) -> Result<()> {
    if buf.len() < required {
        return Err(Error::MalformedFrame(format!(
            "command shorter than required: {} < {}",
            buf.len(),
            required
        )));
    }

    Ok(())
}

fn get_string(buf: &[u8], offset: usize) -> Result<(String, usize)> {
    check_length(buf, offset + 4)?;
    let len = get_i32(buf, offset) as usize;
    check_length(buf, offset + 4 + len)?;
    let value = std::str::from_utf8(&buf[offset + 4..offset + 4 + len])
        .map_err(|_| Error::MalformedFrame("non-UTF-8 string field".into()))?
        .to_string();

    Ok((value, 4 + len))
}

fn put_string(buf: &mut [u8], offset: usize, value: &str) -> usize {
    put_i32(buf, offset, value.len() as i32);
    buf[offset + 4..offset + 4 + value.len()].copy_from_slice(value.as_bytes());
    4 + value.len()
}

// ===== client -> driver =====

/// ADD_PUBLICATION / REMOVE_PUBLICATION.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationMessage {
    pub correlation_id: i64,
    pub client_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub channel: String,
}

impl PublicationMessage {
    pub const FIXED_LENGTH: usize = 28;

    pub fn encoded_length(&self) -> usize {
        Self::FIXED_LENGTH + self.channel.len()
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        super::check_capacity(buf, self.encoded_length())?;
        put_i64(buf, 0, self.correlation_id);
        put_i64(buf, 8, self.client_id);
        put_i32(buf, 16, self.session_id);
        put_i32(buf, 20, self.stream_id);
        let written = put_string(buf, 24, &self.channel);

        Ok(24 + written)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_length(buf, Self::FIXED_LENGTH)?;
        let (channel, _) = get_string(buf, 24)?;

        Ok(Self {
            correlation_id: get_i64(buf, 0),
            client_id: get_i64(buf, 8),
            session_id: get_i32(buf, 16),
            stream_id: get_i32(buf, 20),
            channel,
        })
    }
}

/// ADD_SUBSCRIPTION / REMOVE_SUBSCRIPTION.
///
/// `registration_correlation_id` refers to the ADD_SUBSCRIPTION being removed;
/// -1 on add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionMessage {
    pub correlation_id: i64,
    pub client_id: i64,
    pub registration_correlation_id: i64,
    pub stream_id: i32,
    pub channel: String,
}

impl SubscriptionMessage {
    pub const FIXED_LENGTH: usize = 32;

    pub fn encoded_length(&self) -> usize {
        Self::FIXED_LENGTH + self.channel.len()
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        super::check_capacity(buf, self.encoded_length())?;
        put_i64(buf, 0, self.correlation_id);
        put_i64(buf, 8, self.client_id);
        put_i64(buf, 16, self.registration_correlation_id);
        put_i32(buf, 24, self.stream_id);
        let written = put_string(buf, 28, &self.channel);

        Ok(28 + written)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_length(buf, Self::FIXED_LENGTH)?;
        let (channel, _) = get_string(buf, 28)?;

        Ok(Self {
            correlation_id: get_i64(buf, 0),
            client_id: get_i64(buf, 8),
            registration_correlation_id: get_i64(buf, 16),
            stream_id: get_i32(buf, 24),
            channel,
        })
    }
}

/// CLIENT_KEEPALIVE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveMessage {
    pub correlation_id: i64,
    pub client_id: i64,
}

impl KeepaliveMessage {
    pub const LENGTH: usize = 16;

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        super::check_capacity(buf, Self::LENGTH)?;
        put_i64(buf, 0, self.correlation_id);
        put_i64(buf, 8, self.client_id);

        Ok(Self::LENGTH)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_length(buf, Self::LENGTH)?;

        Ok(Self {
            correlation_id: get_i64(buf, 0),
            client_id: get_i64(buf, 8),
        })
    }
}

// ===== driver -> clients =====

/// ON_ERROR with the offending correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub offending_correlation_id: i64,
    pub error_code: ErrorCode,
    pub error_message: String,
}

impl ErrorResponse {
    pub const FIXED_LENGTH: usize = 16;

    pub fn encoded_length(&self) -> usize {
        Self::FIXED_LENGTH + self.error_message.len()
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        super::check_capacity(buf, self.encoded_length())?;
        put_i64(buf, 0, self.offending_correlation_id);
        put_i32(buf, 8, self.error_code as i32);
        let written = put_string(buf, 12, &self.error_message);

        Ok(12 + written)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_length(buf, Self::FIXED_LENGTH)?;
        let error_code = ErrorCode::from_i32(get_i32(buf, 8))
            .ok_or_else(|| Error::MalformedFrame("unknown error code".into()))?;
        let (error_message, _) = get_string(buf, 12)?;

        Ok(Self {
            offending_correlation_id: get_i64(buf, 0),
            error_code,
            error_message,
        })
    }
}

/// ON_OPERATION_SUCCESS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSucceeded {
    pub correlation_id: i64,
}

impl OperationSucceeded {
    pub const LENGTH: usize = 8;

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        super::check_capacity(buf, Self::LENGTH)?;
        put_i64(buf, 0, self.correlation_id);

        Ok(Self::LENGTH)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_length(buf, Self::LENGTH)?;

        Ok(Self {
            correlation_id: get_i64(buf, 0),
        })
    }
}

/// ON_NEW_PUBLICATION: log buffers are ready for the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationReady {
    pub correlation_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub position_limit_counter_id: i32,
    pub log_file_name: String,
}

impl PublicationReady {
    pub const FIXED_LENGTH: usize = 28;

    pub fn encoded_length(&self) -> usize {
        Self::FIXED_LENGTH + self.log_file_name.len()
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        super::check_capacity(buf, self.encoded_length())?;
        put_i64(buf, 0, self.correlation_id);
        put_i32(buf, 8, self.session_id);
        put_i32(buf, 12, self.stream_id);
        put_i32(buf, 16, self.position_limit_counter_id);
        let written = put_string(buf, 20, &self.log_file_name);

        Ok(20 + written)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_length(buf, Self::FIXED_LENGTH)?;
        let (log_file_name, _) = get_string(buf, 20)?;

        Ok(Self {
            correlation_id: get_i64(buf, 0),
            session_id: get_i32(buf, 8),
            stream_id: get_i32(buf, 12),
            position_limit_counter_id: get_i32(buf, 16),
            log_file_name,
        })
    }
}

/// ON_NEW_IMAGE: a new image is ready for subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReady {
    pub correlation_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub joining_position: i64,
    pub subscriber_position_id: i32,
    pub log_file_name: String,
    pub source_identity: String,
}

impl ImageReady {
    pub const FIXED_LENGTH: usize = 36;

    pub fn encoded_length(&self) -> usize {
        Self::FIXED_LENGTH + self.log_file_name.len() + self.source_identity.len()
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        super::check_capacity(buf, self.encoded_length())?;
        put_i64(buf, 0, self.correlation_id);
        put_i32(buf, 8, self.session_id);
        put_i32(buf, 12, self.stream_id);
        put_i64(buf, 16, self.joining_position);
        put_i32(buf, 24, self.subscriber_position_id);
        let mut offset = 28;
        offset += put_string(buf, offset, &self.log_file_name);
        offset += put_string(buf, offset, &self.source_identity);

        Ok(offset)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_length(buf, 28)?;
        let (log_file_name, consumed) = get_string(buf, 28)?;
        let (source_identity, _) = get_string(buf, 28 + consumed)?;

        Ok(Self {
            correlation_id: get_i64(buf, 0),
            session_id: get_i32(buf, 8),
            stream_id: get_i32(buf, 12),
            joining_position: get_i64(buf, 16),
            subscriber_position_id: get_i32(buf, 24),
            log_file_name,
            source_identity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publication_message_round_trip() {
        let msg = PublicationMessage {
            correlation_id: 101,
            client_id: 7,
            session_id: 1,
            stream_id: 2,
            channel: "udp://localhost:4000".to_string(),
        };

        let mut buf = vec![0u8; msg.encoded_length()];
        let len = msg.encode(&mut buf).unwrap();
        assert_eq!(len, msg.encoded_length());
        assert_eq!(PublicationMessage::decode(&buf).unwrap(), msg);
    }

    #[test]
    fn test_subscription_message_round_trip() {
        let msg = SubscriptionMessage {
            correlation_id: 202,
            client_id: 7,
            registration_correlation_id: -1,
            stream_id: 10,
            channel: "udp://localhost:45678".to_string(),
        };

        let mut buf = vec![0u8; msg.encoded_length()];
        msg.encode(&mut buf).unwrap();
        assert_eq!(SubscriptionMessage::decode(&buf).unwrap(), msg);
    }

    #[test]
    fn test_error_response_round_trip() {
        let msg = ErrorResponse {
            offending_correlation_id: 303,
            error_code: ErrorCode::PublicationStreamAlreadyExists,
            error_message: "publication already exists: session_id=1 stream_id=2".to_string(),
        };

        let mut buf = vec![0u8; msg.encoded_length()];
        msg.encode(&mut buf).unwrap();
        let decoded = ErrorResponse::decode(&buf).unwrap();
        assert_eq!(decoded, msg);
        assert!(!decoded.error_message.is_empty());
    }

    #[test]
    fn test_image_ready_round_trip() {
        let msg = ImageReady {
            correlation_id: 404,
            session_id: 1,
            stream_id: 10,
            joining_position: 8192,
            subscriber_position_id: 3,
            log_file_name: "/tmp/trellis/images/404.logbuffer".to_string(),
            source_identity: "127.0.0.1:40123".to_string(),
        };

        let mut buf = vec![0u8; msg.encoded_length()];
        msg.encode(&mut buf).unwrap();
        assert_eq!(ImageReady::decode(&buf).unwrap(), msg);
    }

    #[test]
    fn test_decode_truncated_fails() {
        let msg = PublicationMessage {
            correlation_id: 1,
            client_id: 1,
            session_id: 1,
            stream_id: 1,
            channel: "udp://localhost:4000".to_string(),
        };
        let mut buf = vec![0u8; msg.encoded_length()];
        msg.encode(&mut buf).unwrap();

        assert!(PublicationMessage::decode(&buf[..20]).is_err());
        assert!(PublicationMessage::decode(&buf[..30]).is_err());
    }
}
