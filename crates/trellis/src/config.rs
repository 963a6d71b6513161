// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Driver configuration - single source of truth.
//!
//! Level 1: compile-time defaults for timeouts, lengths and windows.
//! Level 2: `DriverConfig`, overridable from a properties file (`key=value`
//! lines, `#` comments) named on the command line. The config is validated
//! once and then immutable; agents read it through the driver context.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::logbuffer::descriptor;

// =======================================================================
// Timeouts (nanoseconds)
// =======================================================================

/// Resend SETUP at this interval until the first status message arrives.
pub const PUBLICATION_SETUP_TIMEOUT_NS: i64 = 100 * 1_000_000;

/// Emit a heartbeat after this long without transmitting data.
pub const PUBLICATION_HEARTBEAT_TIMEOUT_NS: i64 = 100 * 1_000_000;

/// Rate limit for receiver status messages per image.
pub const STATUS_MESSAGE_TIMEOUT_NS: i64 = 200 * 1_000_000;

/// An image with no incoming packets for this long goes inactive.
pub const IMAGE_LIVENESS_TIMEOUT_NS: i64 = 10 * 1_000_000_000;

/// Images and publications linger this long before their logs are reclaimed.
pub const PUBLICATION_LINGER_TIMEOUT_NS: i64 = 5 * 1_000_000_000;

/// A client missing keepalives for this long is timed out.
pub const CLIENT_LIVENESS_TIMEOUT_NS: i64 = 5 * 1_000_000_000;

/// A reserved-but-uncommitted frame older than this is unblocked as padding.
pub const PUBLICATION_UNBLOCK_TIMEOUT_NS: i64 = 10 * 1_000_000_000;

/// Multicast flow control drops receivers not heard from for this long.
pub const FLOW_CONTROL_RECEIVER_TIMEOUT_NS: i64 = 2 * 1_000_000_000;

/// Max backoff for the multicast NAK delay distribution.
pub const NAK_MULTICAST_MAX_BACKOFF_NS: i64 = 60 * 1_000_000;

/// Group size estimate feeding the multicast NAK delay distribution.
pub const NAK_MULTICAST_GROUP_SIZE: f64 = 10.0;

/// Short fixed delay before a unicast gap is NAKed (also the re-NAK cadence).
pub const NAK_UNICAST_DELAY_NS: i64 = 10 * 1_000_000;

/// Unicast retransmits fire as soon as the NAK arrives.
pub const RETRANSMIT_UNICAST_DELAY_NS: i64 = 0;

/// Linger after a retransmission before honouring fresh NAKs for the range.
pub const RETRANSMIT_LINGER_TIMEOUT_NS: i64 = 60 * 1_000_000;

/// Heartbeat age at which a driver directory counts as stale.
pub const DRIVER_TIMEOUT_MS: i64 = 10 * 1000;

// =======================================================================
// Lengths
// =======================================================================

pub const TERM_BUFFER_LENGTH_DEFAULT: usize = 16 * 1024 * 1024;
pub const MTU_LENGTH_DEFAULT: usize = 1408;
pub const INITIAL_WINDOW_LENGTH_DEFAULT: usize = 128 * 1024;
pub const SOCKET_SNDBUF_LENGTH_DEFAULT: usize = 128 * 1024;
pub const SOCKET_RCVBUF_LENGTH_DEFAULT: usize = 128 * 1024;

pub const CONDUCTOR_BUFFER_LENGTH: usize = 1024 * 1024;
pub const TO_CLIENTS_BUFFER_LENGTH: usize = 1024 * 1024;
pub const COUNTER_LABELS_BUFFER_LENGTH: usize = 1024 * 256;
pub const COUNTER_VALUES_BUFFER_LENGTH: usize = 1024 * 64;

/// Capacity of each inter-agent command queue.
pub const CMD_QUEUE_CAPACITY: usize = 1024;

/// Bound on concurrently tracked retransmit actions per publication.
pub const MAX_RETRANSMITS: usize = 16;

/// Datagrams drained from one socket per poll.
pub const RECEIVE_BATCH_SIZE: usize = 16;

/// `stream_id == 0` is reserved.
pub const RESERVED_STREAM_ID: i32 = 0;

// =======================================================================
// Property keys
// =======================================================================

pub const DIR_PROP_NAME: &str = "trellis.dir";
pub const DIR_DELETE_ON_START_PROP_NAME: &str = "trellis.dir.delete.on.start";
pub const TERM_LENGTH_PROP_NAME: &str = "trellis.term.buffer.length";
pub const MTU_LENGTH_PROP_NAME: &str = "trellis.mtu.length";
pub const INITIAL_WINDOW_LENGTH_PROP_NAME: &str = "trellis.rcv.initial.window.length";
pub const SOCKET_SNDBUF_PROP_NAME: &str = "trellis.socket.so_sndbuf";
pub const SOCKET_RCVBUF_PROP_NAME: &str = "trellis.socket.so_rcvbuf";
pub const STATUS_MESSAGE_TIMEOUT_PROP_NAME: &str = "trellis.sm.timeout";
pub const THREADING_MODE_PROP_NAME: &str = "trellis.threading.mode";

/// How agents map onto threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadingMode {
    /// One thread per agent.
    Dedicated,
    /// Sender and receiver share one thread, conductor has its own.
    SharedNetwork,
    /// All three agents on one thread.
    Shared,
}

impl std::str::FromStr for ThreadingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dedicated" => Ok(ThreadingMode::Dedicated),
            "shared-network" => Ok(ThreadingMode::SharedNetwork),
            "shared" => Ok(ThreadingMode::Shared),
            other => Err(Error::Config(format!("unknown threading mode: {}", other))),
        }
    }
}

/// Validated driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub dir: PathBuf,
    pub dir_delete_on_start: bool,
    pub term_buffer_length: usize,
    pub mtu_length: usize,
    pub initial_window_length: usize,
    pub socket_sndbuf_length: usize,
    pub socket_rcvbuf_length: usize,
    pub status_message_timeout_ns: i64,
    pub threading_mode: ThreadingMode,
    pub image_liveness_timeout_ns: i64,
    pub client_liveness_timeout_ns: i64,
    pub publication_linger_timeout_ns: i64,
    pub publication_unblock_timeout_ns: i64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("trellis"),
            dir_delete_on_start: false,
            term_buffer_length: TERM_BUFFER_LENGTH_DEFAULT,
            mtu_length: MTU_LENGTH_DEFAULT,
            initial_window_length: INITIAL_WINDOW_LENGTH_DEFAULT,
            socket_sndbuf_length: SOCKET_SNDBUF_LENGTH_DEFAULT,
            socket_rcvbuf_length: SOCKET_RCVBUF_LENGTH_DEFAULT,
            status_message_timeout_ns: STATUS_MESSAGE_TIMEOUT_NS,
            threading_mode: ThreadingMode::Dedicated,
            image_liveness_timeout_ns: IMAGE_LIVENESS_TIMEOUT_NS,
            client_liveness_timeout_ns: CLIENT_LIVENESS_TIMEOUT_NS,
            publication_linger_timeout_ns: PUBLICATION_LINGER_TIMEOUT_NS,
            publication_unblock_timeout_ns: PUBLICATION_UNBLOCK_TIMEOUT_NS,
        }
    }
}

impl DriverConfig {
    /// Load overrides from a properties file.
    pub fn from_properties_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read properties file {}: {}", path.display(), e))
        })?;

        let mut config = Self::default();
        for (line_number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::Config(format!(
                    "malformed property at {}:{}: {}",
                    path.display(),
                    line_number + 1,
                    line
                ))
            })?;
            config.apply(key.trim(), value.trim())?;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            DIR_PROP_NAME => self.dir = PathBuf::from(value),
            DIR_DELETE_ON_START_PROP_NAME => {
                self.dir_delete_on_start = value == "true" || value == "1";
            }
            TERM_LENGTH_PROP_NAME => self.term_buffer_length = parse_usize(key, value)?,
            MTU_LENGTH_PROP_NAME => self.mtu_length = parse_usize(key, value)?,
            INITIAL_WINDOW_LENGTH_PROP_NAME => {
                self.initial_window_length = parse_usize(key, value)?;
            }
            SOCKET_SNDBUF_PROP_NAME => self.socket_sndbuf_length = parse_usize(key, value)?,
            SOCKET_RCVBUF_PROP_NAME => self.socket_rcvbuf_length = parse_usize(key, value)?,
            STATUS_MESSAGE_TIMEOUT_PROP_NAME => {
                self.status_message_timeout_ns = parse_usize(key, value)? as i64;
            }
            THREADING_MODE_PROP_NAME => self.threading_mode = value.parse()?,
            other => {
                return Err(Error::Config(format!("unknown property: {}", other)));
            }
        }

        Ok(())
    }

    /// Validate the combination of settings.
    pub fn validate(&self) -> Result<()> {
        descriptor::check_term_length(self.term_buffer_length)?;

        if self.mtu_length <= crate::protocol::data::DATA_HEADER_LENGTH
            || self.mtu_length > 64 * 1024
        {
            return Err(Error::Config(format!(
                "mtu out of range: {}",
                self.mtu_length
            )));
        }
        if self.mtu_length % descriptor::FRAME_ALIGNMENT != 0 {
            return Err(Error::Config(format!(
                "mtu must be a multiple of {}: {}",
                descriptor::FRAME_ALIGNMENT,
                self.mtu_length
            )));
        }

        // The window must cover at least two MTUs to keep the pipe busy.
        if self.initial_window_length < 2 * self.mtu_length {
            return Err(Error::Config(format!(
                "initial window {} below 2 x mtu {}",
                self.initial_window_length, self.mtu_length
            )));
        }

        if self.mtu_length > self.socket_sndbuf_length {
            return Err(Error::Config(format!(
                "mtu {} greater than SO_SNDBUF {}",
                self.mtu_length, self.socket_sndbuf_length
            )));
        }

        Ok(())
    }

    pub fn status_message_timeout(&self) -> Duration {
        Duration::from_nanos(self.status_message_timeout_ns as u64)
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .map_err(|_| Error::Config(format!("bad value for {}: {}", key, value)))
}
