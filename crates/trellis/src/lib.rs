// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Trellis - a reliable UDP publish/subscribe media driver
//!
//! Trellis is the server process of a high-throughput, low-latency UDP
//! transport. Publishers and subscribers interact with the driver through
//! shared memory-mapped files; the driver owns every socket and performs
//! retransmission, flow control and congestion recovery.
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------------------------------+
//! |                          Clients                                  |
//! |        CnC file: command ring -> | <- response broadcast          |
//! +-------------------------------------------------------------------+
//! |                          Conductor                                |
//! |   commands | publications | subscriptions | images | timers       |
//! +-------------------------------------------------------------------+
//! |        Sender                  |            Receiver              |
//! |  SETUP / DATA / heartbeats     |   rebuild / NAK / status msgs    |
//! |  retransmit + flow control     |   gap scan + liveness            |
//! +-------------------------------------------------------------------+
//! |                    UDP channel endpoints                          |
//! +-------------------------------------------------------------------+
//! ```
//!
//! Three cooperative agents tick over log buffers: per-stream append-only
//! memory-mapped files split into three rotating term partitions. Frames are
//! committed by writing their length last with release semantics; positions
//! are monotonic byte counters `term_id x term_length + term_offset`.
//!
//! ## Modules
//!
//! - [`driver`] - the conductor/sender/receiver agents and `MediaDriver`
//! - [`logbuffer`] - term appender, rebuilder, scanners, mapped logs
//! - [`protocol`] - wire and control codecs
//! - [`channel`] - channel URIs and canonical forms
//! - [`transport`] - UDP channel endpoints
//! - [`cnc`] - the Control-and-Command file, rings and counters
//! - [`rt`] - agent runtime, SPSC queues, atomic buffers, positions

// Frame commit protocols store little-endian values through native atomics.
#[cfg(target_endian = "big")]
compile_error!("trellis requires a little-endian target");

pub mod channel;
pub mod cnc;
pub mod config;
pub mod driver;
pub mod error;
pub mod logbuffer;
pub mod protocol;
pub mod rt;
pub mod transport;

pub use channel::UdpChannel;
pub use config::{DriverConfig, ThreadingMode};
pub use driver::publication::OfferOutcome;
pub use driver::MediaDriver;
pub use error::{Error, ErrorCode, Result};
