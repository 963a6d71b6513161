// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-stream append-only log buffers backed by memory-mapped files.
//!
//! A log is three equal term partitions plus a metadata page. Producers
//! append into the active partition via the term appender; the receiver
//! rebuilds incoming frames into image logs; scanners drive transmission and
//! loss detection. See [`descriptor`] for the layout and position math.

pub mod appender;
pub mod descriptor;
pub mod mapped;
pub mod rebuilder;
pub mod scanner;

pub use appender::AppendResult;
pub use mapped::{RawLog, RawLogFactory};
