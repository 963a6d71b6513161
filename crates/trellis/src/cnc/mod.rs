// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The Control-and-Command (CnC) file.
//!
//! One mapped file per driver directory through which clients bootstrap:
//!
//! ```text
//! meta (128): version, region lengths, client liveness timeout,
//!             driver heartbeat (epoch ms)
//! to-driver ring        client commands (MPSC)
//! to-clients broadcast  driver responses (1-to-many)
//! counter labels
//! counter values
//! ```
//!
//! A fresh driver refuses to start while the file carries a live heartbeat;
//! a stale file is deleted and recreated.

pub mod broadcast;
pub mod counters;
pub mod ring;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{Error, Result};
use crate::rt::buffer::AtomicBuffer;
use crate::rt::epoch_ms;

pub use broadcast::{BroadcastReceiver, BroadcastTransmitter};
pub use counters::{Counter, CountersManager, SystemCounters};
pub use ring::ManyToOneRingBuffer;

pub const CNC_FILE: &str = "cnc.dat";
pub const CNC_VERSION: i32 = 1;

pub const META_DATA_LENGTH: usize = 128;

const VERSION_OFFSET: usize = 0;
const TO_DRIVER_LENGTH_OFFSET: usize = 4;
const TO_CLIENTS_LENGTH_OFFSET: usize = 8;
const COUNTER_LABELS_LENGTH_OFFSET: usize = 12;
const COUNTER_VALUES_LENGTH_OFFSET: usize = 16;
const CLIENT_LIVENESS_TIMEOUT_OFFSET: usize = 24;
const DRIVER_HEARTBEAT_OFFSET: usize = 32;

pub struct CncFile {
    _mmap: MmapMut,
    ptr: *mut u8,
    path: PathBuf,
    to_driver_length: usize,
    to_clients_length: usize,
    counter_labels_length: usize,
    counter_values_length: usize,
}

unsafe impl Send for CncFile {}
unsafe impl Sync for CncFile {}

impl CncFile {
    pub fn compute_length(
        to_driver_length: usize,
        to_clients_length: usize,
        counter_labels_length: usize,
        counter_values_length: usize,
    ) -> usize {
        META_DATA_LENGTH
            + to_driver_length
            + ring::RING_TRAILER_LENGTH
            + to_clients_length
            + broadcast::BROADCAST_TRAILER_LENGTH
            + counter_labels_length
            + counter_values_length
    }

    /// Create a fresh CnC file, failing if one already exists.
    pub fn create(
        driver_dir: &Path,
        to_driver_length: usize,
        to_clients_length: usize,
        counter_labels_length: usize,
        counter_values_length: usize,
        client_liveness_timeout_ns: i64,
    ) -> Result<Self> {
        let path = driver_dir.join(CNC_FILE);
        let length = Self::compute_length(
            to_driver_length,
            to_clients_length,
            counter_labels_length,
            counter_values_length,
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                Error::Generic(format!("failed to create CnC file {}: {}", path.display(), e))
            })?;
        file.set_len(length as u64)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let ptr = mmap.as_mut_ptr();

        let cnc = Self {
            _mmap: mmap,
            ptr,
            path,
            to_driver_length,
            to_clients_length,
            counter_labels_length,
            counter_values_length,
        };

        let meta = cnc.meta_data();
        meta.put_i32(TO_DRIVER_LENGTH_OFFSET, to_driver_length as i32);
        meta.put_i32(TO_CLIENTS_LENGTH_OFFSET, to_clients_length as i32);
        meta.put_i32(COUNTER_LABELS_LENGTH_OFFSET, counter_labels_length as i32);
        meta.put_i32(COUNTER_VALUES_LENGTH_OFFSET, counter_values_length as i32);
        meta.put_i64(CLIENT_LIVENESS_TIMEOUT_OFFSET, client_liveness_timeout_ns);
        cnc.update_heartbeat(epoch_ms());
        meta.put_i32_ordered(VERSION_OFFSET, CNC_VERSION);

        Ok(cnc)
    }

    /// Map an existing CnC file (liveness probe, clients, tests).
    pub fn map_existing(driver_dir: &Path) -> Result<Self> {
        let path = driver_dir.join(CNC_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                Error::Generic(format!("failed to map CnC file {}: {}", path.display(), e))
            })?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let ptr = mmap.as_mut_ptr();
        let len = mmap.len();
        if len < META_DATA_LENGTH {
            return Err(Error::Generic(format!(
                "CnC file too short: {}",
                path.display()
            )));
        }

        let meta = unsafe { AtomicBuffer::new(ptr, META_DATA_LENGTH) };
        let version = meta.get_i32_volatile(VERSION_OFFSET);
        if version != CNC_VERSION {
            return Err(Error::Generic(format!(
                "CnC version mismatch: file={} driver={}",
                version, CNC_VERSION
            )));
        }

        Ok(Self {
            to_driver_length: meta.get_i32(TO_DRIVER_LENGTH_OFFSET) as usize,
            to_clients_length: meta.get_i32(TO_CLIENTS_LENGTH_OFFSET) as usize,
            counter_labels_length: meta.get_i32(COUNTER_LABELS_LENGTH_OFFSET) as usize,
            counter_values_length: meta.get_i32(COUNTER_VALUES_LENGTH_OFFSET) as usize,
            _mmap: mmap,
            ptr,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn meta_data(&self) -> AtomicBuffer {
        unsafe { AtomicBuffer::new(self.ptr, META_DATA_LENGTH) }
    }

    pub fn client_liveness_timeout_ns(&self) -> i64 {
        self.meta_data().get_i64(CLIENT_LIVENESS_TIMEOUT_OFFSET)
    }

    pub fn heartbeat(&self) -> i64 {
        self.meta_data().get_i64_volatile(DRIVER_HEARTBEAT_OFFSET)
    }

    pub fn update_heartbeat(&self, time_ms: i64) {
        self.meta_data()
            .put_i64_ordered(DRIVER_HEARTBEAT_OFFSET, time_ms);
    }

    pub fn to_driver_buffer(&self) -> AtomicBuffer {
        unsafe {
            AtomicBuffer::new(
                self.ptr.add(META_DATA_LENGTH),
                self.to_driver_length + ring::RING_TRAILER_LENGTH,
            )
        }
    }

    pub fn to_clients_buffer(&self) -> AtomicBuffer {
        let offset = META_DATA_LENGTH + self.to_driver_length + ring::RING_TRAILER_LENGTH;
        unsafe {
            AtomicBuffer::new(
                self.ptr.add(offset),
                self.to_clients_length + broadcast::BROADCAST_TRAILER_LENGTH,
            )
        }
    }

    pub fn counter_labels_buffer(&self) -> AtomicBuffer {
        let offset = META_DATA_LENGTH
            + self.to_driver_length
            + ring::RING_TRAILER_LENGTH
            + self.to_clients_length
            + broadcast::BROADCAST_TRAILER_LENGTH;
        unsafe { AtomicBuffer::new(self.ptr.add(offset), self.counter_labels_length) }
    }

    pub fn counter_values_buffer(&self) -> AtomicBuffer {
        let offset = META_DATA_LENGTH
            + self.to_driver_length
            + ring::RING_TRAILER_LENGTH
            + self.to_clients_length
            + broadcast::BROADCAST_TRAILER_LENGTH
            + self.counter_labels_length;
        unsafe { AtomicBuffer::new(self.ptr.add(offset), self.counter_values_length) }
    }
}

/// Is another driver live in this directory?
///
/// True when a CnC file exists and its heartbeat is younger than
/// `timeout_ms`. Unreadable or mismatched files count as stale.
pub fn is_driver_active(driver_dir: &Path, timeout_ms: i64) -> bool {
    match CncFile::map_existing(driver_dir) {
        Ok(cnc) => {
            let age_ms = epoch_ms() - cnc.heartbeat();
            age_ms <= timeout_ms
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(dir: &Path) -> CncFile {
        CncFile::create(dir, 4096, 4096, 16 * 256, 16 * 64, 5_000_000_000).unwrap()
    }

    #[test]
    fn test_create_and_remap() {
        let dir = tempfile::tempdir().unwrap();
        let cnc = create(dir.path());
        assert_eq!(cnc.client_liveness_timeout_ns(), 5_000_000_000);

        let remapped = CncFile::map_existing(dir.path()).unwrap();
        assert_eq!(remapped.client_liveness_timeout_ns(), 5_000_000_000);
        assert_eq!(remapped.to_driver_buffer().capacity(), 4096 + ring::RING_TRAILER_LENGTH);
    }

    #[test]
    fn test_rings_share_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let cnc = create(dir.path());
        let remapped = CncFile::map_existing(dir.path()).unwrap();

        let driver_side = ManyToOneRingBuffer::new(cnc.to_driver_buffer());
        let client_side = ManyToOneRingBuffer::new(remapped.to_driver_buffer());

        assert!(client_side.write(5, b"command"));
        let mut seen = Vec::new();
        driver_side.read(|t, p| seen.push((t, p.to_vec())), 10);
        assert_eq!(seen, vec![(5, b"command".to_vec())]);
    }

    #[test]
    fn test_driver_liveness() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_driver_active(dir.path(), 1000));

        let cnc = create(dir.path());
        cnc.update_heartbeat(epoch_ms());
        assert!(is_driver_active(dir.path(), 10_000));

        cnc.update_heartbeat(epoch_ms() - 60_000);
        assert!(!is_driver_active(dir.path(), 10_000));
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let _cnc = create(dir.path());
        assert!(CncFile::create(dir.path(), 4096, 4096, 4096, 4096, 1).is_err());
    }
}
