// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Memory-mapped raw logs.
//!
//! One file per publication or image: three term partitions followed by the
//! metadata page. The mapping is shared between the producing agent, the
//! sender/receiver and (through the file system) clients; all concurrent
//! access goes through [`AtomicBuffer`] protocols.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use super::descriptor;
use crate::error::{Error, Result};
use crate::rt::buffer::AtomicBuffer;

/// A mapped log buffer file.
pub struct RawLog {
    // Kept for the lifetime of the mapping; all access goes through `ptr`.
    _mmap: MmapMut,
    ptr: *mut u8,
    len: usize,
    path: PathBuf,
    term_length: usize,
    delete_on_drop: bool,
}

unsafe impl Send for RawLog {}
unsafe impl Sync for RawLog {}

impl RawLog {
    /// Create and map a new log file of `3 x term_length + metadata` bytes.
    pub fn create(path: &Path, term_length: usize) -> Result<Self> {
        descriptor::check_term_length(term_length)?;
        let log_length = descriptor::compute_log_length(term_length);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                Error::Generic(format!("failed to create log file {}: {}", path.display(), e))
            })?;
        file.set_len(log_length as u64)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let ptr = mmap.as_mut_ptr();

        Ok(Self {
            _mmap: mmap,
            ptr,
            len: log_length,
            path: path.to_path_buf(),
            term_length,
            delete_on_drop: false,
        })
    }

    /// Logs are ephemeral: delete the backing file when the last owner drops.
    pub fn delete_on_drop(mut self) -> Self {
        self.delete_on_drop = true;
        self
    }

    pub fn term_length(&self) -> usize {
        self.term_length
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path.display().to_string()
    }

    /// View over one term partition.
    pub fn term_buffer(&self, partition_index: usize) -> AtomicBuffer {
        assert!(partition_index < descriptor::PARTITION_COUNT);
        unsafe {
            AtomicBuffer::new(
                self.ptr.add(partition_index * self.term_length),
                self.term_length,
            )
        }
    }

    /// View over the metadata page.
    pub fn meta_data(&self) -> AtomicBuffer {
        unsafe {
            AtomicBuffer::new(
                self.ptr
                    .add(descriptor::PARTITION_COUNT * self.term_length),
                descriptor::LOG_META_DATA_LENGTH,
            )
        }
    }

    #[allow(dead_code)]
    fn assert_layout(&self) {
        debug_assert_eq!(self.len, descriptor::compute_log_length(self.term_length));
    }
}

impl Drop for RawLog {
    fn drop(&mut self) {
        if self.delete_on_drop {
            if let Err(e) = std::fs::remove_file(&self.path) {
                log::warn!("[RawLog] failed to delete {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Creates log files under `<dir>/publications` and `<dir>/images`.
pub struct RawLogFactory {
    publications_dir: PathBuf,
    images_dir: PathBuf,
}

impl RawLogFactory {
    pub fn new(driver_dir: &Path) -> Result<Self> {
        let publications_dir = driver_dir.join("publications");
        let images_dir = driver_dir.join("images");
        std::fs::create_dir_all(&publications_dir)?;
        std::fs::create_dir_all(&images_dir)?;

        Ok(Self {
            publications_dir,
            images_dir,
        })
    }

    pub fn new_publication_log(&self, correlation_id: i64, term_length: usize) -> Result<RawLog> {
        let path = self
            .publications_dir
            .join(format!("{}.logbuffer", correlation_id));
        log::debug!(
            "[RawLogFactory] publication log {} term_length={}",
            path.display(),
            term_length
        );
        RawLog::create(&path, term_length).map(RawLog::delete_on_drop)
    }

    pub fn new_image_log(&self, correlation_id: i64, term_length: usize) -> Result<RawLog> {
        let path = self.images_dir.join(format!("{}.logbuffer", correlation_id));
        log::debug!(
            "[RawLogFactory] image log {} term_length={}",
            path.display(),
            term_length
        );
        RawLog::create(&path, term_length).map(RawLog::delete_on_drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuffer::descriptor::{
        LOG_META_DATA_LENGTH, PARTITION_COUNT, TERM_MIN_LENGTH,
    };

    #[test]
    fn test_create_and_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.logbuffer");
        let log = RawLog::create(&path, TERM_MIN_LENGTH).unwrap();

        assert_eq!(log.term_length(), TERM_MIN_LENGTH);
        assert_eq!(
            std::fs::metadata(&path).unwrap().len() as usize,
            PARTITION_COUNT * TERM_MIN_LENGTH + LOG_META_DATA_LENGTH
        );

        let term = log.term_buffer(0);
        term.put_i32_ordered(0, 42);
        assert_eq!(log.term_buffer(0).get_i32_volatile(0), 42);
        assert_eq!(log.term_buffer(1).get_i32_volatile(0), 0);

        let meta = log.meta_data();
        descriptor::set_initial_term_id(&meta, 9);
        assert_eq!(descriptor::initial_term_id(&log.meta_data()), 9);
    }

    #[test]
    fn test_rejects_bad_term_length() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RawLog::create(&dir.path().join("x.logbuffer"), 1024).is_err());
    }

    #[test]
    fn test_delete_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2.logbuffer");
        let log = RawLog::create(&path, TERM_MIN_LENGTH).unwrap().delete_on_drop();

        assert!(path.exists());
        drop(log);
        assert!(!path.exists());
    }

    #[test]
    fn test_factory_layout() {
        let dir = tempfile::tempdir().unwrap();
        let factory = RawLogFactory::new(dir.path()).unwrap();

        let publication_log = factory.new_publication_log(7, TERM_MIN_LENGTH).unwrap();
        let image_log = factory.new_image_log(8, TERM_MIN_LENGTH).unwrap();

        assert!(publication_log
            .file_name()
            .ends_with("publications/7.logbuffer"));
        assert!(image_log.file_name().ends_with("images/8.logbuffer"));
    }
}
