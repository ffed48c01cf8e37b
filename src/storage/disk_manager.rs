use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::Bytes;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::buffer::{PageId, PAGE_SIZE};
use crate::error::{PalletDBError, PalletDBResult};

/// File-backed page store. One page per `PAGE_SIZE` slot, addressed by
/// `page_id * PAGE_SIZE`. A mutex serializes file access across threads.
#[derive(Debug)]
pub struct DiskManager {
    db_file: Mutex<File>,
}

impl DiskManager {
    pub fn try_new(db_path: impl AsRef<Path>) -> PalletDBResult<Self> {
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path.as_ref())?;
        debug!("Opened db file {:?}", db_path.as_ref());
        Ok(Self {
            db_file: Mutex::new(db_file),
        })
    }

    /// Read one page into `dst`. Slots past the end of the file (pages that
    /// were allocated but never flushed) read back as zeroes.
    pub fn read_page(&self, page_id: PageId, dst: &mut [u8]) -> PalletDBResult<()> {
        if dst.len() != PAGE_SIZE {
            return Err(PalletDBError::Internal(format!(
                "Page buffer length {} is not {}",
                dst.len(),
                PAGE_SIZE
            )));
        }
        let mut file = self.db_file.lock();
        let offset = Self::page_offset(page_id)?;
        let file_len = file.metadata()?.len();
        if offset >= file_len {
            dst.fill(0);
            return Ok(());
        }
        file.seek(SeekFrom::Start(offset))?;
        let readable = ((file_len - offset) as usize).min(PAGE_SIZE);
        file.read_exact(&mut dst[..readable])?;
        dst[readable..].fill(0);
        Ok(())
    }

    /// Write one page image, growing the file as needed.
    pub fn write_page(&self, page_id: PageId, data: Bytes) -> PalletDBResult<()> {
        if data.len() != PAGE_SIZE {
            return Err(PalletDBError::Internal(format!(
                "Page buffer length {} is not {}",
                data.len(),
                PAGE_SIZE
            )));
        }
        let mut file = self.db_file.lock();
        let offset = Self::page_offset(page_id)?;
        let file_len = file.metadata()?.len();
        if offset > file_len {
            file.set_len(offset)?;
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&data)?;
        file.flush()?;
        Ok(())
    }

    /// Release a page id. Slot reuse is not implemented; the slot simply
    /// stops being referenced.
    pub fn deallocate_page(&self, page_id: PageId) -> PalletDBResult<()> {
        debug!("Deallocated page {}", page_id);
        Ok(())
    }

    /// Page slots currently backed by the file; allocation resumes past
    /// them after a restart.
    pub fn num_pages(&self) -> usize {
        let file = self.db_file.lock();
        match file.metadata() {
            Ok(metadata) => ((metadata.len() + PAGE_SIZE as u64 - 1) / PAGE_SIZE as u64) as usize,
            Err(e) => {
                warn!("Failed to stat db file: {}", e);
                0
            }
        }
    }

    fn page_offset(page_id: PageId) -> PalletDBResult<u64> {
        if page_id < 0 {
            return Err(PalletDBError::Internal(format!(
                "Invalid page id {}",
                page_id
            )));
        }
        Ok(page_id as u64 * PAGE_SIZE as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    pub fn test_write_read_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = DiskManager::try_new(temp_dir.path().join("test.db")).unwrap();

        let mut page = vec![0u8; PAGE_SIZE];
        page[0] = 0xAB;
        page[PAGE_SIZE - 1] = 0xCD;
        disk_manager
            .write_page(3, Bytes::copy_from_slice(&page))
            .unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        disk_manager.read_page(3, &mut out).unwrap();
        assert_eq!(out, page);
    }

    #[test]
    pub fn test_read_unwritten_page_is_zeroed() {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = DiskManager::try_new(temp_dir.path().join("test.db")).unwrap();

        let mut out = vec![0xFFu8; PAGE_SIZE];
        disk_manager.read_page(7, &mut out).unwrap();
        assert!(out.iter().all(|b| *b == 0));
    }

    #[test]
    pub fn test_invalid_page_id_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = DiskManager::try_new(temp_dir.path().join("test.db")).unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        assert!(disk_manager.read_page(-1, &mut out).is_err());
    }
}
