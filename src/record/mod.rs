mod bitmap;
mod error;
mod file_handle;
mod page;
mod record;
mod scan;

pub use bitmap::Bitmap;
pub use error::{RecordError, RecordResult};
pub use file_handle::{FileHeader, RecordFileHandle};
pub use page::{FIRST_RECORD_PAGE, NO_FREE_PAGE, PageLayout, RecordPageHeader};
pub use record::{Record, RecordId, SlotId};
pub use scan::RecordScan;

use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::BufferPoolManager;

/// Registry of open record files, keyed by path
pub struct RecordManager {
    pool: Arc<BufferPoolManager>,
    open_files: HashMap<String, Arc<RecordFileHandle>>,
}

impl RecordManager {
    pub fn new(pool: Arc<BufferPoolManager>) -> Self {
        Self {
            pool,
            open_files: HashMap::new(),
        }
    }

    /// Create a record file and register it as open
    pub fn create_file(
        &mut self,
        path: &str,
        record_size: usize,
    ) -> RecordResult<Arc<RecordFileHandle>> {
        let handle = Arc::new(RecordFileHandle::create(
            Arc::clone(&self.pool),
            path,
            record_size,
        )?);
        self.open_files.insert(path.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Open a record file; returns the existing handle if already open
    pub fn open_file(&mut self, path: &str) -> RecordResult<Arc<RecordFileHandle>> {
        if let Some(handle) = self.open_files.get(path) {
            return Ok(Arc::clone(handle));
        }
        let handle = Arc::new(RecordFileHandle::open(Arc::clone(&self.pool), path)?);
        self.open_files.insert(path.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Flush and deregister an open record file
    pub fn close_file(&mut self, path: &str) -> RecordResult<()> {
        let handle = self
            .open_files
            .remove(path)
            .ok_or_else(|| RecordError::FileNotOpen(path.to_string()))?;
        handle.close()
    }

    /// Remove a record file from disk, closing it first if open
    pub fn destroy_file(&mut self, path: &str) -> RecordResult<()> {
        if let Some(handle) = self.open_files.remove(path) {
            handle.close()?;
        }
        RecordFileHandle::destroy(&self.pool, path)
    }

    /// Handle of an open record file
    pub fn handle(&self, path: &str) -> RecordResult<Arc<RecordFileHandle>> {
        self.open_files
            .get(path)
            .cloned()
            .ok_or_else(|| RecordError::FileNotOpen(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::PagedFileManager;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RecordManager) {
        let temp_dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(BufferPoolManager::with_capacity(
            PagedFileManager::new(),
            16,
        ));
        (temp_dir, RecordManager::new(pool))
    }

    #[test]
    fn test_create_open_close() {
        let (temp_dir, mut manager) = setup();
        let path = temp_dir.path().join("t.rec");
        let path = path.to_str().unwrap();

        let handle = manager.create_file(path, 32).unwrap();
        let rid = handle.insert_record(&[7u8; 32]).unwrap();

        // Opening an already-open path returns the same handle
        let again = manager.open_file(path).unwrap();
        assert!(Arc::ptr_eq(&handle, &again));

        manager.close_file(path).unwrap();
        assert!(matches!(
            manager.handle(path),
            Err(RecordError::FileNotOpen(_))
        ));

        let reopened = manager.open_file(path).unwrap();
        assert_eq!(reopened.get_record(rid).unwrap().as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn test_close_unknown_file() {
        let (_temp_dir, mut manager) = setup();
        assert!(matches!(
            manager.close_file("no-such-file"),
            Err(RecordError::FileNotOpen(_))
        ));
    }

    #[test]
    fn test_destroy_open_file() {
        let (temp_dir, mut manager) = setup();
        let path = temp_dir.path().join("t.rec");
        let path = path.to_str().unwrap();

        manager.create_file(path, 32).unwrap();
        manager.destroy_file(path).unwrap();

        assert!(matches!(manager.open_file(path), Err(RecordError::File(_))));
    }
}
