use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::error::{FileError, FileResult};
use super::{PAGE_SIZE, PageNo};

/// Handle to an open paged file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(usize);

impl FileHandle {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// Page-granular file I/O over a set of open files.
///
/// All reads and writes move whole pages; the buffer pool above this layer
/// never touches byte offsets directly.
pub struct PagedFileManager {
    /// Map from file handles to open files
    open_files: HashMap<FileHandle, FileEntry>,
    /// Map from file paths to handles (for checking if already open)
    path_to_handle: HashMap<PathBuf, FileHandle>,
    /// Next available file handle
    next_handle: usize,
    /// Maximum number of open files
    max_open_files: usize,
}

struct FileEntry {
    file: File,
    path: PathBuf,
}

impl PagedFileManager {
    pub fn new() -> Self {
        Self::with_max_files(128)
    }

    pub fn with_max_files(max_open_files: usize) -> Self {
        Self {
            open_files: HashMap::new(),
            path_to_handle: HashMap::new(),
            next_handle: 0,
            max_open_files,
        }
    }

    /// Create a new file on disk
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if path.exists() {
            return Err(FileError::FileAlreadyExists(path.display().to_string()));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        File::create(path)?;
        Ok(())
    }

    /// Open an existing file; returns the existing handle if already open
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileHandle> {
        let path_ref = path.as_ref();
        let path = path_ref
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(path_ref.display().to_string()))?;

        if let Some(&handle) = self.path_to_handle.get(&path) {
            return Ok(handle);
        }

        if self.open_files.len() >= self.max_open_files {
            return Err(FileError::TooManyOpenFiles);
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let handle = FileHandle(self.next_handle);
        self.next_handle += 1;

        self.open_files.insert(
            handle,
            FileEntry {
                file,
                path: path.clone(),
            },
        );
        self.path_to_handle.insert(path, handle);

        Ok(handle)
    }

    /// Close a file
    pub fn close_file(&mut self, handle: FileHandle) -> FileResult<()> {
        let entry = self
            .open_files
            .remove(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        self.path_to_handle.remove(&entry.path);
        Ok(())
    }

    /// Remove (delete) a file, closing it first if open
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if let Ok(canonical_path) = path.canonicalize() {
            if let Some(&handle) = self.path_to_handle.get(&canonical_path) {
                self.close_file(handle)?;
            }
        }

        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Read one page into `buffer`. Pages past the end of the file read as
    /// all zeros.
    pub fn read_page(
        &mut self,
        handle: FileHandle,
        page_no: PageNo,
        buffer: &mut [u8],
    ) -> FileResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let entry = self
            .open_files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        let offset = (page_no * PAGE_SIZE) as u64;
        entry.file.seek(SeekFrom::Start(offset))?;

        let bytes_read = entry.file.read(buffer)?;
        if bytes_read < PAGE_SIZE {
            buffer[bytes_read..].fill(0);
        }

        Ok(())
    }

    /// Write one page, extending the file if the offset is past the end
    pub fn write_page(
        &mut self,
        handle: FileHandle,
        page_no: PageNo,
        buffer: &[u8],
    ) -> FileResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let entry = self
            .open_files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        let offset = (page_no * PAGE_SIZE) as u64;
        let required_size = offset + PAGE_SIZE as u64;

        let current_size = entry.file.metadata()?.len();
        if current_size < required_size {
            entry.file.set_len(required_size)?;
        }

        entry.file.seek(SeekFrom::Start(offset))?;
        entry.file.write_all(buffer)?;
        // No sync here; the OS batches writes until sync_file/sync_all.

        Ok(())
    }

    /// Reserve the next page number for `handle` and extend the file to
    /// cover it. The new page reads as zeros until written.
    pub fn allocate_page(&mut self, handle: FileHandle) -> FileResult<PageNo> {
        let entry = self
            .open_files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        let file_size = entry.file.metadata()?.len();
        let page_no = file_size.div_ceil(PAGE_SIZE as u64) as PageNo;
        entry.file.set_len(((page_no + 1) * PAGE_SIZE) as u64)?;
        Ok(page_no)
    }

    /// Number of pages currently in the file
    pub fn page_count(&mut self, handle: FileHandle) -> FileResult<usize> {
        let entry = self
            .open_files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        let file_size = entry.file.metadata()?.len();
        Ok(file_size.div_ceil(PAGE_SIZE as u64) as usize)
    }

    /// Flush OS buffers for one file
    pub fn sync_file(&mut self, handle: FileHandle) -> FileResult<()> {
        let entry = self
            .open_files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        entry.file.sync_data()?;
        Ok(())
    }

    /// Flush OS buffers for every open file
    pub fn sync_all(&mut self) -> FileResult<()> {
        for entry in self.open_files.values_mut() {
            entry.file.sync_data()?;
        }
        Ok(())
    }

    /// Check if a handle refers to an open file
    pub fn is_file_open(&self, handle: FileHandle) -> bool {
        self.open_files.contains_key(&handle)
    }
}

impl Default for PagedFileManager {
    fn default() -> Self {
        Self::new()
    }
}
