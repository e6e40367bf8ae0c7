use thiserror::Error;

use crate::buffer::BufferError;
use crate::file::FileError;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Invalid page number: {0}")]
    InvalidPageNumber(usize),

    #[error("Invalid slot number: {0}")]
    InvalidSlotNumber(usize),

    #[error("Page full: page_no={0}")]
    PageFull(usize),

    #[error("No record at page_no={0}, slot_no={1}")]
    RecordNotFound(usize, usize),

    #[error("Record size mismatch: expected {expected}, got {actual}")]
    RecordSizeMismatch { expected: usize, actual: usize },

    #[error("Record size {0} does not fit in a page")]
    RecordTooLarge(usize),

    #[error("Corrupted file header: {0}")]
    CorruptedHeader(String),

    #[error("Record file not open: {0}")]
    FileNotOpen(String),
}

pub type RecordResult<T> = Result<T, RecordError>;
