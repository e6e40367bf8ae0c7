use thiserror::Error;

use super::PageId;
use crate::file::FileError;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Page not resident: {0}")]
    NotResident(PageId),

    #[error("Page not pinned: {0}")]
    NotPinned(PageId),

    #[error("Page still pinned: {0}")]
    PagePinned(PageId),

    #[error("No free or evictable frame available")]
    PoolExhausted,
}

pub type BufferResult<T> = Result<T, BufferError>;
