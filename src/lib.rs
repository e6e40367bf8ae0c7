pub mod buffer;
pub mod file;
pub mod record;

pub use buffer::{
    BUFFER_POOL_SIZE, BufferError, BufferPoolManager, BufferResult, FrameId, LruReplacer,
    PageGuard, PageId,
};
pub use file::{FileError, FileHandle, FileResult, PAGE_SIZE, PageNo, PagedFileManager};
pub use record::{
    Bitmap, FIRST_RECORD_PAGE, FileHeader, NO_FREE_PAGE, PageLayout, Record, RecordError,
    RecordFileHandle, RecordId, RecordManager, RecordPageHeader, RecordResult, RecordScan, SlotId,
};
