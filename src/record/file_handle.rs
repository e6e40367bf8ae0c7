use std::sync::{Arc, Mutex};

use log::debug;

use super::bitmap::Bitmap;
use super::error::{RecordError, RecordResult};
use super::page::{FIRST_RECORD_PAGE, NO_FREE_PAGE, PageLayout, RecordPageHeader};
use super::record::{Record, RecordId};
use super::scan::RecordScan;
use crate::buffer::{BufferPoolManager, PageGuard, PageId};
use crate::file::{FileHandle, PAGE_SIZE, PageNo};

/// In-memory copy of the file header persisted on page 0.
///
/// Mutated in memory while the file is open; written back by
/// [`RecordFileHandle::close`].
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    pub record_size: usize,
    pub records_per_page: usize,
    /// Total pages in the file, the header page included
    pub num_pages: usize,
    /// Head of the chain of pages with at least one free slot
    pub first_free_page: PageNo,
}

impl FileHeader {
    pub const SIZE: usize = 16;

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut result = [0u8; Self::SIZE];
        result[0..4].copy_from_slice(&(self.record_size as u32).to_le_bytes());
        result[4..8].copy_from_slice(&(self.records_per_page as u32).to_le_bytes());
        result[8..12].copy_from_slice(&(self.num_pages as u32).to_le_bytes());
        result[12..16].copy_from_slice(&(self.first_free_page as u32).to_le_bytes());
        result
    }

    pub fn deserialize(buf: &[u8]) -> RecordResult<Self> {
        if buf.len() < Self::SIZE {
            return Err(RecordError::CorruptedHeader(format!(
                "header needs {} bytes, got {}",
                Self::SIZE,
                buf.len()
            )));
        }
        let record_size = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let records_per_page = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        let num_pages = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
        let first_free_page = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]) as PageNo;

        if record_size == 0 || records_per_page == 0 || num_pages == 0 {
            return Err(RecordError::CorruptedHeader(format!(
                "record_size={record_size}, records_per_page={records_per_page}, num_pages={num_pages}"
            )));
        }
        let layout = PageLayout {
            record_size,
            records_per_page,
        };
        if layout.slot_range(records_per_page - 1).end > PAGE_SIZE {
            return Err(RecordError::CorruptedHeader(
                "page layout exceeds page size".to_string(),
            ));
        }

        Ok(Self {
            record_size,
            records_per_page,
            num_pages,
            first_free_page,
        })
    }

    pub fn layout(&self) -> PageLayout {
        PageLayout {
            record_size: self.record_size,
            records_per_page: self.records_per_page,
        }
    }
}

/// Heap file of fixed-length records, bitmap-slotted within pages and chained
/// through a free-page list.
///
/// The header mutex is held across every mutating operation; that is what
/// keeps the free-page chain consistent when several threads insert and
/// delete at once. Page pins are scoped to each operation: a guard is taken,
/// the page fields the operation still needs are captured, and only then is
/// the guard released.
pub struct RecordFileHandle {
    pool: Arc<BufferPoolManager>,
    file: FileHandle,
    hdr: Mutex<FileHeader>,
}

impl RecordFileHandle {
    /// Create a record file for payloads of exactly `record_size` bytes and
    /// write its header to page 0.
    pub fn create(
        pool: Arc<BufferPoolManager>,
        path: &str,
        record_size: usize,
    ) -> RecordResult<Self> {
        let records_per_page = PageLayout::records_per_page_for(record_size);
        if records_per_page == 0 {
            return Err(RecordError::RecordTooLarge(record_size));
        }

        let file = {
            let mut disk = pool.disk();
            disk.create_file(path)?;
            let file = disk.open_file(path)?;
            // Page 0 is reserved for the file header
            disk.allocate_page(file)?;
            file
        };

        let hdr = FileHeader {
            record_size,
            records_per_page,
            num_pages: 1,
            first_free_page: NO_FREE_PAGE,
        };
        let handle = Self {
            pool,
            file,
            hdr: Mutex::new(hdr),
        };
        handle.write_header(&hdr)?;
        debug!("created record file {path} (record_size={record_size})");
        Ok(handle)
    }

    /// Open an existing record file, restoring its header from page 0
    pub fn open(pool: Arc<BufferPoolManager>, path: &str) -> RecordResult<Self> {
        let (file, hdr) = {
            let mut disk = pool.disk();
            let file = disk.open_file(path)?;
            let mut page = vec![0u8; PAGE_SIZE];
            disk.read_page(file, 0, &mut page)?;
            (file, FileHeader::deserialize(&page)?)
        };
        Ok(Self {
            pool,
            file,
            hdr: Mutex::new(hdr),
        })
    }

    /// Persist the in-memory header and every resident page of this file
    pub fn close(&self) -> RecordResult<()> {
        let hdr = *self.hdr.lock().unwrap();
        self.write_header(&hdr)?;
        self.pool.flush_all_pages(self.file)?;
        self.pool.disk().sync_file(self.file)?;
        Ok(())
    }

    /// Remove a record file from disk. Close the handle first; clean
    /// resident pages of a removed file are dropped on eviction without I/O.
    pub fn destroy(pool: &BufferPoolManager, path: &str) -> RecordResult<()> {
        pool.disk().remove_file(path)?;
        Ok(())
    }

    pub fn file(&self) -> FileHandle {
        self.file
    }

    pub fn record_size(&self) -> usize {
        self.hdr.lock().unwrap().record_size
    }

    pub fn records_per_page(&self) -> usize {
        self.hdr.lock().unwrap().records_per_page
    }

    /// Total pages in the file, the header page included
    pub fn num_pages(&self) -> usize {
        self.hdr.lock().unwrap().num_pages
    }

    /// Copy the record at `rid` out of its page.
    ///
    /// The slot's occupancy bit is deliberately not consulted: callers own
    /// rid validity, and a get on a vacated slot returns whatever bytes the
    /// slot last held.
    pub fn get_record(&self, rid: RecordId) -> RecordResult<Record> {
        let hdr = *self.hdr.lock().unwrap();
        Self::check_rid(&hdr, rid)?;
        let layout = hdr.layout();

        let guard = self.fetch_record_page(rid.page_no)?;
        let data = guard.read()[layout.slot_range(rid.slot_no)].to_vec();
        Ok(Record::new(data))
    }

    /// Insert `payload` into the first free slot of a page with space,
    /// returning the record's identity.
    pub fn insert_record(&self, payload: &[u8]) -> RecordResult<RecordId> {
        let mut hdr = self.hdr.lock().unwrap();
        if payload.len() != hdr.record_size {
            return Err(RecordError::RecordSizeMismatch {
                expected: hdr.record_size,
                actual: payload.len(),
            });
        }
        let layout = hdr.layout();

        let (mut guard, page_no) = self.free_slot_page(&mut hdr)?;
        let (slot_no, num_records, next_free) = {
            let page = guard.read();
            let page_hdr = RecordPageHeader::read_from(&page);
            let slot_no = Bitmap::first_unset(&page[layout.bitmap_range()], layout.records_per_page);
            (slot_no, page_hdr.num_records, page_hdr.next_free_page)
        };
        // Unreachable while the free-list invariant holds: a full page is
        // never reachable from first_free_page.
        let Some(slot_no) = slot_no else {
            return Err(RecordError::PageFull(page_no));
        };

        {
            let mut page = guard.write();
            page[layout.slot_range(slot_no)].copy_from_slice(payload);
            Bitmap::set(&mut page[layout.bitmap_range()], slot_no);
            RecordPageHeader {
                next_free_page: next_free,
                num_records: num_records + 1,
            }
            .write_to(&mut page);
        }

        // The page just filled up: unlink it, advancing the head to the link
        // captured under the pin above.
        if num_records + 1 == layout.records_per_page {
            hdr.first_free_page = next_free;
        }
        Ok(RecordId::new(page_no, slot_no))
    }

    /// Overwrite the slot at a caller-chosen rid without touching the
    /// occupancy bitmap. Meant for restore paths where occupancy is managed
    /// externally.
    pub fn insert_record_at(&self, rid: RecordId, payload: &[u8]) -> RecordResult<()> {
        let hdr = *self.hdr.lock().unwrap();
        Self::check_rid(&hdr, rid)?;
        if payload.len() != hdr.record_size {
            return Err(RecordError::RecordSizeMismatch {
                expected: hdr.record_size,
                actual: payload.len(),
            });
        }
        let layout = hdr.layout();

        let mut guard = self.fetch_record_page(rid.page_no)?;
        guard.write()[layout.slot_range(rid.slot_no)].copy_from_slice(payload);
        Ok(())
    }

    /// Delete the record at `rid`, re-linking its page onto the free-page
    /// chain when the page leaves the full state.
    pub fn delete_record(&self, rid: RecordId) -> RecordResult<()> {
        let mut hdr = self.hdr.lock().unwrap();
        Self::check_rid(&hdr, rid)?;
        let layout = hdr.layout();

        let mut guard = self.fetch_record_page(rid.page_no)?;
        if !Bitmap::is_set(&guard.read()[layout.bitmap_range()], rid.slot_no) {
            return Err(RecordError::RecordNotFound(rid.page_no, rid.slot_no));
        }

        let was_full = {
            let mut page = guard.write();
            let mut page_hdr = RecordPageHeader::read_from(&page);
            Bitmap::reset(&mut page[layout.bitmap_range()], rid.slot_no);
            let was_full = page_hdr.num_records == layout.records_per_page;
            page_hdr.num_records -= 1;
            if was_full {
                // Re-link decision is made while the page is still pinned
                page_hdr.next_free_page = hdr.first_free_page;
            }
            page_hdr.write_to(&mut page);
            was_full
        };
        drop(guard);

        if was_full {
            hdr.first_free_page = rid.page_no;
        }
        Ok(())
    }

    /// Overwrite the record at `rid` in place; bitmap and record count are
    /// untouched.
    pub fn update_record(&self, rid: RecordId, payload: &[u8]) -> RecordResult<()> {
        let hdr = *self.hdr.lock().unwrap();
        Self::check_rid(&hdr, rid)?;
        if payload.len() != hdr.record_size {
            return Err(RecordError::RecordSizeMismatch {
                expected: hdr.record_size,
                actual: payload.len(),
            });
        }
        let layout = hdr.layout();

        let mut guard = self.fetch_record_page(rid.page_no)?;
        if !Bitmap::is_set(&guard.read()[layout.bitmap_range()], rid.slot_no) {
            return Err(RecordError::RecordNotFound(rid.page_no, rid.slot_no));
        }
        guard.write()[layout.slot_range(rid.slot_no)].copy_from_slice(payload);
        Ok(())
    }

    /// Forward cursor over all records, positioned on the first one
    pub fn scan(&self) -> RecordResult<RecordScan<'_>> {
        RecordScan::new(self)
    }

    /// A pinned page with at least one free slot: the head of the free-page
    /// chain, or a freshly allocated page linked in at the head.
    fn free_slot_page(&self, hdr: &mut FileHeader) -> RecordResult<(PageGuard<'_>, PageNo)> {
        if hdr.first_free_page == NO_FREE_PAGE {
            let mut guard = self.pool.new_page(self.file)?;
            let page_no = guard.page_no();
            RecordPageHeader::empty().write_to(&mut guard.write());
            // The new page is empty, so it belongs on the free chain
            hdr.num_pages = page_no + 1;
            hdr.first_free_page = page_no;
            debug!("record file fd={} grew to page {page_no}", self.file.as_usize());
            Ok((guard, page_no))
        } else {
            let page_no = hdr.first_free_page;
            let guard = self.fetch_record_page(page_no)?;
            Ok((guard, page_no))
        }
    }

    fn check_rid(hdr: &FileHeader, rid: RecordId) -> RecordResult<()> {
        if rid.page_no < FIRST_RECORD_PAGE || rid.page_no >= hdr.num_pages {
            return Err(RecordError::InvalidPageNumber(rid.page_no));
        }
        if rid.slot_no >= hdr.records_per_page {
            return Err(RecordError::InvalidSlotNumber(rid.slot_no));
        }
        Ok(())
    }

    fn write_header(&self, hdr: &FileHeader) -> RecordResult<()> {
        let mut page = vec![0u8; PAGE_SIZE];
        page[..FileHeader::SIZE].copy_from_slice(&hdr.serialize());
        self.pool.disk().write_page(self.file, 0, &page)?;
        Ok(())
    }

    pub(crate) fn header(&self) -> FileHeader {
        *self.hdr.lock().unwrap()
    }

    pub(crate) fn fetch_record_page(&self, page_no: PageNo) -> RecordResult<PageGuard<'_>> {
        Ok(self.pool.fetch_page(PageId::new(self.file, page_no))?)
    }
}
