use super::bitmap::Bitmap;
use super::error::RecordResult;
use super::file_handle::RecordFileHandle;
use super::page::FIRST_RECORD_PAGE;
use super::record::{Record, RecordId, SlotId};
use crate::file::PageNo;

/// Forward cursor over the occupied slots of a record file, in page-major,
/// slot-minor order.
///
/// Each page is pinned only for the bitmap probe; the pin is released before
/// the cursor moves on, so a long-lived scan never starves the pool.
pub struct RecordScan<'a> {
    file_handle: &'a RecordFileHandle,
    /// Page the cursor is probing
    page_no: PageNo,
    /// Next slot to probe on that page
    next_slot: SlotId,
    current: Option<RecordId>,
}

impl<'a> RecordScan<'a> {
    /// Position the cursor on the first occupied slot, or at end for an
    /// empty file.
    pub fn new(file_handle: &'a RecordFileHandle) -> RecordResult<Self> {
        let mut scan = Self {
            file_handle,
            page_no: FIRST_RECORD_PAGE,
            next_slot: 0,
            current: None,
        };
        scan.advance()?;
        Ok(scan)
    }

    /// Move to the next occupied slot, or to the end of the file
    pub fn advance(&mut self) -> RecordResult<()> {
        self.current = None;
        loop {
            let hdr = self.file_handle.header();
            if self.page_no >= hdr.num_pages {
                return Ok(());
            }
            let layout = hdr.layout();

            let found = {
                let guard = self.file_handle.fetch_record_page(self.page_no)?;
                let page = guard.read();
                Bitmap::next_set(
                    &page[layout.bitmap_range()],
                    self.next_slot,
                    layout.records_per_page,
                )
            };

            match found {
                Some(slot_no) => {
                    self.current = Some(RecordId::new(self.page_no, slot_no));
                    self.next_slot = slot_no + 1;
                    return Ok(());
                }
                None => {
                    self.page_no += 1;
                    self.next_slot = 0;
                }
            }
        }
    }

    /// Current position; None once the scan has passed the last record
    pub fn rid(&self) -> Option<RecordId> {
        self.current
    }

    pub fn is_end(&self) -> bool {
        self.current.is_none()
    }
}

impl Iterator for RecordScan<'_> {
    type Item = RecordResult<(RecordId, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        let rid = self.current?;
        let record = match self.file_handle.get_record(rid) {
            Ok(record) => record,
            Err(err) => return Some(Err(err)),
        };
        if let Err(err) = self.advance() {
            return Some(Err(err));
        }
        Some(Ok((rid, record)))
    }
}
