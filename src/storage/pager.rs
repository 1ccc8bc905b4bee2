//! Pager: fixed-size page I/O over a single file.
//!
//! The pager owns the file handle and the page-count counter, reads and
//! writes whole pages at `id * PAGE_SIZE`, and hands out page ids (from
//! the in-memory free list first, else by extending the file). It never
//! recovers from I/O errors; they all surface to the caller.
//!
//! The pager performs no locking of its own beyond what `&self` methods
//! require; the database façade's reader-writer lock serializes writers
//! against readers.

use crate::error::{Result, StoreError};
use crate::page::PageBuf;
use crate::storage::{FileIo, FreeList, StdFileIo};
use crate::types::{PageId, PAGE_SIZE};
use parking_lot::RwLock;
use std::path::Path;

struct PagerState {
    num_pages: u32,
    free: FreeList,
}

/// Page-granular file access
pub struct Pager {
    io: Box<dyn FileIo>,
    state: RwLock<PagerState>,
}

impl Pager {
    /// Open or create the database file at the given path
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_io(Box::new(StdFileIo::open(path)?))
    }

    /// Create a pager over a caller-supplied I/O implementation
    pub fn with_io(io: Box<dyn FileIo>) -> Result<Self> {
        let num_pages = (io.len()? / PAGE_SIZE as u64) as u32;
        Ok(Self {
            io,
            state: RwLock::new(PagerState {
                num_pages,
                free: FreeList::new(),
            }),
        })
    }

    /// Read exactly one page at the given id
    pub fn read(&self, page_id: PageId) -> Result<PageBuf> {
        let mut buf = PageBuf::new();
        self.io.read_at(page_id.file_offset(PAGE_SIZE), &mut buf)?;
        Ok(buf)
    }

    /// Write up to one page of data at the given id
    pub fn write(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() > PAGE_SIZE {
            return Err(StoreError::invalid_operation(format!(
                "page data must be at most {} bytes, got {}",
                PAGE_SIZE,
                data.len()
            )));
        }

        self.io.write_at(page_id.file_offset(PAGE_SIZE), data)?;

        let mut state = self.state.write();
        if page_id.value() >= state.num_pages {
            state.num_pages = page_id.value() + 1;
        }

        Ok(())
    }

    /// Flush the OS cache
    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Hand out a page id: from the free list if possible, else the next
    /// id past the end of the file
    pub fn allocate(&self) -> PageId {
        let mut state = self.state.write();
        if let Some(page_id) = state.free.pop() {
            return page_id;
        }

        let page_id = PageId::new(state.num_pages);
        state.num_pages += 1;
        page_id
    }

    /// Return a page id to the free list for reuse
    pub fn release(&self, page_id: PageId) {
        self.state.write().free.push(page_id);
    }

    /// Total number of pages the file is known to hold
    pub fn page_count(&self) -> u32 {
        self.state.read().num_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fresh_file_has_no_pages() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = Pager::open(&dir.path().join("test.db"))?;
        assert_eq!(pager.page_count(), 0);
        Ok(())
    }

    #[test]
    fn test_write_extends_page_count() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = Pager::open(&dir.path().join("test.db"))?;

        let mut page = PageBuf::new();
        page[0..5].copy_from_slice(b"hello");
        pager.write(PageId::new(3), &page)?;
        assert_eq!(pager.page_count(), 4);

        let read_back = pager.read(PageId::new(3))?;
        assert_eq!(&read_back[0..5], b"hello");

        Ok(())
    }

    #[test]
    fn test_oversized_write_is_rejected() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = Pager::open(&dir.path().join("test.db"))?;

        let data = vec![0u8; PAGE_SIZE + 1];
        assert!(matches!(
            pager.write(PageId::new(0), &data),
            Err(StoreError::InvalidOperation(_))
        ));

        Ok(())
    }

    #[test]
    fn test_short_read_is_an_io_error() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = Pager::open(&dir.path().join("test.db"))?;

        assert!(matches!(
            pager.read(PageId::new(9)),
            Err(StoreError::Io(_))
        ));

        Ok(())
    }

    #[test]
    fn test_allocate_and_release() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = Pager::open(&dir.path().join("test.db"))?;
        pager.write(PageId::new(0), &PageBuf::new())?;

        let p1 = pager.allocate();
        let p2 = pager.allocate();
        let p3 = pager.allocate();
        assert_eq!(p1, PageId::new(1));
        assert_eq!(p2, PageId::new(2));
        assert_eq!(p3, PageId::new(3));

        pager.release(p2);
        assert_eq!(pager.allocate(), p2);
        assert_eq!(pager.allocate(), PageId::new(4));

        Ok(())
    }

    #[test]
    fn test_reopen_recovers_page_count() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let pager = Pager::open(&path)?;
            pager.write(PageId::new(5), &PageBuf::new())?;
            pager.sync()?;
        }

        let pager = Pager::open(&path)?;
        assert_eq!(pager.page_count(), 6);

        Ok(())
    }
}
