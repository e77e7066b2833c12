use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::arena::{PageArena, PageSink};
use crate::error::MemResult;

struct PageTable {
    /// Logical page -> physical page.
    pages: Vec<usize>,
    /// Dirty since last flush, one per logical page.
    stale: Vec<AtomicBool>,
}

impl PageTable {
    fn push(&mut self, physical: usize) {
        self.pages.push(physical);
        self.stale.push(AtomicBool::new(false));
    }
}

/// A resizable logical byte space stitched from physical pages of a shared
/// [`PageArena`].
///
/// `logical_to_physical(addr) = table[addr / page] * page + addr % page`.
/// Every write marks its page stale; [`flush_stale_pages`](Self::flush_stale_pages)
/// hands only those pages to the sink. Values that straddle a page boundary
/// are split into two same-page copies.
///
/// Out-of-range addresses panic like slice indexing does.
pub struct PagedByteBuffer {
    arena: Arc<PageArena>,
    name: String,
    table: RwLock<PageTable>,
}

impl std::fmt::Debug for PagedByteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedByteBuffer")
            .field("name", &self.name)
            .field("pages", &self.table.read().pages)
            .finish()
    }
}

impl PagedByteBuffer {
    pub(crate) fn from_pages(arena: Arc<PageArena>, pages: Vec<usize>, name: String) -> Self {
        let mut table = PageTable {
            pages: Vec::with_capacity(pages.len()),
            stale: Vec::with_capacity(pages.len()),
        };
        for page in pages {
            table.push(page);
        }
        tracing::debug!(buffer = %name, pages = table.pages.len(), "paged buffer created");
        Self {
            arena,
            name,
            table: RwLock::new(table),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arena(&self) -> &Arc<PageArena> {
        &self.arena
    }

    pub fn page_size(&self) -> usize {
        self.arena.page_size()
    }

    pub fn size_in_pages(&self) -> usize {
        self.table.read().pages.len()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.size_in_pages() * self.page_size()
    }

    pub fn logical_page_to_physical(&self, logical_page: usize) -> usize {
        self.table.read().pages[logical_page]
    }

    /// Physical byte offset of logical address `addr` in the arena.
    pub fn logical_to_physical(&self, addr: usize) -> usize {
        let page = self.page_size();
        self.table.read().pages[addr / page] * page + addr % page
    }

    /// Snapshot of the page table.
    pub fn physical_pages(&self) -> Vec<usize> {
        self.table.read().pages.clone()
    }

    /// Grow or shrink to hold `new_size_bytes`, in whole pages.
    ///
    /// Growth appends freshly popped physical pages; shrinking frees trailing
    /// pages back to the arena. Surviving pages keep their contents and
    /// stale flags. A failed growth leaves the table untouched.
    pub fn resize(&self, new_size_bytes: usize) -> MemResult<()> {
        let wanted = self.arena.pages_for(new_size_bytes);
        let mut table = self.table.write();
        let current = table.pages.len();
        if wanted > current {
            let fresh = self.arena.pop_pages(wanted - current)?;
            for page in fresh {
                table.push(page);
            }
        } else if wanted < current {
            let released: Vec<usize> = table.pages.drain(wanted..).collect();
            table.stale.truncate(wanted);
            self.arena.free_pages(released);
        } else {
            return Ok(());
        }
        tracing::debug!(buffer = %self.name, from = current, to = wanted, "paged buffer resized");
        Ok(())
    }

    /// Copy `data` to logical address `addr`, splitting at page boundaries.
    pub fn put_bytes(&self, addr: usize, data: &[u8]) {
        let page = self.page_size();
        let table = self.table.read();
        let mut addr = addr;
        let mut rest = data;
        while !rest.is_empty() {
            let (logical, within) = (addr / page, addr % page);
            let n = rest.len().min(page - within);
            self.arena.write(table.pages[logical] * page + within, &rest[..n]);
            table.stale[logical].store(true, Ordering::Release);
            addr += n;
            rest = &rest[n..];
        }
    }

    /// Fill `out` from logical address `addr`, splitting at page boundaries.
    pub fn read_bytes(&self, addr: usize, out: &mut [u8]) {
        let page = self.page_size();
        let table = self.table.read();
        let mut addr = addr;
        let mut filled = 0;
        while filled < out.len() {
            let (logical, within) = (addr / page, addr % page);
            let n = (out.len() - filled).min(page - within);
            self.arena
                .read(table.pages[logical] * page + within, &mut out[filled..filled + n]);
            addr += n;
            filled += n;
        }
    }

    pub fn put_u8(&self, addr: usize, value: u8) {
        self.put_bytes(addr, &[value]);
    }

    pub fn put_i16(&self, addr: usize, value: i16) {
        self.put_bytes(addr, &value.to_le_bytes());
    }

    pub fn put_i32(&self, addr: usize, value: i32) {
        self.put_bytes(addr, &value.to_le_bytes());
    }

    pub fn put_f32(&self, addr: usize, value: f32) {
        self.put_bytes(addr, &value.to_le_bytes());
    }

    pub fn get_u8(&self, addr: usize) -> u8 {
        let mut b = [0u8; 1];
        self.read_bytes(addr, &mut b);
        b[0]
    }

    pub fn get_i16(&self, addr: usize) -> i16 {
        let mut b = [0u8; 2];
        self.read_bytes(addr, &mut b);
        i16::from_le_bytes(b)
    }

    pub fn get_i32(&self, addr: usize) -> i32 {
        let mut b = [0u8; 4];
        self.read_bytes(addr, &mut b);
        i32::from_le_bytes(b)
    }

    pub fn get_f32(&self, addr: usize) -> f32 {
        let mut b = [0u8; 4];
        self.read_bytes(addr, &mut b);
        f32::from_le_bytes(b)
    }

    /// Flag the page holding `addr` dirty without writing.
    pub fn mark_page_stale(&self, addr: usize) {
        let table = self.table.read();
        table.stale[addr / self.page_size()].store(true, Ordering::Release);
    }

    pub fn stale_page_count(&self) -> usize {
        let table = self.table.read();
        table.stale.iter().filter(|s| s.load(Ordering::Acquire)).count()
    }

    /// Upload every page dirtied since the last flush and clear its flag.
    /// Returns `(uploaded, failed)`. Failed pages are logged and not retried.
    pub fn flush_stale_pages(&self, sink: &mut dyn PageSink) -> (usize, usize) {
        let table = self.table.read();
        let mut uploaded = 0;
        let mut failed = 0;
        for (logical, stale) in table.stale.iter().enumerate() {
            if !stale.swap(false, Ordering::AcqRel) {
                continue;
            }
            match self.arena.upload_page(table.pages[logical], sink) {
                Ok(()) => uploaded += 1,
                Err(err) => {
                    failed += 1;
                    tracing::warn!(buffer = %self.name, logical, %err, "stale page upload failed");
                }
            }
        }
        (uploaded, failed)
    }
}

impl Drop for PagedByteBuffer {
    fn drop(&mut self) {
        let table = self.table.get_mut();
        let released = std::mem::take(&mut table.pages);
        tracing::trace!(buffer = %self.name, pages = released.len(), "paged buffer released");
        self.arena.free_pages(released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::tests::{RecordingSink, small_arena};
    use std::collections::HashSet;

    #[test]
    fn sizes_round_up_to_whole_pages() {
        let arena = small_arena(16, 16);
        assert_eq!(arena.create_buffer(0, "z").unwrap().size_in_pages(), 1);
        assert_eq!(arena.create_buffer(16, "a").unwrap().size_in_pages(), 1);
        assert_eq!(arena.create_buffer(17, "b").unwrap().size_in_pages(), 2);
    }

    #[test]
    fn address_translation_follows_page_table() {
        let arena = small_arena(16, 16);
        let _spacer = arena.create_buffer(16 * 3, "spacer").unwrap();
        let buf = arena.create_buffer(16 * 2, "buf").unwrap();
        let pages = buf.physical_pages();
        assert_eq!(buf.logical_to_physical(5), pages[0] * 16 + 5);
        assert_eq!(buf.logical_to_physical(16 + 9), pages[1] * 16 + 9);
    }

    #[test]
    fn values_straddling_a_page_round_trip() {
        let arena = small_arena(16, 16);
        let _spacer = arena.create_buffer(16, "spacer").unwrap();
        let buf = arena.create_buffer(64, "buf").unwrap();

        buf.put_i32(14, -123_456_789);
        assert_eq!(buf.get_i32(14), -123_456_789);
        buf.put_f32(31, 2.5);
        assert_eq!(buf.get_f32(31), 2.5);
        buf.put_i16(47, -2);
        assert_eq!(buf.get_i16(47), -2);

        let data: Vec<u8> = (0..40).collect();
        buf.put_bytes(10, &data);
        let mut back = vec![0u8; 40];
        buf.read_bytes(10, &mut back);
        assert_eq!(back, data);
        assert_eq!(buf.get_u8(49), 39);
    }

    #[test]
    fn flush_uploads_exactly_the_touched_pages() {
        let arena = small_arena(16, 16);
        let buf = arena.create_buffer(16 * 4, "buf").unwrap();
        buf.put_u8(1, 1);
        buf.put_u8(2, 2);
        buf.put_i32(16 * 2 + 3, 7);
        assert_eq!(buf.stale_page_count(), 2);

        let mut sink = RecordingSink::default();
        assert_eq!(buf.flush_stale_pages(&mut sink), (2, 0));
        let mut expected = vec![buf.logical_page_to_physical(0), buf.logical_page_to_physical(2)];
        expected.sort();
        sink.pages.sort();
        assert_eq!(sink.pages, expected);
        assert_eq!(buf.stale_page_count(), 0);

        sink.pages.clear();
        assert_eq!(buf.flush_stale_pages(&mut sink), (0, 0));
        assert!(sink.pages.is_empty());
    }

    #[test]
    fn straddling_write_dirties_both_pages() {
        let arena = small_arena(16, 16);
        let buf = arena.create_buffer(32, "buf").unwrap();
        buf.put_i32(14, 1);
        assert_eq!(buf.stale_page_count(), 2);
    }

    #[test]
    fn failed_uploads_are_counted_and_cleared() {
        let arena = small_arena(16, 16);
        let buf = arena.create_buffer(32, "buf").unwrap();
        buf.put_u8(0, 9);
        let mut sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        assert_eq!(buf.flush_stale_pages(&mut sink), (0, 1));
        assert_eq!(buf.stale_page_count(), 0);
    }

    #[test]
    fn resize_leaves_no_dangling_entries() {
        let arena = small_arena(16, 32);
        let buf = arena.create_buffer(16 * 2, "buf").unwrap();
        buf.put_i32(4, 42);

        buf.resize(16 * 6).unwrap();
        assert_eq!(buf.size_in_pages(), 6);
        assert_eq!(arena.pages_in_use(), 6);
        assert_eq!(buf.get_i32(4), 42);

        buf.resize(16 * 3 - 1).unwrap();
        assert_eq!(buf.size_in_pages(), 3);
        assert_eq!(arena.pages_in_use(), 3);

        // Released pages go to the next buffer; no page is owned twice.
        let other = arena.create_buffer(16 * 3, "other").unwrap();
        let mine: HashSet<usize> = buf.physical_pages().into_iter().collect();
        let theirs: HashSet<usize> = other.physical_pages().into_iter().collect();
        assert!(mine.is_disjoint(&theirs));
        for addr in (0..buf.size_in_bytes()).step_by(5) {
            let page = buf.logical_to_physical(addr) / 16;
            assert!(mine.contains(&page));
        }
        assert_eq!(buf.get_i32(4), 42);
    }

    #[test]
    fn resize_to_same_page_count_is_a_no_op() {
        let arena = small_arena(16, 8);
        let buf = arena.create_buffer(20, "buf").unwrap();
        let before = buf.physical_pages();
        buf.resize(32).unwrap();
        assert_eq!(buf.physical_pages(), before);
    }

    #[test]
    fn failed_growth_keeps_the_table() {
        let arena = small_arena(16, 4);
        let buf = arena.create_buffer(16 * 2, "buf").unwrap();
        assert!(buf.resize(16 * 5).is_err());
        assert_eq!(buf.size_in_pages(), 2);
        assert_eq!(arena.pages_in_use(), 2);
    }
}
