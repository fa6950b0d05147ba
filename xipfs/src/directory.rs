//! File Directory: the singly linked list of file records physically
//! embedded in NVM.
//!
//! Files are addressed by their offset from the mount base rather than a
//! raw pointer, both to dodge pointer-provenance concerns in a `no_std`
//! crate and to make the terminal self-loop ("file system full", encoded
//! as a record whose `next` points at itself) a cheap address equality
//! test.

use crate::config::ERASE_BYTE;
use crate::error::DirectoryError;
use crate::flash::FlashPrimitive;
use crate::page_buffer::PageBuffer;
use crate::record::{validate_path, FileHeader, HEADER_SIZE};
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

/// The File Directory: a view over a mount's NVM window as a chain of
/// [`FileHeader`] records.
pub struct Directory<NV, const PAGE_SIZE: usize> {
    pub flash: FlashPrimitive<NV, PAGE_SIZE>,
    pub page_buffer: PageBuffer<PAGE_SIZE>,
}

impl<NV, const PAGE_SIZE: usize> Directory<NV, PAGE_SIZE>
where
    NV: ReadNorFlash + NorFlash,
{
    pub fn new(flash: FlashPrimitive<NV, PAGE_SIZE>) -> Self {
        Self {
            flash,
            page_buffer: PageBuffer::new(),
        }
    }

    fn read_header_at(&mut self, addr: u32) -> Result<Option<FileHeader>, DirectoryError> {
        let mut buf = [0u8; HEADER_SIZE];
        self.page_buffer.read(&mut self.flash, addr, &mut buf)?;
        FileHeader::from_bytes(&buf)
    }

    fn write_header_at(&mut self, addr: u32, header: &FileHeader) -> Result<(), DirectoryError> {
        let mut buf = [0u8; HEADER_SIZE];
        header.to_bytes(&mut buf);
        self.page_buffer.write(&mut self.flash, addr, &buf)?;
        Ok(())
    }

    /// The record at `base`, or `None` if the mount has no files yet.
    pub fn head(&mut self) -> Result<Option<(u32, FileHeader)>, DirectoryError> {
        let base = self.flash.base();
        match self.read_header_at(base)? {
            Some(h) => Ok(Some((base, h))),
            None => Ok(None),
        }
    }

    /// The record following `(addr, header)`, or `None` if `header` is
    /// terminal or the chain ends there.
    pub fn next(&mut self, addr: u32, header: &FileHeader) -> Result<Option<(u32, FileHeader)>, DirectoryError> {
        if header.is_terminal(addr) {
            return Ok(None);
        }
        match self.read_header_at(header.next)? {
            Some(h) => Ok(Some((header.next, h))),
            None => Ok(None),
        }
    }

    /// Walks to the last record in the chain. `O(#files)`.
    pub fn tail(&mut self) -> Result<Option<(u32, FileHeader)>, DirectoryError> {
        let mut cur = match self.head()? {
            Some(c) => c,
            None => return Ok(None),
        };
        loop {
            match self.next(cur.0, &cur.1)? {
                Some(n) => cur = n,
                None => return Ok(Some(cur)),
            }
        }
    }

    /// Address at which a new file would begin.
    pub fn tail_next(&mut self) -> Result<u32, DirectoryError> {
        match self.tail()? {
            None => Ok(self.flash.base()),
            Some((addr, h)) => {
                if h.is_terminal(addr) {
                    Err(DirectoryError::Full)
                } else {
                    Ok(h.next)
                }
            }
        }
    }

    /// Number of whole pages not yet claimed by any file run.
    pub fn free_pages(&mut self) -> Result<u32, DirectoryError> {
        let used = match self.tail()? {
            None => 0,
            Some((addr, h)) => {
                let end = if h.is_terminal(addr) {
                    addr + h.reserved
                } else {
                    h.next
                };
                (end - self.flash.base()) / PAGE_SIZE as u32
            }
        };
        Ok(self.flash.page_count() - used)
    }

    /// Finds the record whose path exactly equals `path`.
    pub fn find(&mut self, path: &str) -> Result<Option<(u32, FileHeader)>, DirectoryError> {
        let mut cur = self.head()?;
        while let Some((addr, h)) = cur {
            if h.path.as_str() == path {
                return Ok(Some((addr, h)));
            }
            cur = self.next(addr, &h)?;
        }
        Ok(None)
    }

    /// Reserves and writes a new terminal record for `path`.
    ///
    /// Returns the address of the new record. Fails with
    /// [`DirectoryError::AlreadyExists`] if `path` is already present,
    /// [`DirectoryError::NoSpace`] if fewer free pages remain than
    /// requested, without mutating NVM in that case.
    pub fn new_file(
        &mut self,
        path: &str,
        requested_bytes: u32,
        exec: bool,
    ) -> Result<u32, DirectoryError> {
        validate_path(path)?;
        if self.find(path)?.is_some() {
            return Err(DirectoryError::AlreadyExists);
        }
        let page_size = PAGE_SIZE as u32;
        let reserved = core::cmp::max(page_size, div_ceil(requested_bytes, page_size) * page_size);
        let free = self.free_pages()?;
        let needed_pages = reserved / page_size;
        if needed_pages > free {
            return Err(DirectoryError::NoSpace);
        }

        let previous_tail = self.tail()?;
        let where_ = self.tail_next()?;
        let next_ptr = if needed_pages == free {
            where_
        } else {
            where_ + reserved
        };

        let header = FileHeader::new_terminal(next_ptr, reserved, path, exec)?;
        // If this isn't the first file, the previous tail stops being
        // terminal: patch its `next` before writing the new tail so the
        // list is never briefly missing its new member.
        if let Some((prev_addr, mut prev)) = previous_tail {
            if prev.is_terminal(prev_addr) {
                prev.next = where_;
                self.write_header_at(prev_addr, &prev)?;
            }
        }
        self.write_header_at(where_, &header)?;
        self.page_buffer.flush(&mut self.flash)?;
        Ok(where_)
    }

    /// Removes the file at `addr`, consolidating every successor down by
    /// its reserved span. Returns the displacement applied to every
    /// surviving record at or above `addr + removed.reserved`, which the
    /// caller (Driver) uses to translate any open handle's `file_ref`.
    pub fn remove(&mut self, addr: u32) -> Result<u32, DirectoryError> {
        let removed = self
            .read_header_at(addr)?
            .ok_or(DirectoryError::NotFound)?;
        self.page_buffer.flush(&mut self.flash)?;

        let displacement = removed.reserved;
        let was_terminal = removed.is_terminal(addr);
        let mut src = removed.next;
        let mut dst = addr;

        if was_terminal {
            // Sole/last file: just erase its pages, no shifting needed.
            self.erase_run(addr, removed.reserved)?;
            if let Some((prev_addr, mut prev)) = self.find_predecessor(addr)? {
                prev.next = prev_addr; // becomes new terminal
                self.write_header_at(prev_addr, &prev)?;
                self.page_buffer.flush(&mut self.flash)?;
            }
            return Ok(displacement);
        }

        loop {
            let s_header = self
                .read_header_at(src)?
                .ok_or(DirectoryError::CorruptLayout)?;
            let s_is_terminal = s_header.is_terminal(src);
            let s_reserved = s_header.reserved;

            let mut patched = s_header.clone();
            patched.next = if s_is_terminal { dst } else { src - displacement + s_reserved };

            // Step 1-2: write the patched header to `dst`. The destination
            // page is guaranteed erased: either it belonged to the removed
            // file (already erased above-ground truth holds for addr's run
            // which we erase as we go) or to an already-shifted source run.
            self.write_header_at(dst, &patched)?;
            self.page_buffer.flush(&mut self.flash)?;

            // Step 3: copy the remainder of S's first page.
            let first_page_remainder = PAGE_SIZE - HEADER_SIZE;
            if first_page_remainder > 0 {
                self.copy_region(src + HEADER_SIZE as u32, dst + HEADER_SIZE as u32, first_page_remainder as u32)?;
            }

            // Step 4: erase S's old first page.
            self.flash.erase_page(src)?;

            // Step 5: shift remaining pages of S.
            let page_count = s_reserved / PAGE_SIZE as u32;
            for p in 1..page_count {
                let s_page = src + p * PAGE_SIZE as u32;
                let d_page = dst + p * PAGE_SIZE as u32;
                if !self.page_is_erased(s_page)? {
                    self.copy_page(s_page, d_page)?;
                }
                self.flash.erase_page(s_page)?;
            }

            if s_is_terminal {
                break;
            }
            let next_src = s_header.next;
            dst += s_reserved;
            src = next_src;
        }

        Ok(displacement)
    }

    fn find_predecessor(&mut self, addr: u32) -> Result<Option<(u32, FileHeader)>, DirectoryError> {
        let mut cur = self.head()?;
        while let Some((a, h)) = cur.clone() {
            if !h.is_terminal(a) && h.next == addr {
                return Ok(Some((a, h)));
            }
            cur = self.next(a, &h)?;
        }
        Ok(None)
    }

    fn erase_run(&mut self, addr: u32, reserved: u32) -> Result<(), DirectoryError> {
        let pages = reserved / PAGE_SIZE as u32;
        for p in 0..pages {
            self.flash.erase_page(addr + p * PAGE_SIZE as u32)?;
        }
        Ok(())
    }

    fn page_is_erased(&mut self, page_addr: u32) -> Result<bool, DirectoryError> {
        let mut buf = [0u8; 64];
        let mut off = 0u32;
        while off < PAGE_SIZE as u32 {
            let n = core::cmp::min(buf.len() as u32, PAGE_SIZE as u32 - off) as usize;
            self.page_buffer.read(&mut self.flash, page_addr + off, &mut buf[..n])?;
            if buf[..n].iter().any(|&b| b != ERASE_BYTE) {
                return Ok(false);
            }
            off += n as u32;
        }
        Ok(true)
    }

    /// Copies `len` bytes directly through the Flash Primitive, bypassing
    /// the Page Buffer. The destination range is always virgin-erased
    /// (either it belongs to the removed file's reclaimed run, or to a
    /// source page erased earlier in the same consolidation pass), so a
    /// single program command suffices with no interleaved erase. Used
    /// only by [`Self::remove`]'s consolidation loop, where going through
    /// the Page Buffer one small chunk at a time would otherwise ping-pong
    /// it between the source and destination pages and erase the
    /// destination once per chunk instead of once per page.
    fn copy_region(&mut self, src: u32, dst: u32, len: u32) -> Result<(), DirectoryError> {
        self.page_buffer.invalidate();
        let mut buf = [0u8; PAGE_SIZE];
        let n = len as usize;
        self.flash.read(src, &mut buf[..n])?;
        self.flash.write(dst, &buf[..n])?;
        Ok(())
    }

    /// Relocates a whole page: reads `src_page` into RAM, erases
    /// `dst_page`, and programs it. Called only when `src_page` holds live
    /// data to preserve (see [`Self::page_is_erased`]).
    fn copy_page(&mut self, src_page: u32, dst_page: u32) -> Result<(), DirectoryError> {
        self.page_buffer.invalidate();
        let mut buf = [0u8; PAGE_SIZE];
        self.flash.read(src_page, &mut buf)?;
        self.flash.erase_page(dst_page)?;
        self.flash.write(dst_page, &buf)?;
        Ok(())
    }

    /// Rewrites every record whose path starts with `from_prefix` to
    /// start with `to_prefix` instead, truncating the result if it would
    /// exceed the path capacity. Returns the number of records touched.
    pub fn rename_all(&mut self, from_prefix: &str, to_prefix: &str) -> Result<usize, DirectoryError> {
        use crate::config::PATH_MAX;
        use heapless::String;

        let mut count = 0usize;
        let mut cur = self.head()?;
        while let Some((addr, mut h)) = cur {
            if h.path.as_str().starts_with(from_prefix) {
                let suffix = &h.path.as_str()[from_prefix.len()..];
                let mut new_path: String<PATH_MAX> = String::new();
                let _ = new_path.push_str(to_prefix);
                for c in suffix.chars() {
                    if new_path.push(c).is_err() {
                        break; // truncate, keep what fits
                    }
                }
                h.path = new_path;
                self.write_header_at(addr, &h)?;
                self.page_buffer.flush(&mut self.flash)?;
                count += 1;
            }
            cur = self.next(addr, &h)?;
        }
        Ok(count)
    }

    /// Erases every page belonging to the mount.
    pub fn format(&mut self) -> Result<(), DirectoryError> {
        self.page_buffer.invalidate();
        for p in 0..self.flash.page_count() {
            self.flash.erase_page(self.flash.base() + p * PAGE_SIZE as u32)?;
        }
        Ok(())
    }

    pub fn get_header(&mut self, addr: u32) -> Result<FileHeader, DirectoryError> {
        self.read_header_at(addr)?.ok_or(DirectoryError::NotFound)
    }

    pub fn put_header(&mut self, addr: u32, header: &FileHeader) -> Result<(), DirectoryError> {
        self.write_header_at(addr, header)?;
        self.page_buffer.flush(&mut self.flash)?;
        Ok(())
    }
}

fn div_ceil(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}
