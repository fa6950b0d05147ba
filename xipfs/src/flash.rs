//! Flash Primitive Layer: the thin, bounds-checked wrapper around a
//! caller-supplied [`NorFlash`] that every higher layer goes through.
//!
//! Every erase and program command is paired with a read-back verify
//! rather than trusted blind, the way a hardware erase command and its
//! completion check are paired in other `embedded-storage` backends.
//! This layer owns address-range and alignment checking so nothing above
//! it ever issues an out-of-range or misaligned command to the
//! underlying device.

use crate::config::ERASE_BYTE;
use crate::error::FlashError;
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

/// Bounds-checked accessor over a region of NVM belonging to one mount.
///
/// `PAGE_SIZE` is a const generic because it varies by NOR part; `base`
/// and `page_count` come from the caller's [`crate::config::MountConfig`]
/// since NVM placement is a link-time/board fact the driver cannot probe.
pub struct FlashPrimitive<NV, const PAGE_SIZE: usize> {
    nv: NV,
    base: u32,
    page_count: u32,
}

impl<NV, const PAGE_SIZE: usize> FlashPrimitive<NV, PAGE_SIZE>
where
    NV: ReadNorFlash + NorFlash,
{
    pub fn new(nv: NV, base: u32, page_count: u32) -> Self {
        Self {
            nv,
            base,
            page_count,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn capacity(&self) -> u32 {
        self.page_count * PAGE_SIZE as u32
    }

    /// Address one past the last byte belonging to this mount.
    pub fn end(&self) -> u32 {
        self.base + self.capacity()
    }

    /// True if `[addr, addr+len)` lies entirely within this mount's
    /// window.
    pub fn in_range(&self, addr: u32, len: u32) -> bool {
        addr >= self.base && len <= self.end().saturating_sub(addr) && addr.checked_add(len).is_some()
    }

    /// True if `addr` is aligned to a `PAGE_SIZE` boundary relative to
    /// `base`.
    pub fn page_aligned(&self, addr: u32) -> bool {
        (addr - self.base) % PAGE_SIZE as u32 == 0
    }

    /// Index of the page containing `addr`.
    pub fn page_index(&self, addr: u32) -> u32 {
        (addr - self.base) / PAGE_SIZE as u32
    }

    /// Address of the first byte of the page containing `addr`.
    pub fn page_start(&self, addr: u32) -> u32 {
        self.base + self.page_index(addr) * PAGE_SIZE as u32
    }

    /// True if `[addr, addr+len)` crosses a page boundary.
    pub fn crosses_page(&self, addr: u32, len: u32) -> bool {
        if len == 0 {
            return false;
        }
        self.page_index(addr) != self.page_index(addr + len - 1)
    }

    /// Reads `buf.len()` bytes starting at `addr` into `buf`.
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        if !self.in_range(addr, buf.len() as u32) {
            return Err(FlashError::OutOfRange);
        }
        self.nv
            .read(addr, buf)
            .map_err(|_| FlashError::Hardware)
    }

    /// Erases the single page containing `addr`, then verifies every byte
    /// reads back as [`ERASE_BYTE`].
    pub fn erase_page(&mut self, addr: u32) -> Result<(), FlashError> {
        if !self.in_range(addr, PAGE_SIZE as u32) {
            return Err(FlashError::OutOfRange);
        }
        if !self.page_aligned(addr) {
            return Err(FlashError::Unaligned);
        }
        let start = self.page_start(addr);
        let end = start + PAGE_SIZE as u32;
        self.nv
            .erase(start, end)
            .map_err(|_| FlashError::EraseFailed)?;

        let mut check = [0u8; 64];
        let mut off = start;
        while off < end {
            let n = core::cmp::min(check.len() as u32, end - off) as usize;
            self.nv
                .read(off, &mut check[..n])
                .map_err(|_| FlashError::Hardware)?;
            if check[..n].iter().any(|&b| b != ERASE_BYTE) {
                return Err(FlashError::EraseFailed);
            }
            off += n as u32;
        }
        Ok(())
    }

    /// Programs `data` at `addr`, verifying each byte read back matches.
    ///
    /// `[addr, addr+data.len())` must not cross a page boundary: a
    /// program command spanning two pages would straddle two independent
    /// erase units, and a power loss mid-write could leave one half
    /// programmed and the other still erased with no way to tell which
    /// page needs re-erasing.
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        if data.is_empty() {
            return Ok(());
        }
        if !self.in_range(addr, data.len() as u32) {
            return Err(FlashError::OutOfRange);
        }
        if self.crosses_page(addr, data.len() as u32) {
            return Err(FlashError::PageOverflow);
        }
        self.nv.write(addr, data).map_err(|_| FlashError::Hardware)?;

        let mut check = [0u8; 64];
        let mut off = 0usize;
        while off < data.len() {
            let n = core::cmp::min(check.len(), data.len() - off);
            self.nv
                .read(addr + off as u32, &mut check[..n])
                .map_err(|_| FlashError::Hardware)?;
            if check[..n] != data[off..off + n] {
                return Err(FlashError::VerifyFailed);
            }
            off += n;
        }
        Ok(())
    }
}
