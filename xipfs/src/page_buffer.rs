//! Page Buffer: the single-page RAM staging area every header and data
//! mutation goes through.
//!
//! NOR flash can only clear bits within a page between erases, so
//! updating an already-programmed byte in place requires read the whole
//! page into RAM, patch the byte, erase the page, then reprogram it. This
//! component owns that read-modify-write-then-erase-then-program cycle
//! and keeps at most one page "dirty" in RAM at a time, flushing it
//! automatically whenever a caller asks for a different page.

use crate::error::FlashError;
use crate::flash::FlashPrimitive;
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Empty,
    /// Buffer mirrors page at `addr` and has been modified since it was
    /// loaded.
    Loaded { addr: u32, dirty: bool },
}

/// RAM staging buffer for exactly one `PAGE_SIZE`-byte NOR page.
pub struct PageBuffer<const PAGE_SIZE: usize> {
    buf: [u8; PAGE_SIZE],
    state: State,
}

impl<const PAGE_SIZE: usize> PageBuffer<PAGE_SIZE> {
    pub fn new() -> Self {
        Self {
            buf: [0u8; PAGE_SIZE],
            state: State::Empty,
        }
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self.state, State::Loaded { dirty: true, .. })
    }

    fn ensure_loaded<NV>(
        &mut self,
        flash: &mut FlashPrimitive<NV, PAGE_SIZE>,
        page_addr: u32,
    ) -> Result<(), FlashError>
    where
        NV: ReadNorFlash + NorFlash,
    {
        match self.state {
            State::Loaded { addr, .. } if addr == page_addr => Ok(()),
            State::Loaded { addr, dirty } => {
                if dirty {
                    self.flush_to(flash, addr)?;
                }
                flash.read(page_addr, &mut self.buf)?;
                self.state = State::Loaded {
                    addr: page_addr,
                    dirty: false,
                };
                Ok(())
            }
            State::Empty => {
                flash.read(page_addr, &mut self.buf)?;
                self.state = State::Loaded {
                    addr: page_addr,
                    dirty: false,
                };
                Ok(())
            }
        }
    }

    /// Reads `out.len()` bytes starting at `addr`, loading the owning
    /// page first if it isn't already buffered.
    pub fn read<NV>(
        &mut self,
        flash: &mut FlashPrimitive<NV, PAGE_SIZE>,
        addr: u32,
        out: &mut [u8],
    ) -> Result<(), FlashError>
    where
        NV: ReadNorFlash + NorFlash,
    {
        if flash.crosses_page(addr, out.len() as u32) {
            return Err(FlashError::PageOverflow);
        }
        let page_addr = flash.page_start(addr);
        self.ensure_loaded(flash, page_addr)?;
        let off = (addr - page_addr) as usize;
        out.copy_from_slice(&self.buf[off..off + out.len()]);
        Ok(())
    }

    /// Patches `data` into the buffered copy of the page containing
    /// `addr`, marking it dirty. Does not touch flash until [`Self::flush`]
    /// is called (explicitly, or implicitly by loading a different page).
    pub fn write<NV>(
        &mut self,
        flash: &mut FlashPrimitive<NV, PAGE_SIZE>,
        addr: u32,
        data: &[u8],
    ) -> Result<(), FlashError>
    where
        NV: ReadNorFlash + NorFlash,
    {
        if flash.crosses_page(addr, data.len() as u32) {
            return Err(FlashError::PageOverflow);
        }
        let page_addr = flash.page_start(addr);
        self.ensure_loaded(flash, page_addr)?;
        let off = (addr - page_addr) as usize;
        self.buf[off..off + data.len()].copy_from_slice(data);
        self.state = State::Loaded {
            addr: page_addr,
            dirty: true,
        };
        Ok(())
    }

    fn flush_to<NV>(
        &mut self,
        flash: &mut FlashPrimitive<NV, PAGE_SIZE>,
        page_addr: u32,
    ) -> Result<(), FlashError>
    where
        NV: ReadNorFlash + NorFlash,
    {
        flash.erase_page(page_addr)?;
        flash.write(page_addr, &self.buf)?;
        Ok(())
    }

    /// Writes the currently buffered page back to flash if dirty.
    /// Idempotent: a clean or empty buffer is a no-op.
    pub fn flush<NV>(&mut self, flash: &mut FlashPrimitive<NV, PAGE_SIZE>) -> Result<(), FlashError>
    where
        NV: ReadNorFlash + NorFlash,
    {
        if let State::Loaded { addr, dirty: true } = self.state {
            self.flush_to(flash, addr)?;
            self.state = State::Loaded { addr, dirty: false };
        }
        Ok(())
    }

    /// Discards the buffer without flushing. Used right before an
    /// operation that erases the buffered page out from under the cache
    /// through another path (e.g. consolidation shifting a page the
    /// buffer currently mirrors).
    pub fn invalidate(&mut self) {
        self.state = State::Empty;
    }
}

impl<const PAGE_SIZE: usize> Default for PageBuffer<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}
