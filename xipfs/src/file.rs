//! File Object: per-file operations layered on top of the [`Directory`]
//! chain walk — size history, bounds-checked byte access, and rename.

use crate::config::{PATH_MAX, SIZE_SLOTS};
use crate::directory::Directory;
use crate::error::FileError;
use crate::record::{validate_path, FileHeader, HEADER_SIZE};
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use heapless::String;

/// Largest writable offset within a file's payload, i.e. `reserved -
/// HEADER_SIZE`.
pub fn max_pos(header: &FileHeader) -> u32 {
    header.reserved - HEADER_SIZE as u32
}

/// Current logical size: the newest non-erased `size[]` slot, or 0.
pub fn get_size(header: &FileHeader) -> u32 {
    header.current_size()
}

/// Appends `new_size` to the header's size history, flushing through the
/// Page Buffer.
///
/// The 86-slot history avoids re-erasing the header on every size change;
/// once exhausted this re-erases the header page and starts a fresh
/// one-entry history rather than wrapping modulo `SIZE_SLOTS`, which
/// would silently discard the true size.
pub fn set_size<NV, const PAGE_SIZE: usize>(
    dir: &mut Directory<NV, PAGE_SIZE>,
    addr: u32,
    header: &mut FileHeader,
    new_size: u32,
) -> Result<(), FileError>
where
    NV: ReadNorFlash + NorFlash,
{
    if header.size_count >= SIZE_SLOTS {
        let sole = new_size;
        let path = header.path.clone();
        let exec = header.is_exec();
        let next = header.next;
        let reserved = header.reserved;
        let mut fresh = FileHeader::new_terminal(next, reserved, path.as_str(), exec)
            .map_err(FileError::from)?;
        fresh.next = next;
        fresh.sizes[0] = sole;
        fresh.size_count = 1;
        dir.put_header(addr, &fresh).map_err(FileError::from)?;
        *header = fresh;
        return Ok(());
    }
    header.push_size(new_size).map_err(FileError::from)?;
    dir.put_header(addr, header).map_err(FileError::from)?;
    Ok(())
}

/// Reads one byte at payload offset `pos`.
pub fn read_byte<NV, const PAGE_SIZE: usize>(
    dir: &mut Directory<NV, PAGE_SIZE>,
    addr: u32,
    header: &FileHeader,
    pos: u32,
) -> Result<u8, FileError>
where
    NV: ReadNorFlash + NorFlash,
{
    if pos >= max_pos(header) {
        return Err(FileError::OutOfBounds);
    }
    let mut buf = [0u8; 1];
    dir.page_buffer
        .read(&mut dir.flash, addr + HEADER_SIZE as u32 + pos, &mut buf)
        .map_err(FileError::from)?;
    Ok(buf[0])
}

/// Reads up to `out.len()` bytes starting at payload offset `pos`,
/// stopping early at `max_pos`. Returns the number of bytes read.
pub fn read<NV, const PAGE_SIZE: usize>(
    dir: &mut Directory<NV, PAGE_SIZE>,
    addr: u32,
    header: &FileHeader,
    pos: u32,
    out: &mut [u8],
) -> Result<usize, FileError>
where
    NV: ReadNorFlash + NorFlash,
{
    let limit = max_pos(header);
    if pos >= limit {
        return Ok(0);
    }
    let n = core::cmp::min(out.len() as u32, limit - pos) as usize;
    for (i, slot) in out[..n].iter_mut().enumerate() {
        *slot = read_byte(dir, addr, header, pos + i as u32)?;
    }
    Ok(n)
}

/// Writes one byte at payload offset `pos`.
pub fn write_byte<NV, const PAGE_SIZE: usize>(
    dir: &mut Directory<NV, PAGE_SIZE>,
    addr: u32,
    header: &FileHeader,
    pos: u32,
    value: u8,
) -> Result<(), FileError>
where
    NV: ReadNorFlash + NorFlash,
{
    if pos >= max_pos(header) {
        return Err(FileError::OutOfBounds);
    }
    dir.page_buffer
        .write(&mut dir.flash, addr + HEADER_SIZE as u32 + pos, &[value])
        .map_err(FileError::from)?;
    Ok(())
}

/// Writes `data` starting at payload offset `pos`, bounds-checked against
/// `max_pos`. Returns the number of bytes written (may be short if
/// `pos + data.len()` exceeds the reservation).
pub fn write<NV, const PAGE_SIZE: usize>(
    dir: &mut Directory<NV, PAGE_SIZE>,
    addr: u32,
    header: &FileHeader,
    pos: u32,
    data: &[u8],
) -> Result<usize, FileError>
where
    NV: ReadNorFlash + NorFlash,
{
    let limit = max_pos(header);
    if pos >= limit {
        return Err(FileError::OutOfBounds);
    }
    let n = core::cmp::min(data.len() as u32, limit - pos) as usize;
    for (i, &b) in data[..n].iter().enumerate() {
        write_byte(dir, addr, header, pos + i as u32, b)?;
    }
    dir.page_buffer.flush(&mut dir.flash).map_err(FileError::from)?;
    Ok(n)
}

/// Renames `header` in place to `new_path` by relocating (erase +
/// reprogram) its header page.
///
/// Programming a byte over non-erased flash can only clear bits, never
/// set them, so an in-place overwrite only works when every byte of the
/// new name is a bit-subset of the old one. Staging the full header
/// through the Page Buffer erases the page first, so this is correct for
/// any new path regardless of its relationship to the old one.
pub fn rename<NV, const PAGE_SIZE: usize>(
    dir: &mut Directory<NV, PAGE_SIZE>,
    addr: u32,
    header: &mut FileHeader,
    new_path: &str,
) -> Result<(), FileError>
where
    NV: ReadNorFlash + NorFlash,
{
    validate_path(new_path).map_err(FileError::from)?;
    let mut p: String<PATH_MAX> = String::new();
    p.push_str(new_path)
        .map_err(|_| FileError::from(crate::error::DirectoryError::InvalidPath))?;
    header.path = p;
    dir.put_header(addr, header).map_err(FileError::from)
}

pub fn ensure_executable(header: &FileHeader) -> Result<(), FileError> {
    if header.is_exec() {
        Ok(())
    } else {
        Err(FileError::NotExecutable)
    }
}
