//! Driver: the POSIX-shaped public surface, serialized by one mutex.
//!
//! Holds the [`Directory`] (which in turn owns the Flash Primitive and
//! Page Buffer), a fixed-capacity open-handle table, and translates core
//! [`Error`]s into negative [`Errno`] codes at every public method. A
//! mounted instance is typically shared behind a global
//! `lazy_static! { static ref ... : Mutex<Driver<...>> }` singleton
//! (see [`crate::mock::test_driver`]), acquiring the lock, delegating to
//! the core, and releasing it on every call.

use crate::config::{MountConfig, VIRTUAL_INFO_FILE};
use crate::directory::Directory;
use crate::error::{DirectoryError, Errno, Error};
use crate::file;
use crate::path::{self, Classification};
use crate::record::FileHeader;
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use heapless::Vec;

/// Flags accepted by [`Driver::open`], a subset of POSIX's `O_*`.
pub mod open_flags {
    pub const CREAT: u32 = 1 << 0;
    pub const EXCL: u32 = 1 << 1;
    pub const WRONLY: u32 = 1 << 2;
    pub const RDONLY: u32 = 1 << 3;
    pub const RDWR: u32 = 1 << 4;
    pub const APPEND: u32 = 1 << 5;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// What a [`Handle`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    File(u32),
    VirtualInfo,
    Directory,
}

/// A live open file/directory handle, as tracked in the Driver's table.
#[derive(Debug, Clone)]
struct Handle {
    target: Target,
    pos: u32,
    writable: bool,
    /// For directory handles: the normalized prefix being listed and a
    /// cursor over already-yielded entries (by address), so repeated
    /// `readdir` calls advance rather than rescanning duplicates.
    dir_prefix: Option<heapless::String<{ crate::config::PATH_MAX }>>,
    dir_cursor: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub size: u32,
    pub is_dir: bool,
    pub is_exec: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct StatVfs {
    pub blocks: u32,
    pub bfree: u32,
    pub block_size: u32,
}

/// File handle identifier returned from `open`/`opendir`.
pub type Fd = usize;

/// The top-level mount: one [`Directory`] plus the open-handle table.
/// `MAX_HANDLES` bounds the table's fixed capacity; exhaustion surfaces
/// as `ENFILE`.
pub struct Driver<NV, const PAGE_SIZE: usize, const MAX_HANDLES: usize> {
    dir: Directory<NV, PAGE_SIZE>,
    handles: Vec<Option<Handle>, MAX_HANDLES>,
    config: MountConfig,
}

impl<NV, const PAGE_SIZE: usize, const MAX_HANDLES: usize> Driver<NV, PAGE_SIZE, MAX_HANDLES>
where
    NV: ReadNorFlash + NorFlash,
{
    /// Validates `config` and constructs a driver over `nv`. Does not
    /// touch NVM; call [`Self::mount`] next.
    pub fn new(nv: NV, config: MountConfig) -> Result<Self, Error> {
        if !config.is_valid() {
            return Err(crate::error::log_err(Error::InvalidMount));
        }
        let flash = crate::flash::FlashPrimitive::new(nv, config.base, config.page_count);
        let mut handles = Vec::new();
        for _ in 0..MAX_HANDLES {
            let _ = handles.push(None);
        }
        Ok(Self {
            dir: Directory::new(flash),
            handles,
            config,
        })
    }

    /// Verifies layout invariants: every page past the tail's `next` (or
    /// past `base` if empty) is fully erased. Does not mutate NVM.
    pub fn mount(&mut self) -> Result<(), Errno> {
        self.try_mount().map_err(|e| log_and_map(e))
    }

    fn try_mount(&mut self) -> Result<(), Error> {
        let tail_next = match self.dir.tail()? {
            None => self.dir.flash.base(),
            Some((addr, h)) => {
                if h.is_terminal(addr) {
                    addr + h.reserved
                } else {
                    h.next
                }
            }
        };
        let end = self.dir.flash.end();
        let mut off = tail_next;
        let mut scratch = [0u8; 64];
        while off < end {
            let n = core::cmp::min(scratch.len() as u32, end - off) as usize;
            self.dir
                .page_buffer
                .read(&mut self.dir.flash, off, &mut scratch[..n])
                .map_err(DirectoryError::from)?;
            if scratch[..n].iter().any(|&b| b != crate::config::ERASE_BYTE) {
                return Err(Error::Directory(DirectoryError::CorruptLayout));
            }
            off += n as u32;
        }
        Ok(())
    }

    pub fn format(&mut self) -> Result<(), Errno> {
        self.handles.iter_mut().for_each(|h| *h = None);
        self.dir.format().map_err(|e| log_and_map(e.into()))
    }

    pub fn new_file(&mut self, path: &str, size: u32, exec: bool) -> Result<(), Errno> {
        self.guard_create(path)?;
        self.dir
            .new_file(path, size, exec)
            .map(|_| ())
            .map_err(|e| log_and_map(e.into()))
    }

    fn guard_create(&mut self, path: &str) -> Result<(), Errno> {
        let cls = path::classify(&mut self.dir, path).map_err(|e| log_and_map(e.into()))?;
        match cls.class {
            Classification::Creatable => Ok(()),
            Classification::ExistsAsFile
            | Classification::ExistsAsEmptyDir
            | Classification::ExistsAsNonemptyDir => Err(Errno::EEXIST),
            Classification::InvalidBecauseNotDirs => Err(Errno::ENOTDIR),
            Classification::InvalidBecauseNotFound => Err(Errno::ENOENT),
        }
    }

    fn alloc_handle(&mut self, h: Handle) -> Result<Fd, Errno> {
        let ceiling = self.config.max_open_files;
        for (i, slot) in self.handles.iter_mut().enumerate().take(ceiling) {
            if slot.is_none() {
                *slot = Some(h);
                return Ok(i);
            }
        }
        Err(Errno::ENFILE)
    }

    fn get_handle(&self, fd: Fd) -> Result<&Handle, Errno> {
        self.handles.get(fd).and_then(|h| h.as_ref()).ok_or(Errno::EBADF)
    }

    pub fn open(&mut self, path: &str, flags: u32) -> Result<Fd, Errno> {
        if path.rsplit('/').next() == Some(VIRTUAL_INFO_FILE) {
            return self.alloc_handle(Handle {
                target: Target::VirtualInfo,
                pos: 0,
                writable: false,
                dir_prefix: None,
                dir_cursor: 0,
            });
        }

        let cls = path::classify(&mut self.dir, path).map_err(|e| log_and_map(e.into()))?;
        let writable = flags & (open_flags::WRONLY | open_flags::RDWR) != 0;

        let addr = match cls.class {
            Classification::ExistsAsFile => {
                if flags & open_flags::EXCL != 0 && flags & open_flags::CREAT != 0 {
                    return Err(Errno::EEXIST);
                }
                cls.witness.as_ref().unwrap().addr
            }
            Classification::ExistsAsEmptyDir | Classification::ExistsAsNonemptyDir => {
                return Err(Errno::EISDIR)
            }
            Classification::Creatable => {
                if flags & open_flags::CREAT == 0 {
                    return Err(Errno::ENOENT);
                }
                self.dir
                    .new_file(path, 0, false)
                    .map_err(|e| log_and_map(e.into()))?
            }
            Classification::InvalidBecauseNotDirs => return Err(Errno::ENOTDIR),
            Classification::InvalidBecauseNotFound => return Err(Errno::ENOENT),
        };

        let header = self.dir.get_header(addr).map_err(|e| log_and_map(e.into()))?;
        let start_pos = if flags & open_flags::APPEND != 0 {
            file::get_size(&header)
        } else {
            0
        };
        self.alloc_handle(Handle {
            target: Target::File(addr),
            pos: start_pos,
            writable,
            dir_prefix: None,
            dir_cursor: 0,
        })
    }

    pub fn close(&mut self, fd: Fd) -> Result<(), Errno> {
        self.fsync(fd)?;
        let slot = self.handles.get_mut(fd).ok_or(Errno::EBADF)?;
        *slot = None;
        Ok(())
    }

    /// Commits a handle's pending state to NVM: a `pos` past the stored
    /// size (a pending grow from a seek, with no write to carry it)
    /// becomes the new size, then the Page Buffer is flushed so any
    /// still-staged page is durable before the caller considers the
    /// operation complete. A no-op on directory and virtual-info handles.
    pub fn fsync(&mut self, fd: Fd) -> Result<(), Errno> {
        let (addr, pos) = match self.get_handle(fd)? {
            Handle { target: Target::File(addr), pos, .. } => (*addr, *pos),
            _ => return Ok(()),
        };
        self.commit_pending_size(addr, pos)?;
        self.dir
            .page_buffer
            .flush(&mut self.dir.flash)
            .map_err(|e| log_and_map(DirectoryError::from(e).into()))
    }

    /// Grows `addr`'s stored size to `pos` if `pos` exceeds it, the
    /// `size=max(size,pos)` transition of the open-handle state machine.
    fn commit_pending_size(&mut self, addr: u32, pos: u32) -> Result<(), Errno> {
        let mut header = self.dir.get_header(addr).map_err(|e| log_and_map(e.into()))?;
        if pos > file::get_size(&header) {
            file::set_size(&mut self.dir, addr, &mut header, pos).map_err(|e| log_and_map(e.into()))?;
        }
        Ok(())
    }

    pub fn read(&mut self, fd: Fd, out: &mut [u8]) -> Result<usize, Errno> {
        let (addr, pos) = match self.get_handle(fd)? {
            Handle { target: Target::File(addr), pos, .. } => (*addr, *pos),
            Handle { target: Target::VirtualInfo, .. } => return self.read_virtual_info(out),
            Handle { target: Target::Directory, .. } => return Err(Errno::EISDIR),
        };
        let header = self.dir.get_header(addr).map_err(|e| log_and_map(e.into()))?;
        let n = file::read(&mut self.dir, addr, &header, pos, out).map_err(|e| log_and_map(e.into()))?;
        if let Some(Some(h)) = self.handles.get_mut(fd) {
            h.pos += n as u32;
        }
        Ok(n)
    }

    pub fn write(&mut self, fd: Fd, data: &[u8]) -> Result<usize, Errno> {
        let (addr, pos, writable) = match self.get_handle(fd)? {
            Handle { target: Target::File(addr), pos, writable, .. } => (*addr, *pos, *writable),
            _ => return Err(Errno::EBADF),
        };
        if !writable {
            return Err(Errno::EACCES);
        }
        let mut header = self.dir.get_header(addr).map_err(|e| log_and_map(e.into()))?;
        let n = file::write(&mut self.dir, addr, &header, pos, data).map_err(|e| log_and_map(e.into()))?;
        let new_pos = pos + n as u32;
        if new_pos > file::get_size(&header) {
            file::set_size(&mut self.dir, addr, &mut header, new_pos).map_err(|e| log_and_map(e.into()))?;
        }
        if let Some(Some(h)) = self.handles.get_mut(fd) {
            h.pos = new_pos;
        }
        Ok(n)
    }

    /// Renders the mount's current structure into `out`: base address,
    /// page count, free pages, and how many file records are live.
    fn read_virtual_info(&mut self, out: &mut [u8]) -> Result<usize, Errno> {
        use core::fmt::Write as _;
        let base = self.dir.flash.base();
        let page_count = self.dir.flash.page_count();
        let free_pages = self.dir.free_pages().map_err(|e| log_and_map(e.into()))?;
        let mut file_count = 0u32;
        let mut cur = self.dir.head().map_err(|e| log_and_map(e.into()))?;
        while let Some((addr, h)) = cur {
            if !h.is_terminal(addr) {
                file_count += 1;
            }
            cur = self.dir.next(addr, &h).map_err(|e| log_and_map(e.into()))?;
        }
        let mut msg: heapless::String<128> = heapless::String::new();
        let _ = write!(
            msg,
            "base={} page_count={} free_pages={} files={}\n",
            base, page_count, free_pages, file_count
        );
        let bytes = msg.as_bytes();
        let n = core::cmp::min(out.len(), bytes.len());
        out[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }

    pub fn lseek(&mut self, fd: Fd, offset: i64, whence: Whence) -> Result<u32, Errno> {
        let (addr, cur_pos) = match self.get_handle(fd)? {
            Handle { target: Target::File(addr), pos, .. } => (*addr, *pos),
            _ => return Err(Errno::EBADF),
        };
        let header = self.dir.get_header(addr).map_err(|e| log_and_map(e.into()))?;
        let base = match whence {
            Whence::Set => 0i64,
            Whence::Cur => cur_pos as i64,
            Whence::End => file::get_size(&header) as i64,
        };
        let new_pos = base + offset;
        if new_pos < 0 || new_pos as u32 > file::max_pos(&header) {
            return Err(Errno::EINVAL);
        }
        let new_pos = new_pos as u32;
        if new_pos < cur_pos {
            self.commit_pending_size(addr, cur_pos)?;
        }
        if let Some(Some(h)) = self.handles.get_mut(fd) {
            h.pos = new_pos;
        }
        Ok(new_pos)
    }

    pub fn stat(&mut self, path: &str) -> Result<Stat, Errno> {
        let cls = path::classify(&mut self.dir, path).map_err(|e| log_and_map(e.into()))?;
        match cls.class {
            Classification::ExistsAsFile => {
                let witness = cls.witness.unwrap();
                Ok(Stat {
                    size: file::get_size(&witness.header),
                    is_dir: false,
                    is_exec: witness.header.is_exec(),
                })
            }
            Classification::ExistsAsEmptyDir | Classification::ExistsAsNonemptyDir => Ok(Stat {
                size: 0,
                is_dir: true,
                is_exec: false,
            }),
            Classification::InvalidBecauseNotDirs => Err(Errno::ENOTDIR),
            _ => Err(Errno::ENOENT),
        }
    }

    pub fn fstat(&mut self, fd: Fd) -> Result<Stat, Errno> {
        let addr = match self.get_handle(fd)? {
            Handle { target: Target::File(addr), .. } => *addr,
            Handle { target: Target::VirtualInfo, .. } => return Err(Errno::EACCES),
            Handle { target: Target::Directory, .. } => return Err(Errno::EISDIR),
        };
        let h = self.dir.get_header(addr).map_err(|e| log_and_map(e.into()))?;
        Ok(Stat {
            size: file::get_size(&h),
            is_dir: h.is_dir(),
            is_exec: h.is_exec(),
        })
    }

    pub fn statvfs(&mut self) -> Result<StatVfs, Errno> {
        let free = self.dir.free_pages().map_err(|e| log_and_map(e.into()))?;
        Ok(StatVfs {
            blocks: self.dir.flash.page_count(),
            bfree: free,
            block_size: PAGE_SIZE as u32,
        })
    }

    /// Removes the handles whose `file_ref` was shifted or invalidated by
    /// a consolidation that moved everything at/after `moved_from` down
    /// by `displacement` bytes, or invalidates handles pointing exactly
    /// at the removed file.
    fn fixup_handles_after_remove(&mut self, removed_addr: u32, moved_from: u32, displacement: u32) {
        for slot in self.handles.iter_mut() {
            if let Some(h) = slot {
                if let Target::File(addr) = &mut h.target {
                    if *addr == removed_addr {
                        *slot = None;
                        continue;
                    }
                    if *addr >= moved_from {
                        *addr -= displacement;
                    }
                }
            }
        }
    }

    pub fn unlink(&mut self, path: &str) -> Result<(), Errno> {
        let cls = path::classify(&mut self.dir, path).map_err(|e| log_and_map(e.into()))?;
        let witness = match cls.class {
            Classification::ExistsAsFile => cls.witness.unwrap(),
            Classification::ExistsAsEmptyDir | Classification::ExistsAsNonemptyDir => {
                return Err(Errno::EISDIR)
            }
            Classification::InvalidBecauseNotDirs => return Err(Errno::ENOTDIR),
            _ => return Err(Errno::ENOENT),
        };
        self.remove_and_maybe_reseed_parent(path, witness.addr, cls.parent_siblings)
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), Errno> {
        let cls = path::classify(&mut self.dir, path).map_err(|e| log_and_map(e.into()))?;
        match cls.class {
            Classification::ExistsAsEmptyDir => {
                let addr = cls.witness.unwrap().addr;
                self.remove_and_maybe_reseed_parent(path, addr, cls.parent_siblings)
            }
            Classification::ExistsAsNonemptyDir => Err(Errno::EACCES),
            Classification::ExistsAsFile => Err(Errno::ENOTDIR),
            Classification::InvalidBecauseNotDirs => Err(Errno::ENOTDIR),
            _ => Err(Errno::ENOENT),
        }
    }

    fn remove_and_maybe_reseed_parent(
        &mut self,
        path: &str,
        addr: u32,
        parent_siblings: usize,
    ) -> Result<(), Errno> {
        let header = self.dir.get_header(addr).map_err(|e| log_and_map(e.into()))?;
        let reserved = header.reserved;
        let displacement = self.dir.remove(addr).map_err(|e| log_and_map(e.into()))?;
        self.fixup_handles_after_remove(addr, addr + reserved, displacement);

        // If this was the only record anchoring its parent directory in
        // existence, plant an empty-dir sentinel so the parent is still
        // visible, unless the parent is the mount root (always visible).
        if parent_siblings == 0 {
            if let Some(slash) = path.trim_end_matches('/').rfind('/') {
                let parent = &path[..=slash];
                if parent != "/" {
                    let _ = self.dir.new_file(parent, 0, false);
                }
            }
        }
        Ok(())
    }

    pub fn mkdir(&mut self, path: &str) -> Result<(), Errno> {
        let mut p: heapless::String<{ crate::config::PATH_MAX }> = heapless::String::new();
        let _ = p.push_str(path);
        if !path.ends_with('/') {
            let _ = p.push('/');
        }
        self.guard_create(p.as_str())?;
        self.dir
            .new_file(p.as_str(), 0, false)
            .map(|_| ())
            .map_err(|e| log_and_map(e.into()))
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), Errno> {
        type PathBuf = heapless::String<{ crate::config::PATH_MAX }>;
        let with_trailing_slash = |s: &str| -> PathBuf {
            let mut out = PathBuf::new();
            let _ = out.push_str(s);
            if !s.ends_with('/') {
                let _ = out.push('/');
            }
            out
        };
        let from_prefix = with_trailing_slash(from);

        // Reject renaming a directory onto its own subpath. Compared
        // against `from_prefix` (always trailing-slashed) so e.g. `/a`
        // -> `/ab` (a sibling, not a descendant) is not mistaken for a
        // subpath move.
        if to.starts_with(from_prefix.as_str()) {
            return Err(Errno::EINVAL);
        }

        let (from_cls, to_cls) =
            path::classify_pair(&mut self.dir, from, to).map_err(|e| log_and_map(e.into()))?;

        match to_cls.class {
            Classification::Creatable => {}
            Classification::ExistsAsFile if matches!(from_cls.class, Classification::ExistsAsFile) => {}
            _ => return Err(Errno::EEXIST),
        }

        match from_cls.class {
            Classification::ExistsAsFile => {
                let addr = from_cls.witness.unwrap().addr;
                let mut header = self.dir.get_header(addr).map_err(|e| log_and_map(e.into()))?;
                file::rename(&mut self.dir, addr, &mut header, to).map_err(|e| log_and_map(e.into()))
            }
            Classification::ExistsAsEmptyDir | Classification::ExistsAsNonemptyDir => {
                let to_prefix = with_trailing_slash(to);
                self.dir
                    .rename_all(from_prefix.as_str(), to_prefix.as_str())
                    .map(|_| ())
                    .map_err(|e| log_and_map(e.into()))
            }
            Classification::InvalidBecauseNotDirs => Err(Errno::ENOTDIR),
            _ => Err(Errno::ENOENT),
        }
    }

    pub fn opendir(&mut self, path: &str) -> Result<Fd, Errno> {
        let mut p: heapless::String<{ crate::config::PATH_MAX }> = heapless::String::new();
        let _ = p.push_str(path);
        if !path.ends_with('/') {
            let _ = p.push('/');
        }
        if p.as_str() != "/" {
            let cls = path::classify(&mut self.dir, path).map_err(|e| log_and_map(e.into()))?;
            match cls.class {
                Classification::ExistsAsEmptyDir | Classification::ExistsAsNonemptyDir => {}
                Classification::ExistsAsFile => return Err(Errno::ENOTDIR),
                _ => return Err(Errno::ENOENT),
            }
        }
        self.alloc_handle(Handle {
            target: Target::Directory,
            pos: 0,
            writable: false,
            dir_prefix: Some(p),
            dir_cursor: self.dir.flash.base(),
        })
    }

    /// Returns the next entry's path relative to the opened directory, or
    /// `None` at end of stream.
    pub fn readdir(&mut self, fd: Fd) -> Result<Option<heapless::String<{ crate::config::PATH_MAX }>>, Errno> {
        let (prefix, mut cursor) = match self.handles.get(fd).and_then(|h| h.as_ref()) {
            Some(Handle { target: Target::Directory, dir_prefix: Some(p), dir_cursor, .. }) => {
                (p.clone(), *dir_cursor)
            }
            Some(_) => return Err(Errno::ENOTDIR),
            None => return Err(Errno::EBADF),
        };

        loop {
            let header = match self.dir.get_header(cursor).ok() {
                Some(h) => h,
                None => return Ok(None),
            };
            let is_terminal = header.is_terminal(cursor);
            let this_path = header.path.clone();
            let advance_to = if is_terminal { cursor } else { header.next };

            if this_path.as_str() != prefix.as_str()
                && this_path.as_str().starts_with(prefix.as_str())
            {
                let rest = &this_path.as_str()[prefix.len()..];
                // Only direct children (no further '/') are yielded.
                if !rest.trim_end_matches('/').contains('/') {
                    if let Some(Some(h)) = self.handles.get_mut(fd) {
                        h.dir_cursor = if is_terminal { advance_to + 1 } else { advance_to };
                    }
                    let mut out = heapless::String::new();
                    let _ = out.push_str(rest);
                    return Ok(Some(out));
                }
            }

            if is_terminal {
                if let Some(Some(h)) = self.handles.get_mut(fd) {
                    h.dir_cursor = advance_to + 1;
                }
                return Ok(None);
            }
            cursor = advance_to;
        }
    }

    pub fn closedir(&mut self, fd: Fd) -> Result<(), Errno> {
        self.close(fd)
    }

    /// Validates `path` as an executable file, reads its
    /// [`crate::exec::ExecHeader`], and hands the prepared
    /// [`crate::exec::ExecContext`] to `launch`, returning whatever exit
    /// code `launch` reports.
    ///
    /// The core crate cannot itself branch into the binary (that jump is
    /// architecture-specific inline assembly outside its scope, per
    /// [`crate::exec`]), so the caller supplies `launch` to perform it.
    pub fn execv<'a>(
        &mut self,
        path: &str,
        argv: &'a [&'a str],
        syscalls: [usize; crate::exec::SYSCALL_TABLE_LEN],
        launch: impl FnOnce(crate::exec::ExecHeader, crate::exec::ExecContext<'a>) -> i32,
    ) -> Result<i32, Errno> {
        let cls = path::classify(&mut self.dir, path).map_err(|e| log_and_map(e.into()))?;
        let witness = match cls.class {
            Classification::ExistsAsFile => cls.witness.unwrap(),
            Classification::ExistsAsEmptyDir | Classification::ExistsAsNonemptyDir => {
                return Err(Errno::EISDIR)
            }
            Classification::InvalidBecauseNotDirs => return Err(Errno::ENOTDIR),
            _ => return Err(Errno::ENOENT),
        };
        let header = witness.header;
        let addr = witness.addr;
        let binary_base = addr + crate::record::HEADER_SIZE as u32;
        let dir = &mut self.dir;
        let (exec_header, ctx) = crate::exec::prepare(
            &header,
            |buf| file::read(dir, addr, &header, 0, buf).map(|_| ()),
            argv,
            syscalls,
            binary_base,
        )
        .map_err(|e| log_and_map(e.into()))?;
        Ok(launch(exec_header, ctx))
    }

    pub fn max_open_files(&self) -> usize {
        self.config.max_open_files
    }
}

fn log_and_map(e: Error) -> Errno {
    crate::error::log_err(e);
    Errno::from(e)
}
