//! The `Xipfs` trait: a VFS seam implemented by [`crate::driver::Driver`].
//!
//! A trait object gives callers a single storage-agnostic handle instead
//! of a concrete `Driver<NV, PAGE_SIZE, MAX_HANDLES>` type tangled
//! through every layer above it. `execv` is excluded because its
//! `launch` callback is a per-call generic parameter, which
//! would make the trait's methods non-monomorphic and rule out `dyn
//! Xipfs` for the rest of the surface — callers needing `execv` reach it
//! through `Driver` directly, same as the concrete type underneath any
//! `&dyn Xipfs`.

use crate::driver::{Driver, Fd, Stat, StatVfs, Whence};
use crate::error::Errno;
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use heapless::String;

pub trait Xipfs {
    fn mount(&mut self) -> Result<(), Errno>;
    fn format(&mut self) -> Result<(), Errno>;
    fn new_file(&mut self, path: &str, size: u32, exec: bool) -> Result<(), Errno>;
    fn open(&mut self, path: &str, flags: u32) -> Result<Fd, Errno>;
    fn close(&mut self, fd: Fd) -> Result<(), Errno>;
    fn fsync(&mut self, fd: Fd) -> Result<(), Errno>;
    fn read(&mut self, fd: Fd, out: &mut [u8]) -> Result<usize, Errno>;
    fn write(&mut self, fd: Fd, data: &[u8]) -> Result<usize, Errno>;
    fn lseek(&mut self, fd: Fd, offset: i64, whence: Whence) -> Result<u32, Errno>;
    fn stat(&mut self, path: &str) -> Result<Stat, Errno>;
    fn fstat(&mut self, fd: Fd) -> Result<Stat, Errno>;
    fn statvfs(&mut self) -> Result<StatVfs, Errno>;
    fn unlink(&mut self, path: &str) -> Result<(), Errno>;
    fn mkdir(&mut self, path: &str) -> Result<(), Errno>;
    fn rmdir(&mut self, path: &str) -> Result<(), Errno>;
    fn rename(&mut self, from: &str, to: &str) -> Result<(), Errno>;
    fn opendir(&mut self, path: &str) -> Result<Fd, Errno>;
    fn readdir(&mut self, fd: Fd) -> Result<Option<String<{ crate::config::PATH_MAX }>>, Errno>;
    fn closedir(&mut self, fd: Fd) -> Result<(), Errno>;
}

impl<NV, const PAGE_SIZE: usize, const MAX_HANDLES: usize> Xipfs for Driver<NV, PAGE_SIZE, MAX_HANDLES>
where
    NV: ReadNorFlash + NorFlash,
{
    fn mount(&mut self) -> Result<(), Errno> {
        Driver::mount(self)
    }
    fn format(&mut self) -> Result<(), Errno> {
        Driver::format(self)
    }
    fn new_file(&mut self, path: &str, size: u32, exec: bool) -> Result<(), Errno> {
        Driver::new_file(self, path, size, exec)
    }
    fn open(&mut self, path: &str, flags: u32) -> Result<Fd, Errno> {
        Driver::open(self, path, flags)
    }
    fn close(&mut self, fd: Fd) -> Result<(), Errno> {
        Driver::close(self, fd)
    }
    fn fsync(&mut self, fd: Fd) -> Result<(), Errno> {
        Driver::fsync(self, fd)
    }
    fn read(&mut self, fd: Fd, out: &mut [u8]) -> Result<usize, Errno> {
        Driver::read(self, fd, out)
    }
    fn write(&mut self, fd: Fd, data: &[u8]) -> Result<usize, Errno> {
        Driver::write(self, fd, data)
    }
    fn lseek(&mut self, fd: Fd, offset: i64, whence: Whence) -> Result<u32, Errno> {
        Driver::lseek(self, fd, offset, whence)
    }
    fn stat(&mut self, path: &str) -> Result<Stat, Errno> {
        Driver::stat(self, path)
    }
    fn fstat(&mut self, fd: Fd) -> Result<Stat, Errno> {
        Driver::fstat(self, fd)
    }
    fn statvfs(&mut self) -> Result<StatVfs, Errno> {
        Driver::statvfs(self)
    }
    fn unlink(&mut self, path: &str) -> Result<(), Errno> {
        Driver::unlink(self, path)
    }
    fn mkdir(&mut self, path: &str) -> Result<(), Errno> {
        Driver::mkdir(self, path)
    }
    fn rmdir(&mut self, path: &str) -> Result<(), Errno> {
        Driver::rmdir(self, path)
    }
    fn rename(&mut self, from: &str, to: &str) -> Result<(), Errno> {
        Driver::rename(self, from, to)
    }
    fn opendir(&mut self, path: &str) -> Result<Fd, Errno> {
        Driver::opendir(self, path)
    }
    fn readdir(&mut self, fd: Fd) -> Result<Option<String<{ crate::config::PATH_MAX }>>, Errno> {
        Driver::readdir(self, fd)
    }
    fn closedir(&mut self, fd: Fd) -> Result<(), Errno> {
        Driver::closedir(self, fd)
    }
}
