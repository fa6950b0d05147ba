//! An execute-in-place file system for addressable NOR flash on
//! memory-constrained microcontrollers.
//!
//! Files live as contiguous, page-aligned runs of erase pages, chained
//! into a singly linked list physically embedded in the flash itself
//! (`FileHeader::next`). There is no separate directory structure:
//! directory existence is derived from path prefixes among the stored
//! file paths (see [`path`]). The crate is generic over any
//! `embedded_storage::nor_flash::NorFlash` implementor, so the same logic
//! runs against a real MCU peripheral driver or, for tests, the
//! RAM-backed mock in [`mock`].
//!
//! # Layers
//!
//! - [`flash`] — bounds-checked erase/program primitives.
//! - [`page_buffer`] — single-page RAM staging area, at most one dirty
//!   page at a time.
//! - [`record`] — the on-NVM [`record::FileHeader`] and its byte codec.
//! - [`directory`] — the linked-list walk, allocation, and the
//!   consolidation algorithm run after deletion.
//! - [`file`] — per-file size history, bounds-checked byte I/O, rename.
//! - [`path`] — six-state path classification over the flat file list.
//! - [`exec`] — the execute-in-place binary format and launch context.
//! - [`driver`] — the POSIX-shaped, single-mutex public surface.
//! - [`vfs`] — the [`vfs::Xipfs`] trait, an object-safe view over most of
//!   [`driver::Driver`]'s surface.
#![no_std]

pub mod config;
pub mod directory;
pub mod driver;
pub mod error;
pub mod exec;
pub mod file;
pub mod flash;
pub mod page_buffer;
pub mod path;
pub mod record;
pub mod vfs;

#[cfg(any(test, feature = "std"))]
pub mod mock;

pub use config::MountConfig;
pub use driver::Driver;
pub use error::{Errno, Error};
pub use vfs::Xipfs;

#[cfg(test)]
mod tests {
    use crate::config::MountConfig;
    use crate::driver::{open_flags, Driver, Whence};
    use crate::mock::RamNvm;

    const PAGE_SIZE: usize = 4096;
    const PAGE_COUNT: u32 = 4;
    const NVM_SIZE: usize = PAGE_SIZE * PAGE_COUNT as usize;
    type TestDriver = Driver<RamNvm<NVM_SIZE>, PAGE_SIZE, 8>;

    fn fresh() -> TestDriver {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut d = Driver::new(RamNvm::new(), MountConfig::new(0, PAGE_COUNT)).unwrap();
        d.format().unwrap();
        d.mount().unwrap();
        d
    }

    #[test]
    fn fresh_mount_is_empty() {
        let mut d = fresh();
        let fd = d.opendir("/").unwrap();
        assert_eq!(d.readdir(fd).unwrap(), None);
        let vfs = d.statvfs().unwrap();
        assert_eq!(vfs.blocks, PAGE_COUNT);
        assert_eq!(vfs.bfree, PAGE_COUNT);
    }

    #[test]
    fn create_write_read_back() {
        let mut d = fresh();
        d.new_file("/a", 100, false).unwrap();
        let fd = d.open("/a", open_flags::WRONLY).unwrap();
        d.write(fd, b"Hello").unwrap();
        d.close(fd).unwrap();

        let fd = d.open("/a", open_flags::RDONLY).unwrap();
        let mut buf = [0u8; 5];
        let n = d.read(fd, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"Hello");
        let st = d.stat("/a").unwrap();
        assert_eq!(st.size, 5);
    }

    #[test]
    fn delete_consolidates_successors() {
        let mut d = fresh();
        d.new_file("/a", 1000, false).unwrap();
        d.new_file("/b", 1000, false).unwrap();
        d.new_file("/c", 1000, false).unwrap();

        let fd = d.open("/b", open_flags::WRONLY).unwrap();
        let payload = [b'A'; 100];
        d.write(fd, &payload).unwrap();
        d.close(fd).unwrap();

        d.unlink("/a").unwrap();

        let fd = d.open("/b", open_flags::RDONLY).unwrap();
        let mut buf = [0u8; 100];
        d.read(fd, &mut buf).unwrap();
        assert_eq!(buf, payload);
        d.close(fd).unwrap();

        let dfd = d.opendir("/").unwrap();
        assert_eq!(d.readdir(dfd).unwrap().as_deref(), Some("b"));
        assert_eq!(d.readdir(dfd).unwrap().as_deref(), Some("c"));
        assert_eq!(d.readdir(dfd).unwrap(), None);
    }

    #[test]
    fn full_mount_self_loops_and_rejects() {
        const SMALL_PAGES: u32 = 2;
        const SMALL_NVM: usize = PAGE_SIZE * SMALL_PAGES as usize;
        type SmallDriver = Driver<RamNvm<SMALL_NVM>, PAGE_SIZE, 4>;
        let mut d: SmallDriver =
            Driver::new(RamNvm::new(), MountConfig::new(0, SMALL_PAGES)).unwrap();
        d.format().unwrap();
        d.mount().unwrap();

        d.new_file("/x", 0, false).unwrap();
        d.new_file("/y", 0, false).unwrap();
        let err = d.new_file("/z", 0, false).unwrap_err();
        assert_eq!(err, crate::error::Errno::EDQUOT);

        // Mount must remain walkable.
        assert!(d.stat("/x").is_ok());
        assert!(d.stat("/y").is_ok());
    }

    #[test]
    fn directory_semantics_from_flat_paths() {
        let mut d = fresh();
        d.mkdir("/d").unwrap();
        d.new_file("/d/f", 10, false).unwrap();

        let st = d.stat("/d").unwrap();
        assert!(st.is_dir);
        let st = d.stat("/d/f").unwrap();
        assert!(!st.is_dir);

        let dfd = d.opendir("/d").unwrap();
        assert_eq!(d.readdir(dfd).unwrap().as_deref(), Some("f"));

        d.unlink("/d/f").unwrap();
        let st = d.stat("/d").unwrap();
        assert!(st.is_dir);
    }

    #[test]
    fn lseek_past_max_pos_is_einval() {
        let mut d = fresh();
        d.new_file("/a", 10, false).unwrap();
        let fd = d.open("/a", open_flags::RDWR).unwrap();
        let err = d.lseek(fd, 1_000_000, Whence::Set).unwrap_err();
        assert_eq!(err, crate::error::Errno::EINVAL);
    }

    #[test]
    fn write_fsync_close_reopen_round_trips() {
        let mut d = fresh();
        d.new_file("/a", 10, false).unwrap();
        let fd = d.open("/a", open_flags::WRONLY).unwrap();
        d.write(fd, b"Hello").unwrap();
        d.fsync(fd).unwrap();
        d.close(fd).unwrap();

        let fd2 = d.open("/a", open_flags::RDONLY).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(d.read(fd2, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"Hello");
    }

    #[test]
    fn seek_then_close_with_no_write_commits_size() {
        let mut d = fresh();
        d.new_file("/a", 10, false).unwrap();
        let fd = d.open("/a", open_flags::RDWR).unwrap();
        d.lseek(fd, 100, Whence::Set).unwrap();
        d.close(fd).unwrap();

        let stat = d.stat("/a").unwrap();
        assert_eq!(stat.size, 100);
    }

    #[test]
    fn seek_back_commits_pending_grow() {
        let mut d = fresh();
        d.new_file("/a", 10, false).unwrap();
        let fd = d.open("/a", open_flags::RDWR).unwrap();
        d.lseek(fd, 100, Whence::Set).unwrap();
        d.lseek(fd, 10, Whence::Set).unwrap();

        let stat = d.stat("/a").unwrap();
        assert_eq!(stat.size, 100);
    }

    #[test]
    fn virtual_info_file_reflects_mount_state() {
        let mut d = fresh();
        d.new_file("/a", 10, false).unwrap();
        d.new_file("/b", 10, false).unwrap();

        let fd = d.open("/.xipfs_infos", open_flags::RDONLY).unwrap();
        let mut buf = [0u8; 128];
        let n = d.read(fd, &mut buf).unwrap();
        let text = core::str::from_utf8(&buf[..n]).unwrap();

        assert!(text.contains("base=0"));
        assert!(text.contains("page_count=4"));
        assert!(text.contains("files=2"));
    }

    #[test]
    fn double_unlink_is_enoent() {
        let mut d = fresh();
        d.new_file("/a", 10, false).unwrap();
        d.unlink("/a").unwrap();
        let err = d.unlink("/a").unwrap_err();
        assert_eq!(err, crate::error::Errno::ENOENT);
    }

    #[test]
    fn execv_reads_header_and_launches() {
        let mut d = fresh();
        d.new_file("/hi", 64, true).unwrap();
        let fd = d.open("/hi", open_flags::WRONLY).unwrap();
        let mut payload = [0u8; crate::exec::EXEC_HEADER_SIZE];
        payload[0..4].copy_from_slice(&42u32.to_le_bytes()); // entry_offset
        payload[4..8].copy_from_slice(&100u32.to_le_bytes()); // rom_size
        d.write(fd, &payload).unwrap();
        d.close(fd).unwrap();

        let argv = ["hi"];
        let syscalls = [0usize; crate::exec::SYSCALL_TABLE_LEN];
        let code = d
            .execv("/hi", &argv, syscalls, |header, ctx| {
                assert_eq!(header.entry_offset, 42);
                assert_eq!(header.rom_size, 100);
                assert_eq!(ctx.argv, &["hi"]);
                7
            })
            .unwrap();
        assert_eq!(code, 7);
    }

    #[test]
    fn execv_on_non_executable_is_eacces() {
        let mut d = fresh();
        d.new_file("/a", 10, false).unwrap();
        let err = d
            .execv("/a", &[], [0usize; crate::exec::SYSCALL_TABLE_LEN], |_, _| 0)
            .unwrap_err();
        assert_eq!(err, crate::error::Errno::EACCES);
    }

    #[test]
    fn execv_on_missing_path_is_enoent() {
        let mut d = fresh();
        let err = d
            .execv("/missing", &[], [0usize; crate::exec::SYSCALL_TABLE_LEN], |_, _| 0)
            .unwrap_err();
        assert_eq!(err, crate::error::Errno::ENOENT);
    }

    #[test]
    fn xipfs_trait_object_delegates_to_driver() {
        use crate::vfs::Xipfs;

        let mut d = fresh();
        let fs: &mut dyn Xipfs = &mut d;
        fs.new_file("/a", 10, false).unwrap();
        let fd = fs.open("/a", open_flags::WRONLY).unwrap();
        fs.write(fd, b"hi").unwrap();
        fs.close(fd).unwrap();
        assert_eq!(fs.stat("/a").unwrap().size, 2);
    }

    #[test]
    fn set_size_survives_slot_exhaustion() {
        let mut d = fresh();
        d.new_file("/a", 10, false).unwrap();
        let fd = d.open("/a", open_flags::WRONLY).unwrap();
        for _ in 0..(crate::config::SIZE_SLOTS + 5) {
            d.write(fd, b"x").unwrap();
        }
        d.close(fd).unwrap();
        let st = d.stat("/a").unwrap();
        assert_eq!(st.size as usize, crate::config::SIZE_SLOTS + 5);
    }
}
