//! Executable binary format and execution context.
//!
//! XIPFS does not parse or validate the binary beyond reading its fixed
//! metadata header: everything past that is the host toolchain's
//! contract with the CRT0 stub it emits. The syscall table is a plain
//! array of function pointers rather than a trait object, because its
//! layout is a fixed ABI the executable indexes into directly, not a
//! Rust-typed interface.

use crate::error::FileError;
use crate::record::FileHeader;

/// Number of syscall slots exposed to execed binaries. Sized generously;
/// unused slots are null.
pub const SYSCALL_TABLE_LEN: usize = 16;

pub mod syscall_slot {
    pub const PRINTF: usize = 0;
    pub const EXIT: usize = 1;
    pub const READ: usize = 2;
    pub const WRITE: usize = 3;
    pub const OPEN: usize = 4;
    pub const CLOSE: usize = 5;
}

/// Metadata header a host toolchain emits immediately after the CRT0
/// stub, at a fixed offset from the start of an executable file's
/// payload.
#[derive(Debug, Clone, Copy)]
pub struct ExecHeader {
    pub entry_offset: u32,
    pub rom_size: u32,
    pub rom_to_ram_size: u32,
    pub ram_size: u32,
    pub got_size: u32,
    pub end_offset: u32,
    /// Offset into the patch-info table and its length, in entries. Each
    /// entry is a 4-byte offset, relative to the binary base, of a
    /// pointer needing relocation once the binary's load address and RAM
    /// window are known.
    pub patch_table_offset: u32,
    pub patch_table_len: u32,
}

pub const EXEC_HEADER_SIZE: usize = 4 * 8;

impl ExecHeader {
    pub fn from_bytes(buf: &[u8; EXEC_HEADER_SIZE]) -> Self {
        let w = |i: usize| u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
        Self {
            entry_offset: w(0),
            rom_size: w(1),
            rom_to_ram_size: w(2),
            ram_size: w(3),
            got_size: w(4),
            end_offset: w(5),
            patch_table_offset: w(6),
            patch_table_len: w(7),
        }
    }
}

/// The context handed to an execed binary: memory windows, a prepared
/// stack, argv, and the syscall table. The file system fills this in and
/// branches to `binary_base + header.entry_offset`; it never interprets
/// anything past the header itself.
pub struct ExecContext<'a> {
    pub binary_base: u32,
    pub free_ram_start: usize,
    pub free_ram_end: usize,
    pub free_nvm_start: u32,
    pub free_nvm_end: u32,
    pub argv: &'a [&'a str],
    pub syscalls: [usize; SYSCALL_TABLE_LEN],
}

impl<'a> ExecContext<'a> {
    pub fn new(binary_base: u32, argv: &'a [&'a str], syscalls: [usize; SYSCALL_TABLE_LEN]) -> Self {
        Self {
            binary_base,
            free_ram_start: 0,
            free_ram_end: 0,
            free_nvm_start: 0,
            free_nvm_end: 0,
            argv,
            syscalls,
        }
    }
}

/// Validates that `header` is marked executable and reads its
/// [`ExecHeader`] from the start of its payload.
///
/// Actually branching into the binary requires architecture-specific
/// inline assembly the core crate does not provide; callers on bare
/// metal supply a `launch` callback that receives the validated
/// [`ExecContext`] and performs the jump.
pub fn prepare<'a>(
    header: &FileHeader,
    payload_read: impl FnOnce(&mut [u8; EXEC_HEADER_SIZE]) -> Result<(), FileError>,
    argv: &'a [&'a str],
    syscalls: [usize; SYSCALL_TABLE_LEN],
    binary_base: u32,
) -> Result<(ExecHeader, ExecContext<'a>), FileError> {
    crate::file::ensure_executable(header)?;
    let mut buf = [0u8; EXEC_HEADER_SIZE];
    payload_read(&mut buf)?;
    let exec_header = ExecHeader::from_bytes(&buf);
    let ctx = ExecContext::new(binary_base, argv, syscalls);
    Ok((exec_header, ctx))
}
