//! RAM-backed [`NorFlash`]/[`ReadNorFlash`] mock used by the crate's own
//! test suite, plus a ready-to-use `lazy_static` test driver instance.
//!
//! Backs the `embedded-storage` traits with a plain byte array instead of
//! real hardware, and exposes a `lazy_static! { static ref TEST_MOUNT:
//! Mutex<...> }` global-singleton test `Driver` instance below.

#![cfg(any(test, feature = "std"))]

use crate::config::ERASE_BYTE;
use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

#[derive(Debug)]
pub struct MockFlashError;

impl NorFlashError for MockFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

/// A fixed-size, all-erase-state-initialized RAM buffer standing in for a
/// NOR flash part.
pub struct RamNvm<const SIZE: usize> {
    buf: [u8; SIZE],
}

impl<const SIZE: usize> RamNvm<SIZE> {
    pub fn new() -> Self {
        Self {
            buf: [ERASE_BYTE; SIZE],
        }
    }
}

impl<const SIZE: usize> Default for RamNvm<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize> ErrorType for RamNvm<SIZE> {
    type Error = MockFlashError;
}

impl<const SIZE: usize> ReadNorFlash for RamNvm<SIZE> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let end = start + bytes.len();
        if end > SIZE {
            return Err(MockFlashError);
        }
        bytes.copy_from_slice(&self.buf[start..end]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        SIZE
    }
}

impl<const SIZE: usize> NorFlash for RamNvm<SIZE> {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = 4096;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let start = from as usize;
        let end = to as usize;
        if end > SIZE || start > end {
            return Err(MockFlashError);
        }
        self.buf[start..end].fill(ERASE_BYTE);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let end = start + bytes.len();
        if end > SIZE {
            return Err(MockFlashError);
        }
        // Real NOR flash can only clear bits between erases; model that
        // so a test that "writes" over non-erased data catches the bug
        // the real hardware would also produce, instead of silently
        // overwriting.
        for (dst, &src) in self.buf[start..end].iter_mut().zip(bytes.iter()) {
            *dst &= src;
        }
        Ok(())
    }
}

/// A ready-to-use 16-page, 4 KiB mount over [`RamNvm`] for tests, shared
/// as a single `lazy_static` global behind a `spin::Mutex`.
pub mod test_driver {
    use super::RamNvm;
    use crate::config::MountConfig;
    use crate::driver::Driver;
    use lazy_static::lazy_static;
    use spin::Mutex;

    pub const TEST_PAGE_SIZE: usize = 4096;
    pub const TEST_PAGE_COUNT: u32 = 16;
    pub const TEST_NVM_SIZE: usize = TEST_PAGE_SIZE * TEST_PAGE_COUNT as usize;

    pub type TestDriver = Driver<RamNvm<TEST_NVM_SIZE>, TEST_PAGE_SIZE, 16>;

    lazy_static! {
        pub static ref TEST_MOUNT: Mutex<TestDriver> = Mutex::new(
            Driver::new(RamNvm::new(), MountConfig::new(0, TEST_PAGE_COUNT))
                .expect("test mount config is always valid")
        );
    }
}
