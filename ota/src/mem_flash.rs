// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! NOR flash kept in RAM, with fault injection.
//!
//! Used by the tests and by the host simulator in place of the SPI NOR and the
//! internal program flash.

use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MemFlashError {
    OutOfBounds,
    NotAligned,
    /// Programming a byte that is not erased
    NotErased,
    /// Failure requested through fault injection
    Injected,
}

impl NorFlashError for MemFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Self::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            Self::NotAligned => NorFlashErrorKind::NotAligned,
            Self::NotErased | Self::Injected => NorFlashErrorKind::Other,
        }
    }
}

pub struct MemFlash<const SIZE: usize, const ERASE: usize, const WRITE: usize> {
    mem: [u8; SIZE],
    fail_next_erase: bool,
    writes_before_failure: Option<usize>,
    fail_reads: bool,
    erases: usize,
    writes: usize,
}

impl<const SIZE: usize, const ERASE: usize, const WRITE: usize> Default for MemFlash<SIZE, ERASE, WRITE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize, const ERASE: usize, const WRITE: usize> MemFlash<SIZE, ERASE, WRITE> {
    /// A fully erased device.
    pub const fn new() -> Self {
        Self {
            mem: [0xFF; SIZE],
            fail_next_erase: false,
            writes_before_failure: None,
            fail_reads: false,
            erases: 0,
            writes: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mem
    }

    /// Overwrite memory directly, bypassing NOR semantics.
    pub fn load(&mut self, offset: usize, data: &[u8]) {
        self.mem[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Flip bits at `offset`, as a worn or disturbed cell would.
    pub fn corrupt(&mut self, offset: usize) {
        self.mem[offset] ^= 0x5A;
    }

    pub fn fail_next_erase(&mut self) {
        self.fail_next_erase = true;
    }

    /// Let `count` more write operations succeed, then fail every write.
    pub fn fail_writes_after(&mut self, count: usize) {
        self.writes_before_failure = Some(count);
    }

    pub fn fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Clear every injected fault.
    pub fn heal(&mut self) {
        self.fail_next_erase = false;
        self.writes_before_failure = None;
        self.fail_reads = false;
    }

    pub fn erase_count(&self) -> usize {
        self.erases
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn range(offset: u32, len: usize) -> Result<core::ops::Range<usize>, MemFlashError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(MemFlashError::OutOfBounds)?;
        if end > SIZE {
            return Err(MemFlashError::OutOfBounds);
        }
        Ok(start..end)
    }
}

impl<const SIZE: usize, const ERASE: usize, const WRITE: usize> ErrorType for MemFlash<SIZE, ERASE, WRITE> {
    type Error = MemFlashError;
}

impl<const SIZE: usize, const ERASE: usize, const WRITE: usize> ReadNorFlash for MemFlash<SIZE, ERASE, WRITE> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if self.fail_reads {
            return Err(MemFlashError::Injected);
        }
        let range = Self::range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.mem[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        SIZE
    }
}

impl<const SIZE: usize, const ERASE: usize, const WRITE: usize> NorFlash for MemFlash<SIZE, ERASE, WRITE> {
    const WRITE_SIZE: usize = WRITE;
    const ERASE_SIZE: usize = ERASE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if core::mem::take(&mut self.fail_next_erase) {
            return Err(MemFlashError::Injected);
        }
        if to < from {
            return Err(MemFlashError::OutOfBounds);
        }
        let range = Self::range(from, (to - from) as usize)?;
        if range.start % ERASE != 0 || range.end % ERASE != 0 {
            return Err(MemFlashError::NotAligned);
        }
        self.mem[range].fill(0xFF);
        self.erases += 1;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if let Some(left) = self.writes_before_failure.as_mut() {
            if *left == 0 {
                return Err(MemFlashError::Injected);
            }
            *left -= 1;
        }
        let range = Self::range(offset, bytes.len())?;
        if range.start % WRITE != 0 || bytes.len() % WRITE != 0 {
            return Err(MemFlashError::NotAligned);
        }
        let target = &mut self.mem[range];
        if target.iter().any(|b| *b != 0xFF) {
            return Err(MemFlashError::NotErased);
        }
        target.copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Flash = MemFlash<1024, 256, 4>;

    #[test]
    fn write_requires_erase() {
        let mut flash = Flash::new();
        flash.write(0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(flash.write(0, &[1, 2, 3, 4]), Err(MemFlashError::NotErased));
        flash.erase(0, 256).unwrap();
        flash.write(0, &[5, 6, 7, 8]).unwrap();
        let mut buf = [0; 4];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [5, 6, 7, 8]);
    }

    #[test]
    fn alignment_and_bounds() {
        let mut flash = Flash::new();
        assert_eq!(flash.write(2, &[0; 4]), Err(MemFlashError::NotAligned));
        assert_eq!(flash.write(0, &[0; 3]), Err(MemFlashError::NotAligned));
        assert_eq!(flash.erase(0, 100), Err(MemFlashError::NotAligned));
        assert_eq!(flash.erase(0, 2048), Err(MemFlashError::OutOfBounds));
        let mut buf = [0; 8];
        assert_eq!(flash.read(1020, &mut buf), Err(MemFlashError::OutOfBounds));
    }

    #[test]
    fn injected_faults() {
        let mut flash = Flash::new();
        flash.fail_next_erase();
        assert_eq!(flash.erase(0, 256), Err(MemFlashError::Injected));
        flash.erase(0, 256).unwrap();

        flash.fail_writes_after(1);
        flash.write(0, &[0; 4]).unwrap();
        assert_eq!(flash.write(4, &[0; 4]), Err(MemFlashError::Injected));
        flash.heal();
        flash.write(4, &[0; 4]).unwrap();

        flash.fail_reads(true);
        assert_eq!(flash.read(0, &mut [0; 4]), Err(MemFlashError::Injected));
    }
}
