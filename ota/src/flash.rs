// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Flash helpers shared by the backup manager and the session controller.

use consts::COPY_BUFFER_SIZE;
use crc::{Crc, CRC_32_ISO_HDLC};
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

use crate::layout::Region;

/// CRC used for firmware images and the backup header.
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Largest program granularity the engine buffers for.
pub const MAX_WRITE_SIZE: usize = 16;

pub(crate) fn align_up(len: u32, unit: usize) -> u32 {
    len.div_ceil(unit as u32) * unit as u32
}

/// Erase the erase units covering the first `len` bytes of `region`.
pub(crate) fn erase_prefix<F: NorFlash>(flash: &mut F, region: Region, len: u32) -> Result<(), F::Error> {
    let span = align_up(len, F::ERASE_SIZE).min(region.size);
    if span == 0 {
        return Ok(());
    }
    debug!("erase {:#x}..{:#x}", region.offset, region.offset + span);
    flash.erase(region.offset, region.offset + span)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum CopyError {
    Read,
    Write,
}

/// Copy `len` bytes between two devices through a bounded buffer.
///
/// `transform` sees each piece with its offset from the start of the copy.
/// The last piece is padded with 0xFF up to the destination write size.
pub(crate) fn copy<S, D>(
    src: &mut S,
    src_offset: u32,
    dst: &mut D,
    dst_offset: u32,
    len: u32,
    mut transform: impl FnMut(u32, &mut [u8]),
) -> Result<(), CopyError>
where
    S: ReadNorFlash,
    D: NorFlash,
{
    let mut buf = [0u8; COPY_BUFFER_SIZE];
    let mut done = 0u32;
    while done < len {
        let n = (len - done).min(COPY_BUFFER_SIZE as u32) as usize;
        src.read(src_offset + done, &mut buf[..n]).map_err(|_| CopyError::Read)?;
        transform(done, &mut buf[..n]);
        let padded = align_up(n as u32, D::WRITE_SIZE) as usize;
        buf[n..padded].fill(0xFF);
        dst.write(dst_offset + done, &buf[..padded]).map_err(|_| CopyError::Write)?;
        done += n as u32;
    }
    Ok(())
}

/// CRC32 of `len` bytes read through `transform`.
pub(crate) fn crc32<S: ReadNorFlash>(
    src: &mut S,
    offset: u32,
    len: u32,
    mut transform: impl FnMut(u32, &mut [u8]),
) -> Result<u32, S::Error> {
    let mut digest = CRC32.digest();
    let mut buf = [0u8; COPY_BUFFER_SIZE];
    let mut done = 0u32;
    while done < len {
        let n = (len - done).min(COPY_BUFFER_SIZE as u32) as usize;
        src.read(offset + done, &mut buf[..n])?;
        transform(done, &mut buf[..n]);
        digest.update(&buf[..n]);
        done += n as u32;
    }
    Ok(digest.finalize())
}

/// Append-only writer into an erased region.
///
/// Bytes that do not fill a whole program word are held back until the word
/// completes or [`flush`](Self::flush) pads it with 0xFF. Programmed bytes are
/// never written twice.
pub(crate) struct StagingWriter {
    base: u32,
    flushed: u32,
    tail: [u8; MAX_WRITE_SIZE],
    tail_len: usize,
}

impl StagingWriter {
    pub(crate) fn new(base: u32) -> Self {
        Self {
            base,
            flushed: 0,
            tail: [0xFF; MAX_WRITE_SIZE],
            tail_len: 0,
        }
    }

    /// Bytes accepted so far, programmed or held back.
    pub(crate) fn len(&self) -> u32 {
        self.flushed + self.tail_len as u32
    }

    pub(crate) fn append<F: NorFlash>(&mut self, flash: &mut F, mut data: &[u8]) -> Result<(), F::Error> {
        let word = F::WRITE_SIZE;

        // Complete partial word
        if self.tail_len > 0 {
            let take = (word - self.tail_len).min(data.len());
            self.tail[self.tail_len..self.tail_len + take].copy_from_slice(&data[..take]);
            self.tail_len += take;
            data = &data[take..];
            if self.tail_len == word {
                flash.write(self.base + self.flushed, &self.tail[..word])?;
                self.flushed += word as u32;
                self.tail_len = 0;
                self.tail.fill(0xFF);
            }
        }

        // Write aligned bulk
        let bulk = data.len() - data.len() % word;
        if bulk > 0 {
            flash.write(self.base + self.flushed, &data[..bulk])?;
            self.flushed += bulk as u32;
        }

        // Keep trailing bytes
        let rest = &data[bulk..];
        if !rest.is_empty() {
            self.tail[..rest.len()].copy_from_slice(rest);
            self.tail_len = rest.len();
        }
        Ok(())
    }

    /// Program the held back bytes, padded to a full word.
    pub(crate) fn flush<F: NorFlash>(&mut self, flash: &mut F) -> Result<(), F::Error> {
        if self.tail_len == 0 {
            return Ok(());
        }
        flash.write(self.base + self.flushed, &self.tail[..F::WRITE_SIZE])?;
        self.flushed += self.tail_len as u32;
        self.tail_len = 0;
        self.tail.fill(0xFF);
        Ok(())
    }

    /// Whether `data` equals the bytes already accepted at `offset`.
    /// The range must lie within [`len`](Self::len).
    pub(crate) fn matches<F: ReadNorFlash>(&self, flash: &mut F, offset: u32, data: &[u8]) -> Result<bool, F::Error> {
        let end = offset + data.len() as u32;
        let programmed_end = end.min(self.flushed);
        let mut buf = [0u8; 32];
        let mut pos = offset;
        while pos < programmed_end {
            let n = (programmed_end - pos).min(buf.len() as u32) as usize;
            flash.read(self.base + pos, &mut buf[..n])?;
            let from = (pos - offset) as usize;
            if buf[..n] != data[from..from + n] {
                return Ok(false);
            }
            pos += n as u32;
        }
        while pos < end {
            let held = (pos - self.flushed) as usize;
            if self.tail[held] != data[(pos - offset) as usize] {
                return Ok(false);
            }
            pos += 1;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem_flash::MemFlash;

    type Flash = MemFlash<4096, 1024, 4>;

    #[test]
    fn staging_writer_holds_partial_words() {
        let mut flash = Flash::new();
        let mut writer = StagingWriter::new(1024);

        writer.append(&mut flash, &[1, 2, 3]).unwrap();
        assert_eq!(writer.len(), 3);
        // Nothing programmed until a word completes.
        assert_eq!(&flash.as_bytes()[1024..1028], &[0xFF; 4]);

        writer.append(&mut flash, &[4, 5, 6, 7, 8, 9, 10]).unwrap();
        assert_eq!(writer.len(), 10);
        assert_eq!(&flash.as_bytes()[1024..1032], &[1, 2, 3, 4, 5, 6, 7, 8]);

        assert!(writer.matches(&mut flash, 6, &[7, 8, 9, 10]).unwrap());
        assert!(!writer.matches(&mut flash, 6, &[7, 8, 9, 11]).unwrap());

        writer.flush(&mut flash).unwrap();
        assert_eq!(&flash.as_bytes()[1032..1036], &[9, 10, 0xFF, 0xFF]);
        assert_eq!(writer.len(), 10);
    }

    #[test]
    fn copy_pads_last_piece() {
        let mut src = Flash::new();
        let mut dst = Flash::new();
        src.write(0, &[9; 8]).unwrap();
        dst.erase(0, 1024).unwrap();
        copy(&mut src, 0, &mut dst, 0, 6, |_, buf| buf.iter_mut().for_each(|b| *b ^= 1)).unwrap();
        assert_eq!(&dst.as_bytes()[..8], &[8, 8, 8, 8, 8, 8, 0xFF, 0xFF]);
        assert_eq!(crc32(&mut src, 0, 8, |_, _| {}).unwrap(), CRC32.checksum(&[9; 8]));
    }
}
