// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Encryption of the firmware copies kept in the backup slots.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Encrypt/decrypt with a device key.
///
/// Both directions are addressable by byte offset so an image can be processed
/// one buffer at a time. `nonce` is unique per slot and per backup written to it.
pub trait BackupCipher {
    fn encrypt_in_place(&self, nonce: u64, offset: u32, buf: &mut [u8]);
    fn decrypt_in_place(&self, nonce: u64, offset: u32, buf: &mut [u8]);
}

/// Keystream cipher: block `i` of the keystream is
/// `HMAC-SHA256(key, nonce LE || i LE)`.
#[derive(Clone)]
pub struct HmacCtrCipher {
    mac: HmacSha256,
}

const BLOCK: u32 = 32;

impl HmacCtrCipher {
    /// `None` if the key is rejected by HMAC.
    pub fn new(key: &[u8]) -> Option<Self> {
        HmacSha256::new_from_slice(key).ok().map(|mac| Self { mac })
    }

    fn apply(&self, nonce: u64, offset: u32, buf: &mut [u8]) {
        let mut pos = offset;
        let mut rest = buf;
        while !rest.is_empty() {
            let block = pos / BLOCK;
            let skip = (pos % BLOCK) as usize;

            let mut mac = self.mac.clone();
            mac.update(&nonce.to_le_bytes());
            mac.update(&block.to_le_bytes());
            let keystream = mac.finalize().into_bytes();

            let n = (BLOCK as usize - skip).min(rest.len());
            let (head, tail) = core::mem::take(&mut rest).split_at_mut(n);
            head.iter_mut()
                .zip(&keystream[skip..skip + n])
                .for_each(|(b, k)| *b ^= k);
            rest = tail;
            pos += n as u32;
        }
    }
}

impl BackupCipher for HmacCtrCipher {
    fn encrypt_in_place(&self, nonce: u64, offset: u32, buf: &mut [u8]) {
        self.apply(nonce, offset, buf)
    }

    fn decrypt_in_place(&self, nonce: u64, offset: u32, buf: &mut [u8]) {
        self.apply(nonce, offset, buf)
    }
}
