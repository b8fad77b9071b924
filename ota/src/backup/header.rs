// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use consts::{BACKUP_HEADER_MAGIC, BACKUP_HEADER_VERSION};
use ota_protocol::FirmwareVersion;
use serde::{Deserialize, Serialize};

use crate::flash::CRC32;

/// Bytes of the header region holding the encoded header and its CRC.
pub const HEADER_BUF_LEN: usize = 128;

const CRC_LEN: usize = 4;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotId {
    A,
    B,
}

impl SlotId {
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotStatus {
    #[default]
    Empty,
    /// Holds a complete backup
    Valid,
    /// Backup being written
    Pending,
    /// Backup write or verification failed
    Failed,
}

/// Size, CRC32 and version of a plaintext firmware image.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageInfo {
    pub size: u32,
    pub crc32: u32,
    pub version: FirmwareVersion,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotRecord {
    pub status: SlotStatus,
    /// Image held by the slot. The CRC covers the plaintext.
    pub image: ImageInfo,
    /// Bumped on every backup written to the slot, feeds the cipher nonce.
    pub generation: u32,
}

/// Persistent state of the backup manager.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BackupHeader {
    pub magic: u32,
    pub version: u8,
    /// Slot holding the previous known-good image, not the running one.
    pub active_slot: SlotId,
    pub slots: [SlotRecord; 2],
    /// Image applied by the last update, awaiting confirmation.
    pub expected: ImageInfo,
    /// Last version that was rolled back.
    pub failed_version: FirmwareVersion,
    /// Image known to be running. Zero size when unknown.
    pub installed: ImageInfo,
    /// Non-zero while an applied image awaits confirmation.
    pub validation_start_time: u32,
    /// Boots of the unconfirmed image so far.
    pub boot_attempts: u8,
    pub rollback_count: u32,
}

impl Default for BackupHeader {
    fn default() -> Self {
        Self {
            magic: BACKUP_HEADER_MAGIC,
            version: BACKUP_HEADER_VERSION,
            active_slot: SlotId::A,
            slots: [SlotRecord::default(); 2],
            expected: ImageInfo::default(),
            failed_version: FirmwareVersion::default(),
            installed: ImageInfo::default(),
            validation_start_time: 0,
            boot_attempts: 0,
            rollback_count: 0,
        }
    }
}

impl BackupHeader {
    pub fn slot(&self, id: SlotId) -> &SlotRecord {
        &self.slots[id.index()]
    }

    pub fn slot_mut(&mut self, id: SlotId) -> &mut SlotRecord {
        &mut self.slots[id.index()]
    }

    pub fn validation_pending(&self) -> bool {
        self.validation_start_time != 0
    }

    pub(crate) fn clear_validation(&mut self) {
        self.validation_start_time = 0;
        self.boot_attempts = 0;
    }

    /// Encode followed by the CRC32 of the encoded bytes, 0xFF padded.
    pub(crate) fn encode(&self, buf: &mut [u8; HEADER_BUF_LEN]) -> Option<()> {
        buf.fill(0xFF);
        let used = postcard::to_slice(self, &mut buf[..HEADER_BUF_LEN - CRC_LEN]).ok()?.len();
        let crc = CRC32.checksum(&buf[..used]);
        buf[used..used + CRC_LEN].copy_from_slice(&crc.to_le_bytes());
        Some(())
    }

    /// `None` for erased, torn or foreign content.
    pub(crate) fn decode(buf: &[u8]) -> Option<Self> {
        let (header, rest) = postcard::take_from_bytes::<Self>(buf).ok()?;
        let used = buf.len() - rest.len();
        let stored = rest.get(..CRC_LEN)?;
        let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
        if stored != CRC32.checksum(&buf[..used]) {
            return None;
        }
        if header.magic != BACKUP_HEADER_MAGIC || header.version != BACKUP_HEADER_VERSION {
            return None;
        }
        Some(header)
    }
}
