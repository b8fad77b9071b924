// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Constants shared by the OTA engine, the wire protocol and the host tool.
//!
//! Two storage devices take part in an update:
//! - the external SPI NOR flash, holding the backup header, the two encrypted
//!   backup slots and the staging area for in-flight images;
//! - the internal program flash the application executes from.

#![no_std]

/// Erase unit of the external NOR flash.
pub const EXT_FLASH_SECTOR: u32 = 4096;

/// Total size of the external NOR flash (2 MiB part).
pub const EXT_FLASH_SIZE: u32 = 0x20_0000;

/// Offset of the sector holding the backup header.
pub const BACKUP_HEADER_ADDR: u32 = 0x0000;

/// The header owns exactly one erase unit.
pub const BACKUP_HEADER_SIZE: u32 = EXT_FLASH_SECTOR;

/// Offset of backup slot A.
pub const BACKUP_SLOT_A_ADDR: u32 = 0x1000;

/// Offset of backup slot B.
pub const BACKUP_SLOT_B_ADDR: u32 = 0x11000;

/// Size of one backup slot. Must hold a full application image.
pub const BACKUP_SLOT_SIZE: u32 = 0x10000;

/// Offset of the staging area where incoming images are assembled.
pub const STAGING_ADDR: u32 = 0x21000;

/// Size of the staging area.
pub const STAGING_SIZE: u32 = 0x10000;

/// Size of a flash memory page of the internal program flash (4KB).
pub const FLASH_PAGE: u32 = 4096;

/// Base address for the application in internal flash, after the SoftDevice.
pub const BASE_APP_ADDR: u32 = 0x19000;

/// Size of the application area in internal flash (52KB).
pub const APP_SIZE: u32 = 0xD000;

/// Magic number at the start of the backup header ("OTAB").
pub const BACKUP_HEADER_MAGIC: u32 = 0x4F54_4142;

/// Layout revision of the backup header.
pub const BACKUP_HEADER_VERSION: u8 = 1;

/// Seconds a freshly applied image has to confirm itself before it is rolled back.
pub const VALIDATION_WINDOW_SECS: u32 = 30;

/// Boots granted to an unconfirmed image before the next boot rolls it back.
pub const MAX_UNCONFIRMED_BOOTS: u8 = 1;

/// Delay before reset so a final acknowledgment can leave the radio.
pub const REBOOT_GRACE_MS: u32 = 500;

/// A session with no accepted chunk for this long is failed with a timeout.
pub const SESSION_TIMEOUT_SECS: u32 = 60;

/// Working buffer for flash-to-flash copies and CRC passes.
pub const COPY_BUFFER_SIZE: usize = 256;

/// Progress notifications are emitted every this many percent.
pub const PROGRESS_STEP: u8 = 10;

/// Maximum Transfer Unit (MTU) size for BLE communication.
pub const ATT_MTU: usize = 247;

/// Largest GATT write payload (ATT header removed).
pub const BLE_MAX_PAYLOAD: usize = ATT_MTU - 3;

/// Largest frame the long-range radio carries.
pub const RADIO_MAX_FRAME: usize = 222;

/// Largest firmware payload in one radio chunk frame.
pub const RADIO_MAX_CHUNK: usize = 200;

/// Maximum message size serialized or deserialized by `postcard` on the serial link.
pub const COBS_MAX_MSG_SIZE: usize = 512;
