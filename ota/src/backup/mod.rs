// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Backup & rollback manager.
//!
//! Keeps encrypted copies of previously running firmware in two slots on the
//! external flash and a single header describing them. The header is the only
//! state shared across resets: it is rewritten as a unit and guarded by a CRC,
//! so a torn write reads back as "no header" rather than as garbage.

mod header;

use core::convert::Infallible;

use embedded_storage::nor_flash::NorFlash;
use ota_protocol::FirmwareVersion;

pub use self::header::{BackupHeader, ImageInfo, SlotId, SlotRecord, SlotStatus, HEADER_BUF_LEN};
use crate::cipher::BackupCipher;
use crate::flash::{self, erase_prefix, CopyError, CRC32};
use crate::platform::Platform;
use crate::{FlashLayout, OtaConfig, OtaError};

/// Outcome of the boot-time check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootDecision {
    /// Nothing pending
    Normal,
    /// Running an unconfirmed image, the validation window is open
    TrialBoot,
    /// The unconfirmed image was replaced by a backup, reset required
    RolledBack,
}

pub struct BackupManager<C> {
    layout: FlashLayout,
    config: OtaConfig,
    cipher: C,
    header: BackupHeader,
}

impl<C: BackupCipher> BackupManager<C> {
    /// Read the header and check the layout against both devices.
    ///
    /// Missing or corrupt headers are replaced by a fresh one, which is only
    /// written back on the next state change.
    pub fn load<E: NorFlash, I: NorFlash>(
        ext: &mut E,
        app: &I,
        layout: FlashLayout,
        config: OtaConfig,
        cipher: C,
    ) -> Result<Self, OtaError> {
        layout.check(ext, app)?;

        let mut buf = [0u8; HEADER_BUF_LEN];
        ext.read(layout.header.offset, &mut buf).map_err(|_| OtaError::FlashRead)?;
        let header = BackupHeader::decode(&buf).unwrap_or_else(|| {
            warn!("backup header missing or corrupt, starting fresh");
            BackupHeader::default()
        });
        debug!(
            "backup header: active {:?}, pending {}, rollbacks {}",
            header.active_slot,
            header.validation_pending(),
            header.rollback_count
        );

        Ok(Self {
            layout,
            config,
            cipher,
            header,
        })
    }

    pub fn header(&self) -> &BackupHeader {
        &self.header
    }

    pub fn layout(&self) -> &FlashLayout {
        &self.layout
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    pub fn validation_pending(&self) -> bool {
        self.header.validation_pending()
    }

    /// A pending image that has booted at least once and may be confirmed.
    pub fn awaiting_confirmation(&self) -> bool {
        self.header.validation_pending() && self.header.boot_attempts >= 1
    }

    pub fn rollback_count(&self) -> u32 {
        self.header.rollback_count
    }

    fn nonce(&self, slot: SlotId) -> u64 {
        ((slot.index() as u64) << 32) | u64::from(self.header.slot(slot).generation)
    }

    fn persist<E: NorFlash>(&self, ext: &mut E) -> Result<(), OtaError> {
        let mut buf = [0xFF; HEADER_BUF_LEN];
        self.header.encode(&mut buf).ok_or(OtaError::FlashWrite)?;
        let region = self.layout.header;
        ext.erase(region.offset, region.offset + region.size)
            .map_err(|_| OtaError::FlashErase)?;
        ext.write(region.offset, &buf).map_err(|_| OtaError::FlashWrite)
    }

    /// Back up the first `size` bytes of the application store into the slot
    /// opposite the active one.
    pub fn create<E: NorFlash, I: NorFlash>(
        &mut self,
        ext: &mut E,
        app: &mut I,
        size: u32,
        version: FirmwareVersion,
    ) -> Result<SlotId, OtaError> {
        let target = self.header.active_slot.other();
        if size == 0 || size > self.layout.slot(target).size || size > self.layout.application.size {
            error!("backup of {} bytes does not fit", size);
            return Err(OtaError::BackupFailed);
        }

        let record = self.header.slot_mut(target);
        record.status = SlotStatus::Pending;
        record.image = ImageInfo {
            size,
            crc32: 0,
            version,
        };
        record.generation = record.generation.wrapping_add(1);
        self.persist(ext).map_err(|_| OtaError::BackupFailed)?;

        info!("backing up {} ({} bytes) into slot {:?}", version, size, target);
        match self.write_slot(ext, app, target, size) {
            Ok(crc32) => {
                let record = self.header.slot_mut(target);
                record.status = SlotStatus::Valid;
                record.image.crc32 = crc32;
                self.persist(ext).map_err(|_| OtaError::BackupFailed)?;
                Ok(target)
            }
            Err(err) => {
                error!("backup into slot {:?} failed: {}", target, err);
                self.header.slot_mut(target).status = SlotStatus::Failed;
                let _ = self.persist(ext);
                Err(OtaError::BackupFailed)
            }
        }
    }

    /// Encrypting copy, returns the CRC32 of the plaintext.
    fn write_slot<E: NorFlash, I: NorFlash>(
        &self,
        ext: &mut E,
        app: &mut I,
        slot: SlotId,
        size: u32,
    ) -> Result<u32, OtaError> {
        let region = self.layout.slot(slot);
        let nonce = self.nonce(slot);
        erase_prefix(ext, region, size).map_err(|_| OtaError::FlashErase)?;

        let mut digest = CRC32.digest();
        flash::copy(app, self.layout.application.offset, ext, region.offset, size, |offset, buf| {
            digest.update(buf);
            self.cipher.encrypt_in_place(nonce, offset, buf);
        })
        .map_err(|err| match err {
            CopyError::Read => OtaError::InternalFlashError,
            CopyError::Write => OtaError::FlashWrite,
        })?;
        Ok(digest.finalize())
    }

    /// Arm the confirmation window for a freshly applied image.
    pub fn start_validation_timer<E: NorFlash>(
        &mut self,
        ext: &mut E,
        expected: ImageInfo,
        now: u32,
    ) -> Result<(), OtaError> {
        info!("validation armed for {}", expected.version);
        self.header.expected = expected;
        self.header.validation_start_time = now.max(1);
        self.header.boot_attempts = 0;
        self.persist(ext)
    }

    /// The window only runs once the new image has booted.
    pub fn validation_expired(&self, now: u32) -> bool {
        self.header.validation_pending()
            && self.header.boot_attempts >= 1
            && now.saturating_sub(self.header.validation_start_time) > self.config.validation_window_secs
    }

    /// Polled by the running application. Rolls back and resets once the
    /// window has passed without a confirmation.
    pub fn check_validation_timeout<E: NorFlash, I: NorFlash, P: Platform>(
        &mut self,
        ext: &mut E,
        app: &mut I,
        platform: &mut P,
    ) -> Result<(), OtaError> {
        if !self.validation_expired(platform.uptime_secs()) {
            return Ok(());
        }
        warn!(
            "{} not confirmed within {}s",
            self.header.expected.version, self.config.validation_window_secs
        );
        self.restore(ext, app, platform).map(|never| match never {})
    }

    /// The running image is good: the slot holding its predecessor becomes the
    /// active backup.
    ///
    /// Only an image that went through [`boot_check`](Self::boot_check) can be
    /// confirmed.
    pub fn validate<E: NorFlash>(&mut self, ext: &mut E) -> Result<(), OtaError> {
        if !self.awaiting_confirmation() {
            return Err(OtaError::NotStarted);
        }
        let backup = self.header.active_slot.other();
        self.header.active_slot = backup;
        self.header.slot_mut(backup).status = SlotStatus::Valid;
        self.header.installed = self.header.expected;
        self.header.clear_validation();
        info!("{} confirmed, active backup now slot {:?}", self.header.installed.version, backup);
        self.persist(ext)
    }

    /// Boot-time decision without the reset.
    ///
    /// An unconfirmed image gets `max_unconfirmed_boots` boots, each of which
    /// re-stamps the validation window. The boot after that rolls back.
    pub fn boot_check<E: NorFlash, I: NorFlash>(
        &mut self,
        ext: &mut E,
        app: &mut I,
        now: u32,
    ) -> Result<BootDecision, OtaError> {
        if !self.header.validation_pending() {
            return Ok(BootDecision::Normal);
        }
        if self.header.boot_attempts >= self.config.max_unconfirmed_boots {
            warn!(
                "{} booted {} times without confirming",
                self.header.expected.version, self.header.boot_attempts
            );
            self.rollback(ext, app)?;
            return Ok(BootDecision::RolledBack);
        }
        self.header.boot_attempts += 1;
        self.header.validation_start_time = now.max(1);
        self.persist(ext)?;
        info!("trial boot of {}", self.header.expected.version);
        Ok(BootDecision::TrialBoot)
    }

    /// Run early at boot, before anything else touches the stores.
    pub fn check_rollback<E: NorFlash, I: NorFlash, P: Platform>(
        &mut self,
        ext: &mut E,
        app: &mut I,
        platform: &mut P,
    ) -> Result<BootDecision, OtaError> {
        match self.boot_check(ext, app, platform.uptime_secs())? {
            BootDecision::RolledBack => platform.system_reset(),
            decision => Ok(decision),
        }
    }

    /// Put a backup back into the application store and update the header.
    ///
    /// The inactive slot holds the image that ran before the last update and
    /// is tried first; the active slot is the fallback. A slot is verified
    /// before the application store is erased.
    pub fn rollback<E: NorFlash, I: NorFlash>(&mut self, ext: &mut E, app: &mut I) -> Result<SlotId, OtaError> {
        let inactive = self.header.active_slot.other();
        let mut source = None;
        for slot in [inactive, self.header.active_slot] {
            let record = *self.header.slot(slot);
            if record.status != SlotStatus::Valid
                || record.image.size == 0
                || record.image.size > self.layout.application.size
            {
                continue;
            }
            if self.verify_slot(ext, slot)? {
                source = Some(slot);
                break;
            }
            warn!("slot {:?} fails verification", slot);
            self.header.slot_mut(slot).status = SlotStatus::Failed;
        }

        let Some(slot) = source else {
            error!("no usable backup, keeping the current image");
            self.header.clear_validation();
            self.persist(ext)?;
            return Err(OtaError::BackupFailed);
        };

        let image = self.header.slot(slot).image;
        warn!("restoring {} from slot {:?}", image.version, slot);
        self.write_application(ext, app, slot, image)?;

        self.header.rollback_count = self.header.rollback_count.wrapping_add(1);
        self.header.failed_version = self.header.expected.version;
        self.header.installed = image;
        self.header.clear_validation();
        self.persist(ext)?;
        Ok(slot)
    }

    /// Restore and reset.
    pub fn restore<E: NorFlash, I: NorFlash, P: Platform>(
        &mut self,
        ext: &mut E,
        app: &mut I,
        platform: &mut P,
    ) -> Result<Infallible, OtaError> {
        self.rollback(ext, app)?;
        platform.system_reset()
    }

    fn verify_slot<E: NorFlash>(&self, ext: &mut E, slot: SlotId) -> Result<bool, OtaError> {
        let record = self.header.slot(slot);
        let nonce = self.nonce(slot);
        let crc = flash::crc32(ext, self.layout.slot(slot).offset, record.image.size, |offset, buf| {
            self.cipher.decrypt_in_place(nonce, offset, buf)
        })
        .map_err(|_| OtaError::FlashRead)?;
        Ok(crc == record.image.crc32)
    }

    fn write_application<E: NorFlash, I: NorFlash>(
        &self,
        ext: &mut E,
        app: &mut I,
        slot: SlotId,
        image: ImageInfo,
    ) -> Result<(), OtaError> {
        let region = self.layout.application;
        let nonce = self.nonce(slot);

        // Also clear whatever the failed image left past the restored one
        let span = image.size.max(self.header.expected.size);
        erase_prefix(app, region, span).map_err(|_| OtaError::InternalFlashError)?;

        flash::copy(ext, self.layout.slot(slot).offset, app, region.offset, image.size, |offset, buf| {
            self.cipher.decrypt_in_place(nonce, offset, buf)
        })
        .map_err(|err| match err {
            CopyError::Read => OtaError::FlashRead,
            CopyError::Write => OtaError::InternalFlashError,
        })?;

        let crc = flash::crc32(app, region.offset, image.size, |_, _| {}).map_err(|_| OtaError::InternalFlashError)?;
        if crc != image.crc32 {
            error!("restored image reads back with crc {:#x}", crc);
            return Err(OtaError::InternalFlashError);
        }
        Ok(())
    }
}
