// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Where the engine keeps things on the two storage devices.

use consts::{
    APP_SIZE, BACKUP_HEADER_ADDR, BACKUP_HEADER_SIZE, BACKUP_SLOT_A_ADDR, BACKUP_SLOT_B_ADDR, BACKUP_SLOT_SIZE,
    BASE_APP_ADDR, COPY_BUFFER_SIZE, STAGING_ADDR, STAGING_SIZE,
};
use embedded_storage::nor_flash::NorFlash;

use crate::backup::{SlotId, HEADER_BUF_LEN};
use crate::flash::MAX_WRITE_SIZE;
use crate::OtaError;

/// A contiguous range of one storage device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    pub offset: u32,
    pub size: u32,
}

impl Region {
    pub const fn new(offset: u32, size: u32) -> Self {
        Self { offset, size }
    }

    /// First address past the region, `None` if it wraps the address space.
    pub fn end(&self) -> Option<u32> {
        self.offset.checked_add(self.size)
    }

    fn overlaps(&self, other: &Region) -> bool {
        self.offset < other.offset.saturating_add(other.size) && other.offset < self.offset.saturating_add(self.size)
    }

    fn is_aligned(&self, unit: usize) -> bool {
        let unit = unit as u32;
        unit != 0 && self.offset % unit == 0 && self.size % unit == 0
    }
}

/// Placement of the header, the backup slots and the staging area on the
/// external flash, and of the application on the internal flash.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashLayout {
    pub header: Region,
    pub slot_a: Region,
    pub slot_b: Region,
    pub staging: Region,
    pub application: Region,
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self {
            header: Region::new(BACKUP_HEADER_ADDR, BACKUP_HEADER_SIZE),
            slot_a: Region::new(BACKUP_SLOT_A_ADDR, BACKUP_SLOT_SIZE),
            slot_b: Region::new(BACKUP_SLOT_B_ADDR, BACKUP_SLOT_SIZE),
            staging: Region::new(STAGING_ADDR, STAGING_SIZE),
            application: Region::new(BASE_APP_ADDR, APP_SIZE),
        }
    }
}

impl FlashLayout {
    pub fn slot(&self, id: SlotId) -> Region {
        match id {
            SlotId::A => self.slot_a,
            SlotId::B => self.slot_b,
        }
    }

    /// Largest image the engine can take: it must fit the staging area, the
    /// application store and a backup slot.
    pub fn max_image_size(&self) -> u32 {
        self.staging
            .size
            .min(self.application.size)
            .min(self.slot_a.size)
            .min(self.slot_b.size)
    }

    /// Validate the layout against the two devices.
    pub fn check<E: NorFlash, I: NorFlash>(&self, ext: &E, app: &I) -> Result<(), OtaError> {
        let write_ok = |write: usize| write != 0 && write <= MAX_WRITE_SIZE && COPY_BUFFER_SIZE % write == 0;
        if !write_ok(E::WRITE_SIZE) || !write_ok(I::WRITE_SIZE) || HEADER_BUF_LEN % E::WRITE_SIZE != 0 {
            error!("layout: unsupported write granularity");
            return Err(OtaError::InvalidLayout);
        }

        let external = [self.header, self.slot_a, self.slot_b, self.staging];
        for (i, region) in external.iter().enumerate() {
            let fits = region.end().is_some_and(|end| end as usize <= ext.capacity());
            if region.size == 0 || !fits || !region.is_aligned(E::ERASE_SIZE) {
                error!("layout: external region {} misplaced", i);
                return Err(OtaError::InvalidLayout);
            }
            if external[i + 1..].iter().any(|other| region.overlaps(other)) {
                error!("layout: external region {} overlaps", i);
                return Err(OtaError::InvalidLayout);
            }
        }

        let app_fits = self
            .application
            .end()
            .is_some_and(|end| end as usize <= app.capacity());
        if self.application.size == 0 || !app_fits || !self.application.is_aligned(I::ERASE_SIZE) {
            error!("layout: application region misplaced");
            return Err(OtaError::InvalidLayout);
        }

        if (self.header.size as usize) < HEADER_BUF_LEN
            || self.slot_a.size < self.application.size
            || self.slot_b.size < self.application.size
        {
            error!("layout: header or slots too small");
            return Err(OtaError::InvalidLayout);
        }
        Ok(())
    }
}
