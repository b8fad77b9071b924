// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! OTA session controller.
//!
//! `Idle -> BackingUp -> Receiving -> Verifying -> Applying -> PendingReboot`,
//! then a reset. After the reset the new image runs in `PendingConfirm` until
//! it calls [`OtaController::confirm`]. The application store is only written
//! by [`OtaController::finish`] once the staged image passed its CRC check.


use consts::PROGRESS_STEP;
use embedded_storage::nor_flash::NorFlash;
use ota_protocol::{FirmwareVersion, OtaState};

use crate::backup::{BackupManager, ImageInfo};
use crate::cipher::BackupCipher;
use crate::flash::{self, erase_prefix, CopyError, StagingWriter};
use crate::observer::OtaObserver;
use crate::platform::Platform;
use crate::suspend::TaskControl;
use crate::OtaError;

/// Read-only view of the running session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionInfo {
    pub expected_size: u32,
    pub expected_crc32: u32,
    pub expected_version: FirmwareVersion,
    /// Contiguous bytes staged from offset 0.
    pub bytes_received: u32,
    /// Accepted chunk writes, retransmissions included.
    pub chunks_received: u32,
    pub start_time: u32,
    pub last_activity: u32,
}

struct Session {
    info: SessionInfo,
    writer: StagingWriter,
    last_step: u8,
}

pub struct OtaController<'a, E, I, C, P, O = ()> {
    ext: E,
    app: I,
    backup: BackupManager<C>,
    platform: P,
    tasks: &'a dyn TaskControl,
    observer: O,
    running_version: FirmwareVersion,
    status: OtaState,
    last_error: Option<OtaError>,
    session: Option<Session>,
}

impl<'a, E, I, C, P, O> OtaController<'a, E, I, C, P, O>
where
    E: NorFlash,
    I: NorFlash,
    C: BackupCipher,
    P: Platform,
    O: OtaObserver,
{
    /// `running_version` describes the image executing now. It is used for the
    /// backup when the header does not know the installed image yet.
    pub fn new(
        ext: E,
        app: I,
        backup: BackupManager<C>,
        platform: P,
        tasks: &'a dyn TaskControl,
        observer: O,
        running_version: FirmwareVersion,
    ) -> Self {
        let status = if backup.validation_pending() {
            OtaState::PendingConfirm
        } else {
            OtaState::Idle
        };
        Self {
            ext,
            app,
            backup,
            platform,
            tasks,
            observer,
            running_version,
            status,
            last_error: None,
            session: None,
        }
    }

    pub fn status(&self) -> OtaState {
        self.status
    }

    /// Cause of the `Error` state.
    pub fn last_error(&self) -> Option<OtaError> {
        self.last_error
    }

    pub fn session(&self) -> Option<SessionInfo> {
        self.session.as_ref().map(|session| session.info)
    }

    pub fn backup(&self) -> &BackupManager<C> {
        &self.backup
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn staging_store(&self) -> &E {
        &self.ext
    }

    pub fn app_store(&self) -> &I {
        &self.app
    }

    /// Give the storage devices back.
    pub fn into_stores(self) -> (E, I) {
        (self.ext, self.app)
    }

    fn set_state(&mut self, state: OtaState) {
        if self.status != state {
            info!("ota: {} -> {}", self.status, state);
            self.status = state;
            self.observer.on_state(state);
        }
    }

    fn fail(&mut self, err: OtaError) -> OtaError {
        error!("ota failed in {}: {}", self.status, err);
        self.last_error = Some(err);
        self.set_state(OtaState::Error);
        self.tasks.resume_all();
        err
    }

    /// Open a session for an image of `size` bytes.
    pub fn start(&mut self, size: u32, crc32: u32, version: FirmwareVersion) -> Result<(), OtaError> {
        let busy = self.status.is_active() || self.backup.validation_pending();
        if busy {
            warn!("start rejected in {}", self.status);
            return Err(OtaError::AlreadyInProgress);
        }
        let capacity = self.backup.layout().max_image_size();
        if size == 0 || size > capacity {
            warn!("image of {} bytes rejected, capacity {}", size, capacity);
            return Err(OtaError::SizeMismatch);
        }

        info!("update to {}: {} bytes, crc {:#x}", version, size, crc32);
        self.last_error = None;
        self.session = None;
        self.set_state(OtaState::BackingUp);
        self.tasks.suspend_all();

        let installed = self.backup.header().installed;
        let (backup_size, backup_version) = if installed.size == 0 {
            (self.backup.layout().application.size, self.running_version)
        } else {
            (installed.size, installed.version)
        };
        if let Err(err) = self.backup.create(&mut self.ext, &mut self.app, backup_size, backup_version) {
            error!("backup failed: {}", err);
            self.abort();
            return Err(OtaError::BackupFailed);
        }

        let staging = self.backup.layout().staging;
        if erase_prefix(&mut self.ext, staging, size).is_err() {
            return Err(self.fail(OtaError::FlashErase));
        }

        let now = self.platform.uptime_secs();
        self.session = Some(Session {
            info: SessionInfo {
                expected_size: size,
                expected_crc32: crc32,
                expected_version: version,
                bytes_received: 0,
                chunks_received: 0,
                start_time: now,
                last_activity: now,
            },
            writer: StagingWriter::new(staging.offset),
            last_step: 0,
        });
        self.set_state(OtaState::Receiving);
        Ok(())
    }

    /// Stage `data` at `offset`.
    ///
    /// Staging is append-only: a chunk must start at or before the end of the
    /// bytes received so far, and any part of it that was already received
    /// must match the staged bytes. Retransmissions are thus accepted while
    /// gaps and conflicting rewrites are `InvalidChunk`.
    pub fn write_chunk(&mut self, offset: u32, data: &[u8]) -> Result<(), OtaError> {
        if self.status != OtaState::Receiving {
            return Err(OtaError::NotStarted);
        }
        let now = self.platform.uptime_secs();
        let Some(session) = self.session.as_mut() else {
            return Err(OtaError::NotStarted);
        };

        let in_range = offset
            .checked_add(data.len() as u32)
            .is_some_and(|end| end <= session.info.expected_size);
        if data.is_empty() || !in_range {
            warn!("chunk {}+{} outside image", offset, data.len());
            return Err(OtaError::InvalidChunk);
        }
        let received = session.writer.len();
        if offset > received {
            warn!("chunk at {} leaves a gap after {}", offset, received);
            return Err(OtaError::InvalidChunk);
        }

        let overlap = ((received - offset) as usize).min(data.len());
        let staged = match session.writer.matches(&mut self.ext, offset, &data[..overlap]) {
            Ok(same) => same,
            Err(_) => return Err(self.fail(OtaError::FlashRead)),
        };
        if !staged {
            warn!("chunk at {} conflicts with staged bytes", offset);
            return Err(OtaError::InvalidChunk);
        }
        if overlap < data.len() && session.writer.append(&mut self.ext, &data[overlap..]).is_err() {
            return Err(self.fail(OtaError::FlashWrite));
        }

        session.info.bytes_received = session.writer.len();
        session.info.chunks_received += 1;
        session.info.last_activity = now;
        trace!("chunk {}+{}, {} received", offset, data.len(), session.info.bytes_received);

        let progress = self.progress();
        let step = progress / PROGRESS_STEP;
        if let Some(session) = self.session.as_mut() {
            if step > session.last_step {
                session.last_step = step;
                self.observer.on_progress(progress);
            }
        }
        Ok(())
    }

    /// Verify the staged image and copy it into the application store.
    ///
    /// On success the device is ready for [`reboot`](Self::reboot); the caller
    /// sends its final acknowledgment first.
    pub fn finish(&mut self) -> Result<(), OtaError> {
        if self.status != OtaState::Receiving {
            return Err(OtaError::NotStarted);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(OtaError::NotStarted);
        };
        let info = session.info;
        if session.writer.len() != info.expected_size {
            warn!("finish with {} of {} bytes", session.writer.len(), info.expected_size);
            return Err(OtaError::SizeMismatch);
        }
        if session.writer.flush(&mut self.ext).is_err() {
            return Err(self.fail(OtaError::FlashWrite));
        }

        self.set_state(OtaState::Verifying);
        let staging = self.backup.layout().staging;
        let crc = match flash::crc32(&mut self.ext, staging.offset, info.expected_size, |_, _| {}) {
            Ok(crc) => crc,
            Err(_) => return Err(self.fail(OtaError::FlashRead)),
        };
        if crc != info.expected_crc32 {
            error!("staged crc {:#x}, expected {:#x}", crc, info.expected_crc32);
            self.observer.on_complete(false);
            return Err(self.fail(OtaError::CrcMismatch));
        }

        // Armed before the application store is touched, so an interrupted
        // apply is rolled back on the following boots.
        let image = ImageInfo {
            size: info.expected_size,
            crc32: info.expected_crc32,
            version: info.expected_version,
        };
        let now = self.platform.uptime_secs();
        if let Err(err) = self.backup.start_validation_timer(&mut self.ext, image, now) {
            return Err(self.fail(err));
        }

        self.set_state(OtaState::Applying);
        let application = self.backup.layout().application;
        if erase_prefix(&mut self.app, application, info.expected_size).is_err() {
            return Err(self.fail(OtaError::InternalFlashError));
        }
        let copied = flash::copy(
            &mut self.ext,
            staging.offset,
            &mut self.app,
            application.offset,
            info.expected_size,
            |_, _| {},
        );
        if let Err(err) = copied {
            let err = match err {
                CopyError::Read => OtaError::FlashRead,
                CopyError::Write => OtaError::InternalFlashError,
            };
            return Err(self.fail(err));
        }

        self.set_state(OtaState::PendingReboot);
        self.observer.on_complete(true);
        info!("{} applied, reboot pending", info.expected_version);
        Ok(())
    }

    /// [`finish`](Self::finish) with the CRC the transport repeats at the end
    /// of the transfer. A CRC other than the announced one fails the session.
    pub fn finish_with_crc(&mut self, crc32: u32) -> Result<(), OtaError> {
        if self.status != OtaState::Receiving {
            return Err(OtaError::NotStarted);
        }
        let announced = self.session.as_ref().map(|session| session.info.expected_crc32);
        if announced.is_some_and(|expected| expected != crc32) {
            error!("finish crc {:#x} differs from start", crc32);
            self.observer.on_complete(false);
            return Err(self.fail(OtaError::CrcMismatch));
        }
        self.finish()
    }

    /// Drop the session. Safe in every state.
    ///
    /// In `PendingConfirm` this only leaves the state: the confirmation window
    /// of the running image stays armed.
    pub fn abort(&mut self) {
        if self.status != OtaState::Idle {
            info!("abort in {}", self.status);
        }
        self.session = None;
        self.last_error = None;
        self.set_state(OtaState::Idle);
        self.tasks.resume_all();
    }

    /// Let the last acknowledgment leave, then reset.
    pub fn reboot(&mut self) -> ! {
        let grace = self.backup.config().reboot_grace_ms;
        info!("rebooting in {} ms", grace);
        self.platform.delay_ms(grace);
        self.platform.system_reset()
    }

    /// The running image works; stop the rollback timer.
    ///
    /// Refused until the new image has booted, so an applied but never run
    /// image keeps its rollback window.
    pub fn confirm(&mut self) -> Result<(), OtaError> {
        if !self.backup.awaiting_confirmation() {
            warn!("confirm rejected in {}", self.status);
            return Err(OtaError::NotStarted);
        }
        self.backup.validate(&mut self.ext)?;
        self.set_state(OtaState::Idle);
        Ok(())
    }

    /// Percent of the image received, 0 without a session.
    pub fn progress(&self) -> u8 {
        self.session.as_ref().map_or(0, |session| {
            let percent = u64::from(session.info.bytes_received) * 100 / u64::from(session.info.expected_size);
            percent.min(100) as u8
        })
    }

    /// Idle watchdog, call periodically while a session runs.
    pub fn poll(&mut self) -> Result<(), OtaError> {
        if !matches!(self.status, OtaState::BackingUp | OtaState::Receiving) {
            return Ok(());
        }
        let now = self.platform.uptime_secs();
        let timeout = self.backup.config().session_timeout_secs;
        let stalled = self
            .session
            .as_ref()
            .is_some_and(|session| now.saturating_sub(session.info.last_activity) >= timeout);
        if stalled {
            warn!("no chunk for {}s", timeout);
            return Err(self.fail(OtaError::Timeout));
        }
        Ok(())
    }

    /// Roll back and reset if the running image missed its confirmation window.
    pub fn check_validation_timeout(&mut self) -> Result<(), OtaError> {
        self.backup
            .check_validation_timeout(&mut self.ext, &mut self.app, &mut self.platform)
    }
}
