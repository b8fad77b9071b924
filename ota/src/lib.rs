// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Over-the-air update engine.
//!
//! Images arrive in chunks over any transport and are assembled in a staging
//! area on the external flash. Before a session starts the running firmware is
//! backed up, encrypted, into one of two slots. Only a staged image that
//! matches its announced CRC is copied into the application store, and a new
//! image that does not confirm itself in time is replaced by its backup.

#![cfg_attr(not(test), no_std)]

// Must go first so the other modules see the logging macros.
mod fmt;

pub mod backup;
pub mod cipher;
mod config;
mod error;
pub(crate) mod flash;
mod layout;
pub mod mem_flash;
pub mod observer;
pub mod platform;
pub mod session;
pub mod suspend;
pub mod transport;

#[cfg(test)]
mod testing;

pub use backup::{BackupManager, BootDecision, SlotId};
pub use cipher::{BackupCipher, HmacCtrCipher};
pub use config::OtaConfig;
pub use error::OtaError;
pub use flash::CRC32;
pub use layout::{FlashLayout, Region};
pub use observer::OtaObserver;
pub use ota_protocol::{ErrorCode, FirmwareVersion, OtaCommand, OtaResponse, OtaState};
pub use platform::Platform;
pub use session::{OtaController, SessionInfo};
pub use suspend::{SuspendCoordinator, TaskCommand, TaskControl, TaskGate};
