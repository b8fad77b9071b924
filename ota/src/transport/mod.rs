// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Bindings between the wire sub-protocol and the session controller.
//!
//! Every transport decodes its framing into an [`OtaCommand`] and hands it to
//! [`dispatch`]. After answering `Complete` the transport flushes the answer
//! and calls [`OtaController::reboot`].

pub mod ble;
pub mod radio;
pub mod serial;

use embedded_storage::nor_flash::NorFlash;
use ota_protocol::{OtaCommand, OtaResponse};

use crate::cipher::BackupCipher;
use crate::observer::OtaObserver;
use crate::platform::Platform;
use crate::session::OtaController;

/// Run one command against the controller.
pub fn dispatch<E, I, C, P, O>(ctrl: &mut OtaController<'_, E, I, C, P, O>, cmd: OtaCommand<'_>) -> OtaResponse
where
    E: NorFlash,
    I: NorFlash,
    C: BackupCipher,
    P: Platform,
    O: OtaObserver,
{
    let result = match cmd {
        OtaCommand::Start { size, crc32, version } => ctrl.start(size, crc32, version).map(|()| OtaResponse::Ready),
        OtaCommand::Chunk { offset, data } => ctrl.write_chunk(offset, data).map(|()| OtaResponse::Ack {
            progress: ctrl.progress(),
        }),
        OtaCommand::Finish { crc32: Some(crc32) } => ctrl.finish_with_crc(crc32).map(|()| OtaResponse::Complete),
        OtaCommand::Finish { crc32: None } => ctrl.finish().map(|()| OtaResponse::Complete),
        OtaCommand::Abort => {
            ctrl.abort();
            Ok(OtaResponse::Aborted)
        }
        OtaCommand::Status => Ok(OtaResponse::Status {
            state: ctrl.status(),
            progress: ctrl.progress(),
            error: ctrl.last_error().map(Into::into),
        }),
        OtaCommand::Confirm => ctrl.confirm().map(|()| OtaResponse::Confirmed),
    };
    result.unwrap_or_else(|err| OtaResponse::Error(err.into()))
}
