// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! GATT characteristic handlers. Both return the status notification to send.

use embedded_storage::nor_flash::NorFlash;
use ota_protocol::ble::{decode_control_write, decode_data_write, encode_status};
use ota_protocol::{DecodeError, OtaCommand, OtaResponse};

use super::dispatch;
use crate::cipher::BackupCipher;
use crate::observer::OtaObserver;
use crate::platform::Platform;
use crate::session::OtaController;

/// Write to the control characteristic.
pub fn on_control_write<'b, E, I, C, P, O>(
    ctrl: &mut OtaController<'_, E, I, C, P, O>,
    value: &[u8],
    notify: &'b mut [u8],
) -> Result<&'b [u8], DecodeError>
where
    E: NorFlash,
    I: NorFlash,
    C: BackupCipher,
    P: Platform,
    O: OtaObserver,
{
    let resp = match decode_control_write(value) {
        // Image bytes only travel on the data characteristic
        Ok(OtaCommand::Chunk { .. }) | Err(_) => OtaResponse::Malformed,
        Ok(cmd) => dispatch(ctrl, cmd),
    };
    encode_status(&resp, notify)
}

/// Write to the data characteristic.
pub fn on_data_write<'b, E, I, C, P, O>(
    ctrl: &mut OtaController<'_, E, I, C, P, O>,
    value: &[u8],
    notify: &'b mut [u8],
) -> Result<&'b [u8], DecodeError>
where
    E: NorFlash,
    I: NorFlash,
    C: BackupCipher,
    P: Platform,
    O: OtaObserver,
{
    let resp = match decode_data_write(value) {
        Ok(cmd) => dispatch(ctrl, cmd),
        Err(err) => {
            warn!("ble: bad data write: {}", err);
            OtaResponse::Malformed
        }
    };
    encode_status(&resp, notify)
}
