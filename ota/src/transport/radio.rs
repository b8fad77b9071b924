// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use embedded_storage::nor_flash::NorFlash;
use ota_protocol::radio::{decode_command, encode_response};
use ota_protocol::{DecodeError, OtaResponse};

use super::dispatch;
use crate::cipher::BackupCipher;
use crate::observer::OtaObserver;
use crate::platform::Platform;
use crate::session::OtaController;

/// Handle one long-range radio frame, returning the response frame.
pub fn on_frame<'b, E, I, C, P, O>(
    ctrl: &mut OtaController<'_, E, I, C, P, O>,
    frame: &[u8],
    out: &'b mut [u8],
) -> Result<&'b [u8], DecodeError>
where
    E: NorFlash,
    I: NorFlash,
    C: BackupCipher,
    P: Platform,
    O: OtaObserver,
{
    let resp = match decode_command(frame) {
        Ok(cmd) => dispatch(ctrl, cmd),
        Err(err) => {
            warn!("radio: {}", err);
            OtaResponse::Malformed
        }
    };
    encode_response(&resp, out)
}
