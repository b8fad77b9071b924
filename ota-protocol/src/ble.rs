// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Short-range GATT binding.
//!
//! One service with three characteristics:
//! - control (write): postcard encoded [`OtaCommand`] other than chunks
//! - data (write without response): `offset: u32 LE` followed by image bytes
//! - status (notify): postcard encoded [`OtaResponse`]

use crate::{read_u32, DecodeError, OtaCommand, OtaResponse};
pub use consts::BLE_MAX_PAYLOAD;

pub const OTA_SERVICE_UUID: u128 = 0x4F54_0001_9A2B_4C5D_8E6F_0A1B2C3D4E5F;
pub const CONTROL_CHAR_UUID: u128 = 0x4F54_0002_9A2B_4C5D_8E6F_0A1B2C3D4E5F;
pub const DATA_CHAR_UUID: u128 = 0x4F54_0003_9A2B_4C5D_8E6F_0A1B2C3D4E5F;
pub const STATUS_CHAR_UUID: u128 = 0x4F54_0004_9A2B_4C5D_8E6F_0A1B2C3D4E5F;

/// Bytes in front of the image data in a data characteristic write.
pub const DATA_HEADER_LEN: usize = 4;

/// Largest image payload in one data write.
pub const MAX_CHUNK: usize = BLE_MAX_PAYLOAD - DATA_HEADER_LEN;

/// Decode a write to the data characteristic.
pub fn decode_data_write(value: &[u8]) -> Result<OtaCommand<'_>, DecodeError> {
    if value.len() > BLE_MAX_PAYLOAD {
        return Err(DecodeError::Oversized);
    }
    let offset = read_u32(value, 0)?;
    Ok(OtaCommand::Chunk {
        offset,
        data: &value[DATA_HEADER_LEN..],
    })
}

/// Build a data characteristic value.
pub fn encode_data_write<'b>(offset: u32, data: &[u8], buf: &'b mut [u8]) -> Result<&'b [u8], DecodeError> {
    if data.len() > MAX_CHUNK {
        return Err(DecodeError::Oversized);
    }
    let len = DATA_HEADER_LEN + data.len();
    let out = buf.get_mut(..len).ok_or(DecodeError::BufferTooSmall)?;
    out[..DATA_HEADER_LEN].copy_from_slice(&offset.to_le_bytes());
    out[DATA_HEADER_LEN..].copy_from_slice(data);
    Ok(out)
}

/// Decode a write to the control characteristic.
pub fn decode_control_write(value: &[u8]) -> Result<OtaCommand<'_>, DecodeError> {
    if value.len() > BLE_MAX_PAYLOAD {
        return Err(DecodeError::Oversized);
    }
    postcard::from_bytes(value).map_err(|_| DecodeError::InvalidField)
}

/// Build a control characteristic value.
pub fn encode_control<'b>(cmd: &OtaCommand<'_>, buf: &'b mut [u8]) -> Result<&'b [u8], DecodeError> {
    let out = postcard::to_slice(cmd, buf).map_err(|_| DecodeError::BufferTooSmall)?;
    if out.len() > BLE_MAX_PAYLOAD {
        return Err(DecodeError::Oversized);
    }
    Ok(out)
}

/// Build a status notification.
pub fn encode_status<'b>(resp: &OtaResponse, buf: &'b mut [u8]) -> Result<&'b [u8], DecodeError> {
    postcard::to_slice(resp, buf)
        .map(|out| &*out)
        .map_err(|_| DecodeError::BufferTooSmall)
}

/// Decode a status notification (app side).
pub fn decode_status(value: &[u8]) -> Result<OtaResponse, DecodeError> {
    postcard::from_bytes(value).map_err(|_| DecodeError::InvalidField)
}
