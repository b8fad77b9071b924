// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Long-range radio binding.
//!
//! Frames are `[message id][payload]`, multi-byte fields little-endian. The
//! identifiers below are reserved in the fleet-wide radio numbering scheme.
//! Chunks are addressed by index, `offset = index * RADIO_MAX_CHUNK`.

use crate::{read_u32, DecodeError, ErrorCode, FirmwareVersion, OtaCommand, OtaResponse, OtaState};
pub use consts::{RADIO_MAX_CHUNK, RADIO_MAX_FRAME};

pub const MSG_OTA_START: u8 = 0x50;
pub const MSG_OTA_CHUNK: u8 = 0x51;
pub const MSG_OTA_FINISH: u8 = 0x52;
pub const MSG_OTA_ABORT: u8 = 0x53;
pub const MSG_OTA_STATUS: u8 = 0x54;
pub const MSG_OTA_CONFIRM: u8 = 0x55;
pub const MSG_OTA_RESPONSE: u8 = 0x5F;

const START_LEN: usize = 1 + 4 + 4 + 3;
const CHUNK_HEADER_LEN: usize = 1 + 2;

const RESP_READY: u8 = 0;
const RESP_ACK: u8 = 1;
const RESP_COMPLETE: u8 = 2;
const RESP_ABORTED: u8 = 3;
const RESP_CONFIRMED: u8 = 4;
const RESP_STATUS: u8 = 5;
const RESP_ERROR: u8 = 6;
const RESP_MALFORMED: u8 = 7;

/// Decode a command frame received over the radio.
pub fn decode_command(frame: &[u8]) -> Result<OtaCommand<'_>, DecodeError> {
    let (&id, payload) = frame.split_first().ok_or(DecodeError::Truncated)?;
    if frame.len() > RADIO_MAX_FRAME {
        return Err(DecodeError::Oversized);
    }
    match id {
        MSG_OTA_START => {
            if frame.len() < START_LEN {
                return Err(DecodeError::Truncated);
            }
            Ok(OtaCommand::Start {
                size: read_u32(payload, 0)?,
                crc32: read_u32(payload, 4)?,
                version: FirmwareVersion::new(payload[8], payload[9], payload[10]),
            })
        }
        MSG_OTA_CHUNK => {
            if frame.len() < CHUNK_HEADER_LEN {
                return Err(DecodeError::Truncated);
            }
            let index = u16::from_le_bytes([payload[0], payload[1]]);
            let data = &payload[2..];
            if data.len() > RADIO_MAX_CHUNK {
                return Err(DecodeError::Oversized);
            }
            Ok(OtaCommand::Chunk {
                offset: u32::from(index) * RADIO_MAX_CHUNK as u32,
                data,
            })
        }
        MSG_OTA_FINISH => {
            let crc32 = if payload.is_empty() { None } else { Some(read_u32(payload, 0)?) };
            Ok(OtaCommand::Finish { crc32 })
        }
        MSG_OTA_ABORT => Ok(OtaCommand::Abort),
        MSG_OTA_STATUS => Ok(OtaCommand::Status),
        MSG_OTA_CONFIRM => Ok(OtaCommand::Confirm),
        other => Err(DecodeError::UnknownMessage(other)),
    }
}

/// Encode a command into `buf`, returning the frame.
pub fn encode_command<'b>(cmd: &OtaCommand<'_>, buf: &'b mut [u8]) -> Result<&'b [u8], DecodeError> {
    let mut w = Writer::new(buf);
    match cmd {
        OtaCommand::Start { size, crc32, version } => {
            w.put(&[MSG_OTA_START])?;
            w.put(&size.to_le_bytes())?;
            w.put(&crc32.to_le_bytes())?;
            w.put(&[version.major, version.minor, version.patch])?;
        }
        OtaCommand::Chunk { offset, data } => {
            if data.len() > RADIO_MAX_CHUNK {
                return Err(DecodeError::Oversized);
            }
            if offset % RADIO_MAX_CHUNK as u32 != 0 {
                return Err(DecodeError::InvalidField);
            }
            let index = u16::try_from(offset / RADIO_MAX_CHUNK as u32).map_err(|_| DecodeError::InvalidField)?;
            w.put(&[MSG_OTA_CHUNK])?;
            w.put(&index.to_le_bytes())?;
            w.put(data)?;
        }
        OtaCommand::Finish { crc32 } => {
            w.put(&[MSG_OTA_FINISH])?;
            if let Some(crc) = crc32 {
                w.put(&crc.to_le_bytes())?;
            }
        }
        OtaCommand::Abort => w.put(&[MSG_OTA_ABORT])?,
        OtaCommand::Status => w.put(&[MSG_OTA_STATUS])?,
        OtaCommand::Confirm => w.put(&[MSG_OTA_CONFIRM])?,
    }
    Ok(w.finish())
}

/// Encode an acknowledgment frame.
pub fn encode_response<'b>(resp: &OtaResponse, buf: &'b mut [u8]) -> Result<&'b [u8], DecodeError> {
    let mut w = Writer::new(buf);
    w.put(&[MSG_OTA_RESPONSE])?;
    match *resp {
        OtaResponse::Ready => w.put(&[RESP_READY])?,
        OtaResponse::Ack { progress } => w.put(&[RESP_ACK, progress])?,
        OtaResponse::Complete => w.put(&[RESP_COMPLETE])?,
        OtaResponse::Aborted => w.put(&[RESP_ABORTED])?,
        OtaResponse::Confirmed => w.put(&[RESP_CONFIRMED])?,
        OtaResponse::Status { state, progress, error } => {
            let code = error.map(|e| e as u8).unwrap_or(0);
            w.put(&[RESP_STATUS, state_to_u8(state), progress, code])?;
        }
        OtaResponse::Error(code) => w.put(&[RESP_ERROR, code as u8])?,
        OtaResponse::Malformed => w.put(&[RESP_MALFORMED])?,
    }
    Ok(w.finish())
}

/// Decode an acknowledgment frame (app side).
pub fn decode_response(frame: &[u8]) -> Result<OtaResponse, DecodeError> {
    match frame {
        [MSG_OTA_RESPONSE, RESP_READY, ..] => Ok(OtaResponse::Ready),
        [MSG_OTA_RESPONSE, RESP_ACK, progress, ..] => Ok(OtaResponse::Ack { progress: *progress }),
        [MSG_OTA_RESPONSE, RESP_COMPLETE, ..] => Ok(OtaResponse::Complete),
        [MSG_OTA_RESPONSE, RESP_ABORTED, ..] => Ok(OtaResponse::Aborted),
        [MSG_OTA_RESPONSE, RESP_CONFIRMED, ..] => Ok(OtaResponse::Confirmed),
        [MSG_OTA_RESPONSE, RESP_STATUS, state, progress, code, ..] => Ok(OtaResponse::Status {
            state: state_from_u8(*state).ok_or(DecodeError::InvalidField)?,
            progress: *progress,
            error: ErrorCode::from_u8(*code),
        }),
        [MSG_OTA_RESPONSE, RESP_ERROR, code, ..] => {
            Ok(OtaResponse::Error(ErrorCode::from_u8(*code).ok_or(DecodeError::InvalidField)?))
        }
        [MSG_OTA_RESPONSE, RESP_MALFORMED, ..] => Ok(OtaResponse::Malformed),
        [MSG_OTA_RESPONSE] | [] => Err(DecodeError::Truncated),
        [MSG_OTA_RESPONSE, ..] => Err(DecodeError::InvalidField),
        [other, ..] => Err(DecodeError::UnknownMessage(*other)),
    }
}

fn state_to_u8(state: OtaState) -> u8 {
    match state {
        OtaState::Idle => 0,
        OtaState::BackingUp => 1,
        OtaState::Receiving => 2,
        OtaState::Verifying => 3,
        OtaState::Applying => 4,
        OtaState::PendingReboot => 5,
        OtaState::PendingConfirm => 6,
        OtaState::Error => 7,
    }
}

fn state_from_u8(raw: u8) -> Option<OtaState> {
    Some(match raw {
        0 => OtaState::Idle,
        1 => OtaState::BackingUp,
        2 => OtaState::Receiving,
        3 => OtaState::Verifying,
        4 => OtaState::Applying,
        5 => OtaState::PendingReboot,
        6 => OtaState::PendingConfirm,
        7 => OtaState::Error,
        _ => return None,
    })
}

struct Writer<'b> {
    buf: &'b mut [u8],
    len: usize,
}

impl<'b> Writer<'b> {
    fn new(buf: &'b mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        let end = self.len + bytes.len();
        if end > RADIO_MAX_FRAME {
            return Err(DecodeError::Oversized);
        }
        self.buf
            .get_mut(self.len..end)
            .ok_or(DecodeError::BufferTooSmall)?
            .copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    fn finish(self) -> &'b [u8] {
        let Writer { buf, len } = self;
        &buf[..len]
    }
}
