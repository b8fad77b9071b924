// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Firmware update sub-protocol.
//! The same logical commands travel over the serial link (postcard + COBS),
//! the short-range GATT service ([`ble`]) and the long-range radio ([`radio`]).

#![no_std]

use core::fmt;
use serde::{Deserialize, Serialize};

pub mod ble;
pub mod radio;

#[cfg(test)]
mod tests;

pub use consts::COBS_MAX_MSG_SIZE;

/// Firmware version as `major.minor.patch`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl FirmwareVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self { major, minor, patch }
    }

    /// Parse `"1.2.3"`. Every component must fit in a byte.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { major, minor, patch })
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// State of the update engine as reported to the initiating app.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OtaState {
    /// No update in progress
    #[default]
    Idle,
    /// Saving the running firmware into a backup slot
    BackingUp,
    /// Accepting chunks into the staging area
    Receiving,
    /// Checking the staged image against the announced CRC
    Verifying,
    /// Copying the staged image into program flash
    Applying,
    /// New image applied, waiting for the reset
    PendingReboot,
    /// Running a new image that has not confirmed itself yet
    PendingConfirm,
    /// Last session failed, see the error code
    Error,
}

impl OtaState {
    /// An update session owns the storage in these states.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::BackingUp | Self::Receiving | Self::Verifying | Self::Applying | Self::PendingReboot
        )
    }
}

impl fmt::Display for OtaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::BackingUp => "backing up",
            Self::Receiving => "receiving",
            Self::Verifying => "verifying",
            Self::Applying => "applying",
            Self::PendingReboot => "pending reboot",
            Self::PendingConfirm => "pending confirm",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Error codes surfaced to the initiating app.
///
/// The numbering is part of the wire format and must not be reordered.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ErrorCode {
    AlreadyInProgress = 1,
    BackupFailed = 2,
    FlashErase = 3,
    FlashWrite = 4,
    InvalidChunk = 5,
    CrcMismatch = 6,
    SizeMismatch = 7,
    SignatureInvalid = 8,
    InternalFlashError = 9,
    NotStarted = 10,
    Timeout = 11,
    FlashRead = 12,
    InvalidLayout = 13,
}

impl ErrorCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::AlreadyInProgress,
            2 => Self::BackupFailed,
            3 => Self::FlashErase,
            4 => Self::FlashWrite,
            5 => Self::InvalidChunk,
            6 => Self::CrcMismatch,
            7 => Self::SizeMismatch,
            8 => Self::SignatureInvalid,
            9 => Self::InternalFlashError,
            10 => Self::NotStarted,
            11 => Self::Timeout,
            12 => Self::FlashRead,
            13 => Self::InvalidLayout,
            _ => return None,
        })
    }
}

/// Commands sent by the app to the device.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub enum OtaCommand<'a> {
    /// Announce a new image
    Start { size: u32, crc32: u32, version: FirmwareVersion },
    /// Image bytes starting at `offset`
    Chunk { offset: u32, data: &'a [u8] },
    /// All chunks sent, verify and apply. The CRC, when present, is checked again.
    Finish { crc32: Option<u32> },
    /// Drop the current session
    Abort,
    /// Query state and progress
    Status,
    /// The running image works, keep it
    Confirm,
}

/// Acknowledgments sent by the device.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OtaResponse {
    /// Session started, chunks may follow
    Ready,
    /// Chunk accepted
    Ack { progress: u8 },
    /// Image verified and applied, the device resets next
    Complete,
    /// Session dropped
    Aborted,
    /// Running image confirmed
    Confirmed,
    /// Answer to [`OtaCommand::Status`]
    Status { state: OtaState, progress: u8, error: Option<ErrorCode> },
    /// The command failed
    Error(ErrorCode),
    /// The frame could not be decoded
    Malformed,
}

/// Failure to decode a transport frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// Frame shorter than its fixed fields
    Truncated,
    /// Unknown message identifier
    UnknownMessage(u8),
    /// Payload larger than the link allows
    Oversized,
    /// Output buffer too small
    BufferTooSmall,
    /// Field value out of range
    InvalidField,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "frame truncated"),
            Self::UnknownMessage(id) => write!(f, "unknown message id {id:#04x}"),
            Self::Oversized => write!(f, "payload exceeds link maximum"),
            Self::BufferTooSmall => write!(f, "output buffer too small"),
            Self::InvalidField => write!(f, "invalid field value"),
        }
    }
}

pub(crate) fn read_u32(bytes: &[u8], at: usize) -> Result<u32, DecodeError> {
    let raw = bytes.get(at..at + 4).ok_or(DecodeError::Truncated)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}
