// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::fmt;
use ota_protocol::ErrorCode;

/// Everything that can go wrong in the update engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OtaError {
    /// A session is already running
    AlreadyInProgress,
    /// The running firmware could not be saved or restored
    BackupFailed,
    /// External flash erase failed
    FlashErase,
    /// External flash program failed
    FlashWrite,
    /// External flash read failed
    FlashRead,
    /// Chunk outside the announced image or conflicting with staged bytes
    InvalidChunk,
    /// Staged image does not hash to the announced CRC
    CrcMismatch,
    /// Image size out of bounds or not fully received
    SizeMismatch,
    /// Reserved for signed images
    SignatureInvalid,
    /// Application store erase, program or read failed
    InternalFlashError,
    /// Operation not valid in the current state
    NotStarted,
    /// Session stalled
    Timeout,
    /// Flash regions misaligned, overlapping or out of bounds
    InvalidLayout,
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInProgress => write!(f, "update already in progress"),
            Self::BackupFailed => write!(f, "firmware backup failed"),
            Self::FlashErase => write!(f, "external flash erase failed"),
            Self::FlashWrite => write!(f, "external flash write failed"),
            Self::FlashRead => write!(f, "external flash read failed"),
            Self::InvalidChunk => write!(f, "invalid chunk"),
            Self::CrcMismatch => write!(f, "image crc mismatch"),
            Self::SizeMismatch => write!(f, "image size mismatch"),
            Self::SignatureInvalid => write!(f, "image signature invalid"),
            Self::InternalFlashError => write!(f, "application flash error"),
            Self::NotStarted => write!(f, "no update session in a state that allows this"),
            Self::Timeout => write!(f, "update session timed out"),
            Self::InvalidLayout => write!(f, "invalid flash layout"),
        }
    }
}

impl From<OtaError> for ErrorCode {
    fn from(err: OtaError) -> Self {
        match err {
            OtaError::AlreadyInProgress => ErrorCode::AlreadyInProgress,
            OtaError::BackupFailed => ErrorCode::BackupFailed,
            OtaError::FlashErase => ErrorCode::FlashErase,
            OtaError::FlashWrite => ErrorCode::FlashWrite,
            OtaError::FlashRead => ErrorCode::FlashRead,
            OtaError::InvalidChunk => ErrorCode::InvalidChunk,
            OtaError::CrcMismatch => ErrorCode::CrcMismatch,
            OtaError::SizeMismatch => ErrorCode::SizeMismatch,
            OtaError::SignatureInvalid => ErrorCode::SignatureInvalid,
            OtaError::InternalFlashError => ErrorCode::InternalFlashError,
            OtaError::NotStarted => ErrorCode::NotStarted,
            OtaError::Timeout => ErrorCode::Timeout,
            OtaError::InvalidLayout => ErrorCode::InvalidLayout,
        }
    }
}
