// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use consts::{MAX_UNCONFIRMED_BOOTS, REBOOT_GRACE_MS, SESSION_TIMEOUT_SECS, VALIDATION_WINDOW_SECS};

/// Runtime tunables of the engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OtaConfig {
    /// Time a new image has to call `confirm()` once it runs.
    pub validation_window_secs: u32,
    /// Grace delay before the post-apply reset.
    pub reboot_grace_ms: u32,
    /// Idle time after which a receiving session fails with `Timeout`.
    pub session_timeout_secs: u32,
    /// Boots an unconfirmed image gets before the next one rolls back.
    pub max_unconfirmed_boots: u8,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            validation_window_secs: VALIDATION_WINDOW_SECS,
            reboot_grace_ms: REBOOT_GRACE_MS,
            session_timeout_secs: SESSION_TIMEOUT_SECS,
            max_unconfirmed_boots: MAX_UNCONFIRMED_BOOTS,
        }
    }
}
