// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use ota_protocol::OtaState;

/// Receives session events, typically to notify the initiating app.
pub trait OtaObserver {
    /// Phase change.
    fn on_state(&mut self, _state: OtaState) {}

    /// Progress in percent, emitted in coarse steps.
    fn on_progress(&mut self, _percent: u8) {}

    /// `finish()` completed, successfully or not.
    fn on_complete(&mut self, _success: bool) {}
}

impl OtaObserver for () {}
