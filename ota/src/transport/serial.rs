// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Serial link: postcard messages in COBS frames.

use embedded_storage::nor_flash::NorFlash;
use ota_protocol::{OtaCommand, OtaResponse};
use postcard::accumulator::{CobsAccumulator, FeedResult};
use postcard::to_slice_cobs;

use super::dispatch;
use crate::cipher::BackupCipher;
use crate::observer::OtaObserver;
use crate::platform::Platform;
use crate::session::OtaController;

/// Large enough for any COBS encoded [`OtaResponse`].
pub const RESPONSE_BUF_LEN: usize = 32;

/// Reassembles commands from a byte stream. `N` bounds one encoded command.
pub struct SerialLink<const N: usize> {
    acc: CobsAccumulator<N>,
}

impl<const N: usize> Default for SerialLink<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SerialLink<N> {
    pub const fn new() -> Self {
        Self {
            acc: CobsAccumulator::new(),
        }
    }

    /// Feed received bytes. `sink` gets one COBS frame per complete command.
    pub fn feed<E, I, C, P, O>(
        &mut self,
        bytes: &[u8],
        ctrl: &mut OtaController<'_, E, I, C, P, O>,
        mut sink: impl FnMut(&[u8]),
    ) where
        E: NorFlash,
        I: NorFlash,
        C: BackupCipher,
        P: Platform,
        O: OtaObserver,
    {
        let mut window = bytes;
        while !window.is_empty() {
            window = match self.acc.feed_ref::<OtaCommand<'_>>(window) {
                FeedResult::Consumed => break,
                FeedResult::OverFull(rest) => {
                    warn!("serial: frame overfull");
                    respond(&OtaResponse::Malformed, &mut sink);
                    rest
                }
                FeedResult::DeserError(rest) => {
                    warn!("serial: undecodable frame");
                    respond(&OtaResponse::Malformed, &mut sink);
                    rest
                }
                FeedResult::Success { data, remaining } => {
                    let resp = dispatch(ctrl, data);
                    respond(&resp, &mut sink);
                    remaining
                }
            };
        }
    }
}

fn respond(resp: &OtaResponse, sink: &mut impl FnMut(&[u8])) {
    let mut buf = [0u8; RESPONSE_BUF_LEN];
    match to_slice_cobs(resp, &mut buf) {
        Ok(frame) => sink(frame),
        Err(_) => error!("serial: response does not fit"),
    }
}
