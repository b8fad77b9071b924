// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Small devices and a fake platform shared by the unit tests.

use core::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

use crate::cipher::HmacCtrCipher;
use crate::layout::{FlashLayout, Region};
use crate::mem_flash::MemFlash;
use crate::platform::Platform;
use crate::suspend::TaskControl;

pub type Ext = MemFlash<16384, 1024, 4>;
pub type App = MemFlash<4096, 512, 4>;

pub const APP_BASE: usize = 1024;
pub const APP_LEN: u32 = 3072;

pub fn layout() -> FlashLayout {
    FlashLayout {
        header: Region::new(0, 1024),
        slot_a: Region::new(1024, 3072),
        slot_b: Region::new(4096, 3072),
        staging: Region::new(7168, 3072),
        application: Region::new(APP_BASE as u32, APP_LEN),
    }
}

pub fn cipher() -> HmacCtrCipher {
    HmacCtrCipher::new(b"test device key").unwrap()
}

pub fn image(len: usize, seed: u8) -> std::vec::Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Application store with `bytes` installed at the application base.
pub fn app_with(bytes: &[u8]) -> App {
    let mut app = App::new();
    app.load(APP_BASE, bytes);
    app
}

pub struct TestPlatform {
    pub now: u32,
    pub delayed_ms: u32,
}

impl TestPlatform {
    pub fn new(now: u32) -> Self {
        Self { now, delayed_ms: 0 }
    }
}

impl Platform for TestPlatform {
    fn uptime_secs(&self) -> u32 {
        self.now
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delayed_ms += ms;
    }

    fn system_reset(&mut self) -> ! {
        panic!("system reset")
    }
}

/// Run `f` and check that it ends in [`TestPlatform::system_reset`].
pub fn expect_reset(f: impl FnOnce()) {
    let payload = panic::catch_unwind(AssertUnwindSafe(f)).expect_err("no reset");
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| String::from(*s))
        .or_else(|| payload.downcast_ref::<String>().cloned());
    assert_eq!(message.as_deref(), Some("system reset"));
}

#[derive(Default)]
pub struct Tasks {
    pub suspended: Cell<bool>,
    pub suspends: Cell<u32>,
    pub resumes: Cell<u32>,
}

impl TaskControl for Tasks {
    fn suspend_all(&self) {
        self.suspended.set(true);
        self.suspends.set(self.suspends.get() + 1);
    }

    fn resume_all(&self) {
        self.suspended.set(false);
        self.resumes.set(self.resumes.get() + 1);
    }
}
