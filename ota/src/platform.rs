// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

/// Clock, delay and reset of the device running the engine.
pub trait Platform {
    /// Monotonic seconds since boot.
    fn uptime_secs(&self) -> u32;

    fn delay_ms(&mut self, ms: u32);

    /// Hard reset. Never returns.
    fn system_reset(&mut self) -> !;
}

#[cfg(feature = "cortex-m")]
pub use self::cortex::CortexMPlatform;

#[cfg(feature = "cortex-m")]
mod cortex {
    use embassy_time::{block_for, Duration, Instant};

    /// Cortex-M target with an embassy time driver.
    #[derive(Default)]
    pub struct CortexMPlatform;

    impl super::Platform for CortexMPlatform {
        fn uptime_secs(&self) -> u32 {
            Instant::now().as_secs() as u32
        }

        fn delay_ms(&mut self, ms: u32) {
            block_for(Duration::from_millis(ms.into()));
        }

        fn system_reset(&mut self) -> ! {
            cortex_m::peripheral::SCB::sys_reset()
        }
    }
}
