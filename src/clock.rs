/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Clock`] through which the algorithm thread reads time.
//!
//! Round and request deadlines are plain [`Instant`]s compared against `Clock::now`. Tests drive the
//! consensus engine and the downloader with a clock they advance by hand.

use std::time::{Instant, SystemTime};

pub trait Clock: Send + 'static {
    /// Monotonic time, used for deadlines.
    fn now(&self) -> Instant;

    /// Wall-clock time, used for block timestamps and events.
    fn system_time(&self) -> SystemTime;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}
