// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Read delay emulation
//!
//! Optionally paces READ commands so that copy-protection software
//! measuring read timing sees plausible values. Two sources contribute
//! to the per-read time budget:
//!
//! - DPM emulation: the angular distance covered by the read, from the
//!   disc's position measurement table, at a nominal rotation speed
//! - Transfer-rate emulation: sectors read divided by the current read
//!   speed from the capabilities mode page
//!
//! The budget is accumulated at `begin` and slept off at `finalize`,
//! after the actual work; emulation never affects command results.

use std::time::{Duration, Instant};

use crate::core::image::Disc;

/// Nominal disc rotation rate used for DPM pacing (rotations per second)
const ROTATION_RATE: f64 = 12.0;

/// Bytes per second corresponding to a read-speed unit of 1 kB/s
const SPEED_UNIT: f64 = 1000.0;

/// Delay emulator state for one read command
#[derive(Debug)]
pub struct DelayEmulator {
    begin: Option<Instant>,
    budget: Duration,
}

impl DelayEmulator {
    /// Create an idle delay emulator
    pub fn new() -> Self {
        Self {
            begin: None,
            budget: Duration::ZERO,
        }
    }

    /// Record the start of a read of `num_sectors` sectors at `start`
    ///
    /// `dpm` and `tr` select the enabled emulation modes; `read_speed` is
    /// the current read speed in kB/s from the capabilities page.
    pub fn begin(&mut self, disc: &Disc, start: i32, num_sectors: i32, dpm: bool, tr: bool, read_speed: u16) {
        self.begin = Some(Instant::now());
        self.budget = Duration::ZERO;

        if dpm {
            if let (Some(angle), Some(end_angle)) = (
                disc.sector_angle(start),
                disc.sector_angle(start + num_sectors),
            ) {
                let turns = (end_angle - angle).abs();
                self.budget += Duration::from_secs_f64(turns / ROTATION_RATE);
            }
        }

        if tr && read_speed > 0 {
            let bytes = num_sectors as f64 * 2048.0;
            self.budget += Duration::from_secs_f64(bytes / (read_speed as f64 * SPEED_UNIT));
        }
    }

    /// Sleep off the positive residual of the accumulated budget
    pub fn finalize(&mut self) {
        let Some(begin) = self.begin.take() else {
            return;
        };

        let elapsed = begin.elapsed();
        if self.budget > elapsed {
            let residual = self.budget - elapsed;
            log::trace!("Delay: sleeping {} us", residual.as_micros());
            std::thread::sleep(residual);
        }
        self.budget = Duration::ZERO;
    }
}

impl Default for DelayEmulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::{DiscBuilder, DpmTable, MediumType, SectorType};

    fn dpm_disc() -> Disc {
        DiscBuilder::new(MediumType::Cd)
            .data_track(SectorType::Mode1, 100)
            .dpm(DpmTable {
                start: 0,
                resolution: 10,
                entries: (0..11).map(|i| i * 256).collect(),
            })
            .finish()
    }

    #[test]
    fn test_finalize_without_begin_is_noop() {
        let mut delay = DelayEmulator::new();
        let start = Instant::now();
        delay.finalize();
        assert!(start.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn test_disabled_emulation_has_no_budget() {
        let disc = dpm_disc();
        let mut delay = DelayEmulator::new();
        delay.begin(&disc, 0, 50, false, false, 0x1B90);

        let start = Instant::now();
        delay.finalize();
        assert!(start.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn test_dpm_budget_sleeps() {
        let disc = dpm_disc();
        let mut delay = DelayEmulator::new();
        // 50 sectors = 5 turns = ~417 ms at 12 rotations/s... keep it
        // short: 2 sectors = 0.2 turns = ~16 ms
        delay.begin(&disc, 0, 2, true, false, 0x1B90);

        let start = Instant::now();
        delay.finalize();
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_tr_budget_sleeps() {
        let disc = dpm_disc();
        let mut delay = DelayEmulator::new();
        // 10 sectors at 1000 kB/s = ~20 ms
        delay.begin(&disc, 0, 10, false, true, 1000);

        let start = Instant::now();
        delay.finalize();
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
