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

//! Audio playback commands
//!
//! PLAY AUDIO (10/12/MSF) and PAUSE/RESUME.

use crate::core::audio::AudioStatus;
use crate::core::image::msf_to_lba;
use crate::core::sense::{asc, SenseKey};

use super::{opcode, CmdResult, CommandError, Exec};

/// PLAY AUDIO (10), (12) and MSF: start audio playback of a sector
/// range
pub(super) fn play_audio(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();

    let (start_sector, end_sector) = match cdb[0] {
        opcode::PLAY_AUDIO_10 => {
            let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
            let len = u16::from_be_bytes([cdb[7], cdb[8]]) as u32;
            (lba, lba + len)
        }
        opcode::PLAY_AUDIO_12 => {
            let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
            let len = u32::from_be_bytes([cdb[6], cdb[7], cdb[8], cdb[9]]);
            (lba, lba + len)
        }
        _ => {
            let start = msf_to_lba(cdb[3], cdb[4], cdb[5], true);
            let end = msf_to_lba(cdb[6], cdb[7], cdb[8], true);
            (start as u32, end as u32)
        }
    };

    let disc = ex.disc()?;

    log::debug!(
        "MMC: playing from sector 0x{:X} to sector 0x{:X}",
        start_sector,
        end_sector
    );

    ex.audio
        .start(start_sector as i32, end_sector as i32, disc)
        .map_err(|e| {
            log::debug!("MMC: failed to start audio play");
            CommandError::from(e)
        })?;

    Ok(())
}

/// PAUSE/RESUME: transition between playing and paused
pub(super) fn pause_resume(ex: &mut Exec) -> CmdResult {
    let resume = ex.cdb()[8] & 0x01 != 0;
    let status = ex.audio.status();

    // Requesting a transition that cannot be made is an error; already
    // being in the requested state is not
    if !matches!(status, AudioStatus::Playing | AudioStatus::Paused) {
        log::debug!(
            "MMC: {} requested while in invalid state",
            if resume { "resume" } else { "pause" }
        );
        return Err(CommandError::new(
            SenseKey::IllegalRequest,
            asc::COMMAND_SEQUENCE_ERROR,
        ));
    }

    if resume {
        if status != AudioStatus::Playing {
            ex.audio.resume()?;
        }
    } else if status != AudioStatus::Paused {
        ex.audio.pause()?;
    }

    Ok(())
}
