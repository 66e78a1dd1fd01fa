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

//! MMC-3 packet command dispatcher and handlers
//!
//! The dispatcher looks up the opcode in the command table, stops audio
//! playback for commands that disturb it, and runs the handler with the
//! device state locked. Handlers return `Err(CommandError)` on failure;
//! the dispatcher writes the carried sense data into the output buffer
//! and reports CHECK CONDITION.
//!
//! All multi-byte fields on the wire are big-endian.

mod audio;
mod general;
mod mode;
mod read;
mod toc;

use std::sync::atomic::AtomicU32;

use crate::core::audio::AudioEngine;
use crate::core::device::DeviceState;
use crate::core::error::DaemonError;
use crate::core::image::{Disc, SectorType};
use crate::core::sense::{asc, status, SenseData, SenseKey};

use std::sync::Arc;

/// SCSI packet command opcodes
pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const INQUIRY: u8 = 0x12;
    pub const MODE_SELECT_6: u8 = 0x15;
    pub const MODE_SENSE_6: u8 = 0x1A;
    pub const START_STOP_UNIT: u8 = 0x1B;
    pub const PREVENT_ALLOW_MEDIUM_REMOVAL: u8 = 0x1E;
    pub const READ_CAPACITY: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const SEEK_10: u8 = 0x2B;
    pub const READ_SUBCHANNEL: u8 = 0x42;
    pub const READ_TOC_PMA_ATIP: u8 = 0x43;
    pub const PLAY_AUDIO_10: u8 = 0x45;
    pub const GET_CONFIGURATION: u8 = 0x46;
    pub const PLAY_AUDIO_MSF: u8 = 0x47;
    pub const GET_EVENT_STATUS_NOTIFICATION: u8 = 0x4A;
    pub const PAUSE_RESUME: u8 = 0x4B;
    pub const READ_DISC_INFORMATION: u8 = 0x51;
    pub const READ_TRACK_INFORMATION: u8 = 0x52;
    pub const MODE_SELECT_10: u8 = 0x55;
    pub const MODE_SENSE_10: u8 = 0x5A;
    pub const REPORT_KEY: u8 = 0xA4;
    pub const PLAY_AUDIO_12: u8 = 0xA5;
    pub const READ_12: u8 = 0xA8;
    pub const READ_DVD_STRUCTURE: u8 = 0xAD;
    pub const READ_CD_MSF: u8 = 0xB9;
    pub const SET_CD_SPEED: u8 = 0xBB;
    pub const READ_CD: u8 = 0xBE;
}

/// One packet command as received from the kernel
pub struct Command<'a> {
    /// CDB, zero-padded to 12 bytes
    pub cdb: [u8; 12],
    /// Initiator-to-device data (MODE SELECT parameter lists)
    pub input: &'a [u8],
    /// Device-to-initiator data
    pub output: &'a mut [u8],
}

/// Failure of a command handler, carrying the sense to report
#[derive(Debug, Clone, Copy)]
pub(crate) struct CommandError(SenseData);

impl CommandError {
    pub(crate) fn new(sense_key: SenseKey, asc_ascq: u16) -> Self {
        Self(SenseData::new(sense_key, asc_ascq))
    }

    pub(crate) fn with_info(sense_key: SenseKey, asc_ascq: u16, ili: bool, info: u32) -> Self {
        Self(SenseData::with_info(sense_key, asc_ascq, ili, info))
    }
}

impl From<DaemonError> for CommandError {
    fn from(err: DaemonError) -> Self {
        match err {
            DaemonError::AudioInvalidState => {
                Self::new(SenseKey::IllegalRequest, asc::COMMAND_SEQUENCE_ERROR)
            }
            DaemonError::DeviceLocked => {
                Self::new(SenseKey::NotReady, asc::MEDIUM_REMOVAL_PREVENTED)
            }
            _ => Self::new(SenseKey::IllegalRequest, asc::INVALID_FIELD_IN_CDB),
        }
    }
}

pub(crate) type CmdResult = Result<(), CommandError>;

/// Execution context of one command
pub(crate) struct Exec<'a, 'b> {
    pub state: &'a mut DeviceState,
    pub audio: &'a AudioEngine,
    pub cursor: &'a AtomicU32,
    pub cmd: &'a mut Command<'b>,
    /// Bytes committed to the output buffer so far
    pub out_len: usize,
}

impl Exec<'_, '_> {
    /// The (padded) CDB
    pub fn cdb(&self) -> [u8; 12] {
        self.cmd.cdb
    }

    /// The loaded disc, or the MEDIUM NOT PRESENT error
    pub fn disc(&self) -> Result<Arc<Disc>, CommandError> {
        self.state.disc.clone().ok_or_else(|| {
            log::debug!("MMC: medium not present");
            CommandError::new(SenseKey::NotReady, asc::MEDIUM_NOT_PRESENT)
        })
    }

    /// Zero the scratch buffer
    pub fn flush_buffer(&mut self) {
        let len = self.state.buffer_len;
        self.state.buffer[..len].fill(0);
        self.state.buffer_len = 0;
    }

    /// Copy initiator data into the scratch buffer
    pub fn read_buffer(&mut self, length: usize) {
        let len = self.cmd.input.len().min(length).min(self.state.buffer.len());
        log::trace!("Kernel I/O: copying {} bytes from IN buffer", len);
        self.state.buffer[..len].copy_from_slice(&self.cmd.input[..len]);
        self.state.buffer_len = len;
    }

    /// Commit scratch buffer contents to the output
    ///
    /// Transfers `min(buffer_len, length)` bytes, truncated to the space
    /// the initiator allotted.
    pub fn write_buffer(&mut self, length: usize) {
        let mut len = self.state.buffer_len.min(length);
        if self.out_len + len > self.cmd.output.len() {
            log::debug!("Kernel I/O: OUT buffer too small, truncating");
            len = self.cmd.output.len() - self.out_len;
        }
        log::trace!(
            "Kernel I/O: copying {} bytes to OUT buffer at offset {}",
            len,
            self.out_len
        );
        self.cmd.output[self.out_len..self.out_len + len]
            .copy_from_slice(&self.state.buffer[..len]);
        self.out_len += len;
    }

    /// Write sense data as the whole response
    pub fn write_sense(&mut self, sense: SenseData) {
        let bytes = sense.to_bytes();
        let len = bytes.len().min(self.cmd.output.len());
        self.cmd.output[..len].copy_from_slice(&bytes[..len]);
        self.out_len = len;
    }
}

/// Map the MMC expected-sector-type field to the internal sector type
///
/// Returns `None` for "all types"; any unknown value is INVALID FIELD IN
/// CDB.
pub(crate) fn map_expected_sector_type(code: u8) -> Result<Option<SectorType>, CommandError> {
    match code {
        0 => Ok(None),
        1 => Ok(Some(SectorType::Audio)),
        2 => Ok(Some(SectorType::Mode1)),
        3 => Ok(Some(SectorType::Mode2)),
        4 => Ok(Some(SectorType::Mode2Form1)),
        5 => Ok(Some(SectorType::Mode2Form2)),
        _ => Err(CommandError::new(
            SenseKey::IllegalRequest,
            asc::INVALID_FIELD_IN_CDB,
        )),
    }
}

/// The READ CD main-channel-selection rewrite matrix
///
/// Indexed by the current MCSB value (rows) and the sector type being
/// read (columns 1-5: audio, mode 1, mode 2 formless, mode 2 form 1,
/// mode 2 form 2); the first column holds the row's MCSB value. A -1
/// cell marks a combination the drive rejects.
#[rustfmt::skip]
static MCSB_MATRIX: [[i16; 6]; 32] = [
    [0x00,  0x00, 0x00, 0x00, 0x00, 0x00],
    [0x08,  0x10, 0x08, 0x10, 0x10, 0x10],
    [0x10,  0x10, 0x10, 0x10, 0x10, 0x10],
    [0x18,  0x10, 0x18, 0x10, 0x18, 0x18],
    [0x20,  0x10, 0x20, 0x20, 0x20, 0x20],
    [0x28,  0x10,   -1,   -1,   -1,   -1],
    [0x30,  0x10, 0x30, 0x30,   -1,   -1],
    [0x38,  0x10, 0x38, 0x30,   -1,   -1],
    [0x40,  0x10, 0x00, 0x00, 0x40, 0x40],
    [0x48,  0x10,   -1,   -1,   -1,   -1],
    [0x50,  0x10, 0x10, 0x10, 0x50, 0x50],
    [0x58,  0x10, 0x18, 0x10, 0x58, 0x58],
    [0x60,  0x10, 0x20, 0x20, 0x60, 0x60],
    [0x68,  0x10,   -1,   -1,   -1,   -1],
    [0x70,  0x10, 0x30, 0x30, 0x70, 0x70],
    [0x78,  0x10, 0x38, 0x38, 0x78, 0x78],
    [0x80,  0x10, 0x80, 0x80, 0x80, 0x80],
    [0x88,  0x10,   -1,   -1,   -1,   -1],
    [0x90,  0x10,   -1,   -1,   -1,   -1],
    [0x98,  0x10,   -1,   -1,   -1,   -1],
    [0xA0,  0x10, 0xA0, 0xA0, 0xA0, 0xA0],
    [0xA8,  0x10,   -1,   -1,   -1,   -1],
    [0xB0,  0x10, 0xB0, 0xB0,   -1,   -1],
    [0xB8,  0x10, 0xB8, 0xB0,   -1,   -1],
    [0xC0,  0x10,   -1,   -1,   -1,   -1],
    [0xC8,  0x10,   -1,   -1,   -1,   -1],
    [0xD0,  0x10,   -1,   -1,   -1,   -1],
    [0xD8,  0x10,   -1,   -1,   -1,   -1],
    [0xE0,  0x10, 0xA0, 0xA0, 0xE0, 0xE0],
    [0xE8,  0x10,   -1,   -1,   -1,   -1],
    [0xF0,  0x10, 0xB0, 0xB0, 0xF0, 0xF0],
    [0xF8,  0x10, 0xB8, 0xB8, 0xF8, 0xF8],
];

/// Rewrite the MCSB byte in place for the sector type being read
///
/// Returns `Err` for combinations the matrix rejects.
pub(crate) fn map_mcsb(byte9: &mut u8, kind: SectorType) -> Result<(), ()> {
    let column = match kind {
        SectorType::Audio => 1,
        SectorType::Mode1 => 2,
        SectorType::Mode2 | SectorType::Mode2Mixed => 3,
        SectorType::Mode2Form1 => 4,
        SectorType::Mode2Form2 => 5,
    };

    let cur = *byte9 & 0xF8;
    for row in MCSB_MATRIX.iter() {
        if row[0] == cur as i16 {
            let new = row[column];
            if new == -1 {
                return Err(());
            }
            *byte9 = (*byte9 & 0x07) | new as u8;
            return Ok(());
        }
    }
    Err(())
}

type Handler = fn(&mut Exec) -> CmdResult;

struct CommandEntry {
    opcode: u8,
    name: &'static str,
    handler: Handler,
    disturbs_audio: bool,
}

/// The packet command table
static COMMANDS: &[CommandEntry] = &[
    CommandEntry {
        opcode: opcode::TEST_UNIT_READY,
        name: "TEST UNIT READY",
        handler: general::test_unit_ready,
        disturbs_audio: false,
    },
    CommandEntry {
        opcode: opcode::REQUEST_SENSE,
        name: "REQUEST SENSE",
        handler: general::request_sense,
        disturbs_audio: false,
    },
    CommandEntry {
        opcode: opcode::INQUIRY,
        name: "INQUIRY",
        handler: general::inquiry,
        disturbs_audio: false,
    },
    CommandEntry {
        opcode: opcode::MODE_SELECT_6,
        name: "MODE SELECT (6)",
        handler: mode::mode_select,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::MODE_SENSE_6,
        name: "MODE SENSE (6)",
        handler: mode::mode_sense,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::START_STOP_UNIT,
        name: "START/STOP UNIT",
        handler: general::start_stop_unit,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::PREVENT_ALLOW_MEDIUM_REMOVAL,
        name: "PREVENT/ALLOW MEDIUM REMOVAL",
        handler: general::prevent_allow_medium_removal,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::READ_CAPACITY,
        name: "READ CAPACITY",
        handler: read::read_capacity,
        disturbs_audio: false,
    },
    CommandEntry {
        opcode: opcode::READ_10,
        name: "READ (10)",
        handler: read::read,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::SEEK_10,
        name: "SEEK (10)",
        handler: general::seek,
        disturbs_audio: false,
    },
    CommandEntry {
        opcode: opcode::READ_SUBCHANNEL,
        name: "READ SUBCHANNEL",
        handler: read::read_subchannel,
        disturbs_audio: false,
    },
    CommandEntry {
        opcode: opcode::READ_TOC_PMA_ATIP,
        name: "READ TOC/PMA/ATIP",
        handler: toc::read_toc_pma_atip,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::PLAY_AUDIO_10,
        name: "PLAY AUDIO (10)",
        handler: audio::play_audio,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::GET_CONFIGURATION,
        name: "GET CONFIGURATION",
        handler: mode::get_configuration,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::PLAY_AUDIO_MSF,
        name: "PLAY AUDIO MSF",
        handler: audio::play_audio,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::GET_EVENT_STATUS_NOTIFICATION,
        name: "GET EVENT/STATUS NOTIFICATION",
        handler: general::get_event_status_notification,
        disturbs_audio: false,
    },
    CommandEntry {
        opcode: opcode::PAUSE_RESUME,
        name: "PAUSE/RESUME",
        handler: audio::pause_resume,
        disturbs_audio: false,
    },
    CommandEntry {
        opcode: opcode::READ_DISC_INFORMATION,
        name: "READ DISC INFORMATION",
        handler: toc::read_disc_information,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::READ_TRACK_INFORMATION,
        name: "READ TRACK INFORMATION",
        handler: toc::read_track_information,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::MODE_SELECT_10,
        name: "MODE SELECT (10)",
        handler: mode::mode_select,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::MODE_SENSE_10,
        name: "MODE SENSE (10)",
        handler: mode::mode_sense,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::REPORT_KEY,
        name: "REPORT KEY",
        handler: toc::report_key,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::PLAY_AUDIO_12,
        name: "PLAY AUDIO (12)",
        handler: audio::play_audio,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::READ_12,
        name: "READ (12)",
        handler: read::read,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::READ_DVD_STRUCTURE,
        name: "READ DVD STRUCTURE",
        handler: toc::read_dvd_structure,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::READ_CD_MSF,
        name: "READ CD MSF",
        handler: read::read_cd,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::SET_CD_SPEED,
        name: "SET CD SPEED",
        handler: general::set_cd_speed,
        disturbs_audio: true,
    },
    CommandEntry {
        opcode: opcode::READ_CD,
        name: "READ CD",
        handler: read::read_cd,
        disturbs_audio: true,
    },
];

/// Execute one packet command against the locked device state
///
/// Returns the SCSI status and the number of output bytes produced.
pub(crate) fn execute(
    state: &mut DeviceState,
    audio: &AudioEngine,
    cursor: &AtomicU32,
    cmd: &mut Command,
) -> (u32, usize) {
    // Fresh scratch buffer for every command
    state.buffer.fill(0);
    state.buffer_len = 0;

    let cdb = cmd.cdb;
    log::debug!(
        "MMC: {:02X} {:02X} {:02X} {:02X} {:02X} {:02X} {:02X} {:02X} {:02X} {:02X} {:02X} {:02X}",
        cdb[0], cdb[1], cdb[2], cdb[3], cdb[4], cdb[5],
        cdb[6], cdb[7], cdb[8], cdb[9], cdb[10], cdb[11]
    );

    let Some(entry) = COMMANDS.iter().find(|e| e.opcode == cdb[0]) else {
        log::debug!("MMC: packet command {:02X}h not implemented", cdb[0]);
        let mut ex = Exec {
            state,
            audio,
            cursor,
            cmd,
            out_len: 0,
        };
        ex.write_sense(SenseData::new(
            SenseKey::IllegalRequest,
            asc::INVALID_COMMAND_OPERATION_CODE,
        ));
        return (status::CHECK_CONDITION, ex.out_len);
    };

    log::debug!("MMC: command: {}", entry.name);

    // Every command that disturbs audio play observes a quiescent engine
    if entry.disturbs_audio {
        audio.stop_if_active();
    }

    let mut ex = Exec {
        state,
        audio,
        cursor,
        cmd,
        out_len: 0,
    };

    let result = match (entry.handler)(&mut ex) {
        Ok(()) => status::GOOD,
        Err(CommandError(sense)) => {
            ex.write_sense(sense);
            status::CHECK_CONDITION
        }
    };

    log::debug!("MMC: command completed with status {}", result);
    (result, ex.out_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_table_has_no_duplicate_opcodes() {
        for (i, a) in COMMANDS.iter().enumerate() {
            for b in &COMMANDS[i + 1..] {
                assert_ne!(a.opcode, b.opcode, "{} vs {}", a.name, b.name);
            }
        }
    }

    #[test]
    fn test_sector_type_mapping() {
        assert_eq!(map_expected_sector_type(0).unwrap(), None);
        assert_eq!(
            map_expected_sector_type(1).unwrap(),
            Some(SectorType::Audio)
        );
        assert_eq!(
            map_expected_sector_type(5).unwrap(),
            Some(SectorType::Mode2Form2)
        );
        assert!(map_expected_sector_type(6).is_err());
    }

    #[test]
    fn test_mcsb_audio_identity() {
        // User-data-only MCSB is idempotent for audio sectors
        let mut byte9 = 0x10;
        map_mcsb(&mut byte9, SectorType::Audio).unwrap();
        assert_eq!(byte9, 0x10);
    }

    #[test]
    fn test_mcsb_rewrites_for_audio() {
        // Any main-channel selection collapses to full sector for audio
        let mut byte9 = 0xF8;
        map_mcsb(&mut byte9, SectorType::Audio).unwrap();
        assert_eq!(byte9, 0x10);
    }

    #[test]
    fn test_mcsb_preserves_low_bits() {
        let mut byte9 = 0xF8 | 0x02;
        map_mcsb(&mut byte9, SectorType::Mode1).unwrap();
        assert_eq!(byte9, 0xB8 | 0x02);
    }

    #[test]
    fn test_mcsb_rejects_invalid_combination() {
        let mut byte9 = 0x28;
        assert!(map_mcsb(&mut byte9, SectorType::Mode1).is_err());
    }
}
