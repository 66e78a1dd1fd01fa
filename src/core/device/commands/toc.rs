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

//! Table-of-contents and disc information commands
//!
//! READ TOC/PMA/ATIP, READ DISC INFORMATION, READ TRACK INFORMATION,
//! READ DVD STRUCTURE and REPORT KEY.

use crate::core::device::Profile;
use crate::core::image::{lba_to_msf, SectorType, Session, Track};
use crate::core::sense::{asc, SenseKey};

use super::{CmdResult, CommandError, Exec};

/// Standard lead-in length, used to approximate the last session's
/// lead-in address
const LEADIN_LENGTH: i32 = 4500;

/// Write a 4-byte address field as either (H)MSF or big-endian LBA
fn write_address(buf: &mut [u8], lba: i32, msf: bool) {
    if msf {
        let (m, s, f) = lba_to_msf(lba, true);
        buf[0] = 0;
        buf[1] = m;
        buf[2] = s;
        buf[3] = f;
    } else {
        buf.copy_from_slice(&(lba as u32).to_be_bytes());
    }
}

/// READ TOC/PMA/ATIP: formatted TOC, multisession info, raw TOC, ATIP
/// and CD-TEXT forms
pub(super) fn read_toc_pma_atip(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();
    let msf = cdb[1] & 0x02 != 0;
    let mut format = cdb[2] & 0x0F;
    let number = cdb[6];
    let alloc_len = u16::from_be_bytes([cdb[7], cdb[8]]) as usize;
    let control = cdb[9];

    let disc = ex.disc()?;

    // DVD media defines no fabrication for the other forms
    if ex.state.profile() == Profile::DvdRom && format != 0x00 && format != 0x01 {
        log::debug!("MMC: invalid format type (0x{:X}) for DVD-ROM image", format);
        return Err(CommandError::new(
            SenseKey::IllegalRequest,
            asc::INVALID_FIELD_IN_CDB,
        ));
    }

    // INF-8020 compatibility: old initiators request the form via the
    // control byte with format 0
    if format == 0 {
        if control == 0x40 {
            log::debug!("MMC: INF-8020 compliance expected; playing along");
            format = 0x01;
        } else if control == 0x80 {
            log::debug!("MMC: INF-8020 compliance expected; playing along");
            format = 0x02;
        }
    }

    match format {
        0x00 => {
            log::debug!("MMC: formatted TOC");
            let mut offset = 4;

            // Track AAh requests only the lead-out of the last session
            if number != 0xAA {
                let last_number = disc.last_track().number;
                if number as u32 > last_number {
                    log::debug!(
                        "MMC: starting track number ({}) exceeds last track number ({})",
                        number,
                        last_number
                    );
                    return Err(CommandError::new(
                        SenseKey::IllegalRequest,
                        asc::INVALID_FIELD_IN_CDB,
                    ));
                }

                for i in 0..disc.track_count() {
                    let track = disc.track_by_index(i).unwrap();
                    if track.number < number as u32 {
                        continue;
                    }
                    let buf = &mut ex.state.buffer;
                    buf[offset + 1] = (track.adr << 4) | track.ctl;
                    buf[offset + 2] = track.number as u8;
                    write_address(&mut buf[offset + 4..offset + 8], track.start(), msf);
                    offset += 8;
                }
            }

            // Lead-out of the last session
            let leadout = disc.leadout_start();
            let buf = &mut ex.state.buffer;
            buf[offset + 1] = 0x10; // ADR 1, control 0
            buf[offset + 2] = 0xAA;
            write_address(&mut buf[offset + 4..offset + 8], leadout, msf);
            offset += 8;

            ex.state.buffer_len = offset;

            let length = (offset - 2) as u16;
            let last_track = disc.last_session().last_track().number as u8;
            let buf = &mut ex.state.buffer;
            buf[0..2].copy_from_slice(&length.to_be_bytes());
            buf[2] = 0x01;
            buf[3] = last_track;
        }
        0x01 => {
            log::debug!("MMC: multisession information");
            let session = disc.last_session();
            let first = session.first_track();

            let buf = &mut ex.state.buffer;
            buf[0..2].copy_from_slice(&10u16.to_be_bytes());
            buf[2] = 0x01; // First session
            buf[3] = session.number as u8;
            buf[5] = (first.adr << 4) | first.ctl;
            buf[6] = first.number as u8;
            write_address(&mut buf[8..12], first.start(), msf);
            ex.state.buffer_len = 12;
        }
        0x02 => {
            log::debug!("MMC: raw TOC");
            raw_toc(ex, &disc, number)?;
        }
        0x04 => {
            log::debug!("MMC: ATIP");
            // Pressed media have no ATIP; empty response
            ex.state.buffer[0..2].copy_from_slice(&2u16.to_be_bytes());
            ex.state.buffer_len = 4;
        }
        0x05 => {
            log::debug!("MMC: CD-TEXT");
            let cdtext = disc.cdtext().to_vec();
            if cdtext.is_empty() {
                log::debug!("MMC: no CD-TEXT data");
            }
            log::debug!("MMC: length of CD-TEXT data: 0x{:X}", cdtext.len());

            ex.state.buffer[4..4 + cdtext.len()].copy_from_slice(&cdtext);
            ex.state.buffer_len = 4 + cdtext.len();
            let length = (ex.state.buffer_len - 2) as u16;
            ex.state.buffer[0..2].copy_from_slice(&length.to_be_bytes());
        }
        _ => {
            log::debug!("MMC: format 0x{:X} not supported", format);
            return Err(CommandError::new(
                SenseKey::IllegalRequest,
                asc::INVALID_FIELD_IN_CDB,
            ));
        }
    }

    ex.write_buffer(alloc_len);
    Ok(())
}

/// Raw TOC (form 0x02): A0/A1/A2 and per-track descriptors per session,
/// with B0 (and C0) descriptors on multisession discs
fn raw_toc(ex: &mut Exec, disc: &crate::core::image::Disc, first_session: u8) -> CmdResult {
    let mut offset = 4;
    let num_sessions = disc.session_count();

    let mut descriptor = |buf: &mut [u8],
                          offset: &mut usize,
                          session: u8,
                          adr: u8,
                          ctl: u8,
                          point: u8,
                          msf: [u8; 3],
                          zero: u8,
                          pmsf: [u8; 3]| {
        let d = &mut buf[*offset..*offset + 11];
        d[0] = session;
        d[1] = (adr << 4) | ctl;
        d[3] = point;
        d[4] = msf[0];
        d[5] = msf[1];
        d[6] = msf[2];
        d[7] = zero;
        d[8] = pmsf[0];
        d[9] = pmsf[1];
        d[10] = pmsf[2];
        *offset += 11;
    };

    for i in 0..num_sessions {
        let session = disc.session_by_index(i).unwrap();
        if session.number < first_session as u32 {
            continue;
        }
        let session_nr = session.number as u8;
        let first = session.first_track();
        let last = session.last_track();
        let leadout_start = session.leadout_start();

        // A0: first track number and session type
        descriptor(
            &mut ex.state.buffer,
            &mut offset,
            session_nr,
            first.adr,
            first.ctl,
            0xA0,
            [0, 0, 0],
            0,
            [first.number as u8, session.session_type, 0],
        );

        // A1: last track number
        descriptor(
            &mut ex.state.buffer,
            &mut offset,
            session_nr,
            last.adr,
            last.ctl,
            0xA1,
            [0, 0, 0],
            0,
            [last.number as u8, 0, 0],
        );

        // A2: lead-out start
        let (m, s, f) = lba_to_msf(leadout_start, true);
        descriptor(
            &mut ex.state.buffer,
            &mut offset,
            session_nr,
            0x01,
            0x00,
            0xA2,
            [0, 0, 0],
            0,
            [m, s, f],
        );

        // One descriptor per track
        for track in &session.tracks {
            let (m, s, f) = lba_to_msf(track.start(), true);
            descriptor(
                &mut ex.state.buffer,
                &mut offset,
                session_nr,
                track.adr,
                track.ctl,
                track.number as u8,
                [0, 0, 0],
                0,
                [m, s, f],
            );
        }

        if num_sessions > 1 {
            log::debug!(
                "MMC: multisession disc; cooking up a B0 descriptor for session {}",
                session_nr
            );

            // B0: next possible program area, or FF:FF:FF on the last
            // session to mark the disc closed
            let next_area = if (session.number as usize) < num_sessions {
                let lba = leadout_start + session.leadout_length;
                let (m, s, f) = lba_to_msf(lba, true);
                [m, s, f]
            } else {
                [0xFF, 0xFF, 0xFF]
            };
            let mode5_count = if session_nr == 1 { 2 } else { 1 };

            // Maximum capacity is fixed to an 80-minute disc
            descriptor(
                &mut ex.state.buffer,
                &mut offset,
                session_nr,
                0x05,
                0x00,
                0xB0,
                next_area,
                mode5_count,
                [0x4F, 0x3B, 0x47],
            );

            if session_nr == 1 {
                log::debug!("MMC: cooking up a C0 descriptor for session 1");
                descriptor(
                    &mut ex.state.buffer,
                    &mut offset,
                    session_nr,
                    0x05,
                    0x00,
                    0xC0,
                    [0x00, 0x00, 0x00],
                    0,
                    [0x95, 0x00, 0x00],
                );
            }
        }
    }

    ex.state.buffer_len = offset;

    let length = (offset - 2) as u16;
    let last_session = disc.last_session().number as u8;
    let buf = &mut ex.state.buffer;
    buf[0..2].copy_from_slice(&length.to_be_bytes());
    buf[2] = 0x01;
    buf[3] = last_session;

    Ok(())
}

/// READ DISC INFORMATION: standard disc information (type 0 only)
pub(super) fn read_disc_information(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();
    let data_type = cdb[1] & 0x07;
    let alloc_len = u16::from_be_bytes([cdb[7], cdb[8]]) as usize;

    let disc = ex.disc()?;

    if data_type != 0 {
        log::debug!("MMC: disc information type 0x{:X} not supported", data_type);
        return Err(CommandError::new(
            SenseKey::IllegalRequest,
            asc::INVALID_FIELD_IN_CDB,
        ));
    }

    log::debug!("MMC: standard disc information");

    let sessions = disc.session_count() as u16;
    let last_session = disc.last_session();
    let first_track_ls = last_session.first_track().number as u16;
    let last_track_ls = last_session.last_track().number as u16;
    // Disc type is determined from the first session, per INF-8090
    let disc_type = disc.first_session().session_type;
    let leadin = last_session.first_track().start_sector - LEADIN_LENGTH;

    let buf = &mut ex.state.buffer;
    buf[0..2].copy_from_slice(&32u16.to_be_bytes());
    buf[2] = 0x0E; // Last session complete, disc complete
    buf[3] = 0x01; // First track on disc
    buf[4] = sessions as u8;
    buf[5] = first_track_ls as u8;
    buf[6] = last_track_ls as u8;
    buf[8] = disc_type;
    buf[9] = (sessions >> 8) as u8;
    buf[10] = (first_track_ls >> 8) as u8;
    buf[11] = (last_track_ls >> 8) as u8;

    // Last session lead-in address (MSF)
    let (m, s, f) = lba_to_msf(leadin, true);
    buf[17] = m;
    buf[18] = s;
    buf[19] = f;

    // Last possible lead-out: not applicable for a read-only drive
    buf[20..24].copy_from_slice(&0xFFFFFFFFu32.to_be_bytes());

    ex.state.buffer_len = 34;
    ex.write_buffer(alloc_len);
    Ok(())
}

/// READ TRACK INFORMATION: by address, track number or session number
pub(super) fn read_track_information(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();
    let address_type = cdb[1] & 0x03;
    let number = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
    let alloc_len = u16::from_be_bytes([cdb[7], cdb[8]]) as usize;

    let disc = ex.disc()?;

    let track: Option<&Track> = match address_type {
        0x00 => {
            log::debug!("MMC: requested track containing sector 0x{:X}", number);
            disc.track_by_address(number as i32)
        }
        0x01 => match number {
            0x00 | 0xFF => {
                // Lead-in and the invisible track are not supported
                log::debug!("MMC: requested lead-in/invisible track; not supported");
                return Err(CommandError::new(
                    SenseKey::IllegalRequest,
                    asc::INVALID_FIELD_IN_CDB,
                ));
            }
            _ => {
                log::debug!("MMC: requested track {}", number);
                disc.track_by_number(number)
            }
        },
        0x02 => {
            log::debug!("MMC: requested first track in session {}", number);
            disc.session_by_number(number).map(Session::first_track)
        }
        _ => None,
    };

    let Some(track) = track else {
        log::debug!("MMC: couldn't find track");
        return Err(CommandError::new(
            SenseKey::IllegalRequest,
            asc::INVALID_FIELD_IN_CDB,
        ));
    };

    let data_mode = match track.mode {
        SectorType::Audio | SectorType::Mode1 => 0x01,
        SectorType::Mode2
        | SectorType::Mode2Form1
        | SectorType::Mode2Form2
        | SectorType::Mode2Mixed => 0x02,
    };

    let buf = &mut ex.state.buffer;
    buf[0..2].copy_from_slice(&34u16.to_be_bytes());
    buf[2] = track.number as u8;
    buf[3] = track.session_number as u8;
    buf[5] = track.ctl;
    buf[6] = data_mode;
    buf[8..12].copy_from_slice(&(track.start_sector as u32).to_be_bytes());
    buf[24..28].copy_from_slice(&(track.length as u32).to_be_bytes());
    buf[32] = (track.number >> 8) as u8;
    buf[33] = (track.session_number >> 8) as u8;

    ex.state.buffer_len = 36;
    ex.write_buffer(alloc_len);
    Ok(())
}

/// READ DVD STRUCTURE: delegate the structure lookup to the disc
pub(super) fn read_dvd_structure(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();
    let layer = cdb[6];
    let format = cdb[7];
    let alloc_len = u16::from_be_bytes([cdb[8], cdb[9]]) as usize;

    let disc = ex.disc()?;

    if ex.state.profile() != Profile::DvdRom {
        log::debug!("MMC: READ DVD STRUCTURE is supported only with DVD media");
        return Err(CommandError::new(
            SenseKey::IllegalRequest,
            asc::CANNOT_READ_MEDIUM_INCOMPATIBLE_FORMAT,
        ));
    }

    log::debug!("MMC: requested structure 0x{:X}, layer {}", format, layer);
    let structure = disc.disc_structure(layer, format).ok_or_else(|| {
        log::debug!("MMC: structure not present on disc");
        CommandError::new(SenseKey::IllegalRequest, asc::INVALID_FIELD_IN_CDB)
    })?;

    let structure = structure.to_vec();
    let buf = &mut ex.state.buffer;
    buf[4..4 + structure.len()].copy_from_slice(&structure);
    let length = (structure.len() + 2) as u16;
    buf[0..2].copy_from_slice(&length.to_be_bytes());

    ex.state.buffer_len = 4 + structure.len();
    ex.write_buffer(alloc_len);
    Ok(())
}

/// REPORT KEY: RPC status reporting; no other key formats are
/// implemented
pub(super) fn report_key(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();
    let key_format = cdb[10] & 0x3F;
    let alloc_len = u16::from_be_bytes([cdb[8], cdb[9]]) as usize;

    if key_format != 0x08 {
        log::debug!("MMC: key format 0x{:02X} not implemented", key_format);
        return Err(CommandError::new(
            SenseKey::IllegalRequest,
            asc::INVALID_FIELD_IN_CDB,
        ));
    }

    // RPC phase: no region set, 4 vendor resets and 5 user changes
    // available, all regions allowed, RPC scheme 1
    let buf = &mut ex.state.buffer;
    buf[0..2].copy_from_slice(&6u16.to_be_bytes());
    buf[4] = (4 << 3) | 5;
    buf[5] = 0xFF;
    buf[6] = 0x01;

    ex.state.buffer_len = 8;
    ex.write_buffer(alloc_len);
    Ok(())
}
