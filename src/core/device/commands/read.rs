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

//! Sector read commands
//!
//! READ (10/12), READ CAPACITY, READ CD / READ CD MSF and
//! READ SUB-CHANNEL.

use std::sync::atomic::Ordering;

use crate::core::image::{
    bcd_to_hex, decode_isrc, decode_mcn, lba_to_msf, msf_to_lba, subchannel, MediumType,
    SectorType,
};
use crate::core::sense::{asc, SenseKey};

use super::{map_expected_sector_type, map_mcsb, opcode, CmdResult, CommandError, Exec};

/// Sectors scanned for MCN/ISRC subchannel data and for Q interpolation
const SUBCHANNEL_SCAN_RANGE: i32 = 100;

/// READ (10) and READ (12): cooked 2048-byte sector reads
pub(super) fn read(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();

    // Start sector is signed; negative addresses reach into the lead-in
    let start_sector = i32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
    let num_sectors = if cdb[0] == opcode::READ_10 {
        u16::from_be_bytes([cdb[7], cdb[8]]) as i32
    } else {
        u32::from_be_bytes([cdb[6], cdb[7], cdb[8], cdb[9]]) as i32
    };

    log::debug!(
        "MMC: read request; start sector: 0x{:X}, number of sectors: {}",
        start_sector,
        num_sectors
    );

    let disc = ex.disc()?;
    let dcr = ex.state.mode_pages.dcr();

    let (dpm, tr, speed) = (
        ex.state.dpm_emulation,
        ex.state.tr_emulation,
        ex.state.mode_pages.read_speed(),
    );
    ex.state
        .delay
        .begin(&disc, start_sector, num_sectors, dpm, tr, speed);

    for sector_lba in start_sector..start_sector + num_sectors {
        let sector = disc.get_sector(sector_lba).map_err(|_| {
            log::debug!("MMC: invalid sector");
            CommandError::with_info(
                SenseKey::IllegalRequest,
                asc::ILLEGAL_MODE_FOR_THIS_TRACK,
                false,
                sector_lba as u32,
            )
        })?;

        ex.flush_buffer();

        // Bad sector emulation: a corrupted sector's EDC does not match
        // its data, and unless corrections are disabled via the DCR bit
        // the read fails. Only Mode 1 and Mode 2 Form 1 sectors carry the
        // protection.
        if !dcr
            && matches!(sector.kind(), SectorType::Mode1 | SectorType::Mode2Form1)
            && !sector.verify_lec()
        {
            log::debug!("MMC: bad sector detected, triggering read error");
            return Err(CommandError::with_info(
                SenseKey::MediumError,
                asc::UNRECOVERED_READ_ERROR,
                false,
                sector_lba as u32,
            ));
        }

        // Only sectors with 2048-byte user data are readable this way
        let data = sector.user_data();
        if data.len() != 2048 {
            log::debug!(
                "MMC: sector 0x{:X} does not have 2048-byte user data ({})",
                sector_lba,
                data.len()
            );
            return Err(CommandError::with_info(
                SenseKey::IllegalRequest,
                asc::ILLEGAL_MODE_FOR_THIS_TRACK,
                true,
                sector_lba as u32,
            ));
        }

        ex.state.buffer[..2048].copy_from_slice(data);
        ex.state.buffer_len = 2048;

        ex.cursor.store(sector_lba as u32, Ordering::Relaxed);
        let len = ex.state.buffer_len;
        ex.write_buffer(len);
    }

    ex.state.delay.finalize();
    Ok(())
}

/// READ CAPACITY: last addressable sector and the 2048-byte block size
pub(super) fn read_capacity(ex: &mut Exec) -> CmdResult {
    let disc = ex.disc()?;

    // Capacity is the starting sector of the last session's lead-out,
    // minus one
    let last_sector = disc.leadout_start() - 1;

    ex.state.buffer[0..4].copy_from_slice(&(last_sector as u32).to_be_bytes());
    ex.state.buffer[4..8].copy_from_slice(&2048u32.to_be_bytes());
    ex.state.buffer_len = 8;

    let len = ex.state.buffer_len;
    ex.write_buffer(len);
    Ok(())
}

/// READ CD and READ CD MSF: raw reads with per-sector field selection
pub(super) fn read_cd(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();

    let (start_sector, num_sectors) = if cdb[0] == opcode::READ_CD {
        let start = i32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
        let num = u32::from_be_bytes([0, cdb[6], cdb[7], cdb[8]]) as i32;
        (start, num)
    } else {
        let start = msf_to_lba(cdb[3], cdb[4], cdb[5], true);
        let end = msf_to_lba(cdb[6], cdb[7], cdb[8], true);
        (start, end - start)
    };
    let expected_type = map_expected_sector_type((cdb[1] >> 2) & 0x07)?;
    let subchan = cdb[10] & 0x07;

    log::debug!(
        "MMC: READ CD: address 0x{:08X}, length {}, expected type {:?}, MCSB 0x{:02X}, subchannel 0x{:X}",
        start_sector,
        num_sectors,
        expected_type,
        cdb[9],
        subchan
    );

    let disc = ex.disc()?;

    if disc.medium_type() == MediumType::Dvd {
        log::debug!("MMC: READ CD not supported on DVD media");
        return Err(CommandError::new(
            SenseKey::IllegalRequest,
            asc::INVALID_FIELD_IN_CDB,
        ));
    }

    // R-W subchannel reading is not supported; reject it even for
    // zero-length transfers, which initiators use to probe support
    if subchan == subchannel::RW {
        log::debug!("MMC: R-W subchannel reading not supported");
        return Err(CommandError::new(
            SenseKey::IllegalRequest,
            asc::INVALID_FIELD_IN_CDB,
        ));
    }

    // Validate the starting sector before committing to the transfer
    disc.get_sector(start_sector).map_err(|_| {
        log::debug!("MMC: invalid starting sector");
        CommandError::with_info(
            SenseKey::IllegalRequest,
            asc::ILLEGAL_MODE_FOR_THIS_TRACK,
            false,
            start_sector as u32,
        )
    })?;

    let dcr = ex.state.mode_pages.dcr();
    let (dpm, tr, speed) = (
        ex.state.dpm_emulation,
        ex.state.tr_emulation,
        ex.state.mode_pages.read_speed(),
    );
    ex.state
        .delay
        .begin(&disc, start_sector, num_sectors, dpm, tr, speed);

    for sector_lba in start_sector..start_sector + num_sectors {
        log::trace!("MMC: reading sector 0x{:X}", sector_lba);

        let sector = disc.get_sector(sector_lba).map_err(|_| {
            log::debug!("MMC: invalid sector");
            CommandError::with_info(
                SenseKey::IllegalRequest,
                asc::ILLEGAL_MODE_FOR_THIS_TRACK,
                false,
                sector_lba as u32,
            )
        })?;

        ex.flush_buffer();

        // With an expected type set, every sector must match it; with
        // none, the read continues across type transitions
        if let Some(expected) = expected_type {
            if sector.kind() != expected {
                log::debug!(
                    "MMC: expected sector type mismatch (expecting {:?}, got {:?})",
                    expected,
                    sector.kind()
                );
                return Err(CommandError::with_info(
                    SenseKey::IllegalRequest,
                    asc::ILLEGAL_MODE_FOR_THIS_TRACK,
                    true,
                    sector_lba as u32,
                ));
            }
        }

        if !dcr
            && matches!(sector.kind(), SectorType::Mode1 | SectorType::Mode2Form1)
            && !sector.verify_lec()
        {
            log::debug!("MMC: bad sector detected, triggering read error");
            return Err(CommandError::with_info(
                SenseKey::MediumError,
                asc::UNRECOVERED_READ_ERROR,
                false,
                sector_lba as u32,
            ));
        }

        // Rewrite the MCSB in place for this sector's type
        if map_mcsb(&mut ex.cmd.cdb[9], sector.kind()).is_err() {
            log::debug!("MMC: invalid MCSB: 0x{:02X}", ex.cmd.cdb[9]);
            return Err(CommandError::new(
                SenseKey::IllegalRequest,
                asc::INVALID_FIELD_IN_CDB,
            ));
        }

        let read_length = disc
            .read_sector(sector_lba, ex.cmd.cdb[9], subchan, &mut ex.state.buffer)
            .map_err(|e| {
                log::debug!("MMC: failed to read sector 0x{:X}: {}", sector_lba, e);
                CommandError::with_info(
                    SenseKey::IllegalRequest,
                    asc::ILLEGAL_MODE_FOR_THIS_TRACK,
                    false,
                    sector_lba as u32,
                )
            })?;

        log::trace!("MMC: read length 0x{:X}", read_length);
        ex.state.buffer_len = read_length;

        ex.cursor.store(sector_lba as u32, Ordering::Relaxed);
        ex.write_buffer(read_length);
    }

    ex.state.delay.finalize();
    Ok(())
}

/// READ SUB-CHANNEL: current position, MCN and ISRC queries
pub(super) fn read_subchannel(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();
    let time = cdb[1] & 0x02 != 0;
    let subq = cdb[2] & 0x40 != 0;
    let param_list = cdb[3];
    let track_number = cdb[6] as u32;
    let alloc_len = u16::from_be_bytes([cdb[7], cdb[8]]) as usize;

    let disc = ex.disc()?;

    let mut offset = 4;

    if subq {
        match param_list {
            0x01 => {
                // Current position: read the P-Q subchannel of the
                // current sector; Mode 2/3 Q is interpolated from the
                // following sectors with the address corrected back
                let current = ex.cursor.load(Ordering::Relaxed) as i32;
                log::debug!("MMC: current position (sector 0x{:X})", current);

                let mut q = match disc.get_sector(current) {
                    Ok(sector) => *sector.subchannel_q(),
                    Err(_) => {
                        log::warn!("MMC: failed to read subchannel of sector 0x{:X}", current);
                        [0u8; 16]
                    }
                };

                let mut correction = 0;
                while q[0] & 0x0F != 0x01 && correction < SUBCHANNEL_SCAN_RANGE {
                    correction += 1;
                    log::debug!(
                        "MMC: sector without Mode-1 Q; taking next one (0x{:X})",
                        current + correction
                    );
                    match disc.get_sector(current + correction) {
                        Ok(sector) => q = *sector.subchannel_q(),
                        Err(_) => break,
                    }
                }

                let adr = q[0] & 0x0F;
                let ctl = (q[0] & 0xF0) >> 4;

                let buf = &mut ex.state.buffer;
                buf[offset] = 0x01; // Format code
                buf[offset + 1] = (adr << 4) | ctl;
                buf[offset + 2] = bcd_to_hex(q[1]); // Track
                buf[offset + 3] = bcd_to_hex(q[2]); // Index

                // Q carries relative then absolute MSF; the response
                // wants them the other way around, decoded to plain
                // binary and corrected back to the original sector
                let relative = msf_to_lba(bcd_to_hex(q[3]), bcd_to_hex(q[4]), bcd_to_hex(q[5]), false)
                    - correction;
                let absolute = msf_to_lba(bcd_to_hex(q[7]), bcd_to_hex(q[8]), bcd_to_hex(q[9]), true)
                    - correction;

                if time {
                    let (m, s, f) = lba_to_msf(absolute, true);
                    buf[offset + 5] = m;
                    buf[offset + 6] = s;
                    buf[offset + 7] = f;
                    let (m, s, f) = lba_to_msf(relative, false);
                    buf[offset + 9] = m;
                    buf[offset + 10] = s;
                    buf[offset + 11] = f;
                } else {
                    buf[offset + 4..offset + 8]
                        .copy_from_slice(&(absolute as u32).to_be_bytes());
                    buf[offset + 8..offset + 12]
                        .copy_from_slice(&(relative as u32).to_be_bytes());
                }
                offset += 12;
            }
            0x02 => {
                // MCN: scan the start of the disc for Mode 2 Q
                log::debug!("MMC: MCN/UPC/EAN");
                ex.state.buffer[offset] = 0x02;

                for lba in 0..SUBCHANNEL_SCAN_RANGE {
                    let Ok(sector) = disc.get_sector(lba) else {
                        continue;
                    };
                    let q = sector.subchannel_q();
                    if q[0] & 0x0F == 0x02 {
                        let mcn = decode_mcn(&q[1..8]);
                        log::debug!(
                            "MMC: found MCN in subchannel of sector 0x{:X}: <{}>",
                            lba,
                            mcn
                        );
                        ex.state.buffer[offset + 4] = 0x80; // MCVal
                        ex.state.buffer[offset + 5..offset + 5 + 13]
                            .copy_from_slice(mcn.as_bytes());
                        break;
                    }
                }
                offset += 20;
            }
            0x03 => {
                // ISRC: scan the start of the requested track for Mode 3 Q
                log::debug!("MMC: ISRC");
                ex.state.buffer[offset] = 0x03;

                let track = disc.track_by_number(track_number).ok_or_else(|| {
                    log::debug!("MMC: failed to get track {}", track_number);
                    CommandError::new(SenseKey::IllegalRequest, asc::INVALID_FIELD_IN_CDB)
                })?;
                let track_start = track.start();

                for lba in track_start..track_start + SUBCHANNEL_SCAN_RANGE {
                    let Ok(sector) = disc.get_sector(lba) else {
                        continue;
                    };
                    let q = sector.subchannel_q();
                    if q[0] & 0x0F == 0x03 {
                        let isrc = decode_isrc(&q[1..10]);
                        log::debug!(
                            "MMC: found ISRC in subchannel of sector 0x{:X}: <{}>",
                            lba,
                            isrc
                        );
                        let buf = &mut ex.state.buffer;
                        buf[offset + 1] = ((q[0] & 0x0F) << 4) | (q[0] >> 4);
                        buf[offset + 2] = track.number as u8;
                        buf[offset + 4] = 0x80; // TCVal
                        buf[offset + 5..offset + 5 + 12].copy_from_slice(isrc.as_bytes());
                        break;
                    }
                }
                offset += 20;
            }
            _ => {
                log::debug!("MMC: unknown sub-channel parameter list 0x{:02X}", param_list);
            }
        }
    }

    ex.state.buffer_len = offset;

    // Header: audio status and data length
    ex.state.buffer[1] = ex.audio.status() as u8;
    let length = (offset - 4) as u16;
    ex.state.buffer[2..4].copy_from_slice(&length.to_be_bytes());

    ex.write_buffer(alloc_len);
    Ok(())
}
