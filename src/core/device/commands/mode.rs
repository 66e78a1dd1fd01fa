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

//! Mode page and configuration commands
//!
//! MODE SENSE (6/10), MODE SELECT (6/10) and GET CONFIGURATION.

use crate::core::device::mode_pages::{PageView, SelectError};
use crate::core::sense::{asc, SenseKey};

use super::{opcode, CmdResult, CommandError, Exec};

/// MODE SENSE (6) and (10): return mode pages for the requested page
/// control
pub(super) fn mode_sense(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();

    let (header_size, transfer_len) = if cdb[0] == opcode::MODE_SENSE_6 {
        (4, cdb[4] as usize)
    } else {
        (8, u16::from_be_bytes([cdb[7], cdb[8]]) as usize)
    };
    let pc = cdb[2] >> 6;
    let page_code = cdb[2] & 0x3F;

    // Saved values are not supported
    if pc == 0x03 {
        log::debug!("MMC: saved mode values requested; saving not supported");
        return Err(CommandError::new(
            SenseKey::IllegalRequest,
            asc::SAVING_PARAMETERS_NOT_SUPPORTED,
        ));
    }

    let view = match pc {
        0x00 => PageView::Current,
        0x01 => PageView::Changeable,
        0x02 => PageView::Default,
        _ => unreachable!(),
    };

    let mut offset = header_size;
    let mut page_found = false;
    for page in ex.state.mode_pages.iter() {
        if page_code == 0x3F || page_code == page.code {
            let data = page.view(view);
            ex.state.buffer[offset..offset + data.len()].copy_from_slice(data);
            offset += data.len();

            if page_code != 0x3F {
                log::debug!("MMC: got the page we wanted (0x{:02X})", page_code);
                page_found = true;
                break;
            }
        }
    }

    if page_code != 0x3F && !page_found {
        log::debug!("MMC: page 0x{:02X} not found", page_code);
        return Err(CommandError::new(
            SenseKey::IllegalRequest,
            asc::INVALID_FIELD_IN_CDB,
        ));
    }

    ex.state.buffer_len = offset;

    // Header: mode data length, no block descriptors
    if cdb[0] == opcode::MODE_SENSE_6 {
        ex.state.buffer[0] = (offset - 2) as u8;
    } else {
        let length = (offset - 2) as u16;
        ex.state.buffer[0..2].copy_from_slice(&length.to_be_bytes());
    }

    ex.write_buffer(transfer_len);
    Ok(())
}

/// MODE SELECT (6) and (10): apply a mode page within its changeable
/// mask
pub(super) fn mode_select(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();

    let (header_size, transfer_len) = if cdb[0] == opcode::MODE_SELECT_6 {
        (4usize, cdb[4] as usize)
    } else {
        (8usize, u16::from_be_bytes([cdb[7], cdb[8]]) as usize)
    };

    ex.read_buffer(transfer_len);
    let transfer_len = ex.state.buffer_len;

    if transfer_len < header_size {
        return Err(CommandError::new(
            SenseKey::IllegalRequest,
            asc::INVALID_FIELD_IN_PARAMETER_LIST,
        ));
    }

    // Block descriptors are not supported on ATAPI devices
    let blkdesc_len = if cdb[0] == opcode::MODE_SELECT_6 {
        ex.state.buffer[3] as usize
    } else {
        u16::from_be_bytes([ex.state.buffer[6], ex.state.buffer[7]]) as usize
    };
    if blkdesc_len != 0 {
        log::debug!("MMC: block descriptor provided; not supported");
        return Err(CommandError::new(
            SenseKey::IllegalRequest,
            asc::INVALID_FIELD_IN_PARAMETER_LIST,
        ));
    }

    let page_size = transfer_len - header_size;
    if page_size > 0 {
        let page_data = ex.state.buffer[header_size..transfer_len].to_vec();
        log::debug!("MMC: mode page 0x{:02X}", page_data[0] & 0x3F);

        ex.state.mode_pages.apply(&page_data).map_err(|e| {
            match e {
                SelectError::UnknownPage => {
                    log::debug!("MMC: we don't have mode page 0x{:02X}", page_data[0] & 0x3F)
                }
                SelectError::LengthMismatch => {
                    log::debug!("MMC: declared page size does not match page length")
                }
                SelectError::MaskViolation(i) => {
                    log::debug!("MMC: invalid value set on byte {}", i)
                }
            }
            CommandError::new(
                SenseKey::IllegalRequest,
                asc::INVALID_FIELD_IN_PARAMETER_LIST,
            )
        })?;
    }

    Ok(())
}

/// GET CONFIGURATION: copy feature descriptors per the RT field
pub(super) fn get_configuration(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();
    let rt = cdb[1] & 0x03;
    let sfn = u16::from_be_bytes([cdb[2], cdb[3]]);
    let alloc_len = u16::from_be_bytes([cdb[7], cdb[8]]) as usize;

    log::debug!(
        "MMC: requesting features from 0x{:04X} on, with RT flag 0x{:X}",
        sfn,
        rt
    );

    let mut offset = 8;

    // Features are sorted ascending, so code >= SFN covers all three RT
    // modes; RT 0x02 additionally stops at the exact match
    for feature in ex.state.features.iter() {
        if feature.code < sfn {
            continue;
        }
        let wanted = match rt {
            0x00 => true,
            0x01 => feature.current(),
            0x02 => feature.code == sfn,
            _ => false,
        };
        if !wanted {
            continue;
        }

        log::debug!("MMC: copying feature 0x{:04X}", feature.code);
        ex.state.buffer[offset..offset + feature.data.len()].copy_from_slice(&feature.data);
        offset += feature.data.len();

        if rt == 0x02 {
            break;
        }
    }

    ex.state.buffer_len = offset;

    // Header: data length and current profile
    let length = (offset - 4) as u32;
    ex.state.buffer[0..4].copy_from_slice(&length.to_be_bytes());
    let profile = ex.state.profile() as u16;
    ex.state.buffer[6..8].copy_from_slice(&profile.to_be_bytes());

    ex.write_buffer(alloc_len);
    Ok(())
}
