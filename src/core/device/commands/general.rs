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

//! General device commands
//!
//! INQUIRY, TEST UNIT READY, REQUEST SENSE, GET EVENT/STATUS
//! NOTIFICATION, PREVENT/ALLOW MEDIUM REMOVAL, START/STOP UNIT,
//! SET CD SPEED and SEEK.

use crate::core::device::{unload_medium, MediaEvent};
use crate::core::sense::{asc, SenseData, SenseKey};

use super::{CmdResult, CommandError, Exec};

/// INQUIRY: standard 36-byte inquiry data with the configured identity
pub(super) fn inquiry(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();
    let evpd = cdb[1] & 0x01;
    let page_code = cdb[2];
    let alloc_len = u16::from_be_bytes([cdb[3], cdb[4]]) as usize;

    if evpd != 0 || page_code != 0 {
        // Vital product data pages are not supported, as stated in SPC
        log::debug!("MMC: invalid field in CDB");
        return Err(CommandError::new(
            SenseKey::IllegalRequest,
            asc::INVALID_FIELD_IN_CDB,
        ));
    }

    let id = &ex.state.id;
    let buf = &mut ex.state.buffer;
    buf[0] = 0x05; // CD-ROM device
    buf[1] = 0x80; // Removable medium
    buf[2] = 0x00; // Version, per INF-8090
    buf[3] = 0x02; // Response data format 2
    buf[4] = 36 - 5; // Additional length
    buf[8..16].copy_from_slice(&id.vendor);
    buf[16..32].copy_from_slice(&id.product);
    buf[32..36].copy_from_slice(&id.revision);
    ex.state.buffer_len = 36;

    ex.write_buffer(alloc_len);
    Ok(())
}

/// TEST UNIT READY: medium presence check with the new-media attention
/// latch
pub(super) fn test_unit_ready(ex: &mut Exec) -> CmdResult {
    if !ex.state.loaded() {
        log::debug!("MMC: medium not present");
        return Err(CommandError::new(
            SenseKey::NotReady,
            asc::MEDIUM_NOT_PRESENT,
        ));
    }

    // The SCSI layer relies on a unit attention after a medium change to
    // re-read the block size
    if ex.state.media_event == MediaEvent::NewMedia {
        log::debug!("MMC: reporting media changed");
        ex.state.media_event = MediaEvent::NoChange;
        return Err(CommandError::new(
            SenseKey::UnitAttention,
            asc::NOT_READY_TO_READY_CHANGE_MEDIUM_MAY_HAVE_CHANGED,
        ));
    }

    Ok(())
}

/// REQUEST SENSE: no deferred errors are modeled, so this reports an
/// empty sense with the audio status in the ASCQ field, per MMC-3 play
/// progress reporting
pub(super) fn request_sense(ex: &mut Exec) -> CmdResult {
    let alloc_len = ex.cdb()[4] as usize;

    log::debug!("MMC: returning sense data");

    let mut sense = SenseData::new(SenseKey::NoSense, asc::NO_ADDITIONAL_SENSE_INFORMATION);
    sense.asc_ascq = ex.audio.status() as u16;

    let bytes = sense.to_bytes();
    ex.state.buffer[..bytes.len()].copy_from_slice(&bytes);
    ex.state.buffer_len = bytes.len();

    ex.write_buffer(alloc_len);
    Ok(())
}

/// GET EVENT/STATUS NOTIFICATION: media event class only
pub(super) fn get_event_status_notification(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();
    let immed = cdb[1] & 0x01;
    let request_media = cdb[4] & 0x10;
    let alloc_len = u16::from_be_bytes([cdb[7], cdb[8]]) as usize;

    if immed == 0 {
        log::debug!("MMC: asynchronous notification not supported");
        return Err(CommandError::new(
            SenseKey::IllegalRequest,
            asc::INVALID_FIELD_IN_CDB,
        ));
    }

    // Header: assume no event available until a class matches
    ex.state.buffer[2] = 0x80; // NEA
    ex.state.buffer[3] = 0x10; // Supported class: media
    ex.state.buffer_len = 4;

    if request_media != 0 {
        log::debug!("MMC: media event class");
        ex.state.buffer[2] = 0x04; // NEA clear, notification class: media

        // Report the pending event, then reset it
        let event = ex.state.media_event;
        log::debug!("MMC: reporting media event {:?}", event);
        ex.state.media_event = MediaEvent::NoChange;

        ex.state.buffer[4] = event as u8;
        if ex.state.loaded() {
            ex.state.buffer[5] = 0x02; // Media present
        }
        ex.state.buffer_len = 8;
    }

    let length = (ex.state.buffer_len - 2) as u16;
    ex.state.buffer[0..2].copy_from_slice(&length.to_be_bytes());

    ex.write_buffer(alloc_len);
    Ok(())
}

/// PREVENT/ALLOW MEDIUM REMOVAL: locks the medium and mirrors the state
/// into the capabilities mode page
pub(super) fn prevent_allow_medium_removal(ex: &mut Exec) -> CmdResult {
    let prevent = ex.cdb()[4] & 0x01 != 0;

    ex.state.locked = prevent;
    ex.state.mode_pages.set_lock_state(prevent);
    log::debug!("MMC: medium {}", if prevent { "locked" } else { "unlocked" });

    Ok(())
}

/// START/STOP UNIT: the eject path; start/stop itself is a no-op
pub(super) fn start_stop_unit(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();
    let start = cdb[4] & 0x01;
    let lo_ej = cdb[4] & 0x02;

    log::debug!("MMC: lo_ej: {}; start: {}", lo_ej >> 1, start);

    if lo_ej != 0 && start == 0 {
        log::debug!("MMC: unloading disc");
        unload_medium(ex.state, ex.audio, false).map_err(|_| {
            log::debug!("MMC: failed to unload disc");
            CommandError::new(SenseKey::NotReady, asc::MEDIUM_REMOVAL_PREVENTED)
        })?;
    }

    Ok(())
}

/// SET CD SPEED: stores the requested read speed in the capabilities
/// mode page
pub(super) fn set_cd_speed(ex: &mut Exec) -> CmdResult {
    let cdb = ex.cdb();
    let read_speed = u16::from_be_bytes([cdb[2], cdb[3]]);

    if read_speed == 0xFFFF {
        log::debug!("MMC: setting read speed to max");
    } else {
        log::debug!("MMC: setting read speed to {} kB/s", read_speed);
    }
    ex.state.mode_pages.set_read_speed(read_speed);

    Ok(())
}

/// SEEK (10): nothing to do for a virtual drive
pub(super) fn seek(_ex: &mut Exec) -> CmdResult {
    log::debug!("MMC: nothing to do here");
    Ok(())
}
