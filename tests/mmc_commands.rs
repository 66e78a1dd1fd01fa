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

//! Command-level tests of the MMC packet interpreter
//!
//! Drives Device::execute_command directly with raw CDBs against
//! in-memory discs, covering the wire-level behavior an initiator
//! observes.

mod common;

use common::*;

use discemu::core::audio::AudioStatus;
use discemu::core::image::{DiscBuilder, MediumType, SectorType};

// ============================================================================
// INQUIRY
// ============================================================================

#[test]
fn inquiry_standard_data() {
    let device = empty_device();
    let (status, out) = exec(&device, &[0x12, 0x00, 0x00, 0x00, 0x24, 0x00]);

    assert_eq!(status, GOOD);
    assert_eq!(out.len(), 36);
    assert_eq!(out[0], 0x05); // CD-ROM device
    assert_eq!(out[1], 0x80); // Removable
    assert_eq!(out[2], 0x00);
    assert_eq!(out[3], 0x02); // Response data format
    assert_eq!(out[4], 0x1F); // Additional length
    assert_eq!(&out[8..16], b"DISCEMU "); // Space-padded vendor
}

#[test]
fn inquiry_respects_allocation_length() {
    let device = empty_device();
    let (status, out) = exec(&device, &[0x12, 0x00, 0x00, 0x00, 0x08, 0x00]);

    assert_eq!(status, GOOD);
    assert_eq!(out.len(), 8);
}

#[test]
fn inquiry_rejects_vital_product_data() {
    let device = empty_device();

    let (status, out) = exec(&device, &[0x12, 0x01, 0x00, 0x00, 0x24, 0x00]);
    assert_sense(status, &out, 0x05, 0x24, 0x00);

    let (status, out) = exec(&device, &[0x12, 0x00, 0x80, 0x00, 0x24, 0x00]);
    assert_sense(status, &out, 0x05, 0x24, 0x00);
}

#[test]
fn inquiry_reports_configured_identity() {
    use discemu::core::device::OptionValue;

    let device = empty_device();
    device
        .set_option(
            "device-id",
            OptionValue::DeviceId("ACME".into(), "Spinner".into(), "9.9".into(), "".into()),
        )
        .unwrap();

    let (_, out) = exec(&device, &[0x12, 0x00, 0x00, 0x00, 0x24, 0x00]);
    assert_eq!(&out[8..16], b"ACME    ");
    assert_eq!(&out[16..32], b"Spinner         ");
    assert_eq!(&out[32..36], b"9.9 ");
}

// ============================================================================
// Dispatcher envelope
// ============================================================================

#[test]
fn unknown_opcode_yields_invalid_command() {
    let device = empty_device();
    let (status, out) = exec(&device, &[0xFF, 0, 0, 0, 0, 0]);
    assert_sense(status, &out, 0x05, 0x20, 0x00);
}

#[test]
fn media_commands_fail_without_medium() {
    let device = empty_device();

    // READ CAPACITY, the literal scenario: sense prefix and ASC/ASCQ
    let (status, out) = exec(&device, &[0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(status, CHECK_CONDITION);
    assert_eq!(&out[0..8], &[0x70, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x0A]);
    assert_eq!(out[12], 0x3A);
    assert_eq!(out[13], 0x00);

    // The rest of the media-dependent set reports the same sense
    for cdb in [
        vec![0x00u8, 0, 0, 0, 0, 0],                         // TEST UNIT READY
        vec![0x28, 0, 0, 0, 0, 16, 0, 0, 1, 0],              // READ (10)
        vec![0x43, 0, 0, 0, 0, 0, 0, 0x0F, 0xFF, 0],         // READ TOC
        vec![0x51, 0, 0, 0, 0, 0, 0, 0x0F, 0xFF, 0],         // READ DISC INFORMATION
        vec![0x52, 1, 0, 0, 0, 1, 0, 0x0F, 0xFF, 0],         // READ TRACK INFORMATION
        vec![0x45, 0, 0, 0, 0, 10, 0, 0, 5, 0],              // PLAY AUDIO (10)
        vec![0xBE, 0, 0, 0, 0, 0, 0, 0, 1, 0x10, 0, 0],      // READ CD
    ] {
        let (status, out) = exec(&device, &cdb);
        assert_sense(status, &out, 0x02, 0x3A, 0x00);
    }
}

// ============================================================================
// TEST UNIT READY and medium events
// ============================================================================

#[test]
fn new_media_event_latch() {
    let device = device_with(one_track_cd());

    // First TEST UNIT READY after load: unit attention
    let (status, out) = exec(&device, &[0x00, 0, 0, 0, 0, 0]);
    assert_sense(status, &out, 0x06, 0x28, 0x00);

    // Second: GOOD
    let (status, _) = exec(&device, &[0x00, 0, 0, 0, 0, 0]);
    assert_eq!(status, GOOD);

    // The attention consumed the event: GET EVENT reports no change
    let (status, out) = exec(&device, &[0x4A, 0x01, 0, 0, 0x10, 0, 0, 0, 8, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out[2], 0x04); // NEA clear, media class
    assert_eq!(out[3], 0x10); // Supported classes
    assert_eq!(out[4] & 0x0F, 0x00); // Event: no change
    assert_eq!(out[5] & 0x02, 0x02); // Media present
}

#[test]
fn get_event_reports_new_media_once() {
    let device = device_with(one_track_cd());

    let (status, out) = exec(&device, &[0x4A, 0x01, 0, 0, 0x10, 0, 0, 0, 8, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out[4] & 0x0F, 0x02); // New media

    let (_, out) = exec(&device, &[0x4A, 0x01, 0, 0, 0x10, 0, 0, 0, 8, 0]);
    assert_eq!(out[4] & 0x0F, 0x00); // Already consumed
}

#[test]
fn get_event_requires_immediate_mode() {
    let device = device_with(one_track_cd());
    let (status, out) = exec(&device, &[0x4A, 0x00, 0, 0, 0x10, 0, 0, 0, 8, 0]);
    assert_sense(status, &out, 0x05, 0x24, 0x00);
}

// ============================================================================
// READ CAPACITY and READ (10)
// ============================================================================

#[test]
fn read_capacity_reports_last_sector() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out.len(), 8);
    assert_eq!(u32::from_be_bytes(out[0..4].try_into().unwrap()), 99);
    assert_eq!(u32::from_be_bytes(out[4..8].try_into().unwrap()), 2048);
}

#[test]
fn read10_returns_user_data() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x28, 0, 0, 0, 0, 5, 0, 0, 3, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out.len(), 3 * 2048);
}

#[test]
fn read10_beyond_disc_reports_failing_sector() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x28, 0, 0, 0, 0, 98, 0, 0, 5, 0]);
    assert_sense(status, &out, 0x05, 0x64, 0x00);
    // Command information carries the first missing sector
    assert_eq!(u32::from_be_bytes(out[8..12].try_into().unwrap()), 100);
}

#[test]
fn read10_bad_sector_is_medium_error() {
    let disc = DiscBuilder::new(MediumType::Cd)
        .data_track(SectorType::Mode1, 100)
        .corrupt_sector(7)
        .finish();
    let device = device_with(disc);
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x28, 0, 0, 0, 0, 5, 0, 0, 5, 0]);
    assert_sense(status, &out, 0x03, 0x11, 0x00);
    assert_eq!(u32::from_be_bytes(out[8..12].try_into().unwrap()), 7);
}

#[test]
fn read10_bad_sector_passes_with_dcr_set() {
    let disc = DiscBuilder::new(MediumType::Cd)
        .data_track(SectorType::Mode1, 100)
        .corrupt_sector(7)
        .finish();
    let device = device_with(disc);
    clear_unit_attention(&device);

    // Read the error recovery page and enable DCR
    let (status, page) = exec(&device, &[0x5A, 0, 0x01, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(status, GOOD);
    let mut select = page.clone();
    select[8 + 2] |= 0x01; // DCR, behind the 8-byte mode header
    let cdb = [0x55, 0x10, 0, 0, 0, 0, 0, 0, select.len() as u8, 0];
    let (status, _) = exec_with_input(&device, &cdb, &select);
    assert_eq!(status, GOOD);

    let (status, out) = exec(&device, &[0x28, 0, 0, 0, 0, 5, 0, 0, 5, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out.len(), 5 * 2048);
}

#[test]
fn read10_rejects_audio_sectors() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    // Sector 100 starts the audio track; user data is not 2048 bytes
    let (status, out) = exec(&device, &[0x28, 0, 0, 0, 0, 100, 0, 0, 1, 0]);
    assert_sense(status, &out, 0x05, 0x64, 0x00);
    assert_eq!(out[2] & 0x20, 0x20); // ILI
}

// ============================================================================
// READ CD
// ============================================================================

#[test]
fn read_cd_user_data_matches_read10() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (status, cooked) = exec(&device, &[0x28, 0, 0, 0, 0, 10, 0, 0, 1, 0]);
    assert_eq!(status, GOOD);

    // Expected type Mode 1 (2 << 2), user data only
    let (status, raw) = exec(&device, &[0xBE, 0x08, 0, 0, 0, 10, 0, 0, 1, 0x10, 0, 0]);
    assert_eq!(status, GOOD);

    assert_eq!(cooked, raw);
}

#[test]
fn read_cd_full_raw_sector() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    // Audio sector, sync+header+user+edc selection collapses to 2352
    let (status, out) = exec(&device, &[0xBE, 0, 0, 0, 0, 150, 0, 0, 1, 0xF8, 0, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out.len(), 2352);
}

#[test]
fn read_cd_with_q_subchannel() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0xBE, 0, 0, 0, 0, 150, 0, 0, 1, 0x10, 0x02, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out.len(), 2352 + 16);

    // Q carries BCD position data: absolute MSF of sector 150 is 00:04:00
    let q = &out[2352..];
    assert_eq!(q[0] & 0x0F, 0x01);
    assert_eq!((q[7], q[8], q[9]), (0x00, 0x04, 0x00));
}

#[test]
fn read_cd_expected_type_mismatch() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    // Expect audio (1 << 2) on a data sector
    let (status, out) = exec(&device, &[0xBE, 0x04, 0, 0, 0, 10, 0, 0, 1, 0x10, 0, 0]);
    assert_sense(status, &out, 0x05, 0x64, 0x00);
}

#[test]
fn read_cd_rejects_rw_subchannel() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0xBE, 0, 0, 0, 0, 150, 0, 0, 0, 0x10, 0x04, 0]);
    assert_sense(status, &out, 0x05, 0x24, 0x00);
}

#[test]
fn read_cd_rejected_on_dvd() {
    let device = device_with(dvd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0xBE, 0, 0, 0, 0, 0, 0, 0, 1, 0x10, 0, 0]);
    assert_sense(status, &out, 0x05, 0x24, 0x00);
}

#[test]
fn read_cd_msf_form() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    // 00:04:00 to 00:04:02 = sectors 150..152
    let (status, out) = exec(&device, &[0xB9, 0, 0, 0, 4, 0, 0, 4, 2, 0x10, 0, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out.len(), 2 * 2352);
}

// ============================================================================
// READ TOC/PMA/ATIP
// ============================================================================

#[test]
fn toc_form0_one_track_cd() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x43, 0x02, 0, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(status, GOOD);

    // Header
    assert_eq!(u16::from_be_bytes(out[0..2].try_into().unwrap()), 0x12);
    assert_eq!(out[2], 1);
    assert_eq!(out[3], 1);

    // Track 1: ADR 1, control 4, start MSF 00:02:00
    assert_eq!(out[5], 0x14);
    assert_eq!(out[6], 1);
    assert_eq!(&out[8..12], &[0x00, 0x00, 0x02, 0x00]);

    // Lead-out at MSF of sector 100 (+150 offset = 00:03:25)
    assert_eq!(out[13], 0x10);
    assert_eq!(out[14], 0xAA);
    assert_eq!(&out[16..20], &[0x00, 0x00, 0x03, 0x19]);
}

#[test]
fn toc_form0_lba_addressing() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x43, 0x00, 0, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(u32::from_be_bytes(out[8..12].try_into().unwrap()), 0);
    assert_eq!(u32::from_be_bytes(out[16..20].try_into().unwrap()), 100);
}

#[test]
fn toc_form0_leadout_only_for_track_aa() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x43, 0x02, 0, 0, 0, 0, 0xAA, 0x0F, 0xFF, 0]);
    assert_eq!(status, GOOD);
    // Header plus a single lead-out descriptor
    assert_eq!(out.len(), 4 + 8);
    assert_eq!(out[6], 0xAA);
}

#[test]
fn toc_form0_rejects_track_beyond_last() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x43, 0x02, 0, 0, 0, 0, 2, 0x0F, 0xFF, 0]);
    assert_sense(status, &out, 0x05, 0x24, 0x00);
}

#[test]
fn toc_form1_multisession() {
    let disc = DiscBuilder::new(MediumType::Cd)
        .data_track(SectorType::Mode1, 100)
        .begin_session()
        .data_track(SectorType::Mode1, 50)
        .finish();
    let device = device_with(disc);
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x43, 0x00, 0x01, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out.len(), 12);
    assert_eq!(out[2], 1); // First session
    assert_eq!(out[3], 2); // Last session
    assert_eq!(out[6], 2); // First track in last session
    assert_eq!(u32::from_be_bytes(out[8..12].try_into().unwrap()), 100);
}

#[test]
fn toc_form2_raw_toc_descriptors() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x43, 0x00, 0x02, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(status, GOOD);
    // A0, A1, A2 and one track descriptor
    assert_eq!(out.len(), 4 + 4 * 11);

    let points: Vec<u8> = out[4..].chunks(11).map(|d| d[3]).collect();
    assert_eq!(points, vec![0xA0, 0xA1, 0xA2, 0x01]);

    // A2 carries the lead-out MSF
    let a2 = &out[4 + 2 * 11..4 + 3 * 11];
    assert_eq!((a2[8], a2[9], a2[10]), (0, 3, 25));
}

#[test]
fn toc_form2_multisession_b0_c0() {
    let disc = DiscBuilder::new(MediumType::Cd)
        .data_track(SectorType::Mode1, 100)
        .begin_session()
        .data_track(SectorType::Mode1, 50)
        .finish();
    let device = device_with(disc);
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x43, 0x00, 0x02, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(status, GOOD);

    let descriptors: Vec<&[u8]> = out[4..].chunks(11).collect();
    let b0s: Vec<&&[u8]> = descriptors.iter().filter(|d| d[3] == 0xB0).collect();
    let c0s: Vec<&&[u8]> = descriptors.iter().filter(|d| d[3] == 0xC0).collect();

    // One B0 per session, one C0 for session 1
    assert_eq!(b0s.len(), 2);
    assert_eq!(c0s.len(), 1);

    // B0 capacity magic: 80-minute disc
    assert_eq!((b0s[0][8], b0s[0][9], b0s[0][10]), (0x4F, 0x3B, 0x47));
    // Session 1 announces two Mode-5 entries, session 2 one
    assert_eq!(b0s[0][7], 2);
    assert_eq!(b0s[1][7], 1);
    // Last session B0 marks the disc closed
    assert_eq!((b0s[1][4], b0s[1][5], b0s[1][6]), (0xFF, 0xFF, 0xFF));
    // C0 magic values
    assert_eq!((c0s[0][8], c0s[0][9], c0s[0][10]), (0x95, 0x00, 0x00));
}

#[test]
fn toc_inf8020_control_byte_quirk() {
    let disc = DiscBuilder::new(MediumType::Cd)
        .data_track(SectorType::Mode1, 100)
        .begin_session()
        .data_track(SectorType::Mode1, 50)
        .finish();
    let device = device_with(disc);
    clear_unit_attention(&device);

    // Format 0 with control byte 0x40 behaves as form 1
    let (status, out) = exec(&device, &[0x43, 0x00, 0, 0, 0, 0, 0, 0x0F, 0xFF, 0x40]);
    assert_eq!(status, GOOD);
    assert_eq!(out.len(), 12);
    assert_eq!(out[3], 2);

    // Control byte 0x80 behaves as form 2
    let (status, out) = exec(&device, &[0x43, 0x00, 0, 0, 0, 0, 0, 0x0F, 0xFF, 0x80]);
    assert_eq!(status, GOOD);
    assert_eq!(out[4..].len() % 11, 0);
}

#[test]
fn toc_dvd_allows_only_forms_0_and_1() {
    let device = device_with(dvd());
    clear_unit_attention(&device);

    let (status, _) = exec(&device, &[0x43, 0x00, 0, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(status, GOOD);

    let (status, out) = exec(&device, &[0x43, 0x00, 0x02, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_sense(status, &out, 0x05, 0x24, 0x00);
}

// ============================================================================
// READ DISC INFORMATION / READ TRACK INFORMATION
// ============================================================================

#[test]
fn disc_information_standard() {
    let disc = DiscBuilder::new(MediumType::Cd)
        .data_track(SectorType::Mode1, 100)
        .audio_track(50)
        .finish();
    let device = device_with(disc);
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x51, 0, 0, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out.len(), 34);
    assert_eq!(u16::from_be_bytes(out[0..2].try_into().unwrap()), 32);
    assert_eq!(out[2], 0x0E); // Complete disc, complete session
    assert_eq!(out[3], 1);
    assert_eq!(out[4], 1); // One session
    assert_eq!(out[5], 1); // First track in last session
    assert_eq!(out[6], 2); // Last track in last session
    assert_eq!(&out[20..24], &[0xFF, 0xFF, 0xFF, 0xFF]);
}

#[test]
fn disc_information_rejects_other_types() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x51, 0x01, 0, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_sense(status, &out, 0x05, 0x24, 0x00);
}

#[test]
fn track_information_by_number() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x52, 0x01, 0, 0, 0, 2, 0, 0x0F, 0xFF, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out.len(), 36);
    assert_eq!(out[2], 2); // Track number
    assert_eq!(out[3], 1); // Session number
    assert_eq!(out[6], 0x01); // Audio reports data mode 1
    assert_eq!(u32::from_be_bytes(out[8..12].try_into().unwrap()), 100);
    assert_eq!(u32::from_be_bytes(out[24..28].try_into().unwrap()), 200);
}

#[test]
fn track_information_by_address() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x52, 0x00, 0, 0, 1, 44, 0, 0x0F, 0xFF, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out[2], 3); // LBA 300 falls in track 3
}

#[test]
fn track_information_rejects_leadin_and_invisible() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    for number in [0x00u8, 0xFF] {
        let (status, out) = exec(&device, &[0x52, 0x01, 0, 0, 0, number, 0, 0x0F, 0xFF, 0]);
        assert_sense(status, &out, 0x05, 0x24, 0x00);
    }
}

// ============================================================================
// Mode pages
// ============================================================================

#[test]
fn mode_sense_single_page() {
    let device = empty_device();

    let (status, out) = exec(&device, &[0x5A, 0, 0x01, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(status, GOOD);
    // 8-byte header plus the 12-byte error recovery page
    assert_eq!(out.len(), 20);
    assert_eq!(u16::from_be_bytes(out[0..2].try_into().unwrap()), 18);
    assert_eq!(out[8], 0x01);
    assert_eq!(out[9], 10);
}

#[test]
fn mode_sense_all_pages_sorted() {
    let device = empty_device();

    let (status, out) = exec(&device, &[0x5A, 0, 0x3F, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(status, GOOD);

    let mut codes = Vec::new();
    let mut offset = 8;
    while offset < out.len() {
        codes.push(out[offset] & 0x3F);
        offset += out[offset + 1] as usize + 2;
    }
    assert_eq!(codes, vec![0x01, 0x0D, 0x0E, 0x1A, 0x2A]);
}

#[test]
fn mode_sense_6_header() {
    let device = empty_device();

    let (status, out) = exec(&device, &[0x1A, 0, 0x01, 0, 0xFF, 0]);
    assert_eq!(status, GOOD);
    // 4-byte header plus 12-byte page; length field excludes two bytes
    assert_eq!(out.len(), 16);
    assert_eq!(out[0], 14);
}

#[test]
fn mode_sense_rejects_saved_values() {
    let device = empty_device();

    let (status, out) = exec(&device, &[0x5A, 0, 0xC1, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_sense(status, &out, 0x05, 0x39, 0x00);
}

#[test]
fn mode_sense_unknown_page() {
    let device = empty_device();

    let (status, out) = exec(&device, &[0x5A, 0, 0x05, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_sense(status, &out, 0x05, 0x24, 0x00);
}

#[test]
fn mode_select_roundtrip_preserves_page() {
    let device = empty_device();

    let (_, before) = exec(&device, &[0x5A, 0, 0x0E, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    let cdb = [0x55, 0x10, 0, 0, 0, 0, 0, 0, before.len() as u8, 0];
    let (status, _) = exec_with_input(&device, &cdb, &before);
    assert_eq!(status, GOOD);

    let (_, after) = exec(&device, &[0x5A, 0, 0x0E, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(before, after);
}

#[test]
fn mode_select_mask_rejection() {
    let device = empty_device();

    // Read page 0x01 and set the whole flags byte, which only permits
    // DCR
    let (_, mut page) = exec(&device, &[0x5A, 0, 0x01, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    page[8 + 2] = 0xFF;

    let cdb = [0x55, 0x10, 0, 0, 0, 0, 0, 0, page.len() as u8, 0];
    let (status, out) = exec_with_input(&device, &cdb, &page);
    assert_sense(status, &out, 0x05, 0x26, 0x00);
}

#[test]
fn mode_select_rejects_block_descriptors() {
    let device = empty_device();

    let mut payload = vec![0u8; 8 + 8];
    payload[6..8].copy_from_slice(&8u16.to_be_bytes()); // Block descriptor length
    let cdb = [0x55, 0x10, 0, 0, 0, 0, 0, 0, payload.len() as u8, 0];
    let (status, out) = exec_with_input(&device, &cdb, &payload);
    assert_sense(status, &out, 0x05, 0x26, 0x00);
}

#[test]
fn set_cd_speed_updates_capabilities_page() {
    let device = empty_device();

    let (status, _) = exec(&device, &[0xBB, 0, 0x08, 0x00, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(status, GOOD);

    let (_, page) = exec(&device, &[0x5A, 0, 0x2A, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(&page[8 + 14..8 + 16], &[0x08, 0x00]);

    // 0xFFFF restores the maximum
    let (_, _) = exec(&device, &[0xBB, 0, 0xFF, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0]);
    let (_, page) = exec(&device, &[0x5A, 0, 0x2A, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(&page[8 + 14..8 + 16], &[0x1B, 0x90]);
}

// ============================================================================
// GET CONFIGURATION
// ============================================================================

fn feature_codes(out: &[u8]) -> Vec<u16> {
    let mut codes = Vec::new();
    let mut offset = 8;
    while offset + 4 <= out.len() {
        codes.push(u16::from_be_bytes([out[offset], out[offset + 1]]));
        offset += out[offset + 3] as usize + 4;
    }
    codes
}

#[test]
fn get_configuration_all_features_sorted() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x46, 0x00, 0, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(status, GOOD);

    // Header: current profile is CD-ROM
    assert_eq!(u16::from_be_bytes(out[6..8].try_into().unwrap()), 0x0008);

    let codes = feature_codes(&out);
    let mut sorted = codes.clone();
    sorted.sort_unstable();
    assert_eq!(codes, sorted);
    assert!(codes.contains(&0x0000));
    assert!(codes.contains(&0x0107));
}

#[test]
fn get_configuration_rt1_returns_current_only() {
    let device = empty_device();

    // With no medium, only persistent features are current
    let (_, out) = exec(&device, &[0x46, 0x01, 0, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    let codes = feature_codes(&out);
    assert_eq!(codes, vec![0x0000, 0x0001, 0x0002, 0x0003, 0x0100, 0x0107]);
}

#[test]
fn get_configuration_rt2_subset_of_rt0() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (_, all) = exec(&device, &[0x46, 0x00, 0, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    for code in feature_codes(&all) {
        let sfn = code.to_be_bytes();
        let (status, one) =
            exec(&device, &[0x46, 0x02, sfn[0], sfn[1], 0, 0, 0, 0x0F, 0xFF, 0]);
        assert_eq!(status, GOOD);
        assert_eq!(feature_codes(&one), vec![code]);
    }
}

#[test]
fn get_configuration_starting_feature_number() {
    let device = empty_device();

    let (_, out) = exec(&device, &[0x46, 0x00, 0x01, 0x00, 0, 0, 0, 0x0F, 0xFF, 0]);
    let codes = feature_codes(&out);
    assert_eq!(codes, vec![0x0100, 0x0103, 0x0106, 0x0107]);
}

#[test]
fn get_configuration_profile_none_when_empty() {
    let device = empty_device();
    let (_, out) = exec(&device, &[0x46, 0x00, 0, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(u16::from_be_bytes(out[6..8].try_into().unwrap()), 0x0000);
}

// ============================================================================
// Medium removal and eject
// ============================================================================

#[test]
fn prevent_blocks_eject() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    // PREVENT
    let (status, _) = exec(&device, &[0x1E, 0, 0, 0, 1, 0]);
    assert_eq!(status, GOOD);

    // The capabilities page reflects the lock
    let (_, page) = exec(&device, &[0x5A, 0, 0x2A, 0, 0, 0, 0, 0x0F, 0xFF, 0]);
    assert_eq!(page[8 + 6] & 0x02, 0x02);

    // START/STOP UNIT with LoEj fails
    let (status, out) = exec(&device, &[0x1B, 0, 0, 0, 0x02, 0]);
    assert_sense(status, &out, 0x02, 0x53, 0x02);
    assert!(device.status().0);

    // ALLOW, then eject succeeds
    let (status, _) = exec(&device, &[0x1E, 0, 0, 0, 0, 0]);
    assert_eq!(status, GOOD);
    let (status, _) = exec(&device, &[0x1B, 0, 0, 0, 0x02, 0]);
    assert_eq!(status, GOOD);
    assert!(!device.status().0);

    // The drive is now empty
    let (status, out) = exec(&device, &[0x00, 0, 0, 0, 0, 0]);
    assert_sense(status, &out, 0x02, 0x3A, 0x00);
}

#[test]
fn start_stop_without_eject_is_noop() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (status, _) = exec(&device, &[0x1B, 0, 0, 0, 0x01, 0]);
    assert_eq!(status, GOOD);
    assert!(device.status().0);
}

// ============================================================================
// Audio commands
// ============================================================================

#[test]
fn play_audio_on_data_track_is_rejected() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (status, _) = exec(&device, &[0x45, 0, 0, 0, 0, 10, 0, 0, 5, 0]);
    assert_eq!(status, CHECK_CONDITION);

    // REQUEST SENSE reports the audio error status in the ASCQ field
    let (status, out) = exec(&device, &[0x03, 0, 0, 0, 18, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out[2] & 0x0F, 0x00); // NO SENSE
    assert_eq!(out[12], 0x00);
    assert_eq!(out[13], AudioStatus::Error as u8);
}

#[test]
fn play_pause_resume_sequence() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    // PLAY AUDIO (10) over the audio track
    let (status, _) = exec(&device, &[0x45, 0, 0, 0, 0, 100, 0, 0, 200, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(device.audio().status(), AudioStatus::Playing);

    // PAUSE
    let (status, _) = exec(&device, &[0x4B, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(device.audio().status(), AudioStatus::Paused);

    // RESUME
    let (status, _) = exec(&device, &[0x4B, 0, 0, 0, 0, 0, 0, 0, 1, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(device.audio().status(), AudioStatus::Playing);

    device.audio().stop().unwrap();
    assert_eq!(device.audio().status(), AudioStatus::NoStatus);
}

#[test]
fn pause_without_playback_is_sequence_error() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x4B, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_sense(status, &out, 0x05, 0x2C, 0x00);

    let (status, out) = exec(&device, &[0x4B, 0, 0, 0, 0, 0, 0, 0, 1, 0]);
    assert_sense(status, &out, 0x05, 0x2C, 0x00);
}

#[test]
fn play_audio_msf_form() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    // 00:04:00 .. 00:05:00 = sectors 150..225
    let (status, _) = exec(&device, &[0x47, 0, 0, 0, 4, 0, 0, 5, 0, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(device.audio().status(), AudioStatus::Playing);
    device.audio().stop().unwrap();
}

#[test]
fn disturbing_command_stops_playback() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    let (status, _) = exec(&device, &[0x45, 0, 0, 0, 0, 100, 0, 0, 200, 0]);
    assert_eq!(status, GOOD);

    // READ (10) disturbs audio play
    let (status, _) = exec(&device, &[0x28, 0, 0, 0, 0, 5, 0, 0, 1, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(device.audio().status(), AudioStatus::NoStatus);
}

#[test]
fn request_sense_reports_playing_status() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    let (status, _) = exec(&device, &[0x45, 0, 0, 0, 0, 100, 0, 0, 200, 0]);
    assert_eq!(status, GOOD);

    let (_, out) = exec(&device, &[0x03, 0, 0, 0, 18, 0]);
    assert_eq!(out[13], AudioStatus::Playing as u8);

    device.audio().stop().unwrap();
}

// ============================================================================
// READ SUBCHANNEL
// ============================================================================

#[test]
fn subchannel_current_position() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    // Read sector 150 to move the head there
    let (status, _) = exec(&device, &[0xBE, 0, 0, 0, 0, 150, 0, 0, 1, 0x10, 0, 0]);
    assert_eq!(status, GOOD);

    let (status, out) = exec(&device, &[0x42, 0x00, 0x40, 0x01, 0, 0, 0, 0, 48, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out.len(), 16);
    assert_eq!(out[4], 0x01); // Format code
    assert_eq!(out[6], 2); // Track 2
    assert_eq!(out[7], 1); // Index 01
    // Addresses are hex, not BCD
    assert_eq!(u32::from_be_bytes(out[8..12].try_into().unwrap()), 150);
    assert_eq!(u32::from_be_bytes(out[12..16].try_into().unwrap()), 50);
}

#[test]
fn subchannel_current_position_msf() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    let (_, _) = exec(&device, &[0xBE, 0, 0, 0, 0, 150, 0, 0, 1, 0x10, 0, 0]);

    let (status, out) = exec(&device, &[0x42, 0x02, 0x40, 0x01, 0, 0, 0, 0, 48, 0]);
    assert_eq!(status, GOOD);
    // Absolute MSF 00:04:00 (sector 150 + lead-in)
    assert_eq!((out[9], out[10], out[11]), (0, 4, 0));
}

#[test]
fn subchannel_mcn_scan() {
    let disc = DiscBuilder::new(MediumType::Cd)
        .audio_track(200)
        .mcn("1234567890123")
        .finish();
    let device = device_with(disc);
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x42, 0x00, 0x40, 0x02, 0, 0, 0, 0, 48, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out[4], 0x02);
    assert_eq!(out[8] & 0x80, 0x80); // MCVal
    assert_eq!(&out[9..22], b"1234567890123");
}

#[test]
fn subchannel_mcn_absent_is_silent() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x42, 0x00, 0x40, 0x02, 0, 0, 0, 0, 48, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out[8] & 0x80, 0x00); // MCVal clear
}

#[test]
fn subchannel_isrc_scan() {
    let disc = DiscBuilder::new(MediumType::Cd)
        .audio_track(200)
        .isrc("USAB10500123")
        .finish();
    let device = device_with(disc);
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x42, 0x00, 0x40, 0x03, 0, 0, 1, 0, 48, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out[4], 0x03);
    assert_eq!(out[8] & 0x80, 0x80); // TCVal
    assert_eq!(&out[9..21], b"USAB10500123");
}

#[test]
fn subchannel_isrc_unknown_track_rejected() {
    let device = device_with(mixed_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x42, 0x00, 0x40, 0x03, 0, 0, 9, 0, 48, 0]);
    assert_sense(status, &out, 0x05, 0x24, 0x00);
}

// ============================================================================
// DVD commands
// ============================================================================

#[test]
fn read_dvd_structure_delegates_to_disc() {
    let device = device_with(dvd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0xAD, 0, 0, 0, 0, 0, 0, 0x00, 0x0F, 0xFF, 0, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(u16::from_be_bytes(out[0..2].try_into().unwrap()), 6);
    assert_eq!(&out[4..8], &[0x11, 0x22, 0x33, 0x44]);
}

#[test]
fn read_dvd_structure_missing_format() {
    let device = device_with(dvd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0xAD, 0, 0, 0, 0, 0, 0, 0x04, 0x0F, 0xFF, 0, 0]);
    assert_sense(status, &out, 0x05, 0x24, 0x00);
}

#[test]
fn read_dvd_structure_rejected_on_cd() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0xAD, 0, 0, 0, 0, 0, 0, 0x00, 0x0F, 0xFF, 0, 0]);
    assert_sense(status, &out, 0x05, 0x30, 0x02);
}

#[test]
fn report_key_rpc_status() {
    let device = device_with(dvd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0xA4, 0, 0, 0, 0, 0, 0, 0, 0x0F, 0xFF, 0x08, 0]);
    assert_eq!(status, GOOD);
    assert_eq!(out.len(), 8);
    assert_eq!(u16::from_be_bytes(out[0..2].try_into().unwrap()), 6);
    assert_eq!(out[4], (4 << 3) | 5); // No region; 4 vendor resets, 5 user changes
    assert_eq!(out[5], 0xFF); // Region mask
    assert_eq!(out[6], 0x01); // RPC scheme
}

#[test]
fn report_key_other_formats_rejected() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0xA4, 0, 0, 0, 0, 0, 0, 0, 0x0F, 0xFF, 0x00, 0]);
    assert_sense(status, &out, 0x05, 0x24, 0x00);
}

// ============================================================================
// SEEK
// ============================================================================

#[test]
fn seek_is_accepted() {
    let device = device_with(one_track_cd());
    clear_unit_attention(&device);

    let (status, out) = exec(&device, &[0x2B, 0, 0, 0, 0, 50, 0, 0, 0, 0]);
    assert_eq!(status, GOOD);
    assert!(out.is_empty());
}
