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

//! Shared fixtures and assertions for command-level testing

use std::sync::Arc;

use discemu::core::audio::AudioBackend;
use discemu::core::device::Device;
use discemu::core::image::{Disc, DiscBuilder, MediumType, SectorType};

/// SCSI GOOD status
pub const GOOD: u32 = 0x00;

/// SCSI CHECK CONDITION status
pub const CHECK_CONDITION: u32 = 0x02;

/// A device with no medium
pub fn empty_device() -> Device {
    Device::new(0, AudioBackend::null())
}

/// A device loaded with the given disc
pub fn device_with(disc: Disc) -> Device {
    let device = Device::new(0, AudioBackend::null());
    device.insert(Arc::new(disc)).unwrap();
    device
}

/// One 100-sector Mode 1 data track
pub fn one_track_cd() -> Disc {
    DiscBuilder::new(MediumType::Cd)
        .data_track(SectorType::Mode1, 100)
        .finish()
}

/// A data track followed by two audio tracks
pub fn mixed_cd() -> Disc {
    DiscBuilder::new(MediumType::Cd)
        .data_track(SectorType::Mode1, 100)
        .audio_track(200)
        .audio_track(150)
        .finish()
}

/// A single-track DVD-ROM with one disc structure
pub fn dvd() -> Disc {
    DiscBuilder::new(MediumType::Dvd)
        .data_track(SectorType::Mode1, 50)
        .structure(0, 0x00, vec![0x11, 0x22, 0x33, 0x44])
        .finish()
}

/// Execute a command with no input data
///
/// Pads the CDB to 12 bytes; returns the SCSI status and the produced
/// output bytes.
pub fn exec(device: &Device, cdb: &[u8]) -> (u32, Vec<u8>) {
    exec_with_input(device, cdb, &[])
}

/// Execute a command carrying initiator data
pub fn exec_with_input(device: &Device, cdb: &[u8], input: &[u8]) -> (u32, Vec<u8>) {
    let mut padded = [0u8; 12];
    padded[..cdb.len()].copy_from_slice(cdb);

    let mut output = vec![0u8; 512 * 260];
    let (status, len) = device.execute_command(padded, input, &mut output);
    output.truncate(len);
    (status, output)
}

/// Consume the unit attention a fresh load leaves behind
pub fn clear_unit_attention(device: &Device) {
    let (_, _) = exec(device, &[0x00, 0, 0, 0, 0, 0]);
}

/// Assert a CHECK CONDITION response carrying the given sense
#[track_caller]
pub fn assert_sense(status: u32, out: &[u8], key: u8, asc: u8, ascq: u8) {
    assert_eq!(status, CHECK_CONDITION, "expected CHECK CONDITION");
    assert!(out.len() >= 18, "sense data too short: {} bytes", out.len());
    assert_eq!(out[0], 0x70, "sense response code");
    assert_eq!(out[2] & 0x0F, key, "sense key");
    assert_eq!(out[12], asc, "ASC");
    assert_eq!(out[13], ascq, "ASCQ");
}
