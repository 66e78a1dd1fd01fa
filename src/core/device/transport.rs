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

//! Kernel control device transport
//!
//! One blocking I/O thread per device reads request frames from the VHBA
//! control device, executes the carried command, and writes the response
//! back into the same buffer.
//!
//! # Wire frames
//!
//! ```text
//! Request:  u32 tag | u32 lun | u8[16] cdb | u8 cdb_len | pad |
//!           u32 data_len | u8[data_len] in_data
//! Response: u32 tag | u32 status | u32 data_len | u8[data_len] out_data
//! ```
//!
//! Header words use the host byte order of the kernel module. A short
//! read or write is fatal for the device's I/O loop (but not for the
//! daemon).

use std::fs::File;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::device::Device;

/// Maximum CDB size carried in a request frame
pub const MAX_COMMAND_SIZE: usize = 16;

/// Maximum sense data the kernel may request
pub const MAX_SENSE: usize = 256;

/// Maximum sectors transferred by a single command
pub const MAX_SECTORS: usize = 256;

/// Size of the request frame header, including alignment padding
pub const REQUEST_HEADER_SIZE: usize = 32;

/// Size of the response frame header
pub const RESPONSE_HEADER_SIZE: usize = 12;

/// Sectors needed for the response header and sense data
const OTHER_SECTORS: usize = (MAX_SENSE + RESPONSE_HEADER_SIZE).div_ceil(512);

/// Transfer buffer size shared by request and response
pub const BUF_SIZE: usize = 512 * (MAX_SECTORS + OTHER_SECTORS);

/// A parsed request frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Tag echoed in the response
    pub tag: u32,
    /// Logical unit (ignored; single-LUN emulation)
    pub lun: u32,
    /// CDB, zero-padded to 12 bytes
    pub cdb: [u8; 12],
    /// Bytes the initiator wants transferred in either direction
    pub data_len: u32,
}

impl Request {
    /// Parse a request frame header
    ///
    /// Returns `None` when the buffer is shorter than a header or the
    /// CDB length field is out of range.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < REQUEST_HEADER_SIZE {
            return None;
        }

        let tag = u32::from_ne_bytes(buf[0..4].try_into().unwrap());
        let lun = u32::from_ne_bytes(buf[4..8].try_into().unwrap());
        let cdb_len = buf[24] as usize;
        let data_len = u32::from_ne_bytes(buf[28..32].try_into().unwrap());

        if cdb_len == 0 || cdb_len > MAX_COMMAND_SIZE {
            return None;
        }

        // Handlers only use the first 12 CDB bytes
        let mut cdb = [0u8; 12];
        let len = cdb_len.min(12);
        cdb[..len].copy_from_slice(&buf[8..8 + len]);

        Some(Self {
            tag,
            lun,
            cdb,
            data_len,
        })
    }
}

/// Serialize a response frame header into the transfer buffer
pub fn write_response_header(buf: &mut [u8], tag: u32, scsi_status: u32, data_len: u32) {
    buf[0..4].copy_from_slice(&tag.to_ne_bytes());
    buf[4..8].copy_from_slice(&scsi_status.to_ne_bytes());
    buf[8..12].copy_from_slice(&data_len.to_ne_bytes());
}

/// Run the device I/O loop until `stop` is raised or a transport error
/// occurs
///
/// Each iteration reads one request frame, executes the command under
/// the device mutex, and writes one response frame.
pub fn run_io_loop(device: Arc<Device>, mut ctl: File, stop: Arc<AtomicBool>) {
    let mut buf = vec![0u8; BUF_SIZE];
    let mut in_data = vec![0u8; BUF_SIZE];

    log::debug!("{}: I/O loop start", device.name());

    while !stop.load(Ordering::Relaxed) {
        let n = match ctl.read(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                log::error!(
                    "{}: failed to read request from control device: {}",
                    device.name(),
                    e
                );
                break;
            }
        };

        let Some(request) = Request::parse(&buf[..n]) else {
            log::error!("{}: short or malformed request frame", device.name());
            break;
        };

        log::trace!(
            "Kernel I/O: request tag {} with {} data bytes",
            request.tag,
            request.data_len
        );

        // Request and response share the buffer; the initiator data is
        // saved aside before the response overwrites it
        let in_len = (request.data_len as usize)
            .min(n.saturating_sub(REQUEST_HEADER_SIZE));
        in_data[..in_len].copy_from_slice(&buf[REQUEST_HEADER_SIZE..REQUEST_HEADER_SIZE + in_len]);

        let out_space = (request.data_len as usize)
            .max(MAX_SENSE)
            .min(BUF_SIZE - RESPONSE_HEADER_SIZE);
        let (status, out_len) = device.execute_command(
            request.cdb,
            &in_data[..in_len],
            &mut buf[RESPONSE_HEADER_SIZE..RESPONSE_HEADER_SIZE + out_space],
        );

        write_response_header(&mut buf, request.tag, status, out_len as u32);

        match ctl.write(&buf) {
            Ok(written) if written >= RESPONSE_HEADER_SIZE => {}
            Ok(_) => {
                log::error!("{}: short write to control device", device.name());
                break;
            }
            Err(e) => {
                log::error!(
                    "{}: failed to write response to control device: {}",
                    device.name(),
                    e
                );
                break;
            }
        }
    }

    log::debug!("{}: I/O loop end", device.name());
}
