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

//! Virtual CD/DVD-ROM drive emulation daemon core library
//!
//! This library provides the core components of a userspace daemon that
//! emulates optical drives by answering SCSI/MMC-3 packet commands issued
//! by a kernel VHBA module, backing the emulated media with disc image
//! files.
//!
//! # Example
//!
//! ```no_run
//! use discemu::core::audio::AudioBackend;
//! use discemu::core::device::Device;
//!
//! let device = Device::new(0, AudioBackend::null());
//! device.load(&["game.cue".to_string()]).unwrap();
//!
//! // TEST UNIT READY
//! let cdb = [0x00u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
//! let mut out = vec![0u8; 512];
//! let (_status, _len) = device.execute_command(cdb, &[], &mut out);
//! ```

pub mod core;
