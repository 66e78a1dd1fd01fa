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

//! Core daemon components
//!
//! This module contains the components of the drive emulation daemon:
//! - Sense data and SCSI status codes
//! - Disc image model (discs, sessions, tracks, sectors)
//! - Device object (command dispatcher, MMC handlers, kernel transport)
//! - Audio playback engine and output sinks
//! - Daemon controller and management RPC
//! - Configuration loading

pub mod audio;
pub mod config;
pub mod daemon;
pub mod device;
pub mod error;
pub mod image;
pub mod sense;

// Re-export commonly used types
pub use audio::{AudioBackend, AudioStatus};
pub use daemon::Daemon;
pub use device::Device;
pub use error::{DaemonError, ImageError, Result};
pub use image::{Disc, MediumType, SectorType};
pub use sense::{SenseData, SenseKey};
