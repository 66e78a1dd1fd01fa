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

//! MMC feature registry and profiles
//!
//! Features are stored as raw records, ready to be copied into a GET
//! CONFIGURATION response:
//!
//! ```text
//! Bytes 0-1: Feature code (big-endian)
//! Byte 2:    Version (bits 2-5) | Persistent (bit 1) | Current (bit 0)
//! Byte 3:    Additional length
//! Bytes 4..: Feature-specific payload
//! ```
//!
//! The list is kept sorted ascending by code. Profile transitions flip
//! the `current` bit of every feature as a function of the new profile.

/// MMC operating profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Profile {
    /// No medium present
    None = 0x0000,
    /// CD-ROM medium
    CdRom = 0x0008,
    /// DVD-ROM medium
    DvdRom = 0x0010,
}

/// Feature codes registered by the device
pub mod feature {
    /// Profile List
    pub const PROFILE_LIST: u16 = 0x0000;
    /// Core
    pub const CORE: u16 = 0x0001;
    /// Morphing
    pub const MORPHING: u16 = 0x0002;
    /// Removable Medium
    pub const REMOVABLE_MEDIUM: u16 = 0x0003;
    /// Random Readable
    pub const RANDOM_READABLE: u16 = 0x0010;
    /// Multi-Read
    pub const MULTI_READ: u16 = 0x001D;
    /// CD Read
    pub const CD_READ: u16 = 0x001E;
    /// DVD Read
    pub const DVD_READ: u16 = 0x001F;
    /// Power Management
    pub const POWER_MANAGEMENT: u16 = 0x0100;
    /// CD External Audio Play
    pub const CD_AUDIO_PLAY: u16 = 0x0103;
    /// DVD CSS
    pub const DVD_CSS: u16 = 0x0106;
    /// Real Time Streaming
    pub const REAL_TIME_STREAMING: u16 = 0x0107;
}

/// A registered feature record
#[derive(Debug, Clone)]
pub struct Feature {
    /// Feature code
    pub code: u16,
    /// Raw record including the four header bytes
    pub data: Vec<u8>,
}

impl Feature {
    /// Build a feature record
    fn new(code: u16, version: u8, persistent: bool, payload: &[u8]) -> Self {
        let mut data = Vec::with_capacity(4 + payload.len());
        data.extend_from_slice(&code.to_be_bytes());
        let mut flags = version << 2;
        if persistent {
            flags |= 0x03; // persistent features are always current
        }
        data.push(flags);
        data.push(payload.len() as u8);
        data.extend_from_slice(payload);
        Self { code, data }
    }

    /// Whether the feature is currently active
    pub fn current(&self) -> bool {
        self.data[2] & 0x01 != 0
    }

    /// Whether the feature is persistent (always active)
    pub fn persistent(&self) -> bool {
        self.data[2] & 0x02 != 0
    }

    fn set_current(&mut self, current: bool) {
        if current {
            self.data[2] |= 0x01;
        } else {
            self.data[2] &= !0x01;
        }
    }
}

/// Registry of MMC features, kept sorted ascending by code
#[derive(Debug)]
pub struct FeatureRegistry {
    features: Vec<Feature>,
    profile: Profile,
}

impl FeatureRegistry {
    /// Create the registry with the full feature set and profile `None`
    pub fn new() -> Self {
        let mut features = Vec::new();

        // 0x0000: Profile List; two profiles, CD-ROM and DVD-ROM. The
        // per-profile current bits are maintained by set_profile.
        features.push(Feature::new(
            feature::PROFILE_LIST,
            0,
            true,
            &[
                0x00, 0x10, 0x00, 0x00, // DVD-ROM
                0x00, 0x08, 0x00, 0x00, // CD-ROM
            ],
        ));

        // 0x0001: Core; ATAPI physical interface, device-busy events
        features.push(Feature::new(
            feature::CORE,
            2,
            true,
            &[0x00, 0x00, 0x00, 0x02, 0x03, 0x00, 0x00, 0x00],
        ));

        // 0x0002: Morphing; asynchronous GET EVENT supported
        features.push(Feature::new(feature::MORPHING, 1, true, &[0x01, 0x00, 0x00, 0x00]));

        // 0x0003: Removable Medium; tray loader, eject, lock
        features.push(Feature::new(
            feature::REMOVABLE_MEDIUM,
            0,
            true,
            &[0x29, 0x00, 0x00, 0x00],
        ));

        // 0x0010: Random Readable; 2048-byte blocks
        features.push(Feature::new(
            feature::RANDOM_READABLE,
            0,
            false,
            &[0x00, 0x00, 0x08, 0x00, 0x00, 0x01, 0x01, 0x00],
        ));

        // 0x001D: Multi-Read
        features.push(Feature::new(feature::MULTI_READ, 0, false, &[]));

        // 0x001E: CD Read
        features.push(Feature::new(feature::CD_READ, 0, false, &[0x00, 0x00, 0x00, 0x00]));

        // 0x001F: DVD Read
        features.push(Feature::new(feature::DVD_READ, 0, false, &[0x00, 0x00, 0x00, 0x00]));

        // 0x0100: Power Management
        features.push(Feature::new(feature::POWER_MANAGEMENT, 0, true, &[]));

        // 0x0103: CD External Audio Play; separate volume and channel
        // muting, 256 volume levels
        features.push(Feature::new(
            feature::CD_AUDIO_PLAY,
            0,
            false,
            &[0x03, 0x00, 0x01, 0x00],
        ));

        // 0x0106: DVD CSS; CSS version 1
        features.push(Feature::new(feature::DVD_CSS, 0, false, &[0x00, 0x00, 0x00, 0x01]));

        // 0x0107: Real Time Streaming
        features.push(Feature::new(
            feature::REAL_TIME_STREAMING,
            0,
            true,
            &[0x00, 0x00, 0x00, 0x00],
        ));

        features.sort_by_key(|f| f.code);

        let mut registry = Self {
            features,
            profile: Profile::None,
        };
        registry.set_profile(Profile::None);
        registry
    }

    /// Currently active profile
    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Look up a feature by code
    pub fn get(&self, code: u16) -> Option<&Feature> {
        self.features
            .binary_search_by_key(&code, |f| f.code)
            .ok()
            .map(|i| &self.features[i])
    }

    /// Iterate over all features in ascending code order
    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Switch the active profile, updating every feature's current bit
    ///
    /// Persistent features stay current in every profile; the
    /// medium-dependent features follow the profile, and the profile-list
    /// payload marks the active profile.
    pub fn set_profile(&mut self, profile: Profile) {
        self.profile = profile;

        for feat in &mut self.features {
            if feat.persistent() {
                continue;
            }
            let current = match profile {
                Profile::None => false,
                Profile::CdRom => matches!(
                    feat.code,
                    feature::RANDOM_READABLE
                        | feature::MULTI_READ
                        | feature::CD_READ
                        | feature::CD_AUDIO_PLAY
                ),
                Profile::DvdRom => matches!(
                    feat.code,
                    feature::RANDOM_READABLE | feature::DVD_READ | feature::DVD_CSS
                ),
            };
            feat.set_current(current);
        }

        // Profile list payload: descriptors are {code BE, current, reserved}
        if let Ok(i) = self
            .features
            .binary_search_by_key(&feature::PROFILE_LIST, |f| f.code)
        {
            let data = &mut self.features[i].data;
            for desc in (4..data.len()).step_by(4) {
                let code = u16::from_be_bytes([data[desc], data[desc + 1]]);
                data[desc + 2] = (code == profile as u16) as u8;
            }
        }
    }
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self::new()
    }
}
