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

//! Emulated drive device
//!
//! A [`Device`] is one emulated CD/DVD-ROM drive: it owns the medium
//! state, the mode-page and feature registries, the audio engine, and
//! executes MMC packet commands against them. All command execution and
//! state mutation is serialized by a single device mutex; the audio
//! worker publishes its progress through a lock-free cursor so that
//! stopping playback from under the mutex can never deadlock.

pub mod commands;
pub mod delay;
pub mod features;
pub mod mode_pages;
pub mod transport;

pub use commands::Command;
pub use features::{Feature, FeatureRegistry, Profile};
pub use mode_pages::{ModePage, ModePageRegistry, PageView};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::core::audio::{AudioBackend, AudioEngine};
use crate::core::error::{DaemonError, Result};
use crate::core::image::{Disc, MediumType};

use delay::DelayEmulator;

/// Pending medium event, reported via GET EVENT/STATUS NOTIFICATION
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MediaEvent {
    /// No change since the last poll
    NoChange = 0,
    /// New medium has been inserted
    NewMedia = 2,
    /// Medium has been removed
    MediaRemoval = 3,
}

/// Typed value of a device option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Boolean option
    Bool(bool),
    /// Integer option
    Int(i32),
    /// Device identity quadruple (vendor, product, revision, vendor-specific)
    DeviceId(String, String, String, String),
}

/// Device inquiry identity
#[derive(Debug, Clone)]
pub struct DeviceId {
    /// Vendor identification (8 bytes, space padded)
    pub vendor: [u8; 8],
    /// Product identification (16 bytes, space padded)
    pub product: [u8; 16],
    /// Product revision (4 bytes, space padded)
    pub revision: [u8; 4],
    /// Vendor-specific field (20 bytes, space padded)
    pub vendor_specific: [u8; 20],
}

impl DeviceId {
    /// Build an identity from strings, truncating and space-padding
    pub fn new(vendor: &str, product: &str, revision: &str, vendor_specific: &str) -> Self {
        fn pad<const N: usize>(s: &str) -> [u8; N] {
            let mut buf = [b' '; N];
            let bytes = s.as_bytes();
            let len = bytes.len().min(N);
            buf[..len].copy_from_slice(&bytes[..len]);
            buf
        }
        Self {
            vendor: pad(vendor),
            product: pad(product),
            revision: pad(revision),
            vendor_specific: pad(vendor_specific),
        }
    }

    fn field_string(field: &[u8]) -> String {
        String::from_utf8_lossy(field).trim_end().to_string()
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new("DISCEMU ", "Virt. CD/DVD-ROM", "1.10", "    discemu.dev     ")
    }
}

/// Events a device reports to its owner (the daemon controller)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Loaded state changed (load/unload/eject)
    StatusChanged,
    /// An option value changed
    OptionChanged(String),
}

type SignalHook = Box<dyn Fn(u32, DeviceEvent) + Send + Sync>;

/// Mutable device state, guarded by the device mutex
pub struct DeviceState {
    /// Scratch buffer for response assembly
    pub(crate) buffer: Vec<u8>,
    /// Valid bytes in the scratch buffer
    pub(crate) buffer_len: usize,
    pub(crate) mode_pages: ModePageRegistry,
    pub(crate) features: FeatureRegistry,
    pub(crate) disc: Option<Arc<Disc>>,
    pub(crate) media_event: MediaEvent,
    pub(crate) locked: bool,
    pub(crate) id: DeviceId,
    pub(crate) dpm_emulation: bool,
    pub(crate) tr_emulation: bool,
    pub(crate) daemon_debug_mask: i32,
    pub(crate) library_debug_mask: i32,
    pub(crate) delay: DelayEmulator,
    pub(crate) mapping: Option<(String, String)>,
    pending_events: Vec<DeviceEvent>,
}

impl DeviceState {
    /// Whether a medium is loaded
    pub fn loaded(&self) -> bool {
        self.disc.is_some()
    }

    /// Current MMC profile
    pub fn profile(&self) -> Profile {
        self.features.profile()
    }

    pub(crate) fn queue_event(&mut self, event: DeviceEvent) {
        self.pending_events.push(event);
    }
}

/// One emulated drive
pub struct Device {
    number: u32,
    state: Mutex<DeviceState>,
    /// Sector most recently accessed by reads or audio playback
    cursor: Arc<AtomicU32>,
    audio: AudioEngine,
    hook: Mutex<Option<SignalHook>>,
}

impl Device {
    /// Scratch buffer size; large enough for every non-read response
    const BUFFER_SIZE: usize = 4096;

    /// Create a device with the given number and audio backend
    pub fn new(number: u32, audio_backend: AudioBackend) -> Self {
        let cursor = Arc::new(AtomicU32::new(0));
        let audio = AudioEngine::new(audio_backend, cursor.clone());

        log::debug!("{}: device created", device_name(number));

        Self {
            number,
            state: Mutex::new(DeviceState {
                buffer: vec![0; Self::BUFFER_SIZE],
                buffer_len: 0,
                mode_pages: ModePageRegistry::new(),
                features: FeatureRegistry::new(),
                disc: None,
                media_event: MediaEvent::NoChange,
                locked: false,
                id: DeviceId::default(),
                dpm_emulation: true,
                tr_emulation: false,
                daemon_debug_mask: 0,
                library_debug_mask: 0,
                delay: DelayEmulator::new(),
                mapping: None,
                pending_events: Vec::new(),
            }),
            cursor,
            audio,
            hook: Mutex::new(None),
        }
    }

    /// Device number
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Device name used in log output
    pub fn name(&self) -> String {
        device_name(self.number)
    }

    /// Install the signal hook the daemon uses to forward device events
    pub fn set_signal_hook(&self, hook: impl Fn(u32, DeviceEvent) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Audio engine of the device
    pub fn audio(&self) -> &AudioEngine {
        &self.audio
    }

    /// Sector most recently accessed by reads or audio playback
    pub fn current_sector(&self) -> u32 {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Load a medium from image files
    pub fn load(&self, filenames: &[String]) -> Result<()> {
        let disc = Arc::new(Disc::load(filenames)?);
        self.insert(disc)
    }

    /// Insert an already-parsed disc as the medium
    pub fn insert(&self, disc: Arc<Disc>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.disc.is_some() {
                return Err(DaemonError::AlreadyLoaded);
            }

            let profile = match disc.medium_type() {
                MediumType::Cd => Profile::CdRom,
                MediumType::Dvd => Profile::DvdRom,
            };
            state.features.set_profile(profile);
            state.media_event = MediaEvent::NewMedia;
            state.disc = Some(disc);
            state.queue_event(DeviceEvent::StatusChanged);

            log::info!("{}: medium loaded ({:?})", self.name(), profile);
        }
        self.drain_events();
        Ok(())
    }

    /// Unload the medium
    ///
    /// Fails with [`DaemonError::DeviceLocked`] when the medium is
    /// locked and `force` is not set; unloading an empty drive is a
    /// successful no-op.
    pub fn unload(&self, force: bool) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            unload_medium(&mut state, &self.audio, force)?;
        }
        self.drain_events();
        Ok(())
    }

    /// Loaded state and image file names
    pub fn status(&self) -> (bool, Vec<String>) {
        let state = self.state.lock().unwrap();
        match &state.disc {
            Some(disc) => (true, disc.filenames().to_vec()),
            None => (false, Vec::new()),
        }
    }

    /// Get a device option by name
    pub fn get_option(&self, name: &str) -> Result<OptionValue> {
        let state = self.state.lock().unwrap();
        match name {
            "dpm-emulation" => Ok(OptionValue::Bool(state.dpm_emulation)),
            "tr-emulation" => Ok(OptionValue::Bool(state.tr_emulation)),
            "device-id" => Ok(OptionValue::DeviceId(
                DeviceId::field_string(&state.id.vendor),
                DeviceId::field_string(&state.id.product),
                DeviceId::field_string(&state.id.revision),
                DeviceId::field_string(&state.id.vendor_specific),
            )),
            "daemon-debug-mask" => Ok(OptionValue::Int(state.daemon_debug_mask)),
            "library-debug-mask" => Ok(OptionValue::Int(state.library_debug_mask)),
            _ => {
                log::warn!("{}: option '{}' not found; client bug?", self.name(), name);
                Err(DaemonError::InvalidArgument(format!(
                    "unknown option '{}'",
                    name
                )))
            }
        }
    }

    /// Set a device option by name
    ///
    /// Emits [`DeviceEvent::OptionChanged`] on success.
    pub fn set_option(&self, name: &str, value: OptionValue) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            match (name, value) {
                ("dpm-emulation", OptionValue::Bool(v)) => state.dpm_emulation = v,
                ("tr-emulation", OptionValue::Bool(v)) => state.tr_emulation = v,
                ("device-id", OptionValue::DeviceId(vendor, product, revision, specific)) => {
                    state.id = DeviceId::new(&vendor, &product, &revision, &specific);
                }
                ("daemon-debug-mask", OptionValue::Int(v)) => state.daemon_debug_mask = v,
                ("library-debug-mask", OptionValue::Int(v)) => state.library_debug_mask = v,
                (
                    "dpm-emulation" | "tr-emulation" | "device-id" | "daemon-debug-mask"
                    | "library-debug-mask",
                    _,
                ) => {
                    return Err(DaemonError::InvalidArgument(format!(
                        "invalid value type for option '{}'",
                        name
                    )));
                }
                _ => {
                    log::warn!("{}: option '{}' not found; client bug?", self.name(), name);
                    return Err(DaemonError::InvalidArgument(format!(
                        "unknown option '{}'",
                        name
                    )));
                }
            }
            state.queue_event(DeviceEvent::OptionChanged(name.to_string()));
        }
        self.drain_events();
        Ok(())
    }

    /// Kernel block/generic device nodes assigned to this device, once
    /// the mapping probe has resolved them
    pub fn mapping(&self) -> Option<(String, String)> {
        self.state.lock().unwrap().mapping.clone()
    }

    /// Try to resolve the sr/sg device nodes assigned by the kernel
    ///
    /// The SCSI layer enumerates the emulated device some time after the
    /// daemon starts answering commands, so the probe is retried by the
    /// controller until it succeeds. Returns true once the mapping is
    /// complete.
    pub fn probe_mapping(&self) -> bool {
        {
            let state = self.state.lock().unwrap();
            if state.mapping.is_some() {
                return true;
            }
        }

        let Some((sr, sg)) = scan_scsi_mapping(self.number) else {
            log::debug!("{}: device mapping not ready yet", self.name());
            return false;
        };

        log::info!("{}: mapped to {} / {}", self.name(), sr, sg);
        self.state.lock().unwrap().mapping = Some((sr, sg));
        true
    }

    /// Execute one packet command
    ///
    /// `input` carries initiator-to-device data (MODE SELECT), `output`
    /// receives the response payload or sense data. Returns the SCSI
    /// status and the number of output bytes produced.
    pub fn execute_command(&self, cdb: [u8; 12], input: &[u8], output: &mut [u8]) -> (u32, usize) {
        let result = {
            let mut state = self.state.lock().unwrap();
            let mut cmd = Command {
                cdb,
                input,
                output,
            };
            commands::execute(&mut state, &self.audio, &self.cursor, &mut cmd)
        };
        self.drain_events();
        result
    }

    /// Forward queued device events to the daemon hook
    fn drain_events(&self) {
        let events: Vec<DeviceEvent> = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.pending_events)
        };
        if events.is_empty() {
            return;
        }
        let hook = self.hook.lock().unwrap();
        if let Some(hook) = hook.as_ref() {
            for event in events {
                hook(self.number, event);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }
}

/// Unload the medium with the device state already locked
///
/// Shared by [`Device::unload`] and the START/STOP UNIT eject path.
pub(crate) fn unload_medium(
    state: &mut DeviceState,
    audio: &AudioEngine,
    force: bool,
) -> Result<()> {
    if state.disc.is_none() {
        return Ok(());
    }
    if state.locked && !force {
        return Err(DaemonError::DeviceLocked);
    }

    audio.stop_if_active();
    state.disc = None;
    state.features.set_profile(Profile::None);
    state.media_event = MediaEvent::MediaRemoval;
    state.queue_event(DeviceEvent::StatusChanged);

    log::info!("medium unloaded");
    Ok(())
}

/// Log name of a device
fn device_name(number: u32) -> String {
    format!("discemu{}", number)
}

/// Scan sysfs for the sr/sg nodes of the emulated device
///
/// The VHBA module registers one SCSI target per emulated device, with
/// the device number as the target id on the virtual host adapter.
fn scan_scsi_mapping(number: u32) -> Option<(String, String)> {
    let devices = std::fs::read_dir("/sys/bus/scsi/devices").ok()?;

    for entry in devices.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        // SCSI address format is host:channel:target:lun
        let parts: Vec<&str> = name.split(':').collect();
        if parts.len() != 4 || parts[2] != number.to_string() {
            continue;
        }

        // Only our virtual adapter's targets are interesting
        let model = std::fs::read_to_string(path.join("model")).unwrap_or_default();
        if !model.contains("Virt.") {
            continue;
        }

        let sr = std::fs::read_dir(path.join("block"))
            .ok()?
            .flatten()
            .map(|e| format!("/dev/{}", e.file_name().to_string_lossy()))
            .next()?;
        let sg = std::fs::read_dir(path.join("scsi_generic"))
            .ok()?
            .flatten()
            .map(|e| format!("/dev/{}", e.file_name().to_string_lossy()))
            .next()?;

        return Some((sr, sg));
    }

    None
}
