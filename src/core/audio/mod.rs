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

//! CD audio playback engine
//!
//! Plays a range of audio sectors through an output sink on a dedicated
//! worker thread, pacing playback at 75 sectors per second.
//!
//! # State machine
//!
//! ```text
//! NoStatus ──start──▶ Playing ──▶ Completed (range exhausted)
//!                       │   ▲ ──▶ Error     (bad or non-audio sector)
//!                    pause  │
//!                       ▼ resume
//!                     Paused ──stop──▶ NoStatus
//! ```
//!
//! Invalid transitions fail with [`DaemonError::AudioInvalidState`],
//! which the command layer reports as COMMAND SEQUENCE ERROR.

mod sink;

pub use sink::{AudioFormat, AudioSink, NullSink};
#[cfg(feature = "audio")]
pub use sink::CpalSink;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::core::error::{DaemonError, Result};
use crate::core::image::{Disc, SectorType, FRAMES_PER_SECOND};

/// Audio playback status, using the MMC-3 audio status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AudioStatus {
    /// Play operation in progress
    Playing = 0x11,
    /// Play operation paused
    Paused = 0x12,
    /// Play operation successfully completed
    Completed = 0x13,
    /// Play operation stopped due to error
    Error = 0x14,
    /// No current status to return
    NoStatus = 0x15,
}

/// Audio backend selection
///
/// A cheap descriptor; the actual sink is opened inside the playback
/// worker thread on each start, since output streams must not cross
/// threads.
#[derive(Debug, Clone)]
pub struct AudioBackend {
    kind: BackendKind,
    device: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendKind {
    Null,
    #[cfg(feature = "audio")]
    Cpal,
}

impl AudioBackend {
    /// The null backend: discards audio, engine provides pacing
    pub fn null() -> Self {
        Self {
            kind: BackendKind::Null,
            device: None,
        }
    }

    /// Select a backend by driver name
    ///
    /// `None` and `"default"` select the real output backend when the
    /// crate is built with audio support. Unknown names fall back to the
    /// null backend with a warning.
    pub fn from_name(name: Option<&str>, device: Option<String>) -> Self {
        match name {
            None | Some("default") | Some("cpal") => {
                #[cfg(feature = "audio")]
                {
                    Self {
                        kind: BackendKind::Cpal,
                        device,
                    }
                }
                #[cfg(not(feature = "audio"))]
                {
                    let _ = device;
                    Self::null()
                }
            }
            Some("null") => Self::null(),
            Some(other) => {
                log::warn!("Cannot find audio driver '{}', using 'null' instead", other);
                Self::null()
            }
        }
    }

    /// Open a sink for this backend
    ///
    /// Falls back to the null sink (with a warning) when the output
    /// device cannot be opened.
    fn open_sink(&self) -> Box<dyn AudioSink> {
        match self.kind {
            BackendKind::Null => Box::new(NullSink),
            #[cfg(feature = "audio")]
            BackendKind::Cpal => {
                match CpalSink::open(AudioFormat::default(), self.device.as_deref()) {
                    Ok(sink) => Box::new(sink),
                    Err(e) => {
                        log::warn!("Failed to open audio device ({}), using null sink", e);
                        Box::new(NullSink)
                    }
                }
            }
        }
    }
}

/// Playback range and position, retained across pause/resume
struct PlayState {
    disc: Arc<Disc>,
    cur: i32,
    end: i32,
}

struct EngineShared {
    status: Mutex<AudioStatus>,
    play: Mutex<Option<PlayState>>,
}

/// CD audio playback engine
pub struct AudioEngine {
    shared: Arc<EngineShared>,
    backend: AudioBackend,
    /// Device's current-sector cursor, updated as sectors are played
    cursor: Arc<AtomicU32>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AudioEngine {
    /// Create an engine publishing playback progress to `cursor`
    pub fn new(backend: AudioBackend, cursor: Arc<AtomicU32>) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                status: Mutex::new(AudioStatus::NoStatus),
                play: Mutex::new(None),
            }),
            backend,
            cursor,
            worker: Mutex::new(None),
        }
    }

    /// Current playback status
    pub fn status(&self) -> AudioStatus {
        *self.shared.status.lock().unwrap()
    }

    /// Start playing `[start, end)` from the given disc
    ///
    /// Valid only when not already playing or paused. The range must
    /// begin on an audio sector; playback stopping mid-range on a
    /// non-audio sector is reported asynchronously via the status.
    pub fn start(&self, start: i32, end: i32, disc: Arc<Disc>) -> Result<()> {
        {
            let mut status = self.shared.status.lock().unwrap();
            if matches!(*status, AudioStatus::Playing | AudioStatus::Paused) {
                log::debug!("Audio: play requested while playing or paused");
                return Err(DaemonError::AudioInvalidState);
            }

            match disc.get_sector(start) {
                Ok(sector) if sector.kind() == SectorType::Audio => {}
                _ => {
                    log::debug!("Audio: play range does not start on an audio sector");
                    *status = AudioStatus::Error;
                    return Err(DaemonError::InvalidArgument(
                        "play range does not start on an audio sector".into(),
                    ));
                }
            }

            *status = AudioStatus::Playing;
        }

        self.join_worker();
        *self.shared.play.lock().unwrap() = Some(PlayState {
            disc,
            cur: start,
            end: end - 1,
        });

        log::debug!("Audio: starting playback 0x{:X}..0x{:X}", start, end);
        self.spawn_worker();
        Ok(())
    }

    /// Pause a running play operation
    pub fn pause(&self) -> Result<()> {
        {
            let mut status = self.shared.status.lock().unwrap();
            if *status != AudioStatus::Playing {
                log::debug!("Audio: pause requested while not playing");
                return Err(DaemonError::AudioInvalidState);
            }
            *status = AudioStatus::Paused;
        }
        self.join_worker();
        log::debug!("Audio: playback paused");
        Ok(())
    }

    /// Resume a paused play operation
    pub fn resume(&self) -> Result<()> {
        {
            let mut status = self.shared.status.lock().unwrap();
            if *status != AudioStatus::Paused {
                log::debug!("Audio: resume requested while not paused");
                return Err(DaemonError::AudioInvalidState);
            }
            *status = AudioStatus::Playing;
        }
        self.join_worker();
        log::debug!("Audio: playback resumed");
        self.spawn_worker();
        Ok(())
    }

    /// Stop playback and release the disc reference
    pub fn stop(&self) -> Result<()> {
        {
            let mut status = self.shared.status.lock().unwrap();
            if !matches!(*status, AudioStatus::Playing | AudioStatus::Paused) {
                log::debug!("Audio: stop requested while not playing nor paused");
                return Err(DaemonError::AudioInvalidState);
            }
            *status = AudioStatus::NoStatus;
        }
        self.join_worker();
        *self.shared.play.lock().unwrap() = None;
        log::debug!("Audio: playback stopped");
        Ok(())
    }

    /// Stop playback if it is running or paused
    ///
    /// Used by the dispatcher before commands that disturb audio play and
    /// by the unload path; a quiescent engine is left untouched.
    pub fn stop_if_active(&self) {
        if matches!(self.status(), AudioStatus::Playing | AudioStatus::Paused) {
            let _ = self.stop();
        }
    }

    fn join_worker(&self) {
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn spawn_worker(&self) {
        let shared = self.shared.clone();
        let backend = self.backend.clone();
        let cursor = self.cursor.clone();

        let handle = std::thread::spawn(move || {
            playback_worker(shared, backend, cursor);
        });
        *self.worker.lock().unwrap() = Some(handle);
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop_if_active();
        self.join_worker();
    }
}

/// Playback worker: runs until the range ends, an error occurs, or the
/// status leaves `Playing`
fn playback_worker(shared: Arc<EngineShared>, backend: AudioBackend, cursor: Arc<AtomicU32>) {
    let mut sink = backend.open_sink();
    let sector_duration = Duration::from_micros(1_000_000 / FRAMES_PER_SECOND as u64);

    log::trace!("Audio: playback worker start");

    let (disc, mut cur, end) = {
        let play = shared.play.lock().unwrap();
        match play.as_ref() {
            Some(state) => (state.disc.clone(), state.cur, state.end),
            None => return,
        }
    };

    let set_status = |status: AudioStatus| {
        *shared.status.lock().unwrap() = status;
    };

    loop {
        // Interruptible: pause/stop change the status and wait for us
        if *shared.status.lock().unwrap() != AudioStatus::Playing {
            log::trace!("Audio: playback worker interrupted");
            break;
        }

        if cur > end {
            log::trace!("Audio: playback worker reached the end");
            set_status(AudioStatus::Completed);
            break;
        }

        let sector = match disc.get_sector(cur) {
            Ok(sector) => sector,
            Err(e) => {
                log::debug!("Audio: failed to get sector 0x{:X}: {}", cur, e);
                set_status(AudioStatus::Error);
                break;
            }
        };

        if sector.kind() != SectorType::Audio {
            log::debug!("Audio: non-audio sector 0x{:X}", cur);
            set_status(AudioStatus::Error);
            break;
        }

        cursor.store(cur as u32, Ordering::Relaxed);
        cur += 1;

        if !sink.write(sector.user_data()) {
            log::error!("Audio: playback error");
            set_status(AudioStatus::Error);
            break;
        }

        // A sink without its own pacing needs explicit sector timing
        if !sink.paces_output() {
            std::thread::sleep(sector_duration);
        }
    }

    // Persist the position for resume
    if let Some(state) = shared.play.lock().unwrap().as_mut() {
        state.cur = cur;
    }

    sink.close();
    log::trace!("Audio: playback worker end");
}
