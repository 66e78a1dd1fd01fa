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

//! Audio output sinks
//!
//! The playback engine writes raw CD-DA frames (2352 bytes, 44.1 kHz
//! 16-bit stereo little-endian PCM) to an [`AudioSink`]. The cpal sink
//! plays them on the default output device and paces the writer at the
//! source audio rate; the null sink discards them, in which case the
//! engine provides the pacing itself.

#[cfg(feature = "audio")]
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
#[cfg(feature = "audio")]
use std::collections::VecDeque;
#[cfg(feature = "audio")]
use std::sync::{Arc, Mutex};

/// Audio sample format of CD-DA playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Bits per sample
    pub bits: u16,
    /// Number of channels
    pub channels: u16,
    /// Sample rate in Hz
    pub rate: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            bits: 16,
            channels: 2,
            rate: 44_100,
        }
    }
}

/// Audio output sink
///
/// Sinks are created inside the playback worker thread and never cross
/// threads. A sink either paces the writer at the audio rate (a real
/// output device) or returns immediately (the null sink), in which case
/// the engine sleeps 1/75 s per sector to preserve timing.
pub trait AudioSink {
    /// Write one frame of PCM data; returns false on playback error
    fn write(&mut self, frame: &[u8]) -> bool;

    /// Whether `write` blocks at the source audio rate
    fn paces_output(&self) -> bool;

    /// Release the output device
    fn close(&mut self) {}
}

/// Sink that discards all audio data
pub struct NullSink;

impl AudioSink for NullSink {
    fn write(&mut self, _frame: &[u8]) -> bool {
        true
    }

    fn paces_output(&self) -> bool {
        false
    }
}

/// Sink playing through the default cpal output device
#[cfg(feature = "audio")]
pub struct CpalSink {
    #[allow(dead_code)]
    stream: cpal::Stream,
    sample_queue: Arc<Mutex<VecDeque<(i16, i16)>>>,
    sample_rate: u32,
}

#[cfg(feature = "audio")]
impl CpalSink {
    /// Samples queued beyond this level make `write` block
    const QUEUE_HIGH_WATER: usize = 32_768;

    /// Open the output device and start the stream
    ///
    /// `device_name`, when given, selects a specific output device by
    /// name; otherwise the host default is used.
    pub fn open(format: AudioFormat, device_name: Option<&str>) -> Result<Self, String> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| e.to_string())?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| format!("audio device '{}' not found", name))?,
            None => host
                .default_output_device()
                .ok_or("no audio output device available")?,
        };

        let config = device.default_output_config().map_err(|e| e.to_string())?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        if channels != 2 {
            return Err(format!(
                "device '{}' is not stereo ({} channels)",
                device.name().unwrap_or_else(|_| "unknown".to_string()),
                channels
            ));
        }

        if sample_rate != format.rate {
            log::warn!(
                "Audio: device sample rate is {} Hz (expected {} Hz), timing may drift",
                sample_rate,
                format.rate
            );
        }

        log::info!(
            "Audio: using device '{}' at {} Hz",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate
        );

        let sample_queue = Arc::new(Mutex::new(VecDeque::new()));
        let queue = sample_queue.clone();

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = queue.lock().unwrap();
                    for frame in data.chunks_mut(2) {
                        if let Some((left, right)) = queue.pop_front() {
                            frame[0] = left as f32 / 32768.0;
                            frame[1] = right as f32 / 32768.0;
                        } else {
                            frame[0] = 0.0;
                            frame[1] = 0.0;
                        }
                    }
                },
                |err| log::error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| e.to_string())?;

        stream.play().map_err(|e| e.to_string())?;

        Ok(Self {
            stream,
            sample_queue,
            sample_rate,
        })
    }

    /// Sample rate of the opened device
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(feature = "audio")]
impl AudioSink for CpalSink {
    fn write(&mut self, frame: &[u8]) -> bool {
        // Block while the queue is ahead; this is what paces the engine
        loop {
            let level = self.sample_queue.lock().unwrap().len();
            if level <= Self::QUEUE_HIGH_WATER {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let mut queue = self.sample_queue.lock().unwrap();
        for chunk in frame.chunks_exact(4) {
            let left = i16::from_le_bytes([chunk[0], chunk[1]]);
            let right = i16::from_le_bytes([chunk[2], chunk[3]]);
            queue.push_back((left, right));
        }
        true
    }

    fn paces_output(&self) -> bool {
        true
    }
}
