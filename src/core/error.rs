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

//! Daemon error types
//!
//! Errors are split into two domains: the daemon domain ([`DaemonError`])
//! and the image-library domain ([`ImageError`]). Management RPC clients
//! receive them serialized as `{domain, code, message}`; each variant maps
//! to a stable code string.

use thiserror::Error;

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Daemon-domain error types
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Client supplied an invalid argument (bad option name, bad value type)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Device number outside the configured range
    #[error("Invalid device number: {0}")]
    InvalidDevice(i32),

    /// Failed to open or talk to the kernel control device
    #[error("Control device error: {0}")]
    ControlDevice(String),

    /// Audio backend could not be initialized
    #[error("Audio backend error: {0}")]
    AudioBackend(String),

    /// Audio operation requested in a state that does not permit it
    #[error("Audio operation not valid in current state")]
    AudioInvalidState,

    /// The management name (socket) is already claimed by another instance
    #[error("Management name already taken: {0}")]
    NameTaken(String),

    /// Device initialization failed during daemon startup
    #[error("Failed to initialize device {0}")]
    DeviceInitFailed(i32),

    /// A medium is already loaded in the device
    #[error("Device already contains a medium")]
    AlreadyLoaded,

    /// Medium removal is prevented (PREVENT/ALLOW MEDIUM REMOVAL)
    #[error("Device is locked")]
    DeviceLocked,

    /// Error from the image-library domain
    #[error(transparent)]
    Image(#[from] ImageError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    /// Stable code string used when serializing the error over RPC
    pub fn code(&self) -> &'static str {
        match self {
            DaemonError::InvalidArgument(_) => "InvalidArgument",
            DaemonError::InvalidDevice(_) => "InvalidDevice",
            DaemonError::ControlDevice(_) => "ControlDevice",
            DaemonError::AudioBackend(_) => "AudioBackend",
            DaemonError::AudioInvalidState => "AudioInvalidState",
            DaemonError::NameTaken(_) => "NameRequest",
            DaemonError::DeviceInitFailed(_) => "DeviceInitializationFailed",
            DaemonError::AlreadyLoaded => "AlreadyLoaded",
            DaemonError::DeviceLocked => "DeviceLocked",
            DaemonError::Image(_) => "ImageLibrary",
            DaemonError::Io(_) => "Io",
        }
    }

    /// Error domain tag for RPC serialization
    pub fn domain(&self) -> &'static str {
        match self {
            DaemonError::Image(_) => "libimage-error",
            _ => "discemu-error",
        }
    }
}

/// Image-library-domain error types
#[derive(Debug, Error)]
pub enum ImageError {
    /// None of the known parsers recognize the image file
    #[error("Unrecognized image format: {0}")]
    UnrecognizedFormat(String),

    /// Image file could not be read
    #[error("Failed to read image file '{file}': {message}")]
    FileRead { file: String, message: String },

    /// Image descriptor (cue sheet) is malformed
    #[error("Failed to parse image descriptor: {0}")]
    Parse(String),

    /// Requested sector address is not present on the disc
    #[error("Sector 0x{0:X} not present on disc")]
    MissingSector(i32),

    /// Requested disc structure is not present on the disc
    #[error("Disc structure (layer {layer}, format 0x{format:02X}) not present")]
    MissingStructure { layer: u8, format: u8 },
}

impl ImageError {
    /// Stable code string used when serializing the error over RPC
    pub fn code(&self) -> &'static str {
        match self {
            ImageError::UnrecognizedFormat(_) => "UnrecognizedFormat",
            ImageError::FileRead { .. } => "FileRead",
            ImageError::Parse(_) => "ParseError",
            ImageError::MissingSector(_) => "MissingSector",
            ImageError::MissingStructure { .. } => "MissingStructure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            DaemonError::InvalidArgument("x".into()).code(),
            "InvalidArgument"
        );
        assert_eq!(DaemonError::AudioInvalidState.code(), "AudioInvalidState");
        assert_eq!(ImageError::MissingSector(16).code(), "MissingSector");
    }

    #[test]
    fn test_error_domains() {
        let daemon_err = DaemonError::DeviceLocked;
        assert_eq!(daemon_err.domain(), "discemu-error");

        let image_err = DaemonError::Image(ImageError::Parse("bad cue".into()));
        assert_eq!(image_err.domain(), "libimage-error");
    }

    #[test]
    fn test_image_error_converts_to_daemon_error() {
        fn load() -> Result<()> {
            Err(ImageError::UnrecognizedFormat("foo.img".into()))?
        }
        assert!(matches!(load(), Err(DaemonError::Image(_))));
    }
}
