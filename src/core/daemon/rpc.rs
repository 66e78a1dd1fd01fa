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

//! Management RPC protocol
//!
//! Requests, responses and signals exchanged with management clients as
//! line-delimited JSON over the daemon's Unix socket. The socket path is
//! the daemon's well-known name; binding it fails early when another
//! instance already owns it.
//!
//! Errors are serialized with their domain (`discemu-error` or
//! `libimage-error`), a stable code string, and a human-readable
//! message.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::daemon::Daemon;
use crate::core::device::OptionValue;
use crate::core::error::{DaemonError, Result};
use crate::core::image;

/// Version of the management interface
pub const INTERFACE_VERSION: i32 = 1;

/// A management request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
pub enum Request {
    GetDaemonVersion,
    GetLibraryVersion,
    GetDaemonInterfaceVersion,
    EnumDaemonDebugMasks,
    EnumLibraryDebugMasks,
    EnumSupportedParsers,
    EnumSupportedFragments,
    GetNumberOfDevices,
    DeviceGetMapping {
        device: i32,
    },
    DeviceGetStatus {
        device: i32,
    },
    DeviceLoad {
        device: i32,
        filenames: Vec<String>,
        #[serde(default)]
        options: BTreeMap<String, OptionValue>,
    },
    DeviceUnload {
        device: i32,
    },
    DeviceGetOption {
        device: i32,
        name: String,
    },
    DeviceSetOption {
        device: i32,
        name: String,
        value: OptionValue,
    },
}

/// Description of an image parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub mime: String,
}

/// A successful management response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    None,
    Version(String),
    Int(i32),
    Masks(Vec<(String, i32)>),
    Parsers(Vec<ParserInfo>),
    Fragments(Vec<(String, String)>),
    Mapping {
        sr: String,
        sg: String,
    },
    Status {
        loaded: bool,
        filenames: Vec<String>,
    },
    Option(OptionValue),
}

/// A signal broadcast to all connected management clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "args")]
pub enum Signal {
    DeviceStatusChanged(u32),
    DeviceOptionChanged(u32, String),
    DeviceMappingsReady,
}

/// Serialized error payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub domain: String,
    pub code: String,
    pub message: String,
}

impl From<&DaemonError> for ErrorInfo {
    fn from(err: &DaemonError) -> Self {
        let code = match err {
            DaemonError::Image(image_err) => image_err.code(),
            other => other.code(),
        };
        Self {
            domain: err.domain().to_string(),
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

/// Envelope of a response line: either a result or an error
#[derive(Debug, Serialize, Deserialize)]
pub enum Envelope {
    #[serde(rename = "result")]
    Result(Response),
    #[serde(rename = "error")]
    Error(ErrorInfo),
}

/// Daemon debug mask bits clients may enumerate
pub fn daemon_debug_masks() -> Vec<(String, i32)> {
    [
        ("DAEMON_DEBUG_DEVICE", 0x01),
        ("DAEMON_DEBUG_MMC", 0x02),
        ("DAEMON_DEBUG_KERNEL_IO", 0x04),
        ("DAEMON_DEBUG_AUDIOPLAY", 0x08),
        ("DAEMON_DEBUG_DELAY", 0x10),
    ]
    .iter()
    .map(|(name, value)| (name.to_string(), *value))
    .collect()
}

/// Image-library debug mask bits clients may enumerate
pub fn library_debug_masks() -> Vec<(String, i32)> {
    [
        ("IMAGE_DEBUG_PARSER", 0x01),
        ("IMAGE_DEBUG_SECTOR", 0x02),
        ("IMAGE_DEBUG_SUBCHANNEL", 0x04),
    ]
    .iter()
    .map(|(name, value)| (name.to_string(), *value))
    .collect()
}

/// Dispatch a management request against the daemon
pub fn handle_request(daemon: &Daemon, request: Request) -> Result<Response> {
    match request {
        Request::GetDaemonVersion => Ok(Response::Version(daemon.version().to_string())),
        Request::GetLibraryVersion => {
            Ok(Response::Version(env!("CARGO_PKG_VERSION").to_string()))
        }
        Request::GetDaemonInterfaceVersion => Ok(Response::Int(INTERFACE_VERSION)),
        Request::EnumDaemonDebugMasks => Ok(Response::Masks(daemon_debug_masks())),
        Request::EnumLibraryDebugMasks => Ok(Response::Masks(library_debug_masks())),
        Request::EnumSupportedParsers => Ok(Response::Parsers(
            image::supported_parsers()
                .iter()
                .map(|(id, name, description, mime)| ParserInfo {
                    id: id.to_string(),
                    name: name.to_string(),
                    description: description.to_string(),
                    mime: mime.to_string(),
                })
                .collect(),
        )),
        Request::EnumSupportedFragments => Ok(Response::Fragments(
            image::supported_fragments()
                .iter()
                .map(|(id, name)| (id.to_string(), name.to_string()))
                .collect(),
        )),
        Request::GetNumberOfDevices => Ok(Response::Int(daemon.num_devices() as i32)),
        Request::DeviceGetMapping { device } => {
            let device = daemon.get_device(device)?;
            let (sr, sg) = device.mapping().unwrap_or_default();
            Ok(Response::Mapping { sr, sg })
        }
        Request::DeviceGetStatus { device } => {
            let device = daemon.get_device(device)?;
            let (loaded, filenames) = device.status();
            Ok(Response::Status { loaded, filenames })
        }
        Request::DeviceLoad {
            device,
            filenames,
            options,
        } => {
            let device = daemon.get_device(device)?;
            for (name, value) in options {
                device.set_option(&name, value)?;
            }
            device.load(&filenames)?;
            Ok(Response::None)
        }
        Request::DeviceUnload { device } => {
            let device = daemon.get_device(device)?;
            device.unload(false)?;
            Ok(Response::None)
        }
        Request::DeviceGetOption { device, name } => {
            let device = daemon.get_device(device)?;
            Ok(Response::Option(device.get_option(&name)?))
        }
        Request::DeviceSetOption {
            device,
            name,
            value,
        } => {
            let device = daemon.get_device(device)?;
            device.set_option(&name, value)?;
            Ok(Response::None)
        }
    }
}

/// Serialize a request/response exchange outcome to one wire line
pub fn envelope_line(result: Result<Response>) -> String {
    let envelope = match &result {
        Ok(response) => Envelope::Result(response.clone()),
        Err(err) => Envelope::Error(ErrorInfo::from(err)),
    };
    serde_json::to_string(&envelope).unwrap_or_else(|_| "{\"error\":{}}".to_string())
}
