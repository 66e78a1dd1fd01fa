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

//! Daemon controller
//!
//! Owns the emulated devices and the management RPC endpoint. Startup
//! claims the management socket (failing early when another instance
//! holds it), opens one control-device handle per device, spawns the
//! per-device I/O threads and the mapping probe, then serves management
//! clients until stopped.

pub mod rpc;

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::core::audio::AudioBackend;
use crate::core::device::{transport, Device, DeviceEvent};
use crate::core::error::{DaemonError, Result};

use rpc::Signal;

/// Seconds between device mapping probe attempts
const MAPPING_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Mapping probe attempts before giving up
const MAPPING_PROBE_ATTEMPTS: u32 = 5;

/// Shared set of connected management clients, used for signal emission
type ClientSet = Arc<Mutex<Vec<UnixStream>>>;

/// The daemon: a set of devices plus the management endpoint
pub struct Daemon {
    devices: Vec<Arc<Device>>,
    clients: ClientSet,
    stop: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Daemon {
    /// Create a daemon owning `num_devices` devices
    ///
    /// Devices exist (and can execute commands) from this point; the
    /// kernel transport and RPC endpoint come up in [`Daemon::start`].
    pub fn new(num_devices: u32, audio_backend: AudioBackend) -> Self {
        let devices: Vec<Arc<Device>> = (0..num_devices)
            .map(|n| Arc::new(Device::new(n, audio_backend.clone())))
            .collect();

        let daemon = Self {
            devices,
            clients: Arc::new(Mutex::new(Vec::new())),
            stop: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        };

        // Forward device events to management clients as signals
        for device in &daemon.devices {
            let clients = daemon.clients.clone();
            device.set_signal_hook(move |number, event| {
                let signal = match event {
                    DeviceEvent::StatusChanged => Signal::DeviceStatusChanged(number),
                    DeviceEvent::OptionChanged(name) => {
                        Signal::DeviceOptionChanged(number, name)
                    }
                };
                emit_signal(&clients, &signal);
            });
        }

        daemon
    }

    /// Daemon version string
    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Number of devices
    pub fn num_devices(&self) -> u32 {
        self.devices.len() as u32
    }

    /// Shared handle to the n-th device
    pub fn get_device(&self, number: i32) -> Result<Arc<Device>> {
        if number < 0 || number as usize >= self.devices.len() {
            return Err(DaemonError::InvalidDevice(number));
        }
        Ok(self.devices[number as usize].clone())
    }

    /// All devices
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// Start the daemon and serve until [`Daemon::stop`] is called
    ///
    /// Claims the management socket, opens the control device once per
    /// device, and runs the accept loop on the calling thread.
    pub fn start(&self, ctl_device: &str, use_system_bus: bool) -> Result<()> {
        let socket_path = management_socket_path(use_system_bus);
        let listener = claim_socket(&socket_path)?;
        log::info!("Daemon: management socket at {}", socket_path.display());

        // One control-device handle and I/O thread per device
        for device in &self.devices {
            let ctl = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(ctl_device)
                .map_err(|e| {
                    log::warn!(
                        "Daemon: failed to open control device {}: {}",
                        ctl_device,
                        e
                    );
                    DaemonError::ControlDevice(format!("{}: {}", ctl_device, e))
                })?;

            let device = device.clone();
            let stop = self.stop.clone();
            let handle = std::thread::spawn(move || {
                transport::run_io_loop(device, ctl, stop);
            });
            self.threads.lock().unwrap().push(handle);
        }

        // The kernel's SCSI layer enumerates our devices only after the
        // command handlers are live, so the sr/sg mapping is probed on a
        // timer
        {
            let devices = self.devices.clone();
            let clients = self.clients.clone();
            let stop = self.stop.clone();
            let handle = std::thread::spawn(move || {
                mapping_probe(devices, clients, stop);
            });
            self.threads.lock().unwrap().push(handle);
        }

        self.serve(listener);

        // Cooperative teardown: I/O threads observe the stop flag at the
        // next frame boundary
        let _ = std::fs::remove_file(&socket_path);
        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }

        Ok(())
    }

    /// Request the daemon to stop serving
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Accept and serve management clients until stopped
    fn serve(&self, listener: UnixListener) {
        listener
            .set_nonblocking(true)
            .expect("cannot make listener non-blocking");

        while !self.stop.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, _)) => {
                    log::debug!("Daemon: management client connected");
                    if let Ok(writer) = stream.try_clone() {
                        self.clients.lock().unwrap().push(writer);
                    }
                    self.handle_client(stream);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    log::warn!("Daemon: accept failed: {}", e);
                    break;
                }
            }
        }
    }

    /// Serve one client connection to completion
    fn handle_client(&self, stream: UnixStream) {
        let _ = stream.set_nonblocking(false);
        let mut writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(_) => return,
        };
        let reader = BufReader::new(stream);

        for line in reader.lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }

            let result = match serde_json::from_str::<rpc::Request>(&line) {
                Ok(request) => {
                    log::debug!("Daemon: request {:?}", request);
                    rpc::handle_request(self, request)
                }
                Err(e) => Err(DaemonError::InvalidArgument(format!(
                    "malformed request: {}",
                    e
                ))),
            };

            let mut line = rpc::envelope_line(result);
            line.push('\n');
            if writer.write_all(line.as_bytes()).is_err() {
                break;
            }
        }

        log::debug!("Daemon: management client disconnected");
    }
}

/// Periodically probe device mappings, then emit DeviceMappingsReady
fn mapping_probe(devices: Vec<Arc<Device>>, clients: ClientSet, stop: Arc<AtomicBool>) {
    for attempt in 0..MAPPING_PROBE_ATTEMPTS {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        std::thread::sleep(MAPPING_PROBE_INTERVAL);

        if devices.iter().all(|d| d.probe_mapping()) {
            break;
        }
        log::debug!("Daemon: mapping probe attempt {} incomplete", attempt + 1);
    }

    emit_signal(&clients, &Signal::DeviceMappingsReady);
}

/// Broadcast a signal to all connected management clients
fn emit_signal(clients: &ClientSet, signal: &Signal) {
    let Ok(mut json) = serde_json::to_string(signal) else {
        return;
    };
    json.push('\n');

    let mut clients = clients.lock().unwrap();
    clients.retain_mut(|stream| stream.write_all(json.as_bytes()).is_ok());
}

/// Path of the management socket for the chosen bus type
pub fn management_socket_path(use_system_bus: bool) -> PathBuf {
    if use_system_bus {
        PathBuf::from("/run/discemu.sock")
    } else {
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(runtime_dir).join("discemu.sock")
    }
}

/// Claim the management socket, failing when another instance owns it
fn claim_socket(path: &PathBuf) -> Result<UnixListener> {
    if path.exists() {
        // A connectable socket means a live instance; a stale file from
        // an unclean shutdown is removed
        if UnixStream::connect(path).is_ok() {
            return Err(DaemonError::NameTaken(path.display().to_string()));
        }
        let _ = std::fs::remove_file(path);
    }

    UnixListener::bind(path).map_err(|e| {
        log::warn!("Daemon: failed to bind {}: {}", path.display(), e);
        DaemonError::NameTaken(path.display().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_device_bounds() {
        let daemon = Daemon::new(2, AudioBackend::null());

        assert_eq!(daemon.get_device(0).unwrap().number(), 0);
        assert_eq!(daemon.get_device(1).unwrap().number(), 1);
        assert!(matches!(
            daemon.get_device(2),
            Err(DaemonError::InvalidDevice(2))
        ));
        assert!(matches!(
            daemon.get_device(-1),
            Err(DaemonError::InvalidDevice(-1))
        ));
    }

    #[test]
    fn test_device_numbers_are_stable() {
        let daemon = Daemon::new(4, AudioBackend::null());
        for n in 0..4 {
            assert_eq!(daemon.get_device(n).unwrap().number(), n as u32);
        }
    }

    #[test]
    fn test_claim_socket_rejects_live_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");

        let _listener = claim_socket(&path).unwrap();
        assert!(matches!(
            claim_socket(&path),
            Err(DaemonError::NameTaken(_))
        ));
    }

    #[test]
    fn test_claim_socket_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");

        {
            let _listener = UnixListener::bind(&path).unwrap();
            // Listener dropped; the socket file remains but is dead
        }
        assert!(path.exists());
        claim_socket(&path).unwrap();
    }
}
