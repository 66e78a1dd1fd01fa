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

//! Virtual CD/DVD-ROM drive emulation daemon
//!
//! Runs the daemon either in the foreground or detached, with a PID
//! file for `--kill`. Daemonized instances always register on the
//! system bus.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::{fork, setsid, ForkResult, Pid};

use discemu::core::audio::AudioBackend;
use discemu::core::config::{DaemonConfig, DEFAULT_CTL_DEVICE};
use discemu::core::daemon::Daemon;

/// Virtual CD/DVD-ROM drive emulation daemon
#[derive(Parser)]
#[command(name = "discemud")]
#[command(about = "Virtual CD/DVD-ROM drive emulation daemon", long_about = None)]
struct Args {
    /// Signal a running instance to stop
    #[arg(short = 'k', long)]
    kill: bool,

    /// Fork into the background and write a PID file
    #[arg(short = 'd', long)]
    daemonize: bool,

    /// Number of emulated devices
    #[arg(short = 'n', long, value_name = "N")]
    num_devices: Option<u32>,

    /// Control device path
    #[arg(short = 'c', long, value_name = "PATH")]
    ctl_device: Option<String>,

    /// Audio play backend
    #[arg(short = 'a', long, value_name = "BACKEND")]
    audio: Option<String>,

    /// Audio play device
    #[arg(short = 'o', long, value_name = "DEVICE")]
    audio_device: Option<String>,

    /// Bus type to use ("system" or "session")
    #[arg(short = 'b', long, value_name = "BUS")]
    bus: Option<String>,

    /// Configuration file path
    #[arg(long, value_name = "FILE")]
    config: Option<String>,
}

/// Raised by the signal handler to request shutdown
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_signal: i32) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

fn pid_file_path() -> PathBuf {
    if nix::unistd::geteuid().is_root() {
        PathBuf::from("/run/discemud.pid")
    } else {
        std::env::temp_dir().join("discemud.pid")
    }
}

/// Kill a running instance via its PID file, waiting up to five seconds
fn kill_daemon() -> i32 {
    let path = pid_file_path();
    let pid = match std::fs::read_to_string(&path) {
        Ok(data) => match data.trim().parse::<i32>() {
            Ok(pid) => Pid::from_raw(pid),
            Err(_) => {
                eprintln!("Malformed PID file {}", path.display());
                return 1;
            }
        },
        Err(_) => {
            eprintln!("Failed to kill daemon.");
            return 1;
        }
    };

    if signal::kill(pid, Signal::SIGINT).is_err() {
        eprintln!("Failed to kill daemon.");
        let _ = std::fs::remove_file(&path);
        return 1;
    }

    // Wait for the process to exit
    for _ in 0..50 {
        if signal::kill(pid, None).is_err() {
            let _ = std::fs::remove_file(&path);
            return 0;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    eprintln!("Failed to kill daemon.");
    1
}

fn install_signal_handlers() {
    let handler = SigHandler::Handler(handle_signal);
    unsafe {
        let _ = signal::signal(Signal::SIGINT, handler);
        let _ = signal::signal(Signal::SIGTERM, handler);
        let _ = signal::signal(Signal::SIGQUIT, handler);
    }
}

/// Run the daemon to completion on this process
fn run_daemon(config: &DaemonConfig, use_system_bus: bool) -> i32 {
    let backend = AudioBackend::from_name(
        config.audio_backend.as_deref(),
        config.audio_device.clone(),
    );

    let daemon = Arc::new(Daemon::new(config.num_devices, backend));

    install_signal_handlers();

    // Relay the asynchronous shutdown request into the daemon
    {
        let daemon = daemon.clone();
        std::thread::spawn(move || loop {
            if SHUTDOWN.load(Ordering::Relaxed) {
                daemon.stop();
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        });
    }

    info!(
        "Starting daemon with {} device(s) on {}",
        config.num_devices, config.ctl_device
    );

    match daemon.start(&config.ctl_device, use_system_bus) {
        Ok(()) => {
            info!("Daemon stopped");
            0
        }
        Err(e) => {
            error!("Daemon initialization failed: {}", e);
            1
        }
    }
}

fn main() {
    // .env may carry RUST_LOG and config overrides
    let _ = dotenvy::dotenv();

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();

    if args.kill {
        std::process::exit(kill_daemon());
    }

    info!("discemud v{}", env!("CARGO_PKG_VERSION"));

    // Configuration file first, command line flags on top
    let mut config = match &args.config {
        Some(path) => match DaemonConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        },
        None => DaemonConfig::default(),
    };
    if let Some(n) = args.num_devices {
        config.num_devices = n;
    }
    if let Some(path) = args.ctl_device {
        config.ctl_device = path;
    } else if config.ctl_device.is_empty() {
        config.ctl_device = DEFAULT_CTL_DEVICE.to_string();
    }
    if args.audio.is_some() {
        config.audio_backend = args.audio;
    }
    if args.audio_device.is_some() {
        config.audio_device = args.audio_device;
    }
    if let Some(bus) = args.bus {
        config.bus = bus;
    }

    if !args.daemonize {
        info!(
            "Starting daemon locally: num_devices={}, ctl_device={}, audio={:?}, bus={}",
            config.num_devices, config.ctl_device, config.audio_backend, config.bus
        );
        std::process::exit(run_daemon(&config, config.use_system_bus()));
    }

    // Daemon mode: refuse to run twice
    let pid_path = pid_file_path();
    if let Ok(data) = std::fs::read_to_string(&pid_path) {
        if let Ok(pid) = data.trim().parse::<i32>() {
            if signal::kill(Pid::from_raw(pid), None).is_ok() {
                warn!("Daemon already running on PID {}", pid);
                std::process::exit(1);
            }
        }
    }

    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            // Wait for the child to come up (PID file appears) before
            // reporting success
            for _ in 0..200 {
                if pid_path.exists() {
                    std::process::exit(0);
                }
                if signal::kill(child, None).is_err() {
                    warn!("Daemon process exited during startup");
                    std::process::exit(1);
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            warn!("Could not receive startup confirmation from daemon process");
            std::process::exit(1);
        }
        Ok(ForkResult::Child) => {
            if setsid().is_err() {
                std::process::exit(-1);
            }

            if std::fs::write(&pid_path, std::process::id().to_string()).is_err() {
                error!("Could not create PID file {}", pid_path.display());
                std::process::exit(-1);
            }

            // A detached daemon always registers on the system bus
            let code = run_daemon(&config, true);

            let _ = std::fs::remove_file(&pid_path);
            std::process::exit(if code == 0 { 0 } else { -1 });
        }
        Err(e) => {
            error!("Failed to fork: {}", e);
            std::process::exit(1);
        }
    }
}
