//! macOS media session detection via the MediaRemote adapter
//!
//! The private MediaRemote framework can only be reached from an entitled
//! process, so the query runs through `/usr/bin/perl` with the adapter script
//! and framework. macOS exposes a single system-wide now-playing session.
//!
//! Paths come from the environment:
//! - `MEDIAREMOTE_ADAPTER_SCRIPT_PATH`: the `mediaremote-adapter.pl` script
//! - `MEDIAREMOTE_ADAPTER_FRAMEWORK_PATH`: `MediaRemoteAdapter.framework`
//! - `MEDIAREMOTE_ADAPTER_TEST_CLIENT_PATH`: optional test client binary

use crate::adapter::{self, AdapterPayload};
use crate::process::run_with_timeout;
use crate::PlatformSupport;
use anyhow::{anyhow, Result};
use nowplaying_core::{RawSnapshot, SnapshotProbe, TransportCapabilities, TransportControls};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SESSION_ID: &str = "system";

const PERL: &str = "/usr/bin/perl";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const SCRIPT_ENV: &str = "MEDIAREMOTE_ADAPTER_SCRIPT_PATH";
const FRAMEWORK_ENV: &str = "MEDIAREMOTE_ADAPTER_FRAMEWORK_PATH";
const TEST_CLIENT_ENV: &str = "MEDIAREMOTE_ADAPTER_TEST_CLIENT_PATH";

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

pub(crate) fn support() -> PlatformSupport {
    if !Path::new(PERL).exists() {
        return PlatformSupport::unavailable("macos", format!("{} not found", PERL));
    }
    match Adapter::from_env() {
        Ok(_) => PlatformSupport::available("macos"),
        Err(e) => PlatformSupport::unavailable("macos", e.to_string()),
    }
}

struct Adapter {
    script: PathBuf,
    framework: PathBuf,
    test_client: Option<PathBuf>,
}

impl Adapter {
    fn from_env() -> Result<Self> {
        let script = env_path(SCRIPT_ENV).ok_or_else(|| anyhow!("{} is not set", SCRIPT_ENV))?;
        let framework =
            env_path(FRAMEWORK_ENV).ok_or_else(|| anyhow!("{} is not set", FRAMEWORK_ENV))?;
        for path in [&script, &framework] {
            if !path.exists() {
                return Err(anyhow!("Adapter path does not exist: {}", path.display()));
            }
        }
        Ok(Self {
            script,
            framework,
            test_client: env_path(TEST_CLIENT_ENV),
        })
    }

    /// Run one adapter command and return its trimmed stdout
    fn run(&self, args: &[&str]) -> Result<String> {
        let mut command = Command::new(PERL);
        command.arg(&self.script).arg(&self.framework);
        if let Some(test_client) = &self.test_client {
            command.arg(test_client);
        }
        command.args(args);

        let output = run_with_timeout(&mut command, COMMAND_TIMEOUT)?;
        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            info!("Adapter stderr ({:?}): {}", output.status.code(), stderr);
        }
        if !output.status.success() {
            return Err(anyhow!(
                "Adapter command {:?} failed with {:?}",
                args,
                output.status.code()
            ));
        }
        Ok(output.stdout.trim().to_string())
    }

    fn get(&self) -> Result<Option<AdapterPayload>> {
        adapter::parse_payload(&self.run(&["get", "--now"])?)
    }

    /// The adapter exits 0 even for some failures; those print an error on stdout.
    fn command(&self, args: &[&str]) -> bool {
        match self.run(args) {
            Ok(out) => {
                let accepted = !out.to_lowercase().contains("error");
                if !accepted {
                    warn!("Adapter rejected {:?}: {}", args, out);
                }
                accepted
            }
            Err(e) => {
                warn!("Adapter command {:?} failed: {}", args, e);
                false
            }
        }
    }
}

pub struct AdapterProbe {
    adapter: Arc<Adapter>,
    last: Mutex<Option<RawSnapshot>>,
}

impl AdapterProbe {
    pub fn from_env() -> Result<Self> {
        let adapter = Adapter::from_env()?;
        info!(
            "Using MediaRemote adapter {} with {}",
            adapter.script.display(),
            adapter.framework.display()
        );
        Ok(Self {
            adapter: Arc::new(adapter),
            last: Mutex::new(None),
        })
    }
}

impl SnapshotProbe for AdapterProbe {
    fn probe(&self, session_id: &str) -> Result<Option<RawSnapshot>> {
        if session_id != SESSION_ID {
            return Ok(None);
        }
        let payload = self.adapter.get()?;
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(payload) = payload else {
            *last = None;
            return Ok(None);
        };
        let raw = adapter::snapshot_from_payload(&payload, last.as_ref());
        debug!(
            "MediaRemote: state={}, title={:?}, position={:?}",
            raw.state, raw.title, raw.position
        );
        *last = Some(raw.clone());
        Ok(Some(raw))
    }

    fn list_session_ids(&self) -> Result<Vec<String>> {
        Ok(vec![SESSION_ID.to_string()])
    }

    fn application_name(&self, _session_id: &str) -> Option<String> {
        Some("System".to_string())
    }

    fn controls(&self, _session_id: &str) -> Arc<dyn TransportControls> {
        Arc::new(AdapterControls {
            adapter: self.adapter.clone(),
        })
    }
}

struct AdapterControls {
    adapter: Arc<Adapter>,
}

impl TransportControls for AdapterControls {
    fn play(&self) -> bool {
        self.adapter.command(&["send", "0"])
    }

    fn pause(&self) -> bool {
        self.adapter.command(&["send", "1"])
    }

    fn toggle_play_pause(&self) -> bool {
        self.adapter.command(&["send", "2"])
    }

    fn next(&self) -> bool {
        self.adapter.command(&["send", "4"])
    }

    fn previous(&self) -> bool {
        self.adapter.command(&["send", "5"])
    }

    fn stop(&self) -> bool {
        self.adapter.command(&["send", "3"])
    }

    fn seek(&self, position: Duration) -> bool {
        let duration = match self.adapter.get() {
            Ok(payload) => payload.and_then(|p| adapter::snapshot_from_payload(&p, None).duration),
            Err(e) => {
                debug!("Seeking without a known duration: {}", e);
                None
            }
        };
        let micros = adapter::clamp_seek_micros(position, duration);
        debug!(
            "Seek request: requested={:?} clamped_micros={} duration={:?}",
            position, micros, duration
        );
        self.adapter.command(&["seek", &micros.to_string()])
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::all()
    }
}
