//! Platform snapshot probes for the now-playing engine
//!
//! Each platform backend implements [`SnapshotProbe`] so the session registry
//! in `nowplaying-core` can poll it:
//! - Linux: MPRIS via D-Bus (zbus)
//! - Windows: System Media Transport Controls (SMTC)
//! - macOS: MediaRemote through the perl adapter

use anyhow::{anyhow, Result};
use nowplaying_core::SnapshotProbe;
use serde::Serialize;
use std::sync::Arc;

#[cfg(target_os = "linux")]
mod mpris;

#[cfg(any(target_os = "macos", test))]
mod adapter;

#[cfg(any(target_os = "macos", all(test, unix)))]
mod process;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "linux")]
pub use self::linux::MprisProbe;

#[cfg(target_os = "windows")]
pub use self::windows::SmtcProbe;

#[cfg(target_os = "macos")]
pub use self::macos::AdapterProbe;

/// Whether the current platform can provide media sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformSupport {
    pub platform: &'static str,
    /// A backend for this platform is built into the crate
    pub compiled: bool,
    /// The backend's system dependencies were found at runtime
    pub available: bool,
    pub reason: Option<String>,
}

impl PlatformSupport {
    pub fn available(platform: &'static str) -> Self {
        Self {
            platform,
            compiled: true,
            available: true,
            reason: None,
        }
    }

    pub fn unavailable(platform: &'static str, reason: impl Into<String>) -> Self {
        Self {
            platform,
            compiled: true,
            available: false,
            reason: Some(reason.into()),
        }
    }

    pub fn not_compiled(platform: &'static str) -> Self {
        Self {
            platform,
            compiled: false,
            available: false,
            reason: Some(format!("No media session backend for {}", platform)),
        }
    }
}

/// Name of the platform this build targets
pub fn platform_name() -> &'static str {
    if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else {
        "unknown"
    }
}

/// Probe the runtime environment for the current platform's backend
pub fn current_platform_support() -> PlatformSupport {
    #[cfg(target_os = "linux")]
    return linux::support();

    #[cfg(target_os = "windows")]
    return windows::support();

    #[cfg(target_os = "macos")]
    return macos::support();

    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    return PlatformSupport::not_compiled(platform_name());
}

/// Create the snapshot probe for the current platform
///
/// Fails with the unavailability reason when the backend's prerequisites
/// are missing.
pub fn create_probe() -> Result<Arc<dyn SnapshotProbe>> {
    let support = current_platform_support();
    if !support.available {
        return Err(anyhow!(
            "Media sessions unavailable on {}: {}",
            support.platform,
            support.reason.unwrap_or_default()
        ));
    }

    #[cfg(target_os = "linux")]
    return Ok(Arc::new(linux::MprisProbe::new()?));

    #[cfg(target_os = "windows")]
    return Ok(Arc::new(windows::SmtcProbe::new()?));

    #[cfg(target_os = "macos")]
    return Ok(Arc::new(macos::AdapterProbe::from_env()?));

    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    unreachable!("unsupported platforms never report an available backend");
}
