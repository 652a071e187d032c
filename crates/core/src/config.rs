//! Engine configuration.
//!
//! Options are validated when built, so an engine never starts with a
//! zero-length timer.

use crate::error::{MediaError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SESSION_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_SESSION_UPDATE_INTERVAL: Duration = Duration::from_millis(200);

/// Validated options for a [`SessionRegistry`](crate::SessionRegistry)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaOptions {
    event_driven_enabled: bool,
    session_poll_interval: Duration,
    session_update_interval: Duration,
    position_refresh_interval: Option<Duration>,
}

impl MediaOptions {
    pub fn builder() -> MediaOptionsBuilder {
        MediaOptionsBuilder::default()
    }

    /// Whether listeners receive change events
    pub fn event_driven_enabled(&self) -> bool {
        self.event_driven_enabled
    }

    /// How often the session list is re-scanned
    pub fn session_poll_interval(&self) -> Duration {
        self.session_poll_interval
    }

    /// How often each session is probed
    pub fn session_update_interval(&self) -> Duration {
        self.session_update_interval
    }

    /// Optional projection-only refresh between probes (event-driven mode only)
    pub fn position_refresh_interval(&self) -> Option<Duration> {
        self.position_refresh_interval
    }

    pub fn with_event_driven_enabled(&self, enabled: bool) -> Self {
        Self {
            event_driven_enabled: enabled,
            ..self.clone()
        }
    }

    pub fn with_session_poll_interval(&self, interval: Duration) -> Result<Self> {
        Ok(Self {
            session_poll_interval: require_positive("session_poll_interval", interval)?,
            ..self.clone()
        })
    }

    pub fn with_session_update_interval(&self, interval: Duration) -> Result<Self> {
        Ok(Self {
            session_update_interval: require_positive("session_update_interval", interval)?,
            ..self.clone()
        })
    }

    pub fn with_position_refresh_interval(&self, interval: Option<Duration>) -> Result<Self> {
        let interval = interval
            .map(|i| require_positive("position_refresh_interval", i))
            .transpose()?;
        Ok(Self {
            position_refresh_interval: interval,
            ..self.clone()
        })
    }

    /// Parse options from TOML text; missing keys keep their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: OptionsFile = toml::from_str(text)?;
        file.into_builder().build()
    }

    /// Load options from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| MediaError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let file: OptionsFile =
            toml::from_str(&text).map_err(|source| MediaError::ConfigMalformed {
                path: path.to_path_buf(),
                source,
            })?;
        file.into_builder().build()
    }
}

impl Default for MediaOptions {
    fn default() -> Self {
        Self {
            event_driven_enabled: true,
            session_poll_interval: DEFAULT_SESSION_POLL_INTERVAL,
            session_update_interval: DEFAULT_SESSION_UPDATE_INTERVAL,
            position_refresh_interval: None,
        }
    }
}

/// Builder for [`MediaOptions`]; validation happens in [`build`](Self::build)
#[derive(Clone, Debug)]
pub struct MediaOptionsBuilder {
    event_driven_enabled: bool,
    session_poll_interval: Duration,
    session_update_interval: Duration,
    position_refresh_interval: Option<Duration>,
}

impl Default for MediaOptionsBuilder {
    fn default() -> Self {
        let defaults = MediaOptions::default();
        Self {
            event_driven_enabled: defaults.event_driven_enabled,
            session_poll_interval: defaults.session_poll_interval,
            session_update_interval: defaults.session_update_interval,
            position_refresh_interval: defaults.position_refresh_interval,
        }
    }
}

impl MediaOptionsBuilder {
    pub fn event_driven_enabled(mut self, enabled: bool) -> Self {
        self.event_driven_enabled = enabled;
        self
    }

    pub fn session_poll_interval(mut self, interval: Duration) -> Self {
        self.session_poll_interval = interval;
        self
    }

    pub fn session_update_interval(mut self, interval: Duration) -> Self {
        self.session_update_interval = interval;
        self
    }

    pub fn position_refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.position_refresh_interval = interval;
        self
    }

    pub fn build(self) -> Result<MediaOptions> {
        Ok(MediaOptions {
            event_driven_enabled: self.event_driven_enabled,
            session_poll_interval: require_positive("session_poll_interval", self.session_poll_interval)?,
            session_update_interval: require_positive(
                "session_update_interval",
                self.session_update_interval,
            )?,
            position_refresh_interval: self
                .position_refresh_interval
                .map(|i| require_positive("position_refresh_interval", i))
                .transpose()?,
        })
    }
}

/// On-disk shape of the options (intervals in milliseconds)
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OptionsFile {
    event_driven: Option<bool>,
    session_poll_interval_ms: Option<u64>,
    session_update_interval_ms: Option<u64>,
    position_refresh_interval_ms: Option<u64>,
}

impl OptionsFile {
    fn into_builder(self) -> MediaOptionsBuilder {
        let mut builder = MediaOptions::builder();
        if let Some(enabled) = self.event_driven {
            builder = builder.event_driven_enabled(enabled);
        }
        if let Some(ms) = self.session_poll_interval_ms {
            builder = builder.session_poll_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.session_update_interval_ms {
            builder = builder.session_update_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.position_refresh_interval_ms {
            builder = builder.position_refresh_interval(Some(Duration::from_millis(ms)));
        }
        builder
    }
}

fn require_positive(name: &'static str, value: Duration) -> Result<Duration> {
    if value.is_zero() {
        return Err(MediaError::InvalidInterval { name, value });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = MediaOptions::default();
        assert!(options.event_driven_enabled());
        assert_eq!(options.session_poll_interval(), Duration::from_secs(1));
        assert_eq!(options.session_update_interval(), Duration::from_millis(200));
        assert_eq!(options.position_refresh_interval(), None);
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let err = MediaOptions::builder()
            .session_poll_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            MediaError::InvalidInterval { name: "session_poll_interval", .. }
        ));

        let err = MediaOptions::default()
            .with_session_update_interval(Duration::ZERO)
            .unwrap_err();
        assert!(err.to_string().contains("session_update_interval"));

        assert!(MediaOptions::default()
            .with_position_refresh_interval(Some(Duration::ZERO))
            .is_err());
    }

    #[test]
    fn test_with_helpers_keep_other_fields() {
        let options = MediaOptions::default()
            .with_event_driven_enabled(false)
            .with_session_poll_interval(Duration::from_millis(250))
            .unwrap()
            .with_session_update_interval(Duration::from_millis(150))
            .unwrap();
        assert!(!options.event_driven_enabled());
        assert_eq!(options.session_poll_interval(), Duration::from_millis(250));
        assert_eq!(options.session_update_interval(), Duration::from_millis(150));
    }

    #[test]
    fn test_from_toml() {
        let options = MediaOptions::from_toml_str(
            r#"
            event_driven = false
            session_poll_interval_ms = 500
            position_refresh_interval_ms = 50
            "#,
        )
        .unwrap();
        assert!(!options.event_driven_enabled());
        assert_eq!(options.session_poll_interval(), Duration::from_millis(500));
        assert_eq!(options.session_update_interval(), DEFAULT_SESSION_UPDATE_INTERVAL);
        assert_eq!(options.position_refresh_interval(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_from_toml_rejects_bad_values() {
        assert!(matches!(
            MediaOptions::from_toml_str("session_update_interval_ms = 0"),
            Err(MediaError::InvalidInterval { .. })
        ));
        assert!(matches!(
            MediaOptions::from_toml_str("poll = 3"),
            Err(MediaError::ConfigParse(_))
        ));
    }
}
