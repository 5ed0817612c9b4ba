//! Daemon configuration: defaults, layered with an optional TOML file and
//! `AVRDBG_`-prefixed environment variables.
//!
//! This is one process-lifetime configuration object rather than per-command
//! on-disk chip descriptions, so it follows `figment`'s layered-provider
//! style instead of a bespoke merge routine.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::logging::LevelFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub bind_addr: SocketAddr,
    /// USB VID:PID or serial-number selector; `None` means "use whichever
    /// probe is attached, error if more than one is".
    pub probe_selector: Option<String>,
    /// Forces a target signature lookup to a particular catalog entry
    /// instead of trusting the device-id the probe reports.
    pub target_override: Option<String>,
    #[serde(with = "humantime_duration")]
    pub controller_timeout: Duration,
    pub log_level: LevelFilter,
    pub log_file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            bind_addr: "127.0.0.1:2331".parse().unwrap(),
            probe_selector: None,
            target_override: None,
            controller_timeout: Duration::from_secs(5),
            log_level: LevelFilter::Warn,
            log_file: None,
        }
    }
}

impl DaemonConfig {
    /// Loads defaults, then `path` if it exists, then environment
    /// variables, in that order of increasing precedence.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(DaemonConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("AVRDBG_").split("_"));
        figment.extract()
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}s", value.as_secs()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        let seconds: u64 = text
            .trim_end_matches('s')
            .parse()
            .map_err(serde::de::Error::custom)?;
        Ok(Duration::from_secs(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_to_loopback_2331() {
        let config = DaemonConfig::default();
        assert_eq!(config.bind_addr.port(), 2331);
    }

    #[test]
    fn loads_without_a_file_or_env_overrides() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.controller_timeout, Duration::from_secs(5));
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avrdbg.toml");
        std::fs::write(&path, "bind_addr = \"0.0.0.0:9000\"\ncontroller_timeout = \"2s\"\n").unwrap();
        let config = DaemonConfig::load(Some(&path)).unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.controller_timeout, Duration::from_secs(2));
    }

    #[test]
    fn env_var_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avrdbg.toml");
        std::fs::write(&path, "bind_addr = \"0.0.0.0:9000\"\n").unwrap();
        std::env::set_var("AVRDBG_BIND_ADDR", "0.0.0.0:1234");
        let config = DaemonConfig::load(Some(&path)).unwrap();
        std::env::remove_var("AVRDBG_BIND_ADDR");
        assert_eq!(config.bind_addr.port(), 1234);
    }
}
