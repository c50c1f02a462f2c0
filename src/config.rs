//! Purpose: Deployment mode and host configuration for dispatched calls.
//! Exports: `DeploymentMode`, `Config`, `default_state_dir`.
//! Role: Single source for the mode-dependent switches consulted by the core.
//! Invariants: Mode is resolved once per process; contexts copy it at construction.
//! Invariants: Precedence is defaults, then environment, then explicit overrides.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::core::error::{ErrorCode, Failure};

pub const MODE_ENV: &str = "LIFECALL_MODE";
pub const DIR_ENV: &str = "LIFECALL_DIR";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DeploymentMode {
    /// Developer machine: debug logs on, diagnostic dumps on failure.
    Local,
    /// Verbose non-production deployment.
    Staging,
    #[default]
    Live,
}

impl DeploymentMode {
    /// Session loads before input validation outside live deployments.
    pub fn is_verbose(self) -> bool {
        self != DeploymentMode::Live
    }

    pub fn is_debug(self) -> bool {
        self == DeploymentMode::Local
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentMode::Local => "local",
            DeploymentMode::Staging => "staging",
            DeploymentMode::Live => "live",
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentMode {
    type Err = Failure;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" | "dev" => Ok(DeploymentMode::Local),
            "staging" | "verbose" => Ok(DeploymentMode::Staging),
            "live" | "production" | "prod" => Ok(DeploymentMode::Live),
            _ => Err(Failure::new(ErrorCode::SYSTEM)
                .with_message("unknown deployment mode")
                .with_field("mode", value)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mode: DeploymentMode,
    /// Calls slower than this log a warning; nothing is aborted.
    pub slow_call_secs: f64,
    /// Outside live mode, larger responses log a warning.
    pub output_warn_bytes: usize,
    pub state_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::default(),
            slow_call_secs: 1.0,
            output_warn_bytes: 4096,
            state_dir: default_state_dir(),
        }
    }
}

impl Config {
    pub fn with_mode(mut self, mode: DeploymentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Defaults overlaid with `LIFECALL_MODE` and `LIFECALL_DIR`.
    pub fn from_env() -> Result<Self, Failure> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, Failure>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        if let Some(mode) = lookup(MODE_ENV).filter(|value| !value.trim().is_empty()) {
            config.mode = mode.parse()?;
        }
        if let Some(dir) = lookup(DIR_ENV).filter(|value| !value.trim().is_empty()) {
            config.state_dir = PathBuf::from(dir);
        }
        Ok(config)
    }
}

pub fn default_state_dir() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".lifecall")
}

#[cfg(test)]
mod tests {
    use super::{Config, DIR_ENV, DeploymentMode, MODE_ENV};
    use crate::core::error::ErrorCode;
    use std::path::PathBuf;

    #[test]
    fn parses_mode_aliases() {
        let cases = [
            ("local", DeploymentMode::Local),
            ("DEV", DeploymentMode::Local),
            ("staging", DeploymentMode::Staging),
            ("verbose", DeploymentMode::Staging),
            ("live", DeploymentMode::Live),
            (" production ", DeploymentMode::Live),
            ("prod", DeploymentMode::Live),
        ];
        for (raw, mode) in cases {
            assert_eq!(raw.parse::<DeploymentMode>().expect("mode"), mode);
        }
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = "qa".parse::<DeploymentMode>().unwrap_err();
        assert_eq!(err.code(), ErrorCode::SYSTEM);
    }

    #[test]
    fn mode_flags() {
        assert!(DeploymentMode::Local.is_verbose());
        assert!(DeploymentMode::Local.is_debug());
        assert!(DeploymentMode::Staging.is_verbose());
        assert!(!DeploymentMode::Staging.is_debug());
        assert!(!DeploymentMode::Live.is_verbose());
        assert!(!DeploymentMode::Live.is_debug());
    }

    #[test]
    fn env_overrides_defaults() {
        let config = Config::from_lookup(|key| match key {
            MODE_ENV => Some("staging".to_string()),
            DIR_ENV => Some("/tmp/lifecall-test".to_string()),
            _ => None,
        })
        .expect("config");
        assert_eq!(config.mode, DeploymentMode::Staging);
        assert_eq!(config.state_dir, PathBuf::from("/tmp/lifecall-test"));
        assert_eq!(config.output_warn_bytes, 4096);
        assert_eq!(config.slow_call_secs, 1.0);
    }

    #[test]
    fn blank_env_keeps_defaults() {
        let config = Config::from_lookup(|_| Some("  ".to_string())).expect("config");
        assert_eq!(config.mode, DeploymentMode::Live);
    }
}
