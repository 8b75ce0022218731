//! On-disk configuration and the well-known debug-flag file (§6 "Persistent
//! state: none ... a debug-flag file at a well-known path is watched via
//! inotify").
//!
//! `kestrel` itself never parses configuration (§1 Non-goal: "command-line
//! parsing, configuration files"); this module owns both the startup TOML
//! file and the runtime debug-level file, translating each into the types
//! `kestrel::config` actually reads.

use std::path::{Path, PathBuf};

use kestrel::config::{DebugConfig, LogLevel};
use serde::Deserialize;

/// Parsed `kestrel.toml`. Every field has a sensible default so an empty or
/// absent file still produces a runnable configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// DRM render/primary node to open, e.g. `/dev/dri/card0`.
    pub drm_device: PathBuf,
    /// `${SERVER_PREFIX}` in the socket path convention (§6).
    pub server_prefix: PathBuf,
    /// `${SERVER_NAME}` in the socket path convention (§6).
    pub server_name: String,
    /// Integer seat suffix appended to the socket name (§6).
    pub seat: u32,
    /// Path to the well-known debug-flag file watched via inotify.
    pub debug_flag_path: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        FileConfig {
            drm_device: PathBuf::from("/dev/dri/card0"),
            server_prefix: PathBuf::from("/run/kestrel"),
            server_name: "kestrel".to_string(),
            seat: 0,
            debug_flag_path: PathBuf::from("/run/kestrel/debug"),
        }
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
                tracing::warn!(?path, %err, "malformed config file, using defaults");
                FileConfig::default()
            }),
            Err(err) => {
                tracing::debug!(?path, %err, "no config file, using defaults");
                FileConfig::default()
            }
        }
    }

    /// `${SERVER_PREFIX}/${SERVER_NAME}-<seat>` (§6 socket path convention).
    pub fn socket_path(&self) -> PathBuf {
        self.server_prefix.join(format!("{}-{}", self.server_name, self.seat))
    }
}

/// One line of the debug-flag file: `subsystem=level`, one per subsystem.
/// Unknown subsystems/levels are ignored rather than rejected, since this
/// file is hand-edited by whoever is debugging a live compositor.
pub fn parse_debug_flags(contents: &str) -> DebugConfig {
    let mut cfg = DebugConfig::default();
    for line in contents.lines() {
        let line = line.trim();
        let Some((subsystem, level)) = line.split_once('=') else {
            continue;
        };
        let Some(level) = parse_level(level.trim()) else {
            continue;
        };
        match subsystem.trim() {
            "scanout" => cfg.scanout = level,
            "output" => cfg.output = level,
            "compositor" => cfg.compositor = level,
            "renderer" => cfg.renderer = level,
            "client" => cfg.client = level,
            "input" => cfg.input = level,
            other => tracing::debug!(subsystem = other, "unknown debug subsystem, ignoring"),
        }
    }
    cfg
}

fn parse_level(s: &str) -> Option<LogLevel> {
    match s {
        "error" => Some(LogLevel::Error),
        "warn" => Some(LogLevel::Warn),
        "info" => Some(LogLevel::Info),
        "debug" => Some(LogLevel::Debug),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_subsystem_is_ignored_not_fatal() {
        let cfg = parse_debug_flags("scanout=debug\nnonsense=debug\n");
        assert_eq!(cfg.scanout, LogLevel::Debug);
    }

    #[test]
    fn malformed_line_is_skipped() {
        let cfg = parse_debug_flags("not-a-kv-line\ncompositor=debug\n");
        assert_eq!(cfg.compositor, LogLevel::Debug);
    }
}
