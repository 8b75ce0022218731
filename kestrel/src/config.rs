//! Per-subsystem runtime debug levels (§4.9), consolidated into an
//! immutable snapshot per the redesign note in spec.md §9 ("Global
//! per-subsystem debug level variables mutated by inotify watcher" →
//! "consolidated into a configuration snapshot; atomic swap on update;
//! readers take a local copy at the start of each handler").
//!
//! `kestrel` only ever reads [`DebugConfig::current`]; `kestrel-session`
//! owns the inotify watch on the well-known debug-flag path (§6) and
//! publishes a new snapshot via [`DebugLevels::store`] on change.

use std::sync::Arc;

use arc_swap::ArcSwap;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// One snapshot of every subsystem's debug level, matching the five
/// subsystems §4.8 names (`scanout`, `output`, `view`, `compositor`,
/// `renderer`) plus `client` and `input` for the collaborator boundaries.
#[derive(Debug, Copy, Clone)]
pub struct DebugConfig {
    pub scanout: LogLevel,
    pub output: LogLevel,
    pub compositor: LogLevel,
    pub renderer: LogLevel,
    pub client: LogLevel,
    pub input: LogLevel,
}

impl Default for DebugConfig {
    fn default() -> Self {
        DebugConfig {
            scanout: LogLevel::Warn,
            output: LogLevel::Warn,
            compositor: LogLevel::Info,
            renderer: LogLevel::Warn,
            client: LogLevel::Warn,
            input: LogLevel::Warn,
        }
    }
}

/// An atomically-swappable holder for the current [`DebugConfig`].
#[derive(Debug)]
pub struct DebugLevels {
    current: ArcSwap<DebugConfig>,
}

impl Default for DebugLevels {
    fn default() -> Self {
        DebugLevels {
            current: ArcSwap::from_pointee(DebugConfig::default()),
        }
    }
}

impl DebugLevels {
    pub fn new(initial: DebugConfig) -> Self {
        DebugLevels {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Take a local copy of the current snapshot — call sites are expected
    /// to do this once at the start of a handler rather than re-reading
    /// mid-handler, per the redesign note.
    pub fn current(&self) -> Arc<DebugConfig> {
        self.current.load_full()
    }

    /// Publish a new snapshot, replacing the old one atomically.
    pub fn store(&self, new: DebugConfig) {
        self.current.store(Arc::new(new));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_see_a_consistent_snapshot_across_a_store() {
        let levels = DebugLevels::default();
        let before = levels.current();
        assert_eq!(before.compositor, LogLevel::Info);

        levels.store(DebugConfig {
            compositor: LogLevel::Debug,
            ..DebugConfig::default()
        });

        // the snapshot taken before the store is unaffected.
        assert_eq!(before.compositor, LogLevel::Info);
        assert_eq!(levels.current().compositor, LogLevel::Debug);
    }
}
