//! inotify watch on the debug-flag file (§6, §4.9), publishing a fresh
//! `DebugConfig` snapshot into a shared [`DebugLevels`] on every change.
//!
//! Implemented as a plain `calloop::EventSource` over the raw inotify fd,
//! the same shape as the teacher's `backend::session::libseat`
//! `LibSeatSessionNotifier` (`register`/`reregister`/`unregister` poll the
//! fd directly with `unsafe { poll.register(...) }` since the underlying
//! library only exposes a raw fd, not a calloop-aware wrapper).

use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use calloop::{EventSource, Interest, Mode, Poll, PostAction, Readiness, Token, TokenFactory};
use inotify::{Inotify, WatchMask};
use kestrel::config::DebugLevels;

use crate::config::parse_debug_flags;

pub struct DebugWatch {
    inotify: Inotify,
    path: PathBuf,
    levels: Arc<DebugLevels>,
    token: Option<Token>,
}

impl DebugWatch {
    /// Watches `path`'s parent directory rather than the file itself, since
    /// editors commonly replace-by-rename and a direct watch would be
    /// silently dropped by the first such edit.
    pub fn new(path: &Path, levels: Arc<DebugLevels>) -> std::io::Result<Self> {
        let mut inotify = Inotify::init()?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        inotify
            .watches()
            .add(dir, WatchMask::CLOSE_WRITE | WatchMask::MOVED_TO | WatchMask::CREATE)?;
        Ok(DebugWatch {
            inotify,
            path: path.to_path_buf(),
            levels,
            token: None,
        })
    }

    fn reload(&self) {
        let Ok(contents) = std::fs::read_to_string(&self.path) else {
            return;
        };
        let cfg = parse_debug_flags(&contents);
        tracing::info!(?cfg, "debug levels reloaded");
        self.levels.store(cfg);
    }
}

impl EventSource for DebugWatch {
    type Event = ();
    type Metadata = ();
    type Ret = ();
    type Error = std::io::Error;

    fn process_events<F>(&mut self, readiness: Readiness, token: Token, mut callback: F) -> std::io::Result<PostAction>
    where
        F: FnMut((), &mut ()),
    {
        if Some(token) != self.token || !readiness.readable {
            return Ok(PostAction::Continue);
        }
        let mut buffer = [0u8; 1024];
        match self.inotify.read_events(&mut buffer) {
            Ok(_events) => {
                self.reload();
                callback((), &mut ());
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => return Err(err),
        }
        Ok(PostAction::Continue)
    }

    fn register(&mut self, poll: &mut Poll, factory: &mut TokenFactory) -> calloop::Result<()> {
        self.token = Some(factory.token());
        unsafe { poll.register(self.inotify.as_raw_fd(), Interest::READ, Mode::Level, self.token.unwrap()) }
    }

    fn reregister(&mut self, poll: &mut Poll, factory: &mut TokenFactory) -> calloop::Result<()> {
        self.token = Some(factory.token());
        poll.reregister(self.inotify.as_raw_fd(), Interest::READ, Mode::Level, self.token.unwrap())
    }

    fn unregister(&mut self, poll: &mut Poll) -> calloop::Result<()> {
        self.token = None;
        poll.unregister(self.inotify.as_raw_fd())
    }
}
