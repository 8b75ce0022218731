//! Error types.
//!
//! Mirrors the error classes from §7: transient conditions are retried by a
//! timer at the call site rather than surfaced here; client-caused and fatal
//! conditions become [`KestrelError`] variants. `errno()` recovers the
//! signed error code a client ack (`COMMIT_FAILED`, `-ENOENT`, ...) is built
//! from.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum KestrelError {
    #[error("pixel format {0:?} is not supported by this plane/device")]
    UnsupportedFormat(drm_fourcc::DrmFourcc),

    #[error("no overlay or primary plane is available on this output")]
    PlaneExhausted,

    #[error("surface has no allocated scanout plane")]
    NoPlaneAssigned,

    #[error("commit referenced a surface that has already been destroyed")]
    DestroyedSurface,

    #[error("malformed IPC message: {0}")]
    MalformedMessage(String),

    #[error("the underlying DRM device returned an error: {0}")]
    Drm(#[from] drm::SystemError),

    #[error("the underlying GBM device returned an error: {0}")]
    Gbm(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("atomic commit failed and was rolled back to the last known-good state")]
    CommitFailed,

    #[error("cannot initialize compositor: {0}")]
    Fatal(String),
}

impl KestrelError {
    /// The negative errno a client ack should carry for this failure, mirroring
    /// the C source's `return -ENOENT;` / `return -EINVAL;` convention.
    pub fn errno(&self) -> i32 {
        use KestrelError::*;
        match self {
            UnsupportedFormat(_) => -libc_einval(),
            PlaneExhausted | NoPlaneAssigned => -libc_enoent(),
            DestroyedSurface => -libc_enoent(),
            MalformedMessage(_) => -libc_einval(),
            Drm(_) | Gbm(_) | Io(_) | CommitFailed => -libc_eio(),
            Fatal(_) => -libc_eio(),
        }
    }
}

// Small local errno constants so this module does not need a libc dependency
// solely for three integers; values match Linux's <errno.h>.
const fn libc_enoent() -> i32 {
    2
}
const fn libc_einval() -> i32 {
    22
}
const fn libc_eio() -> i32 {
    5
}

pub type Result<T> = std::result::Result<T, KestrelError>;
