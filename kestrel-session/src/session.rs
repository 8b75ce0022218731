//! A minimal libseat-backed session, scoped to this binary's actual need:
//! opening the DRM device node with the permissions a logind/seatd session
//! grants. Adapted from the teacher's `backend::session::libseat` — this
//! drops the `calloop::EventSource` VT-switch notifier (not needed for a
//! single-seat, no-VT-switch deployment) and keeps only `open_device`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

use libseat::Seat;

pub struct Session {
    seat: RefCell<Seat>,
    devices: RefCell<HashMap<RawFd, libseat::Device>>,
}

impl Session {
    pub fn open() -> std::io::Result<Self> {
        let seat = Seat::open(|_seat, event| {
            tracing::debug!(?event, "seat event");
        })
        .map_err(|err| std::io::Error::other(format!("failed to open seat: {err}")))?;
        Ok(Session {
            seat: RefCell::new(seat),
            devices: RefCell::new(HashMap::new()),
        })
    }

    pub fn open_device(&self, path: &Path) -> std::io::Result<OwnedFd> {
        let device = self
            .seat
            .borrow_mut()
            .open_device(path)
            .map_err(|err| std::io::Error::other(format!("failed to open {path:?}: {err}")))?;
        let raw_fd = device.as_fd().as_raw_fd();
        self.devices.borrow_mut().insert(raw_fd, device);
        // SAFETY: `libseat::Device` does not close the fd on drop; ownership
        // of the fd itself passes to the caller, matching how the teacher's
        // `LibSeatSession::open` hands back an `OwnedFd`.
        Ok(unsafe { OwnedFd::from_raw_fd(raw_fd) })
    }
}
