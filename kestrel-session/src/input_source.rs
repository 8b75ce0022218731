//! libinput wiring — the concrete `InputSource` (§1, §4.7). Accel curves,
//! touch calibration and gesture synthesis are this module's problem, not
//! `kestrel`'s (§1 Non-goal); it only ever hands `kestrel` the reduced
//! `InputEvent` enum `kestrel::input` defines.
//!
//! Grounded in the teacher's `backend::libinput::LibinputInputBackend`: a
//! `input::Libinput` context built over a udev context, wrapped in a
//! calloop `Generic` source on its raw fd the way `anvil`'s udev backend
//! registers its libinput context.

use input::event::pointer::PointerEvent;
use input::event::touch::TouchEventPosition;
use input::event::Event as LibinputEvent;
use input::{Libinput, LibinputInterface};
use kestrel::input::{InputEvent, InputSource};
use rustix::fs::{Mode, OFlags};
use std::os::fd::{IntoRawFd, OwnedFd};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::Path;

/// Opens evdev nodes the way `kestrel-session`'s session (libseat or raw
/// `open(2)` in a trusted setup) grants access to them.
struct Interface;

impl LibinputInterface for Interface {
    fn open_restricted(&mut self, path: &Path, flags: i32) -> Result<OwnedFd, i32> {
        rustix::fs::open(path, OFlags::from_bits_truncate(flags as u32), Mode::empty())
            .map(|fd| unsafe { OwnedFd::from_raw_fd(fd.into_raw_fd()) })
            .map_err(|errno| errno.raw_os_error())
    }

    fn close_restricted(&mut self, fd: OwnedFd) {
        drop(fd);
    }
}

/// The concrete [`InputSource`] `kestrel-session` wires against libinput.
pub struct LibinputSource {
    context: Libinput,
}

impl LibinputSource {
    pub fn new(udev_context: &udev::Udev, seat: &str) -> std::io::Result<Self> {
        let mut context = Libinput::new_with_udev(Interface);
        context
            .udev_assign_seat(seat)
            .map_err(|()| std::io::Error::other("failed to assign libinput seat"))?;
        let _ = udev_context;
        Ok(LibinputSource { context })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.context.as_raw_fd()
    }
}

impl InputSource for LibinputSource {
    fn dispatch(&mut self, handler: &mut dyn FnMut(InputEvent)) {
        if self.context.dispatch().is_err() {
            return;
        }
        for event in &mut self.context {
            match event {
                LibinputEvent::Pointer(PointerEvent::Motion(motion)) => {
                    handler(InputEvent::PointerMotion {
                        dx: motion.dx() as i32,
                        dy: motion.dy() as i32,
                    });
                }
                LibinputEvent::Pointer(PointerEvent::Button(button)) => {
                    let pressed = button.button_state() == input::event::pointer::ButtonState::Pressed;
                    handler(InputEvent::PointerButton { pressed });
                }
                LibinputEvent::Touch(touch_event) => match touch_event {
                    input::event::TouchEvent::Down(down) => {
                        handler(InputEvent::TouchDown {
                            x: down.x() as i32,
                            y: down.y() as i32,
                        });
                    }
                    input::event::TouchEvent::Up(_) => handler(InputEvent::TouchUp),
                    _ => {}
                },
                _ => {}
            }
        }
    }
}
