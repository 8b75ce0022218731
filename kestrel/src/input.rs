//! The `InputSource` collaborator boundary (§1, §4.7) plus the cursor
//! position bookkeeping spec.md §4.7 assigns to "the compositor" rather than
//! the external collaborator: normalizing the cursor across output edges
//! (`check_mouse_pos`/`normalize_mouse_pos` in `cube_compositor.c`) and
//! deciding which output's mouse-cursor viewport needs a repaint.
//!
//! Accel curves, touch calibration, evdev capture and gesture synthesis stay
//! outside `kestrel` entirely (§1 Non-goal) — owned by whatever
//! `InputSource` implementation `kestrel-session` wires against libinput.

use crate::geometry::{Logical, Point, Rect};

pub const CURSOR_MAX_WIDTH: i32 = 64;
pub const CURSOR_MAX_HEIGHT: i32 = 64;

/// Events an [`InputSource`] hands to the compositor (§4.7): raw input for
/// clients with the raw-input capability, or a GUI message for the top
/// view's client.
#[derive(Debug, Clone, Copy)]
pub enum InputEvent {
    PointerMotion { dx: i32, dy: i32 },
    PointerButton { pressed: bool },
    TouchDown { x: i32, y: i32 },
    TouchUp,
}

/// External collaborator contract for evdev capture (§1, §4.7).
pub trait InputSource {
    /// Pump pending device events, dispatching each through `handler`.
    fn dispatch(&mut self, handler: &mut dyn FnMut(InputEvent));
}

/// Cursor position bookkeeping, shared by every output (§4.7). Positions are
/// tracked in desktop-pixel space (`mc_desktop_pos`); `g_pos` is the
/// normalized 65536x65536-grid position input events are expressed in (§6).
#[derive(Debug, Default, Clone, Copy)]
pub struct CursorState {
    pub desktop_pos: Point<Logical>,
    pub hot_pos: Point<Logical>,
}

/// Whether `(x, y)` falls within any output's `desktop_rc`, and which one.
/// `check_mouse_pos` in the source.
pub fn locate_output(outputs: &[(usize, Rect<Logical>)], x: i32, y: i32) -> Option<usize> {
    outputs
        .iter()
        .find(|(_, rc)| rc.contains_point(Point::new(x, y)))
        .map(|(pipe, _)| *pipe)
}

/// §4.7 "the cursor cannot leave a reachable monitor": clamp a proposed
/// cursor move so that it stays within whichever output's `desktop_rc`
/// currently contains the cursor, unless the move lands inside some other
/// output's rectangle (crossing an edge onto an adjacent monitor is fine;
/// falling off every monitor is not).
pub fn normalize_motion(
    outputs: &[(usize, Rect<Logical>)],
    cursor: &mut CursorState,
    cur_screen: usize,
    dx: i32,
    dy: i32,
) {
    let Some(&(_, rc)) = outputs.iter().find(|(pipe, _)| *pipe == cur_screen) else {
        cursor.desktop_pos.x += dx;
        cursor.desktop_pos.y += dy;
        return;
    };

    if locate_output(outputs, cursor.desktop_pos.x + dx, cursor.desktop_pos.y + dy).is_some() {
        cursor.desktop_pos.x += dx;
        cursor.desktop_pos.y += dy;
        return;
    }

    if locate_output(outputs, cursor.desktop_pos.x + dx, cursor.desktop_pos.y).is_none() {
        if cursor.desktop_pos.x + dx >= rc.right() {
            cursor.desktop_pos.x = rc.right() - 1;
        } else if cursor.desktop_pos.x + dx < rc.x() {
            cursor.desktop_pos.x = rc.x();
        }
    } else {
        cursor.desktop_pos.x += dx;
    }

    if locate_output(outputs, cursor.desktop_pos.x, cursor.desktop_pos.y + dy).is_none() {
        if cursor.desktop_pos.y + dy >= rc.bottom() {
            cursor.desktop_pos.y = rc.bottom() - 1;
        } else if cursor.desktop_pos.y + dy < rc.y() {
            cursor.desktop_pos.y = rc.y();
        }
    } else {
        cursor.desktop_pos.y += dy;
    }
}

/// Whether the cursor (accounting for its hotspot) is currently within
/// `MC_MAX_WIDTH`/`MC_MAX_HEIGHT` of `desktop_rc` — `update_mc_view_port`'s
/// on-screen test, extracted from the viewport-geometry computation since
/// that part stays a Renderer/Scanout concern.
pub fn is_on_screen(desktop_rc: Rect<Logical>, cursor: CursorState) -> bool {
    let x = cursor.desktop_pos.x - cursor.hot_pos.x;
    let y = cursor.desktop_pos.y - cursor.hot_pos.y;
    x >= desktop_rc.x() - CURSOR_MAX_WIDTH
        && x < desktop_rc.right()
        && y >= desktop_rc.y() - CURSOR_MAX_HEIGHT
        && y < desktop_rc.bottom()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_cannot_leave_the_rightmost_output() {
        let outputs = vec![(0usize, Rect::from_xywh(0, 0, 1920, 1080))];
        let mut cursor = CursorState::default();
        cursor.desktop_pos = Point::new(1919, 500);
        normalize_motion(&outputs, &mut cursor, 0, 50, 0);
        assert_eq!(cursor.desktop_pos.x, 1919);
    }

    #[test]
    fn cursor_crosses_onto_an_adjacent_output() {
        let outputs = vec![
            (0usize, Rect::from_xywh(0, 0, 1920, 1080)),
            (1usize, Rect::from_xywh(1920, 0, 1280, 720)),
        ];
        let mut cursor = CursorState::default();
        cursor.desktop_pos = Point::new(1915, 100);
        normalize_motion(&outputs, &mut cursor, 0, 10, 0);
        assert_eq!(cursor.desktop_pos.x, 1925);
    }

    #[test]
    fn on_screen_test_accounts_for_hotspot() {
        let rc = Rect::from_xywh(0, 0, 1920, 1080);
        let mut cursor = CursorState::default();
        cursor.desktop_pos = Point::new(-100, -100);
        cursor.hot_pos = Point::new(0, 0);
        assert!(!is_on_screen(rc, cursor));
        cursor.desktop_pos = Point::new(-100, -100);
        cursor.hot_pos = Point::new(-60, -60);
        assert!(is_on_screen(rc, cursor));
    }
}
