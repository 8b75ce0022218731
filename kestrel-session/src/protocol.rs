//! Turns decoded [`Message`]s into `kestrel::Compositor` calls.
//!
//! §6 fixes the envelope (length prefix, `flag_bits`, TLV body, SCM_RIGHTS
//! fds) but leaves each sub-command's payload layout to the collaborator —
//! "External summary" in §4.7's terms. The layouts below are this binary's
//! own convention: a fixed little-endian struct per sub-command, chosen to
//! be the simplest thing that lets a real client drive every commit path
//! `kestrel::Compositor` exposes.
//!
//! Grounded in the teacher's `anvil` compositor state, which keeps exactly
//! this kind of per-client side table (window id -> `Window`) next to the
//! shared compositor state rather than inside the wire-protocol crate.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use drm_fourcc::DrmFourcc;
use kestrel::buffer::{Buffer, BufferInfo};
use kestrel::client_agent::{ClientAgent, CommitAck};
use kestrel::format::PixFmt;
use kestrel::geometry::Rect;
use kestrel::surface::{Surface, SurfaceHandle};
use kestrel::view::View;
use kestrel::{Renderer, Scanout};

use crate::ipc::{ClientConnection, CommandFlags, Message};

/// Shares one [`ClientConnection`] between the accept-loop's read side and
/// every [`Surface`] it owns, which each need their own notification sink.
#[derive(Clone)]
pub struct SharedClient(pub Rc<RefCell<ClientConnection>>);

impl ClientAgent for SharedClient {
    fn send_bo_flipped(&mut self, buffer: &Buffer) {
        self.0.borrow_mut().send_bo_flipped(buffer);
    }

    fn send_bo_complete(&mut self, buffer: &Buffer) {
        self.0.borrow_mut().send_bo_complete(buffer);
    }

    fn send_commit_ack(&mut self, ack: CommitAck) {
        self.0.borrow_mut().send_commit_ack(ack);
    }

    fn send_view_focus_changed(&mut self, view: &kestrel::View, gained: bool) {
        self.0.borrow_mut().send_view_focus_changed(view, gained);
    }

    fn send_layout_changed(&mut self) {
        self.0.borrow_mut().send_layout_changed();
    }
}

/// One connected client: its wire endpoint plus the surfaces and
/// not-yet-committed buffers it has declared, keyed by the ids it chose.
pub struct ClientSession {
    pub conn: SharedClient,
    surfaces: HashMap<u32, SurfaceHandle>,
    pending_bo: HashMap<u32, Buffer>,
}

impl ClientSession {
    pub fn new(conn: ClientConnection) -> Self {
        ClientSession {
            conn: SharedClient(Rc::new(RefCell::new(conn))),
            surfaces: HashMap::new(),
            pending_bo: HashMap::new(),
        }
    }

    pub fn poll_messages(&mut self) -> std::io::Result<Vec<Message>> {
        self.conn.0.borrow_mut().poll_messages()
    }

    pub fn flush(&mut self) {
        self.conn.0.borrow_mut().flush();
    }
}

/// `CREATE_SURFACE` payload: `[u32 surface_id][i32 x][i32 y][i32 w][i32 h]
/// [i32 zpos][u8 direct]`.
fn decode_create_surface(payload: &[u8]) -> Option<(u32, Rect<kestrel::geometry::Logical>, i32, bool)> {
    if payload.len() < 21 {
        return None;
    }
    let id = u32::from_le_bytes(payload[0..4].try_into().ok()?);
    let x = i32::from_le_bytes(payload[4..8].try_into().ok()?);
    let y = i32::from_le_bytes(payload[8..12].try_into().ok()?);
    let w = i32::from_le_bytes(payload[12..16].try_into().ok()?);
    let h = i32::from_le_bytes(payload[16..20].try_into().ok()?);
    let zpos = i32::from_le_bytes(payload[20..24.min(payload.len())].try_into().unwrap_or([0; 4]));
    let direct = payload.get(24).copied().unwrap_or(0) != 0;
    Some((id, Rect::from_xywh(x, y, w, h), zpos, direct))
}

/// `CREATE_BO` payload: `[u32 bo_id][u32 width][u32 height][u32 fourcc]`,
/// with the DMA-BUF fd riding along via SCM_RIGHTS.
fn decode_create_bo(payload: &[u8]) -> Option<(u32, u32, u32, u32)> {
    if payload.len() < 16 {
        return None;
    }
    let id = u32::from_le_bytes(payload[0..4].try_into().ok()?);
    let width = u32::from_le_bytes(payload[4..8].try_into().ok()?);
    let height = u32::from_le_bytes(payload[8..12].try_into().ok()?);
    let fourcc = u32::from_le_bytes(payload[12..16].try_into().ok()?);
    Some((id, width, height, fourcc))
}

/// `COMMIT`/`MOUSE_CURSOR_COMMIT` payload: `[u32 surface_id][u32 bo_id]`.
fn decode_commit(payload: &[u8]) -> Option<(u32, u32)> {
    if payload.len() < 8 {
        return None;
    }
    let surface_id = u32::from_le_bytes(payload[0..4].try_into().ok()?);
    let bo_id = u32::from_le_bytes(payload[4..8].try_into().ok()?);
    Some((surface_id, bo_id))
}

/// Folds every sub-command a single [`Message`] carries into the
/// compositor. Malformed payloads are logged and skipped rather than
/// treated as fatal — a client bug should not take the compositor down.
pub fn dispatch<S: Scanout, R: Renderer>(
    session: &mut ClientSession,
    compositor: &mut kestrel::Compositor<S, R>,
    messages: Vec<Message>,
) {
    for message in messages {
        if message.flags.contains(CommandFlags::CREATE_SURFACE) {
            if let Some(tlv) = message.tlvs.first() {
                match decode_create_surface(&tlv.payload) {
                    Some((id, area, zpos, direct)) => {
                        let mut view = View::new(area, zpos);
                        view.direct_show = direct;
                        let mut surface = Surface::new(view, !direct);
                        surface.client = Some(Box::new(session.conn.clone()));
                        let handle: SurfaceHandle = Rc::new(RefCell::new(surface));
                        compositor.add_view(handle.clone());
                        session.surfaces.insert(id, handle);
                    }
                    None => tracing::warn!("malformed create-surface payload"),
                }
            }
        }

        if message.flags.contains(CommandFlags::CREATE_BO) {
            if let Some(tlv) = message.tlvs.first() {
                match decode_create_bo(&tlv.payload) {
                    Some((id, width, height, fourcc)) => {
                        let pix_fmt = DrmFourcc::try_from(fourcc)
                            .ok()
                            .and_then(PixFmt::from_fourcc)
                            .unwrap_or(PixFmt::Argb8888);
                        let mut info = BufferInfo::new_dmabuf(pix_fmt, width, height, 1);
                        if let Some(fd) = message.fds.into_iter().next() {
                            info.fds[0] = Some(fd);
                        }
                        session.pending_bo.insert(id, Buffer::new(info));
                    }
                    None => tracing::warn!("malformed create-bo payload"),
                }
            }
        }

        let is_cursor = message.flags.contains(CommandFlags::MOUSE_CURSOR_COMMIT);
        if message.flags.contains(CommandFlags::COMMIT) || is_cursor {
            if let Some(tlv) = message.tlvs.first() {
                match decode_commit(&tlv.payload) {
                    Some((surface_id, bo_id)) => commit(session, compositor, surface_id, bo_id),
                    None => tracing::warn!("malformed commit payload"),
                }
            }
        }
    }
    session.flush();
}

fn commit<S: Scanout, R: Renderer>(
    session: &mut ClientSession,
    compositor: &mut kestrel::Compositor<S, R>,
    surface_id: u32,
    bo_id: u32,
) {
    let Some(handle) = session.surfaces.get(&surface_id) else {
        tracing::warn!(surface_id, "commit for unknown surface");
        return;
    };
    let buffer = session.pending_bo.remove(&bo_id);
    let use_renderer = handle.borrow().use_renderer;
    handle.borrow_mut().buffer_pending = buffer;

    let result = if use_renderer {
        compositor.commit_surface(handle)
    } else {
        compositor.commit_dmabuf(handle)
    };
    if let Err(err) = result {
        tracing::warn!(%err, surface_id, "commit failed");
        session.conn.send_commit_ack(CommitAck::Failed);
    }
}
