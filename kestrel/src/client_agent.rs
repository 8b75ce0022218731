//! The `ClientAgent` collaborator contract (§1, §6) — IPC wire parsing
//! itself is out of scope; this module names only the acknowledgment
//! values and the notification calls `kestrel`'s commit paths invoke
//! against it (`cb_client_agent_send_bo_flipped`/`send_bo_complete`/
//! `send_bo_commit_ack`/`send_view_focus_chg` in the teacher counterpart).

use crate::buffer::Buffer;
use crate::view::View;

/// §6: "Commit acknowledgment values".
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommitAck {
    /// Echoes the committed buffer's id.
    Ok(u64),
    /// `u64::MAX` on the wire.
    Failed,
    /// Sent in addition to `Ok` when a previous buffer was superseded
    /// (§4.3 step 6, replace-pending).
    Replace,
}

impl CommitAck {
    pub const FAILED_SENTINEL: u64 = u64::MAX;
}

/// External collaborator contract for the per-client IPC endpoint (§1, §6).
/// `kestrel-session` implements this against the real UNIX-socket TLV
/// framing (§6); `kestrel` only ever calls through this trait, never parses
/// wire bytes itself.
pub trait ClientAgent {
    /// `dma_buf_flipped_cb` → `bo_flipped`: the commit's atomic flip
    /// completed (§4.3 step 5).
    fn send_bo_flipped(&mut self, buffer: &Buffer);

    /// `dma_buf_completed_cb` / SHM renderer path → `bo_complete`: the
    /// buffer's ref count dropped to 1 and the client may reuse it.
    fn send_bo_complete(&mut self, buffer: &Buffer);

    /// Reply to a `commit` sub-command.
    fn send_commit_ack(&mut self, ack: CommitAck);

    /// `send_view_focus_chg`: a view gained or lost input focus (§4.4).
    fn send_view_focus_changed(&mut self, view: &View, gained: bool);

    /// `CANVAS_LAYOUT_CHANGED_NOTIFY` broadcast (§4.6, §6).
    fn send_layout_changed(&mut self);
}
