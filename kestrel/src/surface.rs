//! A client's pixel content plus its pending/current/last buffers (§3 `Surface`).

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::buffer::Buffer;
use crate::client_agent::ClientAgent;
use crate::region::Region;
use crate::view::View;

/// Identifies the "main output" a surface's flip callbacks are registered
/// against — the highest-`refresh_nsec` output in its view's `output_mask`,
/// or the `pipe_locked` one (§4.3 step 4).
pub type OutputPipe = usize;

/// `Surface` (§3): a client's drawable, paired with exactly one [`View`].
pub struct Surface {
    pub view: View,
    pub buffer_pending: Option<Buffer>,
    pub buffer_cur: Option<Buffer>,
    /// The buffer that was committed but not yet flipped; non-null only on
    /// the direct-scanout path's replace-pending protocol (§4.3 step 6).
    pub buffer_last: Option<Buffer>,
    pub damage: Region,
    pub opaque: Region,
    pub width: u32,
    pub height: u32,
    /// False for direct DMA-BUF scanout (`commit_dmabuf`), true for the
    /// renderer path (`commit_surface`).
    pub use_renderer: bool,
    pub main_output: Option<OutputPipe>,
    /// The IPC endpoint that owns this surface (§1, §6); `None` until
    /// `kestrel-session` attaches one right after surface creation, and
    /// briefly in unit tests that never wire a client.
    pub client: Option<Box<dyn ClientAgent>>,
    destroyed: bool,
}

impl Surface {
    pub fn new(view: View, use_renderer: bool) -> Self {
        Surface {
            view,
            buffer_pending: None,
            buffer_cur: None,
            buffer_last: None,
            damage: Region::empty(),
            opaque: Region::empty(),
            width: 0,
            height: 0,
            use_renderer,
            main_output: None,
            client: None,
            destroyed: false,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }
}

/// A shared, weakly-referenceable handle to a [`Surface`], used by buffer
/// flip/complete listeners that must not keep the surface alive past the
/// client tearing it down (§5: "cancellation ... means dropping listeners").
pub type SurfaceHandle = Rc<RefCell<Surface>>;
pub type WeakSurfaceHandle = Weak<RefCell<Surface>>;
