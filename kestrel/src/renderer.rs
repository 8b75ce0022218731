//! The `Renderer` collaborator contract (§1, §2, §4.2, §4.3).
//!
//! The renderer's own shader/texture management is explicitly out of scope
//! (§1): this module only names the three operations `kestrel` calls
//! against it — `attach_buffer`/`flush_damage` (surface content hand-off,
//! named after `gl_attach_buffer`/`gl_flush_damage` in the teacher's
//! `gl_renderer.c` counterpart) and `repaint_output` (per-output
//! composition into a primary-plane-consumable [`Buffer`], named after
//! `gl_output_repaint`). `kestrel-session` supplies a concrete
//! implementation; `kestrel` itself only depends on this trait.

use crate::buffer::Buffer;
use crate::error::Result;
use crate::surface::Surface;

/// A per-output native render target the renderer composites non-direct-show
/// views into (§2: "a renderer composites into a per-output framebuffer
/// consumed by the primary plane").
pub trait RenderTarget {
    /// Size in physical pixels of the underlying GPU surface.
    fn size(&self) -> (u32, u32);
}

/// External collaborator contract for the GL-ES renderer (§1, §4.2, §4.3).
pub trait Renderer {
    type Target: RenderTarget;

    /// §4.3 `commit_surface` step 3: attach a newly-committed buffer to a
    /// surface's renderer-side texture state.
    fn attach_buffer(&mut self, surface: &mut Surface, buffer: &Buffer) -> Result<()>;

    /// §4.3 `commit_surface` step 3: for SHM buffers, copy the damaged
    /// region out of the buffer into the renderer's texture immediately
    /// (after which the client may reuse the buffer — hence the immediate
    /// `bo_complete`).
    fn flush_damage(&mut self, surface: &mut Surface) -> Result<()>;

    /// §4.2 step 2: composite every non-direct-show view touching this
    /// output into `target`. Returns `None` if nothing was drawn (the
    /// caller must not allocate a scanout buffer in that case — §4.2:
    /// "If the view list is empty or nothing is drawn, do not allocate a
    /// surface buffer").
    fn repaint_output(&mut self, target: &mut Self::Target, views: &[&Surface]) -> Result<Option<Buffer>>;
}
