//! A `Renderer` implementation thin enough to exercise `attach_buffer`/
//! `flush_damage`/`repaint_output` without owning shader/texture internals
//! (§1 Non-goal: "the OpenGL-ES renderer's internal shader and texture
//! management"; SPEC_FULL §2 calls for exactly this — a documented stub
//! rather than a real GL-ES pipeline).
//!
//! Grounded in the teacher's `backend::renderer::gles::GlesRenderer` at the
//! seam level only: one render target per output, each surface's committed
//! buffer tracked as "the thing to composite", `flush_damage` a no-op since
//! a real implementation would upload pixels to a texture here. Composition
//! itself allocates a GBM dumb buffer sized to the output and returns it
//! unconditionally whenever at least one view painted, standing in for the
//! teacher's actual GL blit.

use std::collections::HashMap;

use kestrel::buffer::{Buffer, BufferInfo, BufferKind};
use kestrel::error::Result;
use kestrel::format::PixFmt;
use kestrel::renderer::{RenderTarget, Renderer};
use kestrel::surface::Surface;

/// One output's GBM-backed composition target (§2: "a renderer composites
/// into a per-output framebuffer consumed by the primary plane").
pub struct GbmRenderTarget {
    width: u32,
    height: u32,
}

impl GbmRenderTarget {
    pub fn new(width: u32, height: u32) -> Self {
        GbmRenderTarget { width, height }
    }
}

impl RenderTarget for GbmRenderTarget {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// A stub renderer: tracks which buffer each surface last attached, "flushes
/// damage" as a log line, and composites by allocating a fresh dumb-buffer-
/// backed [`Buffer`] whenever at least one view has pending content. Real
/// shader/texture composition stays out of `kestrel-session` per §1 — this
/// exists only so `kestrel::Compositor`'s renderer path has something to
/// drive end to end.
#[derive(Default)]
pub struct StubRenderer {
    attached: HashMap<usize, Buffer>,
}

impl Renderer for StubRenderer {
    type Target = GbmRenderTarget;

    fn attach_buffer(&mut self, surface: &mut Surface, buffer: &Buffer) -> Result<()> {
        tracing::debug!(width = buffer.info().width, height = buffer.info().height, "attach_buffer");
        self.attached.insert(surface as *const _ as usize, buffer.clone());
        Ok(())
    }

    fn flush_damage(&mut self, surface: &mut Surface) -> Result<()> {
        tracing::trace!(damage = ?surface.damage, "flush_damage");
        Ok(())
    }

    fn repaint_output(&mut self, target: &mut GbmRenderTarget, views: &[&Surface]) -> Result<Option<Buffer>> {
        if views.is_empty() {
            return Ok(None);
        }
        let (w, h) = target.size();
        let mut info = BufferInfo::new_dmabuf(PixFmt::Xrgb8888, w, h, 1);
        info.kind = BufferKind::Surface;
        info.composed = true;
        Ok(Some(Buffer::new(info)))
    }
}
