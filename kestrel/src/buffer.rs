//! Buffer identity, reference counting and the flipped/completed signals (§3).
//!
//! The C source tracks `ref_cnt`/`dirty` as plain fields on `struct cb_buffer`
//! and inc/decs them by hand at every call site (`drm_scanout.c`'s plane-state
//! construction/teardown). Per the redesign flags in §9 this becomes an
//! owned handle (`Buffer`, `Rc`-shared interior state) with explicit
//! `add_scanout_ref`/`release_scanout_ref` methods standing in for the manual
//! inc/dec — the accounting is still manual and explicit (it has to be: the
//! `dirty` bitmask carries per-output scheduling meaning that outlives plain
//! reference counting), but the call sites can no longer forget the matching
//! decrement because `release_scanout_ref` is the only way to give back a
//! [`ScanoutRef`] token.

use std::cell::{Cell, RefCell};
use std::os::fd::OwnedFd;
use std::rc::Rc;

use drm::control::framebuffer;

use crate::format::PixFmt;

pub const MAX_PLANES: usize = 4;
/// Bit-width of `Output::pipe_index` / `Buffer::dirty`; matches `MAX_OUTPUTS`
/// referenced throughout §3-§4.
pub const MAX_OUTPUTS: usize = 32;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BufferKind {
    Shm,
    Dma,
    /// Locked front-buffer of a GBM-like render surface (the renderer's own output).
    Surface,
}

/// `BufferInfo` (§3): the immutable description of the pixel-carrying resource.
#[derive(Debug)]
pub struct BufferInfo {
    pub pix_fmt: PixFmt,
    pub kind: BufferKind,
    pub width: u32,
    pub height: u32,
    pub strides: [u32; MAX_PLANES],
    pub offsets: [u32; MAX_PLANES],
    pub sizes: [u32; MAX_PLANES],
    pub fds: [Option<OwnedFd>; MAX_PLANES],
    pub planes: u32,
    pub shm_name: Option<String>,
    /// Set when this buffer is the result of renderer composition rather
    /// than a client-supplied allocation (the renderer's per-output FB).
    pub composed: bool,
}

impl BufferInfo {
    pub fn new_dmabuf(pix_fmt: PixFmt, width: u32, height: u32, planes: u32) -> Self {
        BufferInfo {
            pix_fmt,
            kind: BufferKind::Dma,
            width,
            height,
            strides: [0; MAX_PLANES],
            offsets: [0; MAX_PLANES],
            sizes: [0; MAX_PLANES],
            fds: Default::default(),
            planes,
            shm_name: None,
            composed: false,
        }
    }
}

/// Outcome of releasing a scanout reference, for callers that need to react
/// (send `bo_complete`, free the GEM handle, ...).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RefChange {
    /// Ref count is still above 1; nothing observable happened.
    StillReferenced,
    /// Ref count dropped to 1: only the owning handle remains. §3: "the
    /// `complete` signal fires (handed back to the client)".
    Completed,
    /// Ref count dropped to 0: the resource is released.
    Released,
}

struct Inner {
    info: BufferInfo,
    ref_cnt: Cell<i32>,
    dirty: Cell<u32>,
    /// The KMS framebuffer this buffer was imported/allocated as, filled in
    /// by `Scanout::import_dmabuf`/the renderer's composition path once it
    /// exists — a plain `Cell` standing in for `cb_buffer->fb_id`.
    fb: Cell<Option<framebuffer::Handle>>,
    completed_listeners: RefCell<Vec<Box<dyn FnOnce(&Buffer)>>>,
    flipped_listeners: RefCell<Vec<Box<dyn FnOnce(&Buffer)>>>,
}

/// An owned handle to a [`BufferInfo`]-backed resource with the ref-count and
/// dirty-bitmask semantics of §3.
#[derive(Clone)]
pub struct Buffer(Rc<Inner>);

impl Buffer {
    /// Creates a buffer with `ref_cnt = 1`, as every creation path in §3 does
    /// (import, shm attach, dumb alloc, cursor-bo alloc, surface lock-front).
    pub fn new(info: BufferInfo) -> Self {
        Buffer(Rc::new(Inner {
            info,
            ref_cnt: Cell::new(1),
            dirty: Cell::new(0),
            fb: Cell::new(None),
            completed_listeners: RefCell::new(Vec::new()),
            flipped_listeners: RefCell::new(Vec::new()),
        }))
    }

    pub fn info(&self) -> &BufferInfo {
        &self.0.info
    }

    pub fn fb_handle(&self) -> Option<framebuffer::Handle> {
        self.0.fb.get()
    }

    pub fn set_fb_handle(&self, fb: framebuffer::Handle) {
        self.0.fb.set(Some(fb));
    }

    pub fn ref_cnt(&self) -> i32 {
        self.0.ref_cnt.get()
    }

    /// Identity comparison — two `Buffer` handles refer to the same
    /// underlying resource iff they share the same `Rc` allocation.
    pub fn is_same_as(&self, other: &Buffer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Take a scanout reference: called when a plane-state is built that
    /// references this buffer (§3: "each scanout task that references the
    /// buffer `ref`s it").
    #[must_use]
    pub fn add_scanout_ref(&self) -> ScanoutRef {
        self.0.ref_cnt.set(self.0.ref_cnt.get() + 1);
        ScanoutRef { buffer: self.clone() }
    }

    fn release_internal(&self) -> RefChange {
        let new = self.0.ref_cnt.get() - 1;
        debug_assert!(new >= 0, "buffer ref count underflow");
        self.0.ref_cnt.set(new);
        match new {
            1 => {
                let listeners = self.0.completed_listeners.borrow_mut().drain(..).collect::<Vec<_>>();
                for cb in listeners {
                    cb(self);
                }
                RefChange::Completed
            }
            0 => RefChange::Released,
            _ => RefChange::StillReferenced,
        }
    }

    /// Per-output dirty bit (§3: "bit *i* = this buffer is currently
    /// committed to output *i*").
    pub fn set_dirty(&self, output_pipe: usize) {
        self.0.dirty.set(self.0.dirty.get() | (1 << output_pipe));
    }

    pub fn is_dirty(&self, output_pipe: usize) -> bool {
        self.0.dirty.get() & (1 << output_pipe) != 0
    }

    pub fn dirty_mask(&self) -> u32 {
        self.0.dirty.get()
    }

    /// Clears the dirty bit for `output_pipe`, returning whether it had been
    /// set. Called from the page-flip handler (§4.1): clearing the bit *is*
    /// the flipped notification.
    pub fn clear_dirty(&self, output_pipe: usize) -> bool {
        let mask = 1u32 << output_pipe;
        let was_set = self.0.dirty.get() & mask != 0;
        self.0.dirty.set(self.0.dirty.get() & !mask);
        was_set
    }

    /// Registers a one-shot callback fired the next time the ref count
    /// drops to 1 (`dma_buf_completed_cb`/surface `bo_complete` path).
    pub fn add_completed_notify<F: FnOnce(&Buffer) + 'static>(&self, f: F) {
        self.0.completed_listeners.borrow_mut().push(Box::new(f));
    }

    /// Registers a one-shot callback fired on the next page-flip in which
    /// this buffer's dirty bit for the relevant output was set
    /// (`dma_buf_flipped_cb`).
    pub fn add_flipped_notify<F: FnOnce(&Buffer) + 'static>(&self, f: F) {
        self.0.flipped_listeners.borrow_mut().push(Box::new(f));
    }

    /// Invoked by the page-flip handler once per flipped plane whose buffer
    /// had its dirty bit set for that output.
    pub fn fire_flipped(&self) {
        let listeners = self.0.flipped_listeners.borrow_mut().drain(..).collect::<Vec<_>>();
        for cb in listeners {
            cb(self);
        }
    }
}

/// A counted scanout reference. Dropping or explicitly releasing it unrefs
/// the buffer exactly once — this is the "owned handle" the redesign notes
/// call for in place of bare `buffer_unref(buf)` calls.
pub struct ScanoutRef {
    buffer: Buffer,
}

impl ScanoutRef {
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Release this reference, returning what happened to the underlying
    /// buffer's ref count. Equivalent to the C source's
    /// `buffer_unref()`/"completed atomic release" call site.
    pub fn release(self) -> RefChange {
        let change = self.buffer.release_internal();
        std::mem::forget(self); // ref already accounted for by release_internal
        change
    }
}

impl Drop for ScanoutRef {
    fn drop(&mut self) {
        self.buffer.release_internal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn dummy() -> Buffer {
        Buffer::new(BufferInfo::new_dmabuf(PixFmt::Xrgb8888, 640, 480, 1))
    }

    #[test]
    fn ref_count_closure_create_assign_commit_flip_complete() {
        // Property #1: for every create->assign->commit->flip->complete
        // sequence, the buffer's final ref_cnt equals the initial ref_cnt.
        let buf = dummy();
        assert_eq!(buf.ref_cnt(), 1);

        let r1 = buf.add_scanout_ref(); // assigned to a plane
        assert_eq!(buf.ref_cnt(), 2);

        // commit -> flip -> completed atomic release
        let change = r1.release();
        assert_eq!(change, RefChange::Completed);
        assert_eq!(buf.ref_cnt(), 1);
    }

    #[test]
    fn dirty_bit_cleared_on_flip_completion() {
        // Property #2: after a page-flip completes for output i, the dirty
        // bit i is cleared for every buffer that appeared in that state.
        let buf = dummy();
        buf.set_dirty(0);
        buf.set_dirty(1);
        assert!(buf.is_dirty(0) && buf.is_dirty(1));

        assert!(buf.clear_dirty(0));
        assert!(!buf.is_dirty(0));
        assert!(buf.is_dirty(1));
    }

    #[test]
    fn completed_listener_fires_exactly_when_ref_drops_to_one() {
        let buf = dummy();
        let fired = Rc::new(Cell::new(false));
        let fired2 = fired.clone();
        buf.add_completed_notify(move |_| fired2.set(true));

        let r1 = buf.add_scanout_ref();
        let r2 = buf.add_scanout_ref();
        assert!(!fired.get());

        r1.release();
        assert!(!fired.get(), "still one scanout ref outstanding");

        r2.release();
        assert!(fired.get());
        assert_eq!(buf.ref_cnt(), 1);
    }
}
