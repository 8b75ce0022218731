//! The `Compositor`: owns every output and view, and drives the commit
//! paths, the plane allocator, view ordering/input focus, hot-plug and the
//! unified repaint timer (§4.2-§4.7).
//!
//! Grounded throughout in `cube_compositor.c`'s `cb_compositor_commit_surface`
//! / `cb_compositor_commit_dma_buf` / `prepare_dma_buf_planes` /
//! `output_repaint_timer_handler` / `view_switch` / `head_changed_cb` — the
//! function-level shape of each method below matches one of those directly.

use std::time::Duration;

use drm_fourcc::DrmFourcc;

use crate::buffer::Buffer;
use crate::client_agent::CommitAck;
use crate::error::{KestrelError, Result};
use crate::format::PixFmt;
use crate::geometry::{Logical, Rect};
use crate::input::{self, CursorState, InputEvent};
use crate::mode::Mode;
use crate::output::Output;
use crate::plane::{Plane, PlaneKind};
use crate::renderer::{RenderTarget, Renderer};
use crate::scanout::{OutputCommit, OutputIntent, PendingState, PlaneState, Scanout};
use crate::surface::SurfaceHandle;
use crate::view::ViewStack;

/// The compositor-wide cursor "magic cursor" source rectangle is fixed at
/// its buffer size — there is only ever one on-screen cursor image (§4.2).
const CURSOR_ZPOS: i32 = -1;

/// One display pipeline's renderer-side native surface, paired by index with
/// `Compositor::outputs` (§2: "a renderer composites into a per-output
/// framebuffer").
pub struct Compositor<S: Scanout, R: Renderer> {
    pub scanout: S,
    pub renderer: R,
    pub outputs: Vec<Output>,
    pub render_targets: Vec<Option<R::Target>>,
    pub views: ViewStack,
    pub cursor: CursorState,
    pub cursor_screen: usize,
    pub cursor_hidden: bool,
    clock_type: rustix::time::ClockId,
}

impl<S: Scanout, R: Renderer> Compositor<S, R> {
    pub fn new(scanout: S, renderer: R) -> Self {
        let clock_type = scanout.get_clock_type();
        Compositor {
            scanout,
            renderer,
            outputs: Vec::new(),
            render_targets: Vec::new(),
            views: ViewStack::new(),
            cursor: CursorState::default(),
            cursor_screen: 0,
            cursor_hidden: false,
            clock_type,
        }
    }

    fn desktop_rects(&self) -> Vec<(usize, bool, Rect<Logical>)> {
        self.outputs
            .iter()
            .map(|o| (o.pipe_index, o.enabled, o.desktop_rc))
            .collect()
    }

    /// §4.3 step 4: the output a surface's flip bookkeeping is pinned to —
    /// the `pipe_locked` output if set, else the highest-`refresh_nsec`
    /// output the view's mask currently touches.
    fn pick_main_output(&self, mask: u32, pipe_locked: Option<usize>) -> Option<usize> {
        if let Some(locked) = pipe_locked {
            return Some(locked);
        }
        self.outputs
            .iter()
            .filter(|o| o.enabled && mask & (1 << o.pipe_index) != 0)
            .max_by_key(|o| o.refresh().as_nanos())
            .map(|o| o.pipe_index)
    }

    // ---------------------------------------------------------------
    // §4.4 view ordering and focus.
    // ---------------------------------------------------------------

    /// `cb_compositor_add_view`: float views go to the head; everything else
    /// is inserted before the first normal view. Fires focus-changed
    /// notifications on both the old and new top view when the insertion
    /// changes who is on top.
    pub fn add_view(&mut self, surface: SurfaceHandle) {
        let old_top = self.views.top_view().cloned();

        surface.borrow_mut().view.output_mask = 0;
        let rects = self.desktop_rects();
        surface.borrow_mut().view.recompute_output_mask(&rects);

        self.views.add_view(surface);

        let new_top = self.views.top_view().cloned();
        self.notify_focus_change(old_top, new_top);
    }

    /// `cb_compositor_rm_view`: unlink, re-derive the top view, and run the
    /// surface through whichever commit path removes its buffer-bound
    /// resources (a view is always removed by committing a null buffer).
    pub fn remove_view(&mut self, surface: &SurfaceHandle) {
        let was_top = self
            .views
            .top_view()
            .map(|s| std::rc::Rc::ptr_eq(s, surface))
            .unwrap_or(false);

        self.views.remove(surface);
        surface.borrow_mut().buffer_pending = None;

        if was_top {
            let new_top = self.views.top_view().cloned();
            self.notify_focus_change(Some(surface.clone()), new_top);
        }

        let use_renderer = surface.borrow().use_renderer;
        if use_renderer {
            let _ = self.commit_surface(surface);
        } else {
            let _ = self.commit_dmabuf(surface);
        }
    }

    fn notify_focus_change(&self, old_top: Option<SurfaceHandle>, new_top: Option<SurfaceHandle>) {
        let changed = match (&old_top, &new_top) {
            (Some(a), Some(b)) => !std::rc::Rc::ptr_eq(a, b),
            (None, None) => false,
            _ => true,
        };
        if !changed {
            return;
        }
        if let Some(new) = &new_top {
            let mut s = new.borrow_mut();
            let view = &s.view;
            if let Some(client) = s_client(&mut s) {
                client.send_view_focus_changed(view, true);
            }
        }
        if let Some(old) = &old_top {
            if old_top.as_ref().map(std::rc::Rc::as_ptr) != new_top.as_ref().map(std::rc::Rc::as_ptr) {
                let mut s = old.borrow_mut();
                let view = &s.view;
                if let Some(client) = s_client(&mut s) {
                    client.send_view_focus_changed(view, false);
                }
            }
        }
    }

    /// §4.4 `view_switch`: promote whichever view lies under `(x, y)` to the
    /// top of the stack and fire the focus-changed pair.
    pub fn promote_view_at(&mut self, x: i32, y: i32) {
        let old_top = self.views.top_view().cloned();
        if let Some(promoted) = self.views.promote_containing(x, y) {
            self.notify_focus_change(old_top, Some(promoted));
            self.request_repaint_all();
        }
    }

    // ---------------------------------------------------------------
    // §4.3 commit paths.
    // ---------------------------------------------------------------

    /// `cb_compositor_commit_surface`: the renderer path. Attaches/flushes
    /// the pending buffer into the renderer's texture state and schedules a
    /// repaint on every output the view's mask diff touches.
    pub fn commit_surface(&mut self, surface: &SurfaceHandle) -> Result<()> {
        let mut s = surface.borrow_mut();
        s.view.direct_show = false;
        let old_mask = s.view.output_mask;

        let Some(buffer) = s.buffer_pending.take() else {
            drop(s);
            self.views.remove(surface);
            self.request_repaint_all();
            return Ok(());
        };

        let rects = self.desktop_rects();
        let diff = old_mask ^ s.view.recompute_output_mask(&rects);

        s.width = buffer.info().width;
        s.height = buffer.info().height;

        let buffer_changed = !matches!(&s.buffer_cur, Some(cur) if cur.is_same_as(&buffer));
        if buffer_changed {
            self.renderer.attach_buffer(&mut s, &buffer)?;
        }
        if buffer.info().kind == crate::buffer::BufferKind::Shm {
            self.renderer.flush_damage(&mut s)?;
        }
        s.buffer_cur = Some(buffer.clone());
        s.main_output = self.pick_main_output(s.view.output_mask, s.view.pipe_locked);

        if let Some(client) = s_client(&mut s) {
            client.send_bo_complete(&buffer);
            client.send_commit_ack(CommitAck::Ok(buffer.ref_cnt() as u64));
        }

        let mask = s.view.output_mask;
        drop(s);
        self.raise_renderable_changed(mask, diff);
        self.request_repaint_all();
        Ok(())
    }

    /// `cb_compositor_commit_dma_buf`: the direct-scanout path. Runs the
    /// plane allocator, marks the buffer dirty for every output it lands on,
    /// and schedules those outputs' repaints. Returns
    /// [`KestrelError::PlaneExhausted`] if the view's area does not land on
    /// any enabled output (`-ENOENT` on the wire).
    pub fn commit_dmabuf(&mut self, surface: &SurfaceHandle) -> Result<()> {
        let mut s = surface.borrow_mut();
        s.view.direct_show = true;
        let old_mask = s.view.output_mask;

        let Some(buffer) = s.buffer_pending.take() else {
            drop(s);
            self.release_view_planes(surface);
            self.views.remove(surface);
            self.request_repaint_all();
            return Ok(());
        };

        s.width = buffer.info().width;
        s.height = buffer.info().height;
        let pipe_locked = s.view.pipe_locked;

        let rects = self.desktop_rects();
        let diff = old_mask ^ s.view.recompute_output_mask(&rects);
        drop(s);

        self.allocate_view_planes(surface, &buffer)?;

        let mut touched_any = false;
        for pipe in 0..self.outputs.len() {
            if !self.outputs[pipe].enabled {
                continue;
            }
            if let Some(locked) = pipe_locked {
                if locked != pipe {
                    continue;
                }
            }
            let landed = surface.borrow().view.plane_on(pipe).is_some();
            if landed {
                buffer.set_dirty(pipe);
                touched_any = true;
            } else if (1 << pipe) & diff == 0 {
                continue;
            }
            self.outputs[pipe].request_repaint();
        }

        if !touched_any {
            let mut s = surface.borrow_mut();
            s.buffer_pending = None;
            s.buffer_cur = None;
            return Err(KestrelError::PlaneExhausted);
        }

        let mut s = surface.borrow_mut();
        s.main_output = self.pick_main_output(s.view.output_mask, pipe_locked);
        let superseded = s.buffer_last.take();
        s.buffer_cur = Some(buffer.clone());
        s.buffer_last = Some(buffer.clone());

        // §4.3 step 5: register the buffer's one-shot flipped/completed
        // notifications, routed back to the client through a weak handle so
        // a surface torn down before either fires just drops the callback.
        let weak = std::rc::Rc::downgrade(surface);
        let weak_flip = weak.clone();
        buffer.add_flipped_notify(move |buf| {
            if let Some(surface) = weak_flip.upgrade() {
                let mut s = surface.borrow_mut();
                if let Some(client) = s_client(&mut s) {
                    client.send_bo_flipped(buf);
                }
            }
        });
        buffer.add_completed_notify(move |buf| {
            if let Some(surface) = weak.upgrade() {
                let mut s = surface.borrow_mut();
                if s.buffer_last.as_ref().is_some_and(|last| last.is_same_as(buf)) {
                    s.buffer_last = None;
                }
                if let Some(client) = s_client(&mut s) {
                    client.send_bo_complete(buf);
                }
            }
        });

        // §4.3 step 6, replace-pending protocol: the previous `buffer_last`
        // was never flipped, so tell the client it was superseded.
        if let Some(old) = superseded {
            if let Some(client) = s_client(&mut s) {
                client.send_bo_complete(&old);
                client.send_commit_ack(CommitAck::Replace);
            }
        }
        if let Some(client) = s_client(&mut s) {
            client.send_commit_ack(CommitAck::Ok(buffer.ref_cnt() as u64));
        }
        drop(s);

        self.request_repaint_all();
        Ok(())
    }

    /// §4.5 plane allocator, `prepare_dma_buf_planes`: release any plane the
    /// view no longer needs, then find (or commandeer the primary for) a
    /// plane on every output the view's mask now touches.
    fn allocate_view_planes(&mut self, surface: &SurfaceHandle, buffer: &Buffer) -> Result<()> {
        let mask = surface.borrow().view.output_mask;
        let pipe_locked = surface.borrow().view.pipe_locked;
        let fmt = buffer
            .info()
            .pix_fmt;

        let mut touched_any_output = false;
        let mut any_success = false;

        for pipe in 0..self.outputs.len() {
            if !self.outputs[pipe].enabled {
                continue;
            }
            if let Some(locked) = pipe_locked {
                if locked != pipe {
                    continue;
                }
            }

            let touches = mask & (1 << pipe) != 0;
            let existing = surface.borrow().view.plane_on(pipe).cloned();

            if !touches {
                if let Some(plane) = existing {
                    self.release_plane(pipe, plane);
                    surface.borrow_mut().view.set_plane_on(pipe, None);
                }
                continue;
            }

            touched_any_output = true;

            if let Some(plane) = existing {
                self.release_plane(pipe, plane);
                surface.borrow_mut().view.set_plane_on(pipe, None);
            }

            // Attempt this output independently of every other — a view
            // spanning several outputs may land planes on some and not
            // others (e.g. another view already commandeered the primary
            // there); only the caller's all-failed case is an error.
            let found = self.outputs[pipe].planes.free.find_and_take(fmt, None);
            let plane = found.or_else(|| {
                if self.outputs[pipe].planes.primary.supports_format(fmt) && !self.outputs[pipe].primary_renderer_disabled {
                    self.outputs[pipe].disable_primary_renderer();
                    Some(self.outputs[pipe].planes.primary.clone())
                } else {
                    None
                }
            });

            match plane {
                Some(plane) => {
                    surface.borrow_mut().view.set_plane_on(pipe, Some(plane));
                    any_success = true;
                }
                None => surface.borrow_mut().view.set_plane_on(pipe, None),
            }
        }

        if touched_any_output && !any_success {
            return Err(KestrelError::PlaneExhausted);
        }
        Ok(())
    }

    fn release_plane(&mut self, pipe: usize, plane: Plane) {
        if plane.kind == PlaneKind::Primary {
            self.outputs[pipe].enable_primary_renderer();
        } else {
            self.outputs[pipe].planes.free.put(plane);
        }
    }

    /// Give back every plane a view (about to be removed) holds, across all
    /// outputs (`cb_compositor_commit_dma_buf`'s null-buffer branch).
    fn release_view_planes(&mut self, surface: &SurfaceHandle) {
        for pipe in 0..self.outputs.len() {
            let plane = surface.borrow().view.plane_on(pipe).cloned();
            if let Some(plane) = plane {
                self.release_plane(pipe, plane);
                surface.borrow_mut().view.set_plane_on(pipe, None);
            }
        }
    }

    /// `set_renderable_buffer_changed`: raise the renderer-repaint flag on
    /// every enabled output this view's mask touches, or just stopped
    /// touching (`mask_diff`).
    fn raise_renderable_changed(&mut self, mask: u32, mask_diff: u32) {
        for output in &mut self.outputs {
            if !output.enabled {
                continue;
            }
            let touches = mask & (1 << output.pipe_index) != 0;
            if touches || (mask_diff & (1 << output.pipe_index) != 0) {
                output.renderable_buffer_changed = true;
            }
        }
    }

    fn request_repaint_all(&mut self) {
        for output in &mut self.outputs {
            output.request_repaint();
        }
    }

    // ---------------------------------------------------------------
    // §4.2 unified repaint timer.
    // ---------------------------------------------------------------

    pub fn now(&self) -> Duration {
        let ts = rustix::time::clock_gettime(self.clock_type);
        Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
    }

    /// `update_repaint_timer`: the minimum `next_repaint` across every
    /// `Scheduled` output, clamped to at least 1ms out — the caller re-arms
    /// its `calloop::timer::Timer` to this value. `None` means no output
    /// currently needs a repaint.
    pub fn next_deadline(&mut self, now: Duration) -> Option<Duration> {
        let mut deadline: Option<Duration> = None;
        for output in &mut self.outputs {
            if output.repaint_status != crate::output::RepaintStatus::Scheduled {
                continue;
            }
            if !output.enabled || !output.connected {
                output.repaint_status = crate::output::RepaintStatus::NotScheduled;
                continue;
            }
            deadline = Some(match deadline {
                Some(d) => d.min(output.next_repaint),
                None => output.next_repaint,
            });
        }
        deadline.map(|d| d.max(now + Duration::from_millis(1)))
    }

    /// `output_repaint_timer_handler`: for every output whose deadline has
    /// elapsed, build this tick's scanout tasks (direct-show planes, the
    /// renderer's composed primary-plane buffer, the cursor, or a dummy
    /// buffer if the output would otherwise have nothing to show) and
    /// submit them as one atomic commit.
    pub fn run_repaint_timer(&mut self, now: Duration) -> Result<()> {
        let mut pending = PendingState::new();

        for pipe in 0..self.outputs.len() {
            if !self.outputs[pipe].is_due(now, Duration::from_millis(1)) {
                continue;
            }

            let mut plane_states = Vec::new();
            self.collect_dmabuf_tasks(pipe, &mut plane_states);
            self.collect_renderer_task(pipe, &mut plane_states)?;
            self.collect_cursor_task(pipe, &mut plane_states);

            if plane_states.is_empty() {
                self.collect_dummy_task(pipe, &mut plane_states);
            }

            let output = &mut self.outputs[pipe];
            pending.outputs.push(OutputCommit {
                crtc: output.crtc_id,
                connector: output.connector_id,
                intent: OutputIntent::SteadyState,
                planes_to_disable: Vec::new(),
                plane_states,
            });
            output.mark_submitted();
        }

        if pending.outputs.is_empty() {
            return Ok(());
        }

        self.scanout.do_scanout(pending)
    }

    /// `do_dma_buf_repaint`: every direct-show view touching this output
    /// contributes (or, if it no longer touches it, clears) its plane task.
    fn collect_dmabuf_tasks(&mut self, pipe: usize, out: &mut Vec<PlaneState>) {
        for surface in self.views.iter() {
            let s = surface.borrow();
            if !s.view.direct_show {
                continue;
            }
            let Some(plane) = s.view.plane_on(pipe) else { continue };
            let touches = s.view.touches_output(pipe);
            let Some(buffer) = (if touches { s.buffer_cur.clone() } else { None }) else {
                continue;
            };
            let placement = s.view.placements[pipe];
            out.push(PlaneState {
                plane: drm::control::plane::Handle::from(plane.id),
                fb: drm::control::framebuffer::Handle::from(0u32),
                buffer_ref: buffer.add_scanout_ref(),
                src_x: placement.src.x() as f64,
                src_y: placement.src.y() as f64,
                src_w: placement.src.w() as f64,
                src_h: placement.src.h() as f64,
                crtc_x: placement.dst.x(),
                crtc_y: placement.dst.y(),
                crtc_w: placement.dst.w() as u32,
                crtc_h: placement.dst.h() as u32,
                zpos: s.view.zpos,
                alpha: s.view.alpha,
            });
        }
    }

    /// `do_renderer_repaint`: composite every non-direct-show view touching
    /// this output into its render target, then add the resulting buffer to
    /// the primary plane's task (skipped while the primary has been
    /// commandeered for direct scanout, §4.5).
    fn collect_renderer_task(&mut self, pipe: usize, out: &mut Vec<PlaneState>) -> Result<()> {
        if self.outputs[pipe].primary_renderer_disabled {
            return Ok(());
        }
        if !self.outputs[pipe].renderable_buffer_changed {
            if let Some(buffer) = self.outputs[pipe].render_buffer_cur.clone() {
                out.push(self.primary_plane_state(pipe, buffer));
            }
            return Ok(());
        }

        let views: Vec<_> = self
            .views
            .iter()
            .filter(|s| !s.borrow().view.direct_show)
            .cloned()
            .collect();

        let target = match self.render_targets.get_mut(pipe).and_then(Option::as_mut) {
            Some(t) => t,
            None => {
                self.outputs[pipe].renderable_buffer_changed = false;
                return Ok(());
            }
        };

        let borrowed: Vec<_> = views.iter().map(|s| s.borrow()).collect();
        let refs: Vec<&crate::surface::Surface> = borrowed.iter().map(|b| &**b).collect();
        let painted = self.renderer.repaint_output(target, &refs)?;
        drop(borrowed);

        self.outputs[pipe].render_buffer_cur = painted.clone();
        self.outputs[pipe].renderable_buffer_changed = false;
        for s in &views {
            if !s.borrow().view.direct_show {
                s.borrow_mut().view.painted = true;
            }
        }

        if let Some(buffer) = painted {
            out.push(self.primary_plane_state(pipe, buffer));
        }
        Ok(())
    }

    fn primary_plane_state(&self, pipe: usize, buffer: Buffer) -> PlaneState {
        let output = &self.outputs[pipe];
        let w = output.crtc_view_port.w() as f64;
        let h = output.crtc_view_port.h() as f64;
        let buffer_ref = buffer.add_scanout_ref();
        PlaneState {
            plane: drm::control::plane::Handle::from(output.planes.primary.id),
            fb: drm::control::framebuffer::Handle::from(0u32),
            buffer_ref,
            src_x: 0.0,
            src_y: 0.0,
            src_w: w,
            src_h: h,
            crtc_x: output.crtc_view_port.x(),
            crtc_y: output.crtc_view_port.y(),
            crtc_w: output.crtc_view_port.w() as u32,
            crtc_h: output.crtc_view_port.h() as u32,
            zpos: -1,
            alpha: 1.0,
        }
    }

    /// The magic-cursor plane task, ping-ponging the cursor buffer on
    /// damage (§4.2 step 3).
    fn collect_cursor_task(&mut self, pipe: usize, out: &mut Vec<PlaneState>) {
        if self.cursor_hidden || !self.outputs[pipe].mc_on_screen {
            return;
        }
        self.outputs[pipe].cursor_buffers.swap_if_damaged();
        let Some(buffer) = self.outputs[pipe].cursor_buffers.current().cloned() else {
            return;
        };
        let Some(plane) = &self.outputs[pipe].planes.cursor else { return };
        let view_port = self.outputs[pipe].mc_view_port;
        out.push(PlaneState {
            plane: drm::control::plane::Handle::from(plane.id),
            fb: drm::control::framebuffer::Handle::from(0u32),
            buffer_ref: buffer.add_scanout_ref(),
            src_x: 0.0,
            src_y: 0.0,
            src_w: input::CURSOR_MAX_WIDTH as f64,
            src_h: input::CURSOR_MAX_HEIGHT as f64,
            crtc_x: view_port.x(),
            crtc_y: view_port.y(),
            crtc_w: view_port.w() as u32,
            crtc_h: view_port.h() as u32,
            zpos: CURSOR_ZPOS,
            alpha: 1.0,
        });
    }

    /// §4.2: an output with nothing else to show still needs a commit, so
    /// the primary plane is given the dummy buffer rather than left stale.
    fn collect_dummy_task(&mut self, pipe: usize, out: &mut Vec<PlaneState>) {
        let Some(buffer) = self.outputs[pipe].dummy_buffer.clone() else { return };
        out.push(self.primary_plane_state(pipe, buffer));
    }

    // ---------------------------------------------------------------
    // §4.1 page-flip completion.
    // ---------------------------------------------------------------

    /// Invoked once per output from the page-flip handler: clears dirty
    /// bits, fires `flipped`/`completed` buffer notifications, latches any
    /// pending primary-renderer disable/enable, and reschedules the next
    /// repaint relative to this flip.
    pub fn on_page_flip(&mut self, pipe: usize, flip_time: Duration) {
        let refresh = self.outputs[pipe].refresh();
        self.outputs[pipe].latch_primary_renderer_pending();
        let renderable_changed = self.outputs[pipe].renderable_buffer_changed;
        self.outputs[pipe].on_page_flip(renderable_changed);
        self.outputs[pipe].schedule_repaint(Some(flip_time), refresh, self.now());
        self.outputs[pipe].flipped.emit(&());

        for surface in self.views.iter() {
            let direct_show = surface.borrow().view.direct_show;
            let was_dirty = direct_show && surface.borrow().buffer_cur.as_ref().is_some_and(|b| b.is_dirty(pipe));
            let painted = surface.borrow().view.painted;

            if !was_dirty && !painted {
                continue;
            }

            let mut s = surface.borrow_mut();
            let buffer = s.buffer_cur.clone();
            if was_dirty {
                if let Some(buffer) = &buffer {
                    buffer.clear_dirty(pipe);
                }
            }
            if painted {
                s.view.painted = false;
            }
            drop(s);

            if was_dirty {
                // The buffer's own flipped listener, registered in
                // `commit_dmabuf`, is what sends `bo_flipped` to the client.
                if let Some(buffer) = &buffer {
                    buffer.fire_flipped();
                }
            } else if painted {
                let mut s = surface.borrow_mut();
                if let (Some(buffer), Some(client)) = (&buffer, s_client(&mut s)) {
                    client.send_bo_flipped(buffer);
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // §4.7 input dispatch.
    // ---------------------------------------------------------------

    pub fn handle_input(&mut self, event: InputEvent) {
        match event {
            InputEvent::PointerMotion { dx, dy } => {
                let rects: Vec<_> = self
                    .outputs
                    .iter()
                    .filter(|o| o.enabled)
                    .map(|o| (o.pipe_index, o.desktop_rc))
                    .collect();
                input::normalize_motion(&rects, &mut self.cursor, self.cursor_screen, dx, dy);
                if let Some(pipe) = input::locate_output(&rects, self.cursor.desktop_pos.x, self.cursor.desktop_pos.y) {
                    self.cursor_screen = pipe;
                }
                self.update_cursor_viewports();
            }
            InputEvent::PointerButton { pressed } => {
                if pressed {
                    self.promote_view_at(self.cursor.desktop_pos.x, self.cursor.desktop_pos.y);
                }
            }
            InputEvent::TouchDown { x, y } => {
                self.promote_view_at(x, y);
            }
            InputEvent::TouchUp => {}
        }
    }

    /// `update_mc_view_port`: recompute which output (if any) the cursor is
    /// currently drawn on and mark it damaged for the next repaint.
    fn update_cursor_viewports(&mut self) {
        for output in &mut self.outputs {
            if !output.enabled {
                output.mc_on_screen = false;
                continue;
            }
            let on_screen = input::is_on_screen(output.desktop_rc, self.cursor);
            if on_screen != output.mc_on_screen {
                output.cursor_buffers.damaged = true;
            }
            output.mc_on_screen = on_screen;
            if on_screen {
                output.request_repaint();
            }
        }
    }

    // ---------------------------------------------------------------
    // §4.6 hot-plug / modeset / suspend-resume.
    // ---------------------------------------------------------------

    /// `head_changed_cb`, connected branch (§4.1 step 3): pick a mode — the
    /// connector's preferred/first timing if none is pending already — and
    /// submit a modeset commit (`ACTIVE=1, MODE_ID=blob`). On success, enable
    /// the pipeline and show the dummy buffer until the renderer's first
    /// frame lands. `modes` replaces the output's known mode list whenever
    /// the caller has a fresh one (e.g. just re-read EDID); pass an empty
    /// `Vec` to keep whatever was already known.
    pub fn handle_connect(&mut self, pipe: usize, modes: Vec<Mode>) -> Result<()> {
        if !modes.is_empty() {
            self.outputs[pipe].modes = modes;
        }

        let mode = self.outputs[pipe]
            .pending_mode
            .take()
            .or_else(|| self.outputs[pipe].modes.iter().find(|m| m.preferred).cloned())
            .or_else(|| self.outputs[pipe].modes.first().cloned());

        let Some(mode) = mode else {
            // No known timings yet (EDID still pending); mark connected and
            // wait for a rescan that supplies one.
            self.outputs[pipe].connected = true;
            return Ok(());
        };

        let blob = self.scanout.create_mode_blob(&mode)?;
        let output = &self.outputs[pipe];
        let commit = OutputCommit {
            crtc: output.crtc_id,
            connector: output.connector_id,
            intent: OutputIntent::Modeset { blob },
            planes_to_disable: Vec::new(),
            plane_states: Vec::new(),
        };
        self.scanout.do_scanout(PendingState { outputs: vec![commit] })?;

        let output = &mut self.outputs[pipe];
        output.current_mode = Some(mode);
        output.connected = true;
        output.enabled = true;
        output.renderable_buffer_changed = true;
        output.request_repaint();
        Ok(())
    }

    /// `head_changed_cb`, disconnected branch (§4.1 step 2): attempt to
    /// disable the CRTC (`ACTIVE=0, MODE_ID=0`, connector `CRTC_ID=0`).
    /// Returns `Err` when the commit failed (driver busy) so the caller can
    /// retry it on the §4.1 1.5ms timer; only tears down scanout state and
    /// stops scheduling repaints once the disable actually lands.
    pub fn handle_disconnect(&mut self, pipe: usize) -> Result<()> {
        let output = &self.outputs[pipe];
        let mut planes_to_disable: Vec<drm::control::plane::Handle> =
            output.planes.free.iter().map(|p| drm::control::plane::Handle::from(p.id)).collect();
        planes_to_disable.push(drm::control::plane::Handle::from(output.planes.primary.id));
        if let Some(cursor) = &output.planes.cursor {
            planes_to_disable.push(drm::control::plane::Handle::from(cursor.id));
        }

        let commit = OutputCommit {
            crtc: output.crtc_id,
            connector: output.connector_id,
            intent: OutputIntent::Disable,
            planes_to_disable,
            plane_states: Vec::new(),
        };
        self.scanout.do_scanout(PendingState { outputs: vec![commit] })?;

        for surface in self.views.iter() {
            if let Some(buffer) = surface.borrow().buffer_cur.clone() {
                buffer.clear_dirty(pipe);
            }
        }

        let output = &mut self.outputs[pipe];
        output.connected = false;
        output.enabled = false;
        output.repaint_status = crate::output::RepaintStatus::NotScheduled;
        Ok(())
    }

    /// §4.6 suspend: every output is disabled and its repaint state reset,
    /// without forgetting plane/mode bookkeeping (a resume should not need
    /// to re-discover planes).
    pub fn suspend(&mut self) {
        for output in &mut self.outputs {
            output.enabled = false;
            output.repaint_status = crate::output::RepaintStatus::NotScheduled;
        }
    }

    /// §4.6 resume: re-enable every still-connected output and force a full
    /// repaint, since buffers may have been released while suspended.
    pub fn resume(&mut self) {
        for output in &mut self.outputs {
            if output.connected {
                output.enabled = true;
                output.renderable_buffer_changed = true;
                output.request_repaint();
            }
        }
    }
}

fn s_client(surface: &mut crate::surface::Surface) -> Option<&mut dyn crate::client_agent::ClientAgent> {
    surface.client.as_deref_mut()
}

#[allow(unused)]
fn format_supported(fmt: PixFmt) -> Option<DrmFourcc> {
    Some(fmt.to_fourcc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferInfo, BufferKind};
    use crate::format::PixFmt;
    use crate::geometry::Rect;
    use crate::output::{CursorBuffers, OutputPlanes};
    use crate::plane::FreePlaneList;
    use crate::surface::Surface;
    use crate::view::View;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct NullTarget;
    impl RenderTarget for NullTarget {
        fn size(&self) -> (u32, u32) {
            (1920, 1080)
        }
    }

    struct NullRenderer;
    impl Renderer for NullRenderer {
        type Target = NullTarget;
        fn attach_buffer(&mut self, _surface: &mut crate::surface::Surface, _buffer: &Buffer) -> Result<()> {
            Ok(())
        }
        fn flush_damage(&mut self, _surface: &mut crate::surface::Surface) -> Result<()> {
            Ok(())
        }
        fn repaint_output(&mut self, _target: &mut NullTarget, _views: &[&crate::surface::Surface]) -> Result<Option<Buffer>> {
            Ok(None)
        }
    }

    struct NullScanout;
    impl Scanout for NullScanout {
        fn do_scanout(&mut self, _pending: PendingState) -> Result<()> {
            Ok(())
        }
        fn import_dmabuf(&mut self, info: BufferInfo) -> Result<Buffer> {
            Ok(Buffer::new(info))
        }
        fn release_dmabuf(&mut self, _buffer: &Buffer) {}
        fn create_mode_blob(&mut self, _mode: &Mode) -> Result<drm::control::property::Value<'static>> {
            Ok(drm::control::property::Value::Unknown(0))
        }
        fn get_clock_type(&self) -> rustix::time::ClockId {
            rustix::time::ClockId::Monotonic
        }
    }

    fn test_output(pipe: usize, rc: Rect<Logical>) -> Output {
        let mut o = Output::new(
            pipe,
            drm::control::crtc::Handle::from(pipe as u32 + 1),
            drm::control::connector::Handle::from(pipe as u32 + 1),
            OutputPlanes {
                primary: Plane {
                    id: 100 + pipe as u32,
                    kind: PlaneKind::Primary,
                    formats: vec![DrmFourcc::Xrgb8888],
                    zpos: 0,
                    scale_support: true,
                    alpha_support: true,
                },
                cursor: None,
                free: FreePlaneList::new(),
            },
        );
        o.desktop_rc = rc;
        o.crtc_view_port = Rect::from_xywh(0, 0, rc.w(), rc.h());
        o.enabled = true;
        o.connected = true;
        o.cursor_buffers = CursorBuffers::default();
        o
    }

    fn new_compositor() -> Compositor<NullScanout, NullRenderer> {
        let mut c = Compositor::new(NullScanout, NullRenderer);
        c.outputs.push(test_output(0, Rect::from_xywh(0, 0, 1920, 1080)));
        c.render_targets.push(None);
        c
    }

    fn surface_with_view(x: i32, y: i32, w: i32, h: i32, use_renderer: bool) -> SurfaceHandle {
        let view = View::new(Rect::from_xywh(x, y, w, h), 0);
        Rc::new(RefCell::new(Surface::new(view, use_renderer)))
    }

    #[test]
    fn adding_a_view_schedules_a_repaint_on_intersecting_outputs() {
        let mut c = new_compositor();
        let surface = surface_with_view(0, 0, 200, 200, true);
        c.add_view(surface);
        assert_eq!(c.views.len(), 1);
    }

    #[test]
    fn committing_a_renderer_surface_clears_buffer_pending() {
        let mut c = new_compositor();
        let surface = surface_with_view(0, 0, 200, 200, true);
        c.add_view(surface.clone());
        surface.borrow_mut().buffer_pending = Some(Buffer::new(BufferInfo::new_dmabuf(PixFmt::Xrgb8888, 200, 200, 1)));
        c.commit_surface(&surface).unwrap();
        assert!(surface.borrow().buffer_pending.is_none());
        assert!(surface.borrow().buffer_cur.is_some());
    }

    #[test]
    fn commit_dmabuf_outside_every_output_is_plane_exhausted() {
        let mut c = new_compositor();
        let surface = surface_with_view(5000, 5000, 100, 100, false);
        c.add_view(surface.clone());
        surface.borrow_mut().buffer_pending = Some(Buffer::new(BufferInfo::new_dmabuf(PixFmt::Xrgb8888, 100, 100, 1)));
        let err = c.commit_dmabuf(&surface).unwrap_err();
        assert!(matches!(err, KestrelError::PlaneExhausted));
    }

    #[test]
    fn promoting_a_view_reorders_the_stack() {
        let mut c = new_compositor();
        let back = surface_with_view(0, 0, 1920, 1080, true);
        let front = surface_with_view(0, 0, 100, 100, true);
        c.add_view(back.clone());
        c.add_view(front.clone());
        assert!(std::rc::Rc::ptr_eq(c.views.top_view().unwrap(), &front));
        c.promote_view_at(500, 500);
        assert!(std::rc::Rc::ptr_eq(c.views.top_view().unwrap(), &back));
    }

    #[test]
    fn kind_eq_matches_buffer_kind() {
        assert_eq!(BufferKind::Shm, BufferKind::Shm);
    }
}
