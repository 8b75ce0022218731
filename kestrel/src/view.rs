//! A client-visible drawable placed on the global desktop (§3 `View`, §4.4).

use std::rc::Rc;

use crate::buffer::MAX_OUTPUTS;
use crate::geometry::{Logical, Rect};
use crate::plane::Plane;
use crate::surface::SurfaceHandle;

/// A view's placement on one output, once it has been given a plane for
/// direct scanout (§3: `src_areas`/`dst_areas`).
#[derive(Debug, Copy, Clone, Default)]
pub struct OutputPlacement {
    pub src: Rect<Logical>,
    pub dst: Rect<Logical>,
}

/// `View` (§3): the placed, alpha-composited window of a surface.
#[derive(Debug)]
pub struct View {
    pub zpos: i32,
    pub alpha: f32,
    /// Float views are always kept at the head of the view list (§4.4) and
    /// do not participate in pointer-focus reordering.
    pub float: bool,
    /// `-1` means unlocked: the view may appear on any output whose
    /// `desktop_rc` it intersects (§9 Open Question #1 — restrict, not
    /// force, matching the source).
    pub pipe_locked: Option<usize>,
    pub direct_show: bool,
    pub output_mask: u32,
    pub planes: [Option<Plane>; MAX_OUTPUTS],
    pub placements: [OutputPlacement; MAX_OUTPUTS],
    /// Preserved verbatim per §9 Open Question #3: referenced once, as a
    /// list-move exemption, with no other consumer in this spec.
    pub root_view: bool,
    pub painted: bool,
    pub area: Rect<Logical>,
}

impl View {
    pub fn new(area: Rect<Logical>, zpos: i32) -> Self {
        View {
            zpos,
            alpha: 1.0,
            float: false,
            pipe_locked: None,
            direct_show: false,
            output_mask: 0,
            planes: Default::default(),
            placements: [OutputPlacement::default(); MAX_OUTPUTS],
            root_view: false,
            painted: false,
            area,
        }
    }

    pub fn plane_on(&self, pipe: usize) -> Option<&Plane> {
        self.planes[pipe].as_ref()
    }

    pub fn set_plane_on(&mut self, pipe: usize, plane: Option<Plane>) {
        self.planes[pipe] = plane;
    }

    pub fn touches_output(&self, pipe: usize) -> bool {
        self.output_mask & (1 << pipe) != 0
    }

    fn set_touches_output(&mut self, pipe: usize, touches: bool) {
        if touches {
            self.output_mask |= 1 << pipe;
        } else {
            self.output_mask &= !(1 << pipe);
        }
    }

    /// §3 invariant / §4.3 step 2: recompute `output_mask` as the set of
    /// enabled outputs whose `desktop_rc` intersects `area`, filtered by
    /// `pipe_locked` if set (Open Question #1: restrict-only). Returns the
    /// XOR of the old and new masks — the set of outputs whose
    /// `renderable_buffer_changed` flag must be raised (Property #3).
    pub fn recompute_output_mask(&mut self, outputs: &[(usize, bool, Rect<Logical>)]) -> u32 {
        let old_mask = self.output_mask;
        let mut new_mask = 0u32;
        for &(pipe, enabled, desktop_rc) in outputs {
            if !enabled {
                continue;
            }
            if let Some(locked) = self.pipe_locked {
                if pipe != locked {
                    continue;
                }
            }
            if desktop_rc.overlaps(&self.area) {
                new_mask |= 1 << pipe;
            }
        }
        for &(pipe, _, _) in outputs {
            self.set_touches_output(pipe, new_mask & (1 << pipe) != 0);
        }
        old_mask ^ new_mask
    }
}

/// The compositor-wide view stack (§4.4): float views at the head, then
/// normal views, ordered by recency of focus. The topmost non-float view is
/// the "top view". Ordering is over [`SurfaceHandle`]s rather than bare
/// [`View`]s since a view never exists independent of the surface that owns
/// it (§3: `surface->view`) — the list's order *is* the view stack, mirroring
/// the source's intrusive `cb_view.link`.
#[derive(Debug, Default)]
pub struct ViewStack {
    surfaces: Vec<SurfaceHandle>,
}

impl ViewStack {
    pub fn new() -> Self {
        ViewStack { surfaces: Vec::new() }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SurfaceHandle> {
        self.surfaces.iter()
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    fn first_normal_index(&self) -> Option<usize> {
        self.surfaces.iter().position(|s| !s.borrow().view.float)
    }

    /// §4.4 `add_view`: float views go to the head; normal views are
    /// inserted immediately before the first normal view. Returns the
    /// index the view landed at.
    pub fn add_view(&mut self, surface: SurfaceHandle) -> usize {
        if surface.borrow().view.float {
            self.surfaces.insert(0, surface);
            0
        } else {
            match self.first_normal_index() {
                Some(idx) => {
                    self.surfaces.insert(idx, surface);
                    idx
                }
                None => {
                    self.surfaces.push(surface);
                    self.surfaces.len() - 1
                }
            }
        }
    }

    pub fn remove(&mut self, surface: &SurfaceHandle) -> bool {
        if let Some(idx) = self.surfaces.iter().position(|s| Rc::ptr_eq(s, surface)) {
            self.surfaces.remove(idx);
            true
        } else {
            false
        }
    }

    pub fn get(&self, idx: usize) -> Option<&SurfaceHandle> {
        self.surfaces.get(idx)
    }

    /// §3/§4.4: the top view is the first non-float view in the list
    /// (Property #5).
    pub fn top_view_index(&self) -> Option<usize> {
        self.first_normal_index()
    }

    pub fn top_view(&self) -> Option<&SurfaceHandle> {
        self.top_view_index().and_then(|i| self.surfaces.get(i))
    }

    /// §4.4 `view_switch`: resolve which normal view contains `(x, y)` and,
    /// if it is not already the top view, promote it to just before the
    /// first normal view. A direct-show top view never participates in this
    /// reordering (always-on-top fullscreen clients).
    ///
    /// Returns the surface whose view was promoted, or `None` if the top
    /// view did not change. The caller is expected to have captured the
    /// previous top view's identity beforehand (e.g. via
    /// [`ViewStack::top_view`]) to fire its focus-lost message — index
    /// bookkeeping is intentionally not exposed here since both removal and
    /// insertion can shift every index in the list.
    pub fn promote_containing(&mut self, x: i32, y: i32) -> Option<SurfaceHandle> {
        let top_idx = self.top_view_index()?;
        if self.surfaces[top_idx].borrow().view.direct_show {
            return None;
        }

        let point = crate::geometry::Point::new(x, y);
        let hit = self.surfaces.iter().enumerate().find(|(_, s)| {
            let view = &s.borrow().view;
            !view.float && view.area.contains_point(point)
        })?;
        let hit = hit.0;

        if hit == top_idx {
            return None;
        }

        let surface = self.surfaces.remove(hit);
        if surface.borrow().view.root_view {
            // root_view is exempt from list moves; put it back where it was.
            self.surfaces.insert(hit, surface);
            return None;
        }
        let insert_at = self.first_normal_index().unwrap_or(self.surfaces.len());
        self.surfaces.insert(insert_at, surface.clone());
        Some(surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Surface;
    use std::cell::RefCell;

    fn view_at(x: i32, y: i32, w: i32, h: i32) -> View {
        View::new(Rect::from_xywh(x, y, w, h), 0)
    }

    fn surface_at(x: i32, y: i32, w: i32, h: i32) -> SurfaceHandle {
        Rc::new(RefCell::new(Surface::new(view_at(x, y, w, h), false)))
    }

    #[test]
    fn float_views_stay_at_head() {
        let mut stack = ViewStack::new();
        stack.add_view(surface_at(0, 0, 100, 100));
        let float = surface_at(0, 0, 50, 50);
        float.borrow_mut().view.float = true;
        stack.add_view(float);
        assert!(stack.get(0).unwrap().borrow().view.float);
    }

    #[test]
    fn top_view_is_first_non_float() {
        let mut stack = ViewStack::new();
        let float = surface_at(0, 0, 50, 50);
        float.borrow_mut().view.float = true;
        stack.add_view(float);
        stack.add_view(surface_at(0, 0, 100, 100));
        let top = stack.top_view().unwrap();
        assert!(!top.borrow().view.float);
    }

    #[test]
    fn promoting_a_covered_view_moves_it_before_the_old_top() {
        let mut stack = ViewStack::new();
        let back = surface_at(0, 0, 200, 200);
        let front = surface_at(0, 0, 100, 100);
        stack.add_view(back.clone());
        stack.add_view(front.clone());
        assert!(Rc::ptr_eq(stack.top_view().unwrap(), &front));

        let promoted = stack.promote_containing(150, 150).unwrap();
        assert!(Rc::ptr_eq(&promoted, &back));
        assert!(Rc::ptr_eq(stack.top_view().unwrap(), &back));
    }

    #[test]
    fn root_view_is_exempt_from_promotion() {
        let mut stack = ViewStack::new();
        let back = surface_at(0, 0, 200, 200);
        back.borrow_mut().view.root_view = true;
        let front = surface_at(0, 0, 100, 100);
        stack.add_view(back.clone());
        stack.add_view(front.clone());

        assert!(stack.promote_containing(150, 150).is_none());
        assert!(Rc::ptr_eq(stack.top_view().unwrap(), &front));
    }

    #[test]
    fn output_mask_reflects_intersection_with_enabled_outputs() {
        let mut view = view_at(1000, 0, 2048, 1080);
        let outputs = vec![
            (0usize, true, Rect::from_xywh(0, 0, 1920, 1080)),
            (1usize, true, Rect::from_xywh(1920, 0, 1280, 720)),
        ];
        let diff = view.recompute_output_mask(&outputs);
        assert_eq!(view.output_mask, 0b11);
        assert_eq!(diff, 0b11);
    }

    #[test]
    fn pipe_locked_restricts_to_intersecting_outputs_only() {
        // Open Question #1: pipe_locked restricts, it does not force.
        let mut view = view_at(1000, 0, 2048, 1080);
        view.pipe_locked = Some(0);
        let outputs = vec![
            (0usize, true, Rect::from_xywh(0, 0, 1920, 1080)),
            (1usize, true, Rect::from_xywh(1920, 0, 1280, 720)),
        ];
        view.recompute_output_mask(&outputs);
        assert_eq!(view.output_mask, 0b01);
    }
}
