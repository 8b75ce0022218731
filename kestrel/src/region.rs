//! Damage/opaque regions (§3 `Surface.damage`, `Surface.opaque`).
//!
//! The C source hand-rolls the classic X11/pixman box-list algebra
//! (init/union/intersect/subtract/translate over sorted, band-merged
//! rectangle lists) in `cube_region.c`. The teacher crate already pulls in
//! `pixman` for exactly this purpose in its damage tracker
//! (`backend::renderer::damage`), so this wraps `pixman::Region32` instead
//! of re-deriving box-list merging by hand.

use pixman::Region32;

use crate::geometry::{Logical, Rect};

/// A multi-rectangle region in logical (desktop-pixel) space.
#[derive(Debug, Default)]
pub struct Region {
    inner: Region32,
}

fn to_box32(rect: Rect<Logical>) -> pixman::Box32 {
    pixman::Box32 {
        x1: rect.x(),
        y1: rect.y(),
        x2: rect.right(),
        y2: rect.bottom(),
    }
}

impl Region {
    pub fn empty() -> Self {
        Region { inner: Region32::default() }
    }

    pub fn from_rect(rect: Rect<Logical>) -> Self {
        let mut region = Region::empty();
        region.add_rect(rect);
        region
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn add_rect(&mut self, rect: Rect<Logical>) {
        if rect.is_empty() {
            return;
        }
        let b = to_box32(rect);
        self.inner = self.inner.union(&Region32::init_rects(&[b]));
    }

    pub fn union(&self, other: &Region) -> Region {
        Region { inner: self.inner.union(&other.inner) }
    }

    pub fn intersect_rect(&self, rect: Rect<Logical>) -> Region {
        let b = to_box32(rect);
        Region { inner: self.inner.intersect(&Region32::init_rects(&[b])) }
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Region {
        let mut inner = self.inner.clone();
        inner.translate(dx, dy);
        Region { inner }
    }

    pub fn clear(&mut self) {
        self.inner = Region32::default();
    }

    /// Bounding rectangle of every box in the region.
    pub fn extents(&self) -> Rect<Logical> {
        let b = self.inner.extents();
        Rect::from_xywh(b.x1, b.y1, b.x2 - b.x1, b.y2 - b.y1)
    }

    pub fn rects(&self) -> Vec<Rect<Logical>> {
        self.inner
            .rectangles()
            .iter()
            .map(|b| Rect::from_xywh(b.x1, b.y1, b.x2 - b.x1, b.y2 - b.y1))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_of_two_rects_covers_both_extents() {
        let mut region = Region::empty();
        region.add_rect(Rect::from_xywh(0, 0, 10, 10));
        region.add_rect(Rect::from_xywh(20, 20, 10, 10));
        let extents = region.extents();
        assert_eq!((extents.x(), extents.y(), extents.right(), extents.bottom()), (0, 0, 30, 30));
    }

    #[test]
    fn empty_region_has_no_rects() {
        let region = Region::empty();
        assert!(region.is_empty());
        assert!(region.rects().is_empty());
    }
}
