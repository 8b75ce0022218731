//! Plane descriptors and the per-output free-plane list (§3, §4.5).
//!
//! The C source keeps `free_planes` as an intrusive `list_head` sorted in
//! zpos-increasing order (`put_free_output_plane`/`get_free_output_plane` in
//! `cube_compositor.c`) and does a second linear scan by fourcc+zpos when
//! looking for a specific match (`find_free_output_plane`). A plain
//! `Vec<Plane>` kept sorted by `zpos` reproduces both without an intrusive
//! list.

use drm_fourcc::DrmFourcc;

use crate::format::PixFmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PlaneKind {
    Overlay,
    Primary,
    Cursor,
}

/// `Plane` (§3): a KMS plane as discovered on a CRTC.
#[derive(Debug, Clone)]
pub struct Plane {
    pub id: u32,
    pub kind: PlaneKind,
    pub formats: Vec<DrmFourcc>,
    pub zpos: i32,
    pub scale_support: bool,
    pub alpha_support: bool,
}

impl Plane {
    pub fn supports_format(&self, fmt: PixFmt) -> bool {
        self.formats.contains(&fmt.to_fourcc())
    }
}

/// The free overlay planes belonging to a single output, kept sorted by
/// `zpos` ascending — mirrors `put_free_output_plane`'s insertion-sort
/// behavior without a manual linked list walk.
#[derive(Debug, Default)]
pub struct FreePlaneList {
    planes: Vec<Plane>,
}

impl FreePlaneList {
    pub fn new() -> Self {
        FreePlaneList { planes: Vec::new() }
    }

    /// Populate from a CRTC's overlay planes in enumeration order
    /// (`output_free_planes_prepare`); only overlay planes are tracked here,
    /// primary and cursor planes are held separately on `Output`.
    pub fn seed(&mut self, overlay_planes: impl IntoIterator<Item = Plane>) {
        self.planes.clear();
        for plane in overlay_planes {
            debug_assert_eq!(plane.kind, PlaneKind::Overlay);
            self.put(plane);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Plane> {
        self.planes.iter()
    }

    /// Return a plane to the free list, keeping `zpos` ascending order
    /// (`put_free_output_plane`).
    pub fn put(&mut self, plane: Plane) {
        let pos = self.planes.partition_point(|p| p.zpos <= plane.zpos);
        self.planes.insert(pos, plane);
    }

    /// Take a specific plane out of the free list by id (`get_free_output_plane`).
    pub fn take(&mut self, id: u32) -> Option<Plane> {
        let idx = self.planes.iter().position(|p| p.id == id)?;
        Some(self.planes.remove(idx))
    }

    /// Find the first free plane supporting `fmt`, optionally constrained to
    /// an exact `zpos` (`zpos == -1` means "any"), and take it out of the
    /// list (`find_free_output_plane`).
    pub fn find_and_take(&mut self, fmt: PixFmt, zpos: Option<i32>) -> Option<Plane> {
        let idx = self.planes.iter().position(|p| {
            zpos.map_or(true, |z| p.zpos == z) && p.supports_format(fmt)
        })?;
        Some(self.planes.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay(id: u32, zpos: i32, formats: &[DrmFourcc]) -> Plane {
        Plane {
            id,
            kind: PlaneKind::Overlay,
            formats: formats.to_vec(),
            zpos,
            scale_support: true,
            alpha_support: true,
        }
    }

    #[test]
    fn put_keeps_zpos_ascending_order() {
        let mut list = FreePlaneList::new();
        list.put(overlay(1, 3, &[DrmFourcc::Argb8888]));
        list.put(overlay(2, 1, &[DrmFourcc::Argb8888]));
        list.put(overlay(3, 2, &[DrmFourcc::Argb8888]));
        let zposes: Vec<i32> = list.iter().map(|p| p.zpos).collect();
        assert_eq!(zposes, vec![1, 2, 3]);
    }

    #[test]
    fn find_and_take_removes_the_match_only() {
        let mut list = FreePlaneList::new();
        list.put(overlay(1, 0, &[DrmFourcc::Nv12]));
        list.put(overlay(2, 1, &[DrmFourcc::Argb8888]));

        let found = list.find_and_take(PixFmt::Argb8888, None).unwrap();
        assert_eq!(found.id, 2);
        assert_eq!(list.iter().count(), 1);
        assert_eq!(list.iter().next().unwrap().id, 1);
    }

    #[test]
    fn find_and_take_honors_exact_zpos_constraint() {
        let mut list = FreePlaneList::new();
        list.put(overlay(1, 5, &[DrmFourcc::Argb8888]));
        assert!(list.find_and_take(PixFmt::Argb8888, Some(9)).is_none());
        assert!(list.find_and_take(PixFmt::Argb8888, Some(5)).is_some());
    }
}
