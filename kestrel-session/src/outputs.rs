//! `pipeline_create` (§4.1): turns one scanned CRTC+connector pair into a
//! `kestrel::Output`, enumerating the CRTC's planes and separating primary
//! (must support XRGB8888), cursor (must support ARGB8888) and overlay
//! planes exactly as §4.1 specifies.

use drm::control::{connector, crtc, Device as ControlDevice, ModeTypeFlags, PlaneType};
use drm_fourcc::DrmFourcc;
use kestrel::mode::Mode;
use kestrel::plane::{FreePlaneList, Plane, PlaneKind};
use kestrel::output::{Output, OutputPlanes};
use kestrel::scanout::DrmDeviceFd;

/// Converts a connector's full mode list into `kestrel::Mode`s, carrying
/// over the kernel's `PREFERRED` flag (§4.1 step 3's "the connector's
/// preferred timing").
pub fn modes_of(info: &connector::Info) -> Vec<Mode> {
    info.modes()
        .iter()
        .map(|m| Mode::from_drm(*m, m.mode_type().contains(ModeTypeFlags::PREFERRED)))
        .collect()
}

/// `pipeline_create`: allocate the CRTC + enumerate planes belonging to it,
/// separate primary/cursor, stack the rest into `free_planes` sorted by
/// zpos ascending.
pub fn pipeline_create(
    fd: &DrmDeviceFd,
    pipe_index: usize,
    crtc_id: crtc::Handle,
    connector_id: connector::Handle,
) -> std::io::Result<Output> {
    let plane_handles = fd.plane_handles()?;
    let mut primary = None;
    let mut cursor = None;
    let mut overlays = Vec::new();

    for handle in plane_handles {
        let info = fd.get_plane(handle)?;
        if info.crtc().is_some() && info.crtc() != Some(crtc_id) {
            continue;
        }
        let Ok(props) = plane_type(fd, handle) else { continue };
        let formats: Vec<DrmFourcc> = info
            .formats()
            .iter()
            .filter_map(|&raw| DrmFourcc::try_from(raw).ok())
            .collect();
        let zpos = zpos_of(fd, handle).unwrap_or(0);

        match props {
            PlaneType::Primary if primary.is_none() && formats.contains(&DrmFourcc::Xrgb8888) => {
                primary = Some(Plane {
                    id: u32::from(handle),
                    kind: PlaneKind::Primary,
                    formats,
                    zpos,
                    scale_support: true,
                    alpha_support: false,
                });
            }
            PlaneType::Cursor if cursor.is_none() && formats.contains(&DrmFourcc::Argb8888) => {
                cursor = Some(Plane {
                    id: u32::from(handle),
                    kind: PlaneKind::Cursor,
                    formats,
                    zpos,
                    scale_support: false,
                    alpha_support: true,
                });
            }
            PlaneType::Overlay => {
                overlays.push(Plane {
                    id: u32::from(handle),
                    kind: PlaneKind::Overlay,
                    formats,
                    zpos,
                    scale_support: true,
                    alpha_support: true,
                });
            }
            _ => {}
        }
    }

    let primary = primary.ok_or_else(|| std::io::Error::other("CRTC has no usable primary plane"))?;

    let mut free = FreePlaneList::new();
    overlays.sort_by_key(|p| p.zpos);
    for plane in overlays {
        free.put(plane);
    }

    Ok(Output::new(
        pipe_index,
        crtc_id,
        connector_id,
        OutputPlanes { primary, cursor, free },
    ))
}

fn plane_type(fd: &DrmDeviceFd, handle: drm::control::plane::Handle) -> std::io::Result<PlaneType> {
    let props = fd.get_properties(handle)?;
    for (id, value) in props.iter() {
        if let Ok(info) = fd.get_property(*id) {
            if info.name().to_str() == Ok("type") {
                return Ok(match value {
                    1 => PlaneType::Overlay,
                    2 => PlaneType::Primary,
                    3 => PlaneType::Cursor,
                    _ => PlaneType::Overlay,
                });
            }
        }
    }
    Ok(PlaneType::Overlay)
}

fn zpos_of(fd: &DrmDeviceFd, handle: drm::control::plane::Handle) -> std::io::Result<i32> {
    let props = fd.get_properties(handle)?;
    for (id, value) in props.iter() {
        if let Ok(info) = fd.get_property(*id) {
            if info.name().to_str() == Ok("zpos") {
                return Ok(*value as i32);
            }
        }
    }
    Ok(0)
}
