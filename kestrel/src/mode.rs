//! Video timings (§3 `Mode`).

use drm::control::Mode as DrmMode;

/// A video timing: resolution, refresh, pixel clock, plus the blob id it
/// was last uploaded as (if any) and whether it should be preserved across
/// connector re-plugs.
#[derive(Debug, Clone)]
pub struct Mode {
    pub width: u16,
    pub height: u16,
    /// Refresh rate in milli-Hz, matching `drm::control::Mode::vrefresh`
    /// scaled the way the C source's `refresh_mHz` is.
    pub vrefresh_mhz: u32,
    pub pixel_freq_khz: u32,
    pub blob_id: Option<drm::control::property::Value<'static>>,
    pub preferred: bool,
    /// Set for a custom timing synthesized via
    /// `OUTPUT_VIDEO_TIMING_CREAT` (§6) rather than read off EDID; these
    /// survive a disconnect/reconnect cycle.
    pub custom: bool,
    /// The raw timings, kept around so a modeset commit can upload them as a
    /// property blob (`Scanout::create_mode_blob`) without re-querying the
    /// connector.
    pub raw: DrmMode,
}

impl Mode {
    pub fn from_drm(mode: DrmMode, preferred: bool) -> Self {
        let (clock, hdisplay, vdisplay, vrefresh) = (mode.clock(), mode.size().0, mode.size().1, mode.vrefresh());
        Mode {
            width: hdisplay,
            height: vdisplay,
            vrefresh_mhz: vrefresh * 1000,
            pixel_freq_khz: clock as u32,
            blob_id: None,
            preferred,
            custom: false,
            raw: mode,
        }
    }

    /// Nanoseconds per frame, from the vrefresh-in-milli-Hz field
    /// (§4.1: "recompute `refresh_nsec` from the mode timings
    /// (`1e12 / refresh_mHz`)"), unchanged in meaning from the spec.
    pub fn refresh_nsec(&self) -> u64 {
        if self.vrefresh_mhz == 0 {
            return 0;
        }
        1_000_000_000_000u64 / self.vrefresh_mhz as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_nsec_for_60hz() {
        let mode = Mode {
            width: 1920,
            height: 1080,
            vrefresh_mhz: 60_000,
            pixel_freq_khz: 148_500,
            blob_id: None,
            preferred: true,
            custom: false,
            // No connector handy in a unit test; matches the teacher's own
            // "fake mode" fallback in `surface/atomic.rs`.
            raw: unsafe { std::mem::zeroed() },
        };
        // 1/60s ~= 16_666_666ns
        assert_eq!(mode.refresh_nsec(), 16_666_666);
    }
}
