//! Pixel formats recognized by the wire protocol (§6), mapped onto DRM fourcc
//! codes via the `drm-fourcc` crate rather than a hand-written lookup table
//! (the C source's `primary_support_fmt`/`find_free_output_plane` switch over
//! a local `char fourcc[4]` buffer — here that switch collapses to
//! [`PixFmt::to_fourcc`]).

use drm_fourcc::DrmFourcc;

/// Pixel formats recognized by the protocol (§6). Listed in the order
/// spec.md enumerates them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PixFmt {
    Argb8888,
    Xrgb8888,
    Rgb888,
    Rgb565,
    Nv12,
    Nv16,
    Nv24,
    Yuyv,
    Yuv420,
    Yuv422,
    Yuv444,
}

impl PixFmt {
    pub fn to_fourcc(self) -> DrmFourcc {
        match self {
            PixFmt::Argb8888 => DrmFourcc::Argb8888,
            PixFmt::Xrgb8888 => DrmFourcc::Xrgb8888,
            PixFmt::Rgb888 => DrmFourcc::Rgb888,
            PixFmt::Rgb565 => DrmFourcc::Rgb565,
            PixFmt::Nv12 => DrmFourcc::Nv12,
            PixFmt::Nv16 => DrmFourcc::Nv16,
            PixFmt::Nv24 => DrmFourcc::Nv24,
            PixFmt::Yuyv => DrmFourcc::Yuyv,
            PixFmt::Yuv420 => DrmFourcc::Yuv420,
            PixFmt::Yuv422 => DrmFourcc::Yuv422,
            PixFmt::Yuv444 => DrmFourcc::Yuv444,
        }
    }

    pub fn from_fourcc(fourcc: DrmFourcc) -> Option<Self> {
        Some(match fourcc {
            DrmFourcc::Argb8888 => PixFmt::Argb8888,
            DrmFourcc::Xrgb8888 => PixFmt::Xrgb8888,
            DrmFourcc::Rgb888 => PixFmt::Rgb888,
            DrmFourcc::Rgb565 => PixFmt::Rgb565,
            DrmFourcc::Nv12 => PixFmt::Nv12,
            DrmFourcc::Nv16 => PixFmt::Nv16,
            DrmFourcc::Nv24 => PixFmt::Nv24,
            DrmFourcc::Yuyv => PixFmt::Yuyv,
            DrmFourcc::Yuv420 => PixFmt::Yuv420,
            DrmFourcc::Yuv422 => PixFmt::Yuv422,
            DrmFourcc::Yuv444 => PixFmt::Yuv444,
            _ => return None,
        })
    }

    /// NV12/NV16/NV24 need even x-origin alignment on some scalers; mirrors
    /// `add_dma_buf_to_task`'s `is_yuv` + x&~1 clamp.
    pub fn is_yuv_subsampled(self) -> bool {
        matches!(self, PixFmt::Nv12 | PixFmt::Nv16 | PixFmt::Nv24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_recognized_format() {
        let all = [
            PixFmt::Argb8888,
            PixFmt::Xrgb8888,
            PixFmt::Rgb888,
            PixFmt::Rgb565,
            PixFmt::Nv12,
            PixFmt::Nv16,
            PixFmt::Nv24,
            PixFmt::Yuyv,
            PixFmt::Yuv420,
            PixFmt::Yuv422,
            PixFmt::Yuv444,
        ];
        for fmt in all {
            assert_eq!(PixFmt::from_fourcc(fmt.to_fourcc()), Some(fmt));
        }
    }
}
