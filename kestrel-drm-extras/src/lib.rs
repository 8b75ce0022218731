//! Connector scanning, CRTC mapping and EDID helpers factored out of
//! `kestrel`'s hot-plug path (§4.6), the way the teacher factors
//! `smithay-drm-extras` out of `smithay`.
//!
//! - [`drm_scanner`] detects connector connected/disconnected edges and maps
//!   CRTCs to connectors — this is what §4.6's "transitions are detected by
//!   comparing `connected` flags" becomes once it is not a hand-rolled flag
//!   diff.
//! - [`edid`] reads EDID blobs off a connector, with the 5x/50ms reconnect
//!   retry spec.md §4.1 calls for (the bare EDID read is ungrounded-free —
//!   real hardware sometimes returns an empty blob immediately after a hot
//!   plug, before the kernel has finished the I2C read).

#![warn(missing_debug_implementations)]

pub mod drm_scanner;
pub mod edid;
