//! rollcall-hw: V4L2 camera capture.
//!
//! [`Camera`] negotiates a capture format and [`CameraStream`] hands out RGB
//! frames through the core [`rollcall_core::VideoSource`] trait.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, PixelFormat};
pub use frame::FrameError;
