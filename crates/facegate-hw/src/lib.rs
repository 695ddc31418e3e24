//! facegate-hw: webcam capture.
//!
//! V4L2 camera access producing grayscale frames, behind the `FrameSource`
//! trait so capture loops can be driven by anything that yields frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, PixelFormat, V4l2Device};
pub use frame::{Frame, FrameError};

/// Anything that yields camera frames one at a time.
pub trait FrameSource {
    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;
}

/// A camera that can be opened for the duration of one operation.
pub trait CaptureDevice {
    /// Open the device, hand a running frame source to `f`, release the device.
    fn with_source<R, F>(&self, f: F) -> Result<R, CameraError>
    where
        F: FnOnce(&mut dyn FrameSource) -> R;
}
