//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::{CaptureDevice, FrameSource};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("device does not support video capture")]
    CaptureNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, the usual webcam format.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
}

/// An opened V4L2 camera. Dropping it releases the device.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 device (e.g. "/dev/video0") and request `width`×`height` YUYV.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.raw_os_error() == Some(16) || e.to_string().contains("busy") {
                CameraError::DeviceBusy(device_path.to_string())
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::CaptureNotSupported);
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;

        let pixel_format = if negotiated.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if negotiated.fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format {:?} (need YUYV or GREY)",
                negotiated.fourcc
            )));
        };

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            ?pixel_format,
            "opened camera"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }

    /// Start streaming. Frames are read from the returned stream until it is dropped.
    pub fn stream(&self) -> Result<CameraStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("create mmap stream: {e}")))?;
        Ok(CameraStream { camera: self, stream })
    }

    fn to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width * self.height) as usize;
        match self.pixel_format {
            PixelFormat::Grey => buf
                .get(..pixels)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| CameraError::CaptureFailed(format!(
                    "GREY buffer too short: expected {pixels}, got {}",
                    buf.len()
                ))),
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height)
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion: {e}"))),
        }
    }

    /// List available V4L2 capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                    return None;
                }
                Some(DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

/// A running capture stream on an opened camera.
pub struct CameraStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
}

impl CameraStream<'_> {
    /// Drop `count` frames while exposure settles.
    pub fn warm_up(&mut self, count: usize) {
        for _ in 0..count {
            if let Err(e) = self.stream.next() {
                tracing::debug!(error = %e, "warmup frame failed");
            }
        }
    }
}

impl FrameSource for CameraStream<'_> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("dequeue buffer: {e}")))?;
        let sequence = meta.sequence;
        let gray = self.camera.to_grayscale(buf)?;

        let frame = Frame::from_gray(gray, self.camera.width, self.camera.height, sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
        Ok(Some(frame))
    }
}

/// V4L2 device settings; opened fresh for every `with_source` call.
#[derive(Debug, Clone)]
pub struct V4l2Device {
    pub path: String,
    pub width: u32,
    pub height: u32,
    /// Frames discarded after opening while exposure settles.
    pub warmup_frames: usize,
}

impl CaptureDevice for V4l2Device {
    fn with_source<R, F>(&self, f: F) -> Result<R, CameraError>
    where
        F: FnOnce(&mut dyn FrameSource) -> R,
    {
        let camera = Camera::open(&self.path, self.width, self.height)?;
        let mut stream = camera.stream()?;
        stream.warm_up(self.warmup_frames);
        let result = f(&mut stream);
        tracing::debug!(device = %self.path, "releasing camera");
        Ok(result)
    }
}
