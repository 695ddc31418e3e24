//! Grayscale frames and the pixel conversions that produce them.

use thiserror::Error;

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_RATIO: f32 = 0.95;

/// A captured grayscale camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Wrap grayscale pixels, computing the dark flag.
    pub fn from_gray(
        data: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = (width as usize) * (height as usize);
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        let is_dark = is_dark_frame(&data, DARK_FRAME_RATIO);
        Ok(Self {
            data,
            width,
            height,
            sequence,
            is_dark,
        })
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by keeping the Y samples.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// True if more than `threshold_pct` of pixels are below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < 32).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        let yuyv: Vec<u8> = (0..16).collect();
        let gray = yuyv_to_grayscale(&yuyv, 4, 2).unwrap();
        assert_eq!(gray, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_grayscale(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_dark_frame_thresholds() {
        assert!(is_dark_frame(&[0u8; 1000], DARK_FRAME_RATIO));
        assert!(!is_dark_frame(&[128u8; 1000], DARK_FRAME_RATIO));
        assert!(is_dark_frame(&[], DARK_FRAME_RATIO));

        let mut mostly_dark = vec![10u8; 960];
        mostly_dark.extend([128u8; 40]);
        assert!(is_dark_frame(&mostly_dark, DARK_FRAME_RATIO));
    }

    #[test]
    fn test_from_gray_checks_size() {
        let frame = Frame::from_gray(vec![200u8; 6], 3, 2, 7).unwrap();
        assert!(!frame.is_dark);
        assert_eq!(frame.sequence, 7);

        assert!(matches!(
            Frame::from_gray(vec![0u8; 5], 3, 2, 0),
            Err(FrameError::InvalidLength { expected: 6, actual: 5 })
        ));
    }
}
