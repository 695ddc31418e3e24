//! Geometric crops feeding the recognition and landmark models.
//!
//! `align_face` warps a face onto the canonical ArcFace 112×112 layout with a
//! least-squares similarity transform over the five detector landmarks.
//! `crop_square` cuts the axis-aligned square used by the 68-point landmark model.

use crate::types::{BoundingBox, GrayImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// Similarity transform `dst = s·R·src + t`, stored as `(a, b, tx, ty)` with
/// `a = s·cosθ`, `b = s·sinθ`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit mapping `src` points onto `dst` points.
    fn fit(src: &[(f32, f32)], dst: &[(f32, f32)]) -> Option<Self> {
        let n = src.len().min(dst.len());
        if n == 0 {
            return None;
        }
        let mean = |pts: &[(f32, f32)]| {
            let (sx, sy) = pts[..n]
                .iter()
                .fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n as f32, sy / n as f32)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut var = 0.0f32;
        let mut num_a = 0.0f32;
        let mut num_b = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            var += sx * sx + sy * sy;
            num_a += sx * dx + sy * dy;
            num_b += sx * dy - sy * dx;
        }
        if var < 1e-12 {
            return None;
        }

        let a = num_a / var;
        let b = num_b / var;
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Align a detected face to a canonical 112×112 grayscale crop.
///
/// Returns an all-black crop when the landmarks are degenerate.
pub fn align_face(image: &GrayImage<'_>, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    let inverse = Similarity::fit(landmarks, &REFERENCE_LANDMARKS_112).and_then(|t| t.inverse());
    let Some(inverse) = inverse else {
        tracing::debug!("degenerate landmarks, skipping alignment");
        return vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];
    };

    let mut out = Vec::with_capacity(ALIGNED_SIZE * ALIGNED_SIZE);
    for oy in 0..ALIGNED_SIZE {
        for ox in 0..ALIGNED_SIZE {
            let (sx, sy) = inverse.apply((ox as f32, oy as f32));
            out.push(image.sample(sx, sy).round().clamp(0.0, 255.0) as u8);
        }
    }
    out
}

/// Square region around a face box, expanded by `margin` of the longer side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquareCrop {
    pub x: f32,
    pub y: f32,
    pub side: f32,
}

impl SquareCrop {
    pub fn around(face: &BoundingBox, margin: f32) -> Self {
        let side = face.width.max(face.height) * (1.0 + margin);
        let cx = face.x + face.width / 2.0;
        let cy = face.y + face.height / 2.0;
        Self {
            x: cx - side / 2.0,
            y: cy - side / 2.0,
            side,
        }
    }

    /// Map a point given in crop-normalized [0, 1] coordinates back to the frame.
    pub fn to_frame(&self, (u, v): (f32, f32)) -> (f32, f32) {
        (self.x + u * self.side, self.y + v * self.side)
    }
}

/// Resample `crop` into a `size`×`size` grayscale patch.
pub fn crop_square(image: &GrayImage<'_>, crop: &SquareCrop, size: usize) -> Vec<u8> {
    let step = crop.side / size as f32;
    let mut out = Vec::with_capacity(size * size);
    for y in 0..size {
        let sy = crop.y + (y as f32 + 0.5) * step - 0.5;
        for x in 0..size {
            let sx = crop.x + (x as f32 + 0.5) * step - 0.5;
            out.push(image.sample(sx, sy).round().clamp(0.0, 255.0) as u8);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_identity() {
        let t = Similarity::fit(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112).unwrap();
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3 && t.ty.abs() < 1e-3);
    }

    #[test]
    fn test_fit_recovers_half_scale() {
        let src: Vec<(f32, f32)> = REFERENCE_LANDMARKS_112
            .iter()
            .map(|&(x, y)| (x * 2.0 + 10.0, y * 2.0 - 4.0))
            .collect();
        let t = Similarity::fit(&src, &REFERENCE_LANDMARKS_112).unwrap();
        assert!((t.a - 0.5).abs() < 1e-4, "a = {}", t.a);
        let (x, y) = t.apply(src[2]);
        assert!((x - REFERENCE_LANDMARKS_112[2].0).abs() < 1e-3);
        assert!((y - REFERENCE_LANDMARKS_112[2].1).abs() < 1e-3);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = Similarity { a: 0.8, b: 0.3, tx: 12.0, ty: -7.0 };
        let inv = t.inverse().unwrap();
        let (x, y) = inv.apply(t.apply((40.0, 25.0)));
        assert!((x - 40.0).abs() < 1e-3 && (y - 25.0).abs() < 1e-3);
    }

    #[test]
    fn test_fit_degenerate() {
        assert!(Similarity::fit(&[(5.0, 5.0); 5], &REFERENCE_LANDMARKS_112).is_none());
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = vec![128u8; 640 * 480];
        let image = GrayImage::new(&frame, 640, 480);
        let aligned = align_face(&image, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.len(), ALIGNED_SIZE * ALIGNED_SIZE);
        // interior of a uniform frame stays uniform
        assert_eq!(aligned[56 * ALIGNED_SIZE + 56], 128);
    }

    #[test]
    fn test_bright_eye_lands_on_reference() {
        let (w, h) = (200usize, 200usize);
        let mut frame = vec![0u8; w * h];
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for y in 58..63 {
            for x in 78..83 {
                frame[y * w + x] = 255;
            }
        }
        let image = GrayImage::new(&frame, w as u32, h as u32);
        let aligned = align_face(&image, &src);

        let rx = REFERENCE_LANDMARKS_112[0].0.round() as usize;
        let ry = REFERENCE_LANDMARKS_112[0].1.round() as usize;
        let peak = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned[y * ALIGNED_SIZE + x])
            .max()
            .unwrap();
        assert!(peak > 100, "no bright patch near ({rx}, {ry}), peak={peak}");
    }

    #[test]
    fn test_square_crop_geometry() {
        let face = BoundingBox {
            x: 100.0, y: 50.0, width: 80.0, height: 100.0,
            confidence: 0.9, landmarks: None,
        };
        let crop = SquareCrop::around(&face, 0.1);
        assert!((crop.side - 110.0).abs() < 1e-4);
        let (cx, cy) = crop.to_frame((0.5, 0.5));
        assert!((cx - 140.0).abs() < 1e-4 && (cy - 100.0).abs() < 1e-4);

        let frame = vec![77u8; 320 * 240];
        let patch = crop_square(&GrayImage::new(&frame, 320, 240), &crop, 32);
        assert_eq!(patch.len(), 32 * 32);
        assert_eq!(patch[16 * 32 + 16], 77);
    }
}
