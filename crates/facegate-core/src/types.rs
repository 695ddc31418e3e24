use serde::{Deserialize, Serialize};

/// Borrowed view of an 8-bit grayscale image.
#[derive(Debug, Clone, Copy)]
pub struct GrayImage<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

impl<'a> GrayImage<'a> {
    pub fn new(data: &'a [u8], width: u32, height: u32) -> Self {
        Self { data, width, height }
    }

    /// Pixel value at (x, y), or 0 outside the image.
    pub fn get(&self, x: i64, y: i64) -> f32 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return 0.0;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
            .unwrap_or(0) as f32
    }

    /// Bilinear sample at sub-pixel position (x, y). Out-of-bounds reads are black.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        self.get(x0, y0) * (1.0 - fx) * (1.0 - fy)
            + self.get(x0 + 1, y0) * fx * (1.0 - fy)
            + self.get(x0, y0 + 1) * (1.0 - fx) * fy
            + self.get(x0 + 1, y0 + 1) * fx * fy
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Horizontal center of the box in frame pixels.
    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter_w = (self.right().min(other.right()) - self.x.max(other.x)).max(0.0);
        let inter_h = (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &[f32]) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean distance to another vector.
    pub fn euclidean_distance(&self, other: &[f32]) -> f32 {
        self.values
            .iter()
            .zip(other.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 1.0, landmarks: None }
    }

    #[test]
    fn test_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal_and_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        assert!(a.similarity(&[0.0, 1.0]).abs() < 1e-6);
        assert!((a.similarity(&[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        assert_eq!(a.similarity(&[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        assert!((a.euclidean_distance(&[3.0, 4.0]) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_center_x() {
        assert_eq!(bbox(100.0, 0.0, 50.0, 50.0).center_x(), 125.0);
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!(a.iou(&bbox(20.0, 20.0, 10.0, 10.0)).abs() < 1e-6);
        // 5x10 overlap over a 150 union
        assert!((a.iou(&bbox(5.0, 0.0, 10.0, 10.0)) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_bilinear_sample() {
        let data = [0u8, 100, 0, 100];
        let img = GrayImage::new(&data, 2, 2);
        assert!((img.sample(0.5, 0.0) - 50.0).abs() < 1e-4);
        assert_eq!(img.sample(-5.0, -5.0), 0.0);
    }
}
