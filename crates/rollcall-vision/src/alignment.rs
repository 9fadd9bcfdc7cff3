//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face onto the canonical 112×112 ArcFace layout using the
//! five InsightFace reference landmarks and a least-squares fit. Faces without
//! landmarks fall back to a plain crop of their bounding box.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use rollcall_core::BoundingBox;

/// ArcFace reference landmarks for a 112×112 output.
pub const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [a -b; b a] * src + [tx; ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SimilarityTransform {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl SimilarityTransform {
    const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Least-squares fit of `src` landmarks onto `dst`.
    ///
    /// Each point pair contributes two rows to the normal equations for the
    /// unknowns [a, b, tx, ty]:
    ///   sx*a - sy*b + tx = dx
    ///   sy*a + sx*b + ty = dy
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let mut normal = [[0.0f32; 5]; 4];

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            for (row, rhs) in [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)] {
                for j in 0..4 {
                    for k in 0..4 {
                        normal[j][k] += row[j] * row[k];
                    }
                    normal[j][4] += row[j] * rhs;
                }
            }
        }

        match solve_augmented(normal) {
            Some([a, b, tx, ty]) => Self { a, b, tx, ty },
            None => Self::IDENTITY,
        }
    }

    /// Map a destination pixel back to source coordinates.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Gaussian elimination with partial pivoting on a 4×5 augmented matrix.
fn solve_augmented(mut m: [[f32; 5]; 4]) -> Option<[f32; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r1, &r2| m[r1][col].abs().total_cmp(&m[r2][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (m[i][4] - tail) / m[i][i];
    }
    Some(x)
}

/// Bilinear sample of one pixel; outside the image reads as black.
fn sample_bilinear(image: &RgbImage, sx: f32, sy: f32) -> Rgb<u8> {
    let x0 = sx.floor() as i64;
    let y0 = sy.floor() as i64;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let fetch = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
            image.get_pixel(x as u32, y as u32).0.map(f32::from)
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr) = (fetch(x0, y0), fetch(x0 + 1, y0));
    let (bl, br) = (fetch(x0, y0 + 1), fetch(x0 + 1, y0 + 1));
    Rgb(std::array::from_fn(|c| {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bottom = bl[c] * (1.0 - fx) + br[c] * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    }))
}

fn warp(image: &RgbImage, transform: &SimilarityTransform, size: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |ox, oy| {
        match transform.invert_point(ox as f32, oy as f32) {
            Some((sx, sy)) => sample_bilinear(image, sx, sy),
            None => Rgb([0, 0, 0]),
        }
    })
}

/// Align a face to the canonical 112×112 crop using its five landmarks.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = SimilarityTransform::estimate(landmarks, &REFERENCE_LANDMARKS_112);
    warp(image, &transform, ALIGNED_SIZE)
}

/// Crop a face's bounding box (clamped to the image) and resize to 112×112.
pub fn crop_face(image: &RgbImage, face: &BoundingBox) -> RgbImage {
    let (w, h) = image.dimensions();
    let x0 = face.x.max(0.0).min(w.saturating_sub(1) as f32) as u32;
    let y0 = face.y.max(0.0).min(h.saturating_sub(1) as f32) as u32;
    let x1 = ((face.x + face.width).ceil().max(0.0) as u32).clamp(x0 + 1, w.max(x0 + 1));
    let y1 = ((face.y + face.height).ceil().max(0.0) as u32).clamp(y0 + 1, h.max(y0 + 1));

    let crop = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    imageops::resize(&crop, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let t = SimilarityTransform::estimate(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112);
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3, "tx = {}", t.tx);
        assert!(t.ty.abs() < 1e-3, "ty = {}", t.ty);
    }

    #[test]
    fn test_half_scale_transform() {
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = SimilarityTransform::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert!((t.a - 0.5).abs() < 0.01, "a = {}, expected ~0.5", t.a);
    }

    #[test]
    fn test_invert_point_roundtrip() {
        let t = SimilarityTransform { a: 0.8, b: 0.3, tx: 5.0, ty: -2.0 };
        let (sx, sy) = (17.0f32, 42.0f32);
        let dx = t.a * sx - t.b * sy + t.tx;
        let dy = t.b * sx + t.a * sy + t.ty;
        let (rx, ry) = t.invert_point(dx, dy).unwrap();
        assert!((rx - sx).abs() < 1e-3 && (ry - sy).abs() < 1e-3);
    }

    #[test]
    fn test_singular_system_has_no_solution() {
        assert_eq!(solve_augmented([[0.0; 5]; 4]), None);
    }

    #[test]
    fn test_align_face_output_size() {
        let image = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let aligned = align_face(&image, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        // A red patch at the source left eye should end up near the reference left eye.
        let mut image = RgbImage::new(200, 200);
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for y in 58..63 {
            for x in 78..83 {
                image.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }

        let aligned = align_face(&image, &src);

        let rx = REFERENCE_LANDMARKS_112[0].0.round() as u32;
        let ry = REFERENCE_LANDMARKS_112[0].1.round() as u32;
        let brightest_red = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y).0[0])
            .max()
            .unwrap();
        assert!(brightest_red > 100, "red near ({rx}, {ry}) = {brightest_red}");
        assert_eq!(aligned.get_pixel(rx, ry).0[2], 0);
    }

    #[test]
    fn test_crop_face_clamps_to_image() {
        let image = RgbImage::from_pixel(50, 40, Rgb([9, 9, 9]));
        let face = BoundingBox {
            x: -20.0,
            y: 30.0,
            width: 100.0,
            height: 100.0,
            confidence: 0.9,
            landmarks: None,
        };
        let crop = crop_face(&image, &face);
        assert_eq!(crop.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert_eq!(crop.get_pixel(0, 0), &Rgb([9, 9, 9]));
    }
}
