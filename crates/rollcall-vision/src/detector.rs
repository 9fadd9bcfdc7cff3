//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB frame into the 640×640 model input, decodes the three
//! anchor-free stride heads, and suppresses overlaps with NMS.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::BoundingBox;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download det_10g.onnx from insightface")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// How the frame was fitted into the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    scaled_width: usize,
    scaled_height: usize,
}

impl Letterbox {
    fn fit(width: usize, height: usize, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let scaled_width = ((width as f32 * scale).round() as usize).clamp(1, target);
        let scaled_height = ((height as f32 * scale).round() as usize).clamp(1, target);
        Self {
            scale,
            pad_x: (target - scaled_width) as f32 / 2.0,
            pad_y: (target - scaled_height) as f32 / 2.0,
            scaled_width,
            scaled_height,
        }
    }

    /// Model-input coordinates back to frame coordinates.
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    input_size: usize,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps for 3 strides), model has {}",
                output_names.len()
            )));
        }

        let outputs = map_outputs(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            mapping = ?outputs,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            input_size: SCRFD_INPUT_SIZE,
            outputs,
        })
    }

    /// Detect faces in an RGB image, highest confidence first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = self.preprocess(image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let slots = self.outputs[level];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let scores = extract(slots.score, "scores")?;
            let boxes = extract(slots.bbox, "bboxes")?;
            let kps = extract(slots.kps, "landmarks")?;

            candidates.extend(decode_stride(
                scores,
                boxes,
                kps,
                stride,
                self.input_size,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection");
        Ok(faces)
    }

    /// Letterbox into a NCHW float tensor (RGB channel order).
    fn preprocess(&self, image: &RgbImage) -> (Array4<f32>, Letterbox) {
        let size = self.input_size;
        let letterbox = Letterbox::fit(image.width() as usize, image.height() as usize, size);
        let resized = imageops::resize(
            image,
            letterbox.scaled_width as u32,
            letterbox.scaled_height as u32,
            FilterType::Triangle,
        );

        // Padding is zero after normalization.
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        let off_x = letterbox.pad_x.floor() as usize;
        let off_y = letterbox.pad_y.floor() as usize;
        for (x, y, px) in resized.enumerate_pixels() {
            let (tx, ty) = (off_x + x as usize, off_y + y as usize);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (px.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (tensor, letterbox)
    }
}

/// Map output tensors to stride levels.
///
/// Exports that name their heads `score_8`, `bbox_16`, `kps_32`, ... are
/// mapped by name; anything else uses the standard positional layout
/// `[scores 8/16/32, bboxes 8/16/32, kps 8/16/32]`.
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let position = |head: &str, stride: usize| {
        let wanted = format!("{head}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let by_name: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideOutputs {
                score: position("score", stride)?,
                bbox: position("bbox", stride)?,
                kps: position("kps", stride)?,
            })
        })
        .collect();

    match by_name {
        Some(levels) => [levels[0], levels[1], levels[2]],
        None => std::array::from_fn(|level| StrideOutputs {
            score: level,
            bbox: level + 3,
            kps: level + 6,
        }),
    }
}

/// Decode one stride head into frame-space boxes above `threshold`.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = input_size / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors.min(scores.len()))
        .filter(|&i| scores[i] > threshold)
        .filter_map(|i| {
            let cell = i / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * step;
            let cy = (cell / grid) as f32 * step;

            let d = boxes.get(i * 4..i * 4 + 4)?;
            let (x1, y1) = letterbox.to_frame(cx - d[0] * step, cy - d[1] * step);
            let (x2, y2) = letterbox.to_frame(cx + d[2] * step, cy + d[3] * step);

            let landmarks = kps.get(i * 10..i * 10 + 10).map(|k| {
                std::array::from_fn(|p| {
                    letterbox.to_frame(cx + k[p * 2] * step, cy + k[p * 2 + 1] * step)
                })
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: scores[i],
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let iy = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = ix * iy;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let result = nms(
            vec![
                make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
                make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        let confidences: Vec<f32> = result.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_maps_back_to_frame() {
        let lb = Letterbox::fit(320, 240, 640);
        assert_eq!((lb.scaled_width, lb.scaled_height), (640, 480));
        assert_eq!(lb.pad_y, 80.0);

        let (x, y) = lb.to_frame(100.0 * lb.scale + lb.pad_x, 50.0 * lb.scale + lb.pad_y);
        assert!((x - 100.0).abs() < 0.01 && (y - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_map_outputs_by_name() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mapping = map_outputs(&names);
        assert_eq!(mapping[0], StrideOutputs { score: 2, bbox: 0, kps: 1 });
        assert_eq!(mapping[2], StrideOutputs { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_map_outputs_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (400 + i).to_string()).collect();
        let mapping = map_outputs(&names);
        assert_eq!(mapping[1], StrideOutputs { score: 1, bbox: 4, kps: 7 });
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        // stride 32 on a 64px input: 2x2 grid, 8 anchors. Light up anchor 3
        // (cell 1 → column 1, row 0).
        let mut scores = vec![0.0f32; 8];
        scores[3] = 0.9;
        let mut boxes = vec![0.0f32; 32];
        boxes[12..16].copy_from_slice(&[0.5, 0.5, 0.5, 0.5]);
        let kps = vec![0.0f32; 80];
        let lb = Letterbox::fit(64, 64, 64);

        let faces = decode_stride(&scores, &boxes, &kps, 32, 64, &lb, 0.5);
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        assert_eq!((f.x, f.y, f.width, f.height), (16.0, -16.0, 32.0, 32.0));
        assert_eq!(f.landmarks.unwrap()[0], (32.0, 0.0));
    }

    #[test]
    fn test_letterbox_wide_frame() {
        let lb = Letterbox::fit(64, 32, 64);
        assert_eq!((lb.scaled_width, lb.scaled_height), (64, 32));
        assert_eq!(lb.pad_y, 16.0);
    }
}
