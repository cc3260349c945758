//! SCRFD face detector via ONNX Runtime.
//!
//! The image is letterboxed into a square 640×640 RGB input. Each of the
//! three stride levels yields per-anchor scores, box distances and five
//! landmark offsets; survivors are merged with non-maximum suppression.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
const REQUIRED_OUTPUTS: usize = 9;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("detector model has {0} outputs, expected 9 (score/bbox/kps for 3 strides)")]
    UnexpectedOutputs(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Placement of the source image inside the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    offset_x: u32,
    offset_y: u32,
    scaled_w: u32,
    scaled_h: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let scaled_w = ((width as f32 * scale).round() as u32).clamp(1, target);
        let scaled_h = ((height as f32 * scale).round() as u32).clamp(1, target);
        Self {
            scale,
            offset_x: (target - scaled_w) / 2,
            offset_y: (target - scaled_h) / 2,
            scaled_w,
            scaled_h,
        }
    }

    /// Model-input coordinates back to source-image coordinates.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }

    /// Resize `image` into a padded square canvas. Padding is the pixel
    /// mean, so it normalizes to zero.
    fn apply(&self, image: &RgbImage, target: u32) -> RgbImage {
        let pad = PIXEL_MEAN.round() as u8;
        let mut canvas = RgbImage::from_pixel(target, target, Rgb([pad, pad, pad]));
        let scaled = imageops::resize(image, self.scaled_w, self.scaled_h, FilterType::Triangle);
        imageops::overlay(&mut canvas, &scaled, self.offset_x as i64, self.offset_y as i64);
        canvas
    }
}

/// Output tensor positions for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Map model outputs to strides.
///
/// Exports either name their tensors `score_8`, `bbox_16`, `kps_32`, ... or
/// use opaque numeric names in the standard order (scores, boxes, keypoints,
/// each for strides 8/16/32).
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let position = |prefix: &str, stride: u32| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let by_name = |i: usize| -> Option<StrideOutputs> {
        let stride = STRIDES[i];
        Some(StrideOutputs {
            score: position("score", stride)?,
            bbox: position("bbox", stride)?,
            kps: position("kps", stride)?,
        })
    };

    match (by_name(0), by_name(1), by_name(2)) {
        (Some(s8), Some(s16), Some(s32)) => [s8, s16, s32],
        _ => {
            tracing::debug!(?names, "detector outputs not named by stride; using positional layout");
            std::array::from_fn(|i| StrideOutputs {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < REQUIRED_OUTPUTS {
            return Err(DetectorError::UnexpectedOutputs(names.len()));
        }
        let outputs = map_outputs(&names);

        tracing::info!(path = %model_path.display(), outputs = ?names, "loaded face detector");

        Ok(Self { session, outputs })
    }

    /// Detect faces, most confident first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let letterbox = Letterbox::fit(width, height, INPUT_SIZE);
        let input = to_tensor(&letterbox.apply(image, INPUT_SIZE));
        let results = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in STRIDES.iter().enumerate() {
            let slots = self.outputs[level];
            let extract = |index: usize, what: &str| {
                results[index]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} at stride {stride}: {e}")))
            };
            let scores = extract(slots.score, "scores")?;
            let boxes = extract(slots.bbox, "boxes")?;
            let kps = extract(slots.kps, "landmarks")?;
            candidates.extend(decode_level(scores, boxes, kps, stride, &letterbox));
        }

        let faces = suppress(candidates, NMS_IOU_THRESHOLD);
        tracing::debug!(faces = faces.len(), "face detection complete");
        Ok(faces)
    }
}

/// NCHW tensor normalized with the detector's mean and std.
fn to_tensor(canvas: &RgbImage) -> Array4<f32> {
    let (w, h) = canvas.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, Rgb(px)) in canvas.enumerate_pixels() {
        for (c, &v) in px.iter().enumerate() {
            tensor[[0, c, y as usize, x as usize]] = (v as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    tensor
}

/// Decode one stride level into source-image boxes above the score threshold.
fn decode_level(scores: &[f32], boxes: &[f32], kps: &[f32], stride: u32, letterbox: &Letterbox) -> Vec<BoundingBox> {
    let cols = (INPUT_SIZE / stride) as usize;
    let rows = cols;
    let step = stride as f32;

    (0..rows * cols * ANCHORS_PER_CELL)
        .filter_map(|anchor| {
            let score = *scores.get(anchor)?;
            if score <= SCORE_THRESHOLD {
                return None;
            }
            let cell = anchor / ANCHORS_PER_CELL;
            let cx = (cell % cols) as f32 * step;
            let cy = (cell / cols) as f32 * step;

            let d = boxes.get(anchor * 4..anchor * 4 + 4)?;
            let (x1, y1) = letterbox.to_source(cx - d[0] * step, cy - d[1] * step);
            let (x2, y2) = letterbox.to_source(cx + d[2] * step, cy + d[3] * step);

            let landmarks = kps.get(anchor * 10..anchor * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.to_source(cx + k[2 * i] * step, cy + k[2 * i + 1] * step))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = w * h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}

/// Greedy non-maximum suppression. Output is sorted by confidence, descending.
fn suppress(mut candidates: Vec<BoundingBox>, threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= threshold) {
            kept.push(candidate);
        }
    }
    kept
}
