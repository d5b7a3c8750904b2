//! Ultraface detector on top of tract.
//!
use std::path::Path;

use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::s;
use tract_onnx::prelude::*;

use crate::utils::{cached_file, model_cache_dir};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

const MODEL_BASE_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models";

/// Bounding box `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`.
///
/// Coordinates are relative to the image size, i.e. in `[0, 1]`.
pub type Bbox = [f32; 4];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: Bbox,
    pub confidence: f32,
}

pub trait InferModel {
    fn run(&self, input: &RgbImage) -> Result<Vec<Detection>>;
}

/// Published input sizes of the Ultraface model.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum UltrafaceVariant {
    #[value(name = "320x240")]
    W320H240,
    #[value(name = "640x480")]
    W640H480,
}

impl UltrafaceVariant {
    pub fn input_size(&self) -> (u32, u32) {
        match self {
            UltrafaceVariant::W320H240 => (320, 240),
            UltrafaceVariant::W640H480 => (640, 480),
        }
    }

    pub fn filename(&self) -> &'static str {
        match self {
            UltrafaceVariant::W320H240 => "version-RFB-320.onnx",
            UltrafaceVariant::W640H480 => "version-RFB-640.onnx",
        }
    }

    pub fn url(&self) -> String {
        format!("{}/{}", MODEL_BASE_URL, self.filename())
    }
}

pub struct UltrafaceModel {
    model: NnModel,
    width: u32,
    height: u32,
    max_iou: f32,
    min_confidence: f32,
}

impl UltrafaceModel {
    /// Load the model, downloading it to the cache directory on first use.
    pub async fn new(variant: UltrafaceVariant, max_iou: f32, min_confidence: f32) -> Result<Self> {
        let filepath = cached_file(&variant.url(), &model_cache_dir()?, variant.filename()).await?;
        Self::from_path(filepath, variant, max_iou, min_confidence)
    }

    /// Load the model from an ONNX file.
    pub fn from_path(
        filepath: impl AsRef<Path>,
        variant: UltrafaceVariant,
        max_iou: f32,
        min_confidence: f32,
    ) -> Result<Self> {
        let filepath = filepath.as_ref();
        let (width, height) = variant.input_size();
        let input_fact = InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, 3, height as usize, width as usize),
        );
        let model = tract_onnx::onnx()
            .model_for_path(filepath)
            .with_context(|| format!("failed to load model {}", filepath.display()))?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?;
        log::info!("Loaded model {}", filepath.display());

        Ok(Self {
            model,
            width,
            height,
            max_iou,
            min_confidence,
        })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            input,
            self.width,
            self.height,
            image::imageops::FilterType::Triangle,
        );

        // Ultraface was trained on pixels normalized to roughly [-1, 1]
        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, c, y, x)| (resized[(x as _, y as _)][c] as f32 - 127.0) / 128.0,
        )
        .into()
    }
}

impl InferModel for UltrafaceModel {
    fn run(&self, input: &RgbImage) -> Result<Vec<Detection>> {
        let raw_nn_out = self.model.run(tvec!(self.preproc(input).into()))?;
        let (scores, boxes) = match &raw_nn_out[..] {
            [scores, boxes, ..] => (scores, boxes),
            _ => bail!("expected scores and boxes from model, got {} outputs", raw_nn_out.len()),
        };

        let (confidences, bboxes) =
            decode_outputs(scores.to_array_view::<f32>()?, boxes.to_array_view::<f32>()?)?;

        Ok(select_detections(
            &confidences,
            &bboxes,
            self.min_confidence,
            self.max_iou,
        ))
    }
}

/// Split the raw model outputs into face confidences and boxes, one per anchor.
///
/// Scores have the shape `[1, num_anchors, 2]` as (background, face) and boxes the shape
/// `[1, num_anchors, 4]`.
fn decode_outputs(
    scores: tract_ndarray::ArrayViewD<f32>,
    boxes: tract_ndarray::ArrayViewD<f32>,
) -> Result<(Vec<f32>, Vec<Bbox>)> {
    if !matches!(scores.shape(), [1, _, 2]) {
        bail!("unexpected shape of scores: {:?}", scores.shape());
    }
    if !matches!(boxes.shape(), [1, _, 4]) {
        bail!("unexpected shape of boxes: {:?}", boxes.shape());
    }
    if scores.shape()[1] != boxes.shape()[1] {
        bail!(
            "got {} scores but {} boxes",
            scores.shape()[1],
            boxes.shape()[1]
        );
    }

    let confidences = scores.slice(s![0, .., 1]).to_vec();
    let bboxes = boxes
        .iter()
        .copied()
        .collect::<Vec<_>>()
        .chunks_exact(4)
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect();

    Ok((confidences, bboxes))
}

/// Keep confident boxes and drop those overlapping a more confident one.
///
/// The result is sorted by descending confidence.
pub fn select_detections(
    confidences: &[f32],
    bboxes: &[Bbox],
    min_confidence: f32,
    max_iou: f32,
) -> Vec<Detection> {
    let mut candidates: Vec<Detection> = confidences
        .iter()
        .zip(bboxes.iter())
        .filter(|(confidence, _)| **confidence > min_confidence)
        .map(|(&confidence, &bbox)| Detection { bbox, confidence })
        .collect();

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    non_maximum_suppression(candidates, max_iou)
}

/// Run non-maximum-suppression on candidate detections sorted by descending confidence.
///
/// A candidate is selected if its IoU with every already selected detection is at most
/// `max_iou`.
fn non_maximum_suppression(sorted_candidates: Vec<Detection>, max_iou: f32) -> Vec<Detection> {
    let mut selected: Vec<Detection> = Vec::new();

    for candidate in sorted_candidates {
        if selected
            .iter()
            .all(|chosen| iou(&candidate.bbox, &chosen.bbox) <= max_iou)
        {
            selected.push(candidate);
        }
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &Bbox, bbox_b: &Bbox) -> f32 {
    // For disjoint boxes the overlap box is inverted and has zero area
    let overlap_box: Bbox = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Area enclosed by a bounding box, zero if the corners are swapped.
fn bbox_area(bbox: &Bbox) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}

#[cfg(test)]
mod test {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{a} != {b}");
    }

    #[test]
    fn iou_of_identical_disjoint_and_half_overlapping_boxes() {
        let bbox = [0.1, 0.1, 0.5, 0.5];
        assert_close(iou(&bbox, &bbox), 1.0);
        assert_close(iou(&bbox, &[0.6, 0.6, 0.9, 0.9]), 0.0);
        // Overlap 0.5 of each box: 0.5 / (1 + 1 - 0.5)
        assert_close(iou(&[0.0, 0.0, 1.0, 1.0], &[0.5, 0.0, 1.5, 1.0]), 1.0 / 3.0);
    }

    #[test]
    fn swapped_corners_have_no_area() {
        assert_eq!(bbox_area(&[0.5, 0.5, 0.1, 0.9]), 0.0);
        assert_close(bbox_area(&[0.0, 0.0, 0.5, 0.2]), 0.1);
    }

    #[test]
    fn selects_most_confident_of_overlapping_boxes() {
        let confidences = [0.8, 0.95, 0.3, 0.9];
        let bboxes = [
            [0.10, 0.10, 0.40, 0.40],
            [0.12, 0.11, 0.41, 0.42],
            [0.60, 0.60, 0.90, 0.90],
            [0.60, 0.10, 0.90, 0.40],
        ];

        let detections = select_detections(&confidences, &bboxes, 0.5, 0.5);

        assert_eq!(
            detections,
            vec![
                Detection {
                    bbox: bboxes[1],
                    confidence: 0.95
                },
                Detection {
                    bbox: bboxes[3],
                    confidence: 0.9
                },
            ]
        );
    }

    #[test]
    fn nothing_selected_below_min_confidence() {
        let detections = select_detections(&[0.2, 0.4], &[[0.0, 0.0, 1.0, 1.0]; 2], 0.5, 0.5);
        assert!(detections.is_empty());
    }

    fn outputs(
        scores: &[usize],
        boxes: &[usize],
    ) -> (tract_ndarray::ArrayD<f32>, tract_ndarray::ArrayD<f32>) {
        (
            tract_ndarray::ArrayD::zeros(tract_ndarray::IxDyn(scores)),
            tract_ndarray::ArrayD::zeros(tract_ndarray::IxDyn(boxes)),
        )
    }

    #[test]
    fn decodes_face_scores_and_boxes_per_anchor() -> Result<()> {
        let scores = tract_ndarray::Array3::from_shape_vec((1, 2, 2), vec![0.9, 0.1, 0.2, 0.8])?;
        let boxes = tract_ndarray::Array3::from_shape_vec(
            (1, 2, 4),
            vec![0.1, 0.1, 0.4, 0.4, 0.5, 0.5, 0.9, 0.9],
        )?;

        let (confidences, bboxes) =
            decode_outputs(scores.into_dyn().view(), boxes.into_dyn().view())?;

        assert_eq!(confidences, vec![0.1, 0.8]);
        assert_eq!(bboxes, vec![[0.1, 0.1, 0.4, 0.4], [0.5, 0.5, 0.9, 0.9]]);
        Ok(())
    }

    #[test]
    fn rejects_outputs_of_unexpected_shape() {
        // Single class score, no face column
        let (scores, boxes) = outputs(&[1, 10, 1], &[1, 10, 4]);
        assert!(decode_outputs(scores.view(), boxes.view()).is_err());

        // Flat scores
        let (scores, boxes) = outputs(&[20], &[1, 10, 4]);
        assert!(decode_outputs(scores.view(), boxes.view()).is_err());

        // Boxes with the wrong number of coordinates
        let (scores, boxes) = outputs(&[1, 10, 2], &[1, 10, 5]);
        assert!(decode_outputs(scores.view(), boxes.view()).is_err());

        // Batch of two
        let (scores, boxes) = outputs(&[2, 10, 2], &[2, 10, 4]);
        assert!(decode_outputs(scores.view(), boxes.view()).is_err());
    }

    #[test]
    fn rejects_mismatched_anchor_counts() {
        let (scores, boxes) = outputs(&[1, 10, 2], &[1, 12, 4]);
        let err = decode_outputs(scores.view(), boxes.view()).unwrap_err();
        assert_eq!(err.to_string(), "got 10 scores but 12 boxes");
    }

    #[test]
    fn variants_map_to_model_files() {
        assert_eq!(UltrafaceVariant::W320H240.input_size(), (320, 240));
        assert!(UltrafaceVariant::W640H480
            .url()
            .ends_with("/version-RFB-640.onnx"));
    }
}
