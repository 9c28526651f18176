use crate::{
    config::ModelConfig,
    detector::{Detection, Detector, DetectorError},
};
use ndarray::{s, Array, ArrayViewD, Axis, Ix4};
use opencv::{core::Mat, prelude::*};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

const NMS_IOU_THRESHOLD: f32 = 0.7;

/// ONNX-backed PPE detector.
///
/// Sessions are built once at startup; a small round-robin pool keeps
/// concurrent requests from serializing on a single session. The handle is
/// read-only after construction and shared across all invocations.
pub struct OrtDetector {
    sessions: Arc<Vec<Mutex<Session>>>,
    counter: AtomicUsize,
}

impl OrtDetector {
    pub fn new(config: &ModelConfig) -> anyhow::Result<Self> {
        ort::init().commit()?;

        let sessions = (0..config.num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(config.get_model_path())?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            instances = config.num_instances,
            model = %config.get_model_path().display(),
            "created ONNX sessions"
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: AtomicUsize::new(0),
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ndarray::ArrayD<f32>, DetectorError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| DetectorError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("running inference on session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectorError::InputTensor(e.to_string()))?;
        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InvalidOutput(e.to_string()))?;

        let ix = shape.to_ixdyn();
        ndarray::ArrayD::from_shape_vec(ix, data.to_vec())
            .map_err(|e| DetectorError::InvalidOutput(format!("invalid tensor shape: {}", e)))
    }
}

impl Detector for OrtDetector {
    fn infer(&self, frame: &Mat, confidence: f32) -> Result<Vec<Detection>, DetectorError> {
        let input = mat_to_input(frame)?;
        let outputs = self.run_inference(&input)?;
        let boxes = decode_output(outputs.view(), confidence)?;
        Ok(non_max_suppression(boxes))
    }
}

/// Converts a BGR frame into a normalized `(1, 3, H, W)` RGB tensor.
fn mat_to_input(frame: &Mat) -> Result<Array<f32, Ix4>, DetectorError> {
    let height = frame.rows();
    let width = frame.cols();
    if height <= 0 || width <= 0 {
        return Err(DetectorError::InputTensor("empty frame".into()));
    }

    let continuous;
    let mat = if frame.is_continuous() {
        frame
    } else {
        continuous = frame
            .try_clone()
            .map_err(|e| DetectorError::InputTensor(e.to_string()))?;
        &continuous
    };
    let data = mat
        .data_bytes()
        .map_err(|e| DetectorError::InputTensor(e.to_string()))?;
    if data.len() != (height as usize) * (width as usize) * 3 {
        return Err(DetectorError::InputTensor(format!(
            "expected 3-channel frame, got {} bytes for {}x{}",
            data.len(),
            width,
            height
        )));
    }

    let mut input = Array::zeros((1, 3, height as usize, width as usize));
    for y in 0..height as usize {
        for x in 0..width as usize {
            let offset = (y * width as usize + x) * 3;
            let (b, g, r) = (data[offset], data[offset + 1], data[offset + 2]);
            input[[0, 0, y, x]] = f32::from(r) / 255.;
            input[[0, 1, y, x]] = f32::from(g) / 255.;
            input[[0, 2, y, x]] = f32::from(b) / 255.;
        }
    }
    Ok(input)
}

/// Decodes YOLO-style `(1, 4 + classes, boxes)` output into candidate boxes
/// above the confidence threshold, in model-input pixel coordinates.
fn decode_output(output: ArrayViewD<'_, f32>, confidence: f32) -> Result<Vec<Detection>, DetectorError> {
    let shape = output.shape();
    if shape.len() != 3 || shape[1] < 5 {
        return Err(DetectorError::InvalidOutput(format!(
            "unexpected output shape {:?}",
            shape
        )));
    }

    let view: ndarray::ArrayView2<'_, f32> = output.slice(s![0, .., ..]);
    let mut boxes = Vec::new();

    for col in view.axis_iter(Axis(1)) {
        let (class_id, prob) = col
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
            .ok_or_else(|| DetectorError::InvalidOutput("output row has no class scores".into()))?;

        if prob < confidence {
            continue;
        }

        let (xc, yc, w, h) = (col[0], col[1], col[2], col[3]);
        boxes.push(Detection {
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
            class_id: class_id as u32,
            confidence: prob,
        });
    }

    Ok(boxes)
}

fn intersection(a: &Detection, b: &Detection) -> f32 {
    let w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.);
    let h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.);
    w * h
}

fn union(a: &Detection, b: &Detection) -> f32 {
    (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - intersection(a, b)
}

/// Greedy non-maximum suppression at a fixed IoU threshold.
fn non_max_suppression(mut boxes: Vec<Detection>) -> Vec<Detection> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut result = Vec::new();

    while let Some(best) = boxes.first().copied() {
        result.push(best);
        boxes.retain(|other| intersection(&best, other) / union(&best, other) < NMS_IOU_THRESHOLD);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use opencv::core::{Scalar, CV_8UC3};

    fn boxed(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Detection {
        Detection {
            x1,
            y1,
            x2,
            y2,
            class_id: 0,
            confidence,
        }
    }

    #[test]
    fn mat_to_input_normalizes_and_reorders_channels() {
        // Solid BGR (255, 0, 0): pure blue.
        let frame =
            Mat::new_rows_cols_with_default(4, 6, CV_8UC3, Scalar::new(255.0, 0.0, 0.0, 0.0))
                .unwrap();

        let input = mat_to_input(&frame).unwrap();

        assert_eq!(input.shape(), &[1, 3, 4, 6]);
        assert_eq!(input[[0, 0, 0, 0]], 0.0); // R
        assert_eq!(input[[0, 1, 0, 0]], 0.0); // G
        assert_eq!(input[[0, 2, 0, 0]], 1.0); // B
    }

    #[test]
    fn decode_output_applies_confidence_threshold_and_argmax() {
        // Two candidate boxes, 2 classes: attrs are (xc, yc, w, h, c0, c1).
        let mut raw = Array3::<f32>::zeros((1, 6, 2));
        // Box 0: centered at (100, 100), 40x20, class 1 at 0.9.
        raw[[0, 0, 0]] = 100.;
        raw[[0, 1, 0]] = 100.;
        raw[[0, 2, 0]] = 40.;
        raw[[0, 3, 0]] = 20.;
        raw[[0, 4, 0]] = 0.1;
        raw[[0, 5, 0]] = 0.9;
        // Box 1: below threshold.
        raw[[0, 4, 1]] = 0.3;
        raw[[0, 5, 1]] = 0.2;

        let boxes = decode_output(raw.view().into_dyn(), 0.5).unwrap();

        assert_eq!(boxes.len(), 1);
        let det = boxes[0];
        assert_eq!(det.class_id, 1);
        assert_eq!(det.confidence, 0.9);
        assert_eq!((det.x1, det.y1, det.x2, det.y2), (80., 90., 120., 110.));
    }

    #[test]
    fn decode_output_rejects_unexpected_shape() {
        let raw = Array3::<f32>::zeros((1, 3, 2));
        assert!(decode_output(raw.view().into_dyn(), 0.5).is_err());
    }

    #[test]
    fn nms_keeps_highest_confidence_among_overlaps() {
        let boxes = vec![
            boxed(0., 0., 100., 100., 0.8),
            boxed(5., 5., 105., 105., 0.95),
            boxed(300., 300., 400., 400., 0.6),
        ];

        let kept = non_max_suppression(boxes);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.95);
        assert_eq!(kept[1].confidence, 0.6);
    }

    #[test]
    fn nms_keeps_disjoint_boxes() {
        let boxes = vec![
            boxed(0., 0., 10., 10., 0.9),
            boxed(50., 50., 60., 60., 0.8),
        ];

        assert_eq!(non_max_suppression(boxes).len(), 2);
    }
}
