use opencv::core::Mat;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("failed to prepare model input: {0}")]
    InputTensor(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("invalid model output: {0}")]
    InvalidOutput(String),
}

/// One detected object, in the coordinate space of the frame that was
/// passed to [`Detector::infer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_id: u32,
    pub confidence: f32,
}

impl Detection {
    /// Rescales the box into another coordinate space, e.g. from the model
    /// input size back to the original frame dimensions.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
            class_id: self.class_id,
            confidence: self.confidence,
        }
    }
}

/// Stateless frame -> detections function backed by a pretrained model.
///
/// Loaded once at startup and shared read-only across all invocations; it
/// holds no mutable per-call state, so one handle serves concurrent callers.
pub trait Detector: Send + Sync {
    fn infer(&self, frame: &Mat, confidence: f32) -> Result<Vec<Detection>, DetectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_maps_boxes_between_coordinate_spaces() {
        let det = Detection {
            x1: 10.0,
            y1: 20.0,
            x2: 30.0,
            y2: 40.0,
            class_id: 2,
            confidence: 0.9,
        };

        let scaled = det.scaled(2.0, 0.5);

        assert_eq!(scaled.x1, 20.0);
        assert_eq!(scaled.y1, 10.0);
        assert_eq!(scaled.x2, 60.0);
        assert_eq!(scaled.y2, 20.0);
        assert_eq!(scaled.class_id, 2);
        assert_eq!(scaled.confidence, 0.9);
    }
}
