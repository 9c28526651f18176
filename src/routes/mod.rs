mod detect_image;
mod detect_video;
mod health;
mod home;
mod metrics;
mod video_feed;

use crate::server::SharedState;
use axum::{
    routing::{get, post, MethodRouter},
    Router,
};
use thiserror::Error;

/// The four modes of the user interface, dispatched by a single explicit
/// selector rather than a conditional chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Home,
    Image,
    Video,
    Webcam,
}

impl Page {
    pub const ALL: [Page; 4] = [Page::Home, Page::Image, Page::Video, Page::Webcam];

    pub fn name(self) -> &'static str {
        match self {
            Page::Home => "home",
            Page::Image => "image",
            Page::Video => "video",
            Page::Webcam => "webcam",
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Page::Home => "/",
            Page::Image => "/detect/image",
            Page::Video => "/detect/video",
            Page::Webcam => "/video_feed",
        }
    }

    fn handler(self) -> MethodRouter<SharedState> {
        match self {
            Page::Home => get(home::home),
            Page::Image => post(detect_image::detect_image),
            Page::Video => post(detect_video::detect_video),
            Page::Webcam => get(video_feed::video_feed),
        }
    }
}

pub fn api_routes() -> Router<SharedState> {
    let mut router = Router::new();
    for page in Page::ALL {
        router = router.route(page.path(), page.handler());
    }
    router
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}

#[derive(Error, Debug, PartialEq)]
#[error("confidence must be in (0, 1], got {0}")]
pub struct InvalidConfidence(pub f32);

/// Applies a per-request confidence override, validated to `(0, 1]`.
fn resolve_confidence(overridden: Option<f32>, default: f32) -> Result<f32, InvalidConfidence> {
    match overridden {
        None => Ok(default),
        Some(value) if value > 0.0 && value <= 1.0 => Ok(value),
        Some(value) => Err(InvalidConfidence(value)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::{
        config::{CameraConfig, PipelineConfig},
        detector::{Detection, Detector, DetectorError},
        labels::{ClassLabels, ColorLabel},
        telemetry::Metrics,
    };
    use opencv::core::Mat;
    use std::sync::Arc;

    pub struct StubDetector {
        pub detections: Vec<Detection>,
    }

    impl Detector for StubDetector {
        fn infer(&self, _frame: &Mat, _confidence: f32) -> Result<Vec<Detection>, DetectorError> {
            Ok(self.detections.clone())
        }
    }

    pub fn shared_state() -> SharedState {
        SharedState {
            detector: Arc::new(StubDetector {
                detections: vec![Detection {
                    x1: 10.0,
                    y1: 10.0,
                    x2: 100.0,
                    y2: 200.0,
                    class_id: 0,
                    confidence: 0.9,
                }],
            }),
            labels: Arc::new(ClassLabels::from_labels(vec![ColorLabel {
                label: "helmet".into(),
                red: 0,
                green: 200,
                blue: 0,
            }])),
            pipeline: PipelineConfig::default(),
            camera: None,
            camera_config: CameraConfig::default(),
            metrics: Arc::new(Metrics::new()),
        }
    }
}
