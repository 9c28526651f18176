use crate::{
    cv::{self, CvError},
    detector::{Detector, DetectorError},
    routes::{resolve_confidence, InvalidConfidence},
    server::SharedState,
    telemetry::MeteredDetector,
};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use opencv::prelude::*;
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct DetectImageParams {
    confidence: Option<f32>,
}

#[derive(Error, Debug)]
pub enum DetectImageError {
    #[error(transparent)]
    InvalidConfidence(#[from] InvalidConfidence),
    #[error("image decode failed: {0}")]
    Decode(CvError),
    #[error("detector failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("image processing failed: {0}")]
    Cv(#[from] CvError),
    #[error("detection task failed: {0}")]
    Task(String),
    #[error("HTTP builder failed: {0}")]
    HttpBuilder(String),
}

impl IntoResponse for DetectImageError {
    fn into_response(self) -> Response {
        let status = match self {
            DetectImageError::InvalidConfidence(_) => StatusCode::BAD_REQUEST,
            DetectImageError::Decode(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Runs the detector on one uploaded image and returns it annotated.
#[instrument(skip(state, image_data))]
pub async fn detect_image(
    State(state): State<SharedState>,
    Query(params): Query<DetectImageParams>,
    image_data: Bytes,
) -> Result<Response, DetectImageError> {
    state.metrics.record_request("detect_image");

    let confidence = resolve_confidence(params.confidence, state.pipeline.confidence_threshold)?;

    let detector = MeteredDetector::new(
        state.detector.clone(),
        state.metrics.clone(),
        "detect_image",
    );
    let labels = state.labels.clone();
    let pipeline = state.pipeline.clone();

    let annotated = tokio::task::spawn_blocking(move || {
        let mut frame = cv::decode_image(&image_data).map_err(DetectImageError::Decode)?;
        let frame_width = frame.cols();
        let frame_height = frame.rows();

        let resized = cv::resize_exact(&frame, pipeline.resize_width, pipeline.resize_height)?;

        let detections = detector.infer(&resized, confidence)?;

        // Map boxes from model-input space back onto the original image.
        let sx = frame_width as f32 / pipeline.resize_width as f32;
        let sy = frame_height as f32 / pipeline.resize_height as f32;
        let labeled: Vec<_> = detections
            .iter()
            .map(|d| labels.resolve(&d.scaled(sx, sy)))
            .collect();

        cv::annotate(&mut frame, &labeled)?;
        Ok::<_, DetectImageError>(cv::encode_jpg(&frame)?)
    })
    .await
    .map_err(|e| DetectImageError::Task(e.to_string()))??;

    Response::builder()
        .header(header::CONTENT_TYPE, "image/jpeg")
        .body(axum::body::Body::from(annotated))
        .map_err(|e| DetectImageError::HttpBuilder(e.to_string()))
}
