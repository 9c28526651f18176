use crate::{
    decoder::{DecodeError, VideoDecoder},
    pipeline,
    routes::{resolve_confidence, InvalidConfidence},
    server::SharedState,
    sink::{ChannelSink, FRAME_BOUNDARY},
    telemetry::MeteredDetector,
};
use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct DetectVideoParams {
    confidence: Option<f32>,
    export: Option<bool>,
}

#[derive(Error, Debug)]
pub enum DetectVideoError {
    #[error("re-encoded video export is unavailable in cloud-safe mode; annotated frames are streamed instead")]
    ExportUnavailable,
    #[error(transparent)]
    InvalidConfidence(#[from] InvalidConfidence),
    #[error("failed to spool upload to disk: {0}")]
    Spool(#[from] std::io::Error),
    #[error("could not open uploaded video: {0}")]
    SourceOpen(#[from] DecodeError),
    #[error("detection task failed: {0}")]
    Task(String),
    #[error("HTTP builder failed: {0}")]
    HttpBuilder(String),
}

impl IntoResponse for DetectVideoError {
    fn into_response(self) -> Response {
        let status = match self {
            DetectVideoError::ExportUnavailable => StatusCode::NOT_IMPLEMENTED,
            DetectVideoError::InvalidConfidence(_) => StatusCode::BAD_REQUEST,
            DetectVideoError::SourceOpen(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Uploaded video spooled to disk so the decoder can seek it; the file is
/// removed when the guard drops, on every exit path.
struct SpooledVideo {
    path: PathBuf,
}

impl SpooledVideo {
    fn write(data: &[u8]) -> std::io::Result<Self> {
        let path = std::env::temp_dir().join(format!(
            "ppe_upload_{}_{:08x}.video",
            std::process::id(),
            rand::random::<u32>()
        ));
        std::fs::write(&path, data)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SpooledVideo {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("failed to remove spooled upload {:?}: {}", self.path, e);
        }
    }
}

/// Runs the frame sampling pipeline over an uploaded video and streams the
/// annotated frames back as a multipart JPEG preview.
#[instrument(skip(state, video_data))]
pub async fn detect_video(
    State(state): State<SharedState>,
    Query(params): Query<DetectVideoParams>,
    video_data: Bytes,
) -> Result<Response, DetectVideoError> {
    state.metrics.record_request("detect_video");

    if params.export.unwrap_or(false) {
        return Err(DetectVideoError::ExportUnavailable);
    }

    let mut config = state.pipeline.clone();
    config.confidence_threshold =
        resolve_confidence(params.confidence, config.confidence_threshold)?;

    // Spooling and opening both touch the disk; keep them off the async
    // executor. Opening before responding means a corrupt or unsupported
    // upload fails the request instead of silently truncating the stream.
    let (decoder, spool) = tokio::task::spawn_blocking(move || {
        let spool = SpooledVideo::write(&video_data)?;
        let decoder = VideoDecoder::open(spool.path())?;
        Ok::<_, DetectVideoError>((decoder, spool))
    })
    .await
    .map_err(|e| DetectVideoError::Task(e.to_string()))??;

    let detector = MeteredDetector::new(
        state.detector.clone(),
        state.metrics.clone(),
        "detect_video",
    );
    let labels = state.labels.clone();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::task::spawn_blocking(move || {
        let _spool = spool;
        let mut sink = ChannelSink::new(tx);
        match pipeline::process(decoder, &detector, &labels, &mut sink, &config) {
            Ok(summary) => tracing::info!(
                frames_seen = summary.frames_seen,
                frames_processed = summary.frames_processed,
                "video processed"
            ),
            Err(e) => tracing::error!("video processing aborted: {}", e),
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>);

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", FRAME_BOUNDARY),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| DetectVideoError::HttpBuilder(e.to_string()))
}
