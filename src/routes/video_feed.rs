use crate::{server::SharedState, sink::FRAME_BOUNDARY};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::stream;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum VideoFeedError {
    #[error("no camera is configured on this deployment")]
    CameraDisabled,
    #[error("HTTP builder failed: {0}")]
    HttpBuilder(String),
}

impl IntoResponse for VideoFeedError {
    fn into_response(self) -> Response {
        let status = match self {
            VideoFeedError::CameraDisabled => StatusCode::SERVICE_UNAVAILABLE,
            VideoFeedError::HttpBuilder(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Live MJPEG preview of the webcam, annotated with the detections most
/// recently published by the background worker.
#[instrument(skip(state))]
pub async fn video_feed(State(state): State<SharedState>) -> Result<Response, VideoFeedError> {
    state.metrics.record_request("video_feed");

    let camera = state.camera.clone().ok_or(VideoFeedError::CameraDisabled)?;
    let delay_ms = state.camera_config.get_stream_delay_ms();

    let stream = stream::unfold(camera, move |camera| async move {
        sleep(Duration::from_millis(delay_ms)).await;
        match camera.annotated_jpeg().await {
            Ok(Some(jpg)) => {
                let part_header = format!(
                    "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                    FRAME_BOUNDARY,
                    jpg.len()
                );
                let mut body = part_header.into_bytes();
                body.extend_from_slice(&jpg);
                body.extend_from_slice(b"\r\n");
                Some((
                    Ok::<_, std::convert::Infallible>(Bytes::from(body)),
                    camera,
                ))
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!("ending live feed: {}", e);
                None
            }
        }
    });

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", FRAME_BOUNDARY),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| VideoFeedError::HttpBuilder(e.to_string()))
}
