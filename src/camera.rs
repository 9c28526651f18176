use crate::{
    config::{CameraConfig, PipelineConfig},
    cv::{self, CvError},
    detector::{Detector, DetectorError},
    labels::{ClassLabels, LabeledDetection},
    telemetry::{MeteredDetector, Metrics},
};
use opencv::{core::Mat, prelude::*, videoio};
use std::sync::Arc;
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    time::{sleep, Duration},
};

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("failed to open camera: {0}")]
    OpenFailed(opencv::Error),
    #[error("camera device {0} is not available")]
    Unavailable(i32),
    #[error("failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("frame processing error: {0}")]
    Cv(#[from] CvError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("detection task failed: {0}")]
    TaskJoin(String),
}

/// Live webcam handle plus the most recent detections for it.
///
/// The live feed is its own pipeline instance with its own capture handle
/// and counters, independent of any uploaded-video run. Annotation uses
/// whatever detections the background worker last published, so the preview
/// never waits on inference.
#[derive(Debug)]
pub struct Camera {
    capture: Mutex<videoio::VideoCapture>,
    detections: Mutex<Vec<LabeledDetection>>,
}

impl Camera {
    pub async fn new(device_index: i32) -> Result<Self, CameraError> {
        let capture = videoio::VideoCapture::new(device_index, videoio::CAP_ANY)
            .map_err(CameraError::OpenFailed)?;
        if !capture.is_opened().map_err(CameraError::OpenFailed)? {
            return Err(CameraError::Unavailable(device_index));
        }
        Ok(Self {
            capture: Mutex::new(capture),
            detections: Mutex::new(Vec::new()),
        })
    }

    pub async fn capture_frame(&self) -> Result<Option<Mat>, CameraError> {
        let mut cam = self.capture.lock().await;
        let mut frame = Mat::default();
        let read = cam.read(&mut frame).map_err(CameraError::ReadFrameFailed)?;
        if read && !frame.empty() {
            Ok(Some(frame))
        } else {
            Ok(None)
        }
    }

    pub async fn set_detections(&self, detections: Vec<LabeledDetection>) {
        let mut current = self.detections.lock().await;
        *current = detections;
    }

    /// Captures one frame, burns in the latest detections, and returns it
    /// JPEG-encoded. `None` when the camera delivered no frame.
    pub async fn annotated_jpeg(&self) -> Result<Option<Vec<u8>>, CameraError> {
        let Some(mut frame) = self.capture_frame().await? else {
            return Ok(None);
        };
        let detections = self.detections.lock().await;
        cv::annotate(&mut frame, &detections)?;
        drop(detections);
        Ok(Some(cv::encode_jpg(&frame)?))
    }
}

/// Background loop that keeps the camera's detection set fresh.
pub struct DetectionWorker {
    camera: Arc<Camera>,
    detector: Arc<dyn Detector>,
    labels: Arc<ClassLabels>,
    pipeline: PipelineConfig,
    poll_delay_ms: u64,
    max_consecutive_failures: u64,
}

impl DetectionWorker {
    pub fn new(
        camera: Arc<Camera>,
        detector: Arc<dyn Detector>,
        labels: Arc<ClassLabels>,
        metrics: Arc<Metrics>,
        pipeline: PipelineConfig,
        camera_config: &CameraConfig,
    ) -> Self {
        Self {
            camera,
            detector: Arc::new(MeteredDetector::new(detector, metrics, "video_feed")),
            labels,
            pipeline,
            poll_delay_ms: camera_config.get_detection_delay_ms(),
            max_consecutive_failures: camera_config.max_consecutive_failures,
        }
    }

    pub fn spawn(self, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut consecutive_failures: u64 = 0;
            loop {
                tokio::select! {
                    result = self.poll_once() => {
                        match result {
                            Ok(()) => {
                                consecutive_failures = 0;
                            }
                            Err(e) => {
                                consecutive_failures += 1;
                                tracing::warn!(
                                    "camera detection failed ({}/{}): {}",
                                    consecutive_failures,
                                    self.max_consecutive_failures,
                                    e
                                );
                                if consecutive_failures >= self.max_consecutive_failures {
                                    tracing::error!("persistent camera failure, stopping detection worker");
                                    break;
                                }
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("camera detection worker received shutdown signal");
                        break;
                    }
                }

                sleep(Duration::from_millis(self.poll_delay_ms)).await;
            }
            tracing::info!("camera detection worker stopped");
        })
    }

    async fn poll_once(&self) -> Result<(), CameraError> {
        let Some(frame) = self.camera.capture_frame().await? else {
            return Ok(());
        };

        let frame_width = frame.cols();
        let frame_height = frame.rows();
        let resize_width = self.pipeline.resize_width;
        let resize_height = self.pipeline.resize_height;
        let confidence = self.pipeline.confidence_threshold;
        let detector = self.detector.clone();

        // OpenCV resize and ort inference are blocking compute calls.
        let detections = tokio::task::spawn_blocking(move || {
            let resized = cv::resize_exact(&frame, resize_width, resize_height)?;
            Ok::<_, CameraError>(detector.infer(&resized, confidence)?)
        })
        .await
        .map_err(|e| CameraError::TaskJoin(e.to_string()))??;

        // Boxes come back in model-input coordinates; map them onto the
        // original frame for display.
        let sx = frame_width as f32 / resize_width as f32;
        let sy = frame_height as f32 / resize_height as f32;
        let labeled = detections
            .iter()
            .map(|d| self.labels.resolve(&d.scaled(sx, sy)))
            .collect();

        self.camera.set_detections(labeled).await;
        Ok(())
    }
}
