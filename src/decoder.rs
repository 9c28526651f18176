use opencv::{core::Mat, prelude::*, videoio};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to open video source: {0}")]
    OpenFailed(opencv::Error),
    #[error("unreadable or unsupported video source: {0}")]
    Unsupported(String),
    #[error("failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
}

/// Sequential frame source of unknown, possibly unreliable, total length.
///
/// `next_frame` returning `Ok(None)` is end-of-stream, the normal
/// termination signal, not an error. The underlying handle is released when
/// the source is dropped, on every exit path.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Mat>, DecodeError>;

    /// Total frame count hint for progress estimation, if the container
    /// reports one.
    fn frame_count(&self) -> Option<u64>;
}

/// Video file decoder over an OpenCV capture handle.
pub struct VideoDecoder {
    capture: videoio::VideoCapture,
    frame_count: Option<u64>,
}

impl VideoDecoder {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| DecodeError::Unsupported(path.display().to_string()))?;

        let capture = videoio::VideoCapture::from_file(path_str, videoio::CAP_ANY)
            .map_err(DecodeError::OpenFailed)?;
        if !capture.is_opened().map_err(DecodeError::OpenFailed)? {
            return Err(DecodeError::Unsupported(path.display().to_string()));
        }

        // Containers without an index report zero or a negative count.
        let frame_count = match capture.get(videoio::CAP_PROP_FRAME_COUNT) {
            Ok(count) if count >= 1.0 => Some(count as u64),
            _ => None,
        };

        Ok(Self {
            capture,
            frame_count,
        })
    }
}

impl FrameSource for VideoDecoder {
    fn next_frame(&mut self) -> Result<Option<Mat>, DecodeError> {
        let mut frame = Mat::default();
        let read = self
            .capture
            .read(&mut frame)
            .map_err(DecodeError::ReadFrameFailed)?;
        if read && !frame.empty() {
            Ok(Some(frame))
        } else {
            Ok(None)
        }
    }

    fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }
}
