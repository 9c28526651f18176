use crate::cv;
use bytes::Bytes;
use opencv::core::Mat;
use tokio::sync::mpsc::UnboundedSender;

pub const FRAME_BOUNDARY: &str = "frame";

/// A frame with detections burned into it, plus its 1-based index in the
/// source sequence.
pub struct AnnotatedFrame {
    pub mat: Mat,
    pub index: u64,
}

/// Display sink with overwrite semantics: each `show` may replace the
/// previous frame, nothing accumulates, and the sink may drop frames (a live
/// preview has no backpressure contract).
pub trait FrameSink {
    /// Returns `false` once the display has gone away for good, so the
    /// producer can stop burning detector compute on frames nobody sees.
    fn show(&mut self, frame: AnnotatedFrame) -> bool;

    /// Monotonically non-decreasing fraction in `[0, 1]`; only called when
    /// the source reports a total frame count.
    fn show_progress(&mut self, fraction: f64);
}

/// Sink that JPEG-encodes each annotated frame into a
/// `multipart/x-mixed-replace` part and pushes it down a channel feeding an
/// HTTP response body.
pub struct ChannelSink {
    tx: UnboundedSender<Bytes>,
    progress: Option<f64>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<Bytes>) -> Self {
        Self { tx, progress: None }
    }
}

impl FrameSink for ChannelSink {
    fn show(&mut self, frame: AnnotatedFrame) -> bool {
        let jpg = match cv::encode_jpg(&frame.mat) {
            Ok(jpg) => jpg,
            Err(e) => {
                tracing::warn!("dropping frame {}: {}", frame.index, e);
                return true;
            }
        };

        let mut part_header = format!(
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n",
            FRAME_BOUNDARY,
            jpg.len()
        );
        if let Some(fraction) = self.progress {
            part_header.push_str(&format!("X-Progress: {:.4}\r\n", fraction));
        }
        part_header.push_str("\r\n");

        let mut body = part_header.into_bytes();
        body.extend_from_slice(&jpg);
        body.extend_from_slice(b"\r\n");

        // A closed channel means the client went away.
        if self.tx.send(Bytes::from(body)).is_err() {
            tracing::debug!("response channel closed at frame {}", frame.index);
            return false;
        }
        true
    }

    fn show_progress(&mut self, fraction: f64) {
        self.progress = Some(fraction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};
    use opencv::prelude::*;

    fn annotated(index: u64) -> AnnotatedFrame {
        let mat = Mat::new_rows_cols_with_default(
            8,
            8,
            CV_8UC3,
            Scalar::new(0.0, 0.0, 255.0, 0.0),
        )
        .unwrap();
        AnnotatedFrame { mat, index }
    }

    #[test]
    fn emits_multipart_jpeg_parts() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = ChannelSink::new(tx);

        sink.show_progress(0.5);
        sink.show(annotated(5));

        let part = rx.try_recv().unwrap();
        let text = String::from_utf8_lossy(&part);
        assert!(text.starts_with("--frame\r\nContent-Type: image/jpeg\r\n"));
        assert!(text.contains("X-Progress: 0.5000\r\n"));
    }

    #[test]
    fn part_has_no_progress_header_when_total_unknown() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = ChannelSink::new(tx);

        sink.show(annotated(1));

        let part = rx.try_recv().unwrap();
        let text = String::from_utf8_lossy(&part);
        assert!(!text.contains("X-Progress"));
    }

    #[test]
    fn closed_channel_reports_sink_closure() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let mut sink = ChannelSink::new(tx);

        assert!(!sink.show(annotated(1)));
    }

    #[test]
    fn open_channel_keeps_sink_alive() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = ChannelSink::new(tx);

        assert!(sink.show(annotated(1)));
        assert!(rx.try_recv().is_ok());
    }
}
