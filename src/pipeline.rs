use crate::{
    config::PipelineConfig,
    cv::{self, CvError},
    decoder::{DecodeError, FrameSource, VideoDecoder},
    detector::{Detector, DetectorError},
    labels::ClassLabels,
    sink::{AnnotatedFrame, FrameSink},
};
use std::path::Path;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("video source error: {0}")]
    Source(#[from] DecodeError),
    #[error("detector failed on frame {index}: {source}")]
    Detector { index: u64, source: DetectorError },
    #[error("frame processing error: {0}")]
    Cv(#[from] CvError),
}

/// Counters for one pipeline invocation; reset with each new video.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Frames pulled from the source.
    pub frames_seen: u64,
    /// Frames that passed the stride selection and went through detection.
    pub frames_processed: u64,
}

/// Opens a video file and streams its annotated frames into the sink.
///
/// Open failures are reported before any frame is pulled; the capture handle
/// is released on every exit path when the decoder drops.
#[instrument(skip(detector, labels, sink, config))]
pub fn run_file<D, K>(
    path: &Path,
    detector: &D,
    labels: &ClassLabels,
    sink: &mut K,
    config: &PipelineConfig,
) -> Result<PipelineSummary, PipelineError>
where
    D: Detector + ?Sized,
    K: FrameSink,
{
    let decoder = VideoDecoder::open(path)?;
    process(decoder, detector, labels, sink, config)
}

/// Single-pass, bounded-memory traversal of a frame source.
///
/// Maintains a 1-based frame counter `n`; every frame where
/// `n % stride != 0` is discarded without further work, which bounds
/// detector invocations to roughly `total / stride`. Selected frames are
/// resized to the configured dimensions, run through the detector at the
/// configured confidence threshold, annotated, and emitted to the sink.
/// When the source reports a total frame count, a capped, non-decreasing
/// progress fraction accompanies each emission.
///
/// Detector failures halt the run and propagate; end-of-stream terminates
/// it normally, as does the sink reporting that its display has gone away.
/// Each emission replaces the previous one at the sink, so memory use is
/// independent of video length.
pub fn process<S, D, K>(
    mut source: S,
    detector: &D,
    labels: &ClassLabels,
    sink: &mut K,
    config: &PipelineConfig,
) -> Result<PipelineSummary, PipelineError>
where
    S: FrameSource,
    D: Detector + ?Sized,
    K: FrameSink,
{
    let stride = u64::from(config.stride.max(1));
    let total = source.frame_count().filter(|t| *t > 0);
    let mut summary = PipelineSummary::default();

    while let Some(frame) = source.next_frame()? {
        summary.frames_seen += 1;
        let index = summary.frames_seen;
        if index % stride != 0 {
            continue;
        }

        let mut resized = cv::resize_exact(&frame, config.resize_width, config.resize_height)?;
        let detections = detector
            .infer(&resized, config.confidence_threshold)
            .map_err(|source| PipelineError::Detector { index, source })?;

        let labeled: Vec<_> = detections.iter().map(|d| labels.resolve(d)).collect();
        cv::annotate(&mut resized, &labeled)?;
        summary.frames_processed += 1;

        if let Some(total) = total {
            sink.show_progress((index as f64 / total as f64).min(1.0));
        }
        let sink_alive = sink.show(AnnotatedFrame {
            mat: resized,
            index,
        });
        if !sink_alive {
            tracing::debug!(frame = index, "display sink closed, stopping early");
            break;
        }
    }

    tracing::debug!(
        frames_seen = summary.frames_seen,
        frames_processed = summary.frames_processed,
        "video processing finished"
    );
    Ok(summary)
}
