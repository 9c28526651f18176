use crate::detector::{Detection, Detector, DetectorError};
use opencv::core::Mat;
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;
use std::{sync::Arc, time::Instant};

pub struct Metrics {
    request_counter: Counter<u64>,
    detector_invocations: Counter<u64>,
    inference_duration: Histogram<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        // TODO: deprecated crate to be replaced with an OTLP exporter
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .expect("failed to build prometheus exporter");

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("ppe_detection");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let detector_invocations = meter
            .u64_counter("detector_invocations_total")
            .with_description("Total number of detector invocations")
            .build();

        let inference_duration = meter
            .u64_histogram("inference_duration_ms")
            .with_boundaries(vec![
                5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0,
            ])
            .with_description("Duration of detector inference in milliseconds")
            .build();

        Metrics {
            request_counter,
            detector_invocations,
            inference_duration,
            registry,
        }
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_inference(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.detector_invocations.add(1, &attributes);
        self.inference_duration.record(duration_ms, &attributes);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Detector wrapper that counts and times every invocation, labeled by the
/// route that triggered it. Wrapping at the trait seam keeps every inference
/// path metered, whether it runs in a handler, the video pipeline, or the
/// camera worker.
pub struct MeteredDetector {
    inner: Arc<dyn Detector>,
    metrics: Arc<Metrics>,
    route: &'static str,
}

impl MeteredDetector {
    pub fn new(inner: Arc<dyn Detector>, metrics: Arc<Metrics>, route: &'static str) -> Self {
        Self {
            inner,
            metrics,
            route,
        }
    }
}

impl Detector for MeteredDetector {
    fn infer(&self, frame: &Mat, confidence: f32) -> Result<Vec<Detection>, DetectorError> {
        let started = Instant::now();
        let result = self.inner.infer(frame, confidence);
        self.metrics
            .record_inference(started.elapsed().as_millis() as u64, self.route);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PipelineConfig,
        decoder::{DecodeError, FrameSource},
        labels::{ClassLabels, ColorLabel},
        pipeline,
        sink::{AnnotatedFrame, FrameSink},
    };
    use opencv::core::{Scalar, CV_8UC3};

    struct StubDetector;

    impl Detector for StubDetector {
        fn infer(&self, _frame: &Mat, _confidence: f32) -> Result<Vec<Detection>, DetectorError> {
            Ok(Vec::new())
        }
    }

    struct StubSource {
        remaining: u64,
    }

    impl FrameSource for StubSource {
        fn next_frame(&mut self) -> Result<Option<Mat>, DecodeError> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            let frame = Mat::new_rows_cols_with_default(
                32,
                32,
                CV_8UC3,
                Scalar::new(0.0, 0.0, 0.0, 0.0),
            )
            .map_err(DecodeError::ReadFrameFailed)?;
            Ok(Some(frame))
        }

        fn frame_count(&self) -> Option<u64> {
            None
        }
    }

    struct NullSink;

    impl FrameSink for NullSink {
        fn show(&mut self, _frame: AnnotatedFrame) -> bool {
            true
        }

        fn show_progress(&mut self, _fraction: f64) {}
    }

    fn counter_total(metrics: &Metrics, name_prefix: &str) -> u64 {
        metrics
            .registry
            .gather()
            .iter()
            .filter(|family| family.get_name().starts_with(name_prefix))
            .flat_map(|family| family.get_metric())
            .map(|metric| metric.get_counter().get_value() as u64)
            .sum()
    }

    #[test]
    fn metered_detector_counts_pipeline_invocations() {
        let metrics = Arc::new(Metrics::new());
        let detector = MeteredDetector::new(Arc::new(StubDetector), metrics.clone(), "detect_video");
        let labels = ClassLabels::from_labels(vec![ColorLabel {
            label: "helmet".into(),
            red: 0,
            green: 200,
            blue: 0,
        }]);
        let mut sink = NullSink;
        let config = PipelineConfig {
            stride: 5,
            ..PipelineConfig::default()
        };

        let summary = pipeline::process(
            StubSource { remaining: 12 },
            &detector,
            &labels,
            &mut sink,
            &config,
        )
        .unwrap();

        assert_eq!(summary.frames_processed, 2);
        assert_eq!(counter_total(&metrics, "detector_invocations"), 2);
    }

    #[test]
    fn metered_detector_records_failed_invocations_too() {
        struct FailingDetector;

        impl Detector for FailingDetector {
            fn infer(
                &self,
                _frame: &Mat,
                _confidence: f32,
            ) -> Result<Vec<Detection>, DetectorError> {
                Err(DetectorError::Inference("boom".into()))
            }
        }

        let metrics = Arc::new(Metrics::new());
        let detector =
            MeteredDetector::new(Arc::new(FailingDetector), metrics.clone(), "video_feed");
        let frame =
            Mat::new_rows_cols_with_default(8, 8, CV_8UC3, Scalar::new(0.0, 0.0, 0.0, 0.0))
                .unwrap();

        assert!(detector.infer(&frame, 0.5).is_err());
        assert_eq!(counter_total(&metrics, "detector_invocations"), 1);
    }
}
