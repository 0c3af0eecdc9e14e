use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
};

const LATENCY_BUCKETS: [f64; 16] = [
    0.001, 0.002, 0.005, 0.007, 0.01, 0.015, 0.02, 0.025, 0.03, 0.04, 0.05, 0.075, 0.1, 0.15, 0.2,
    0.5,
];

/// Instruments shared by every connection worker. Without an exporter
/// installed the global meter is a no-op, so tests record into nothing.
#[derive(Clone)]
pub struct Metrics {
    pub frame_duration: Histogram<f64>,
    pub frames: Counter<u64>,
    pub skipped: Counter<u64>,
    pub detections: Counter<u64>,
    pub connections: Counter<u64>,
}

impl Metrics {
    pub fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);

        Self {
            frame_duration: meter
                .f64_histogram("inference_duration_seconds")
                .with_description(
                    "Time to process a single frame (decode + preprocess + infer + postprocess)",
                )
                .with_unit("s")
                .with_boundaries(LATENCY_BUCKETS.to_vec())
                .build(),
            frames: meter
                .u64_counter("inference_frames_total")
                .with_description("Total frames answered")
                .build(),
            skipped: meter
                .u64_counter("inference_frames_skipped_total")
                .with_description("Total frames skipped (undecodable payload)")
                .build(),
            detections: meter
                .u64_counter("inference_detections_total")
                .with_description("Total detections produced")
                .build(),
            connections: meter
                .u64_counter("inference_connections_total")
                .with_description("Total client connections accepted")
                .build(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new("inference")
    }
}
