use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    pub static ref DETECTION_RUNS: IntCounterVec = register_int_counter_vec!(
        "plate_detection_runs_total",
        "Detection triggers by outcome",
        &["outcome"]
    )
    .expect("metric can be registered");
    pub static ref PLATES_SAVED: IntCounter = register_int_counter!(
        "plate_detection_plates_saved_total",
        "Plate crops written to disk"
    )
    .expect("metric can be registered");
    pub static ref OCR_RESULTS: IntCounter = register_int_counter!(
        "plate_detection_ocr_results_total",
        "Plate crops that produced OCR text"
    )
    .expect("metric can be registered");
    pub static ref REGION_FAILURES: IntCounter = register_int_counter!(
        "plate_detection_region_failures_total",
        "Accepted regions dropped or left without OCR because of an error"
    )
    .expect("metric can be registered");
    pub static ref RUN_SECONDS: Histogram = register_histogram!(
        "plate_detection_run_seconds",
        "Wall time of admitted detection runs",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("metric can be registered");
}

pub fn record_outcome(outcome: &str) {
    DETECTION_RUNS.with_label_values(&[outcome]).inc();
}

/// Prometheus text exposition of every registered metric.
pub fn render() -> Result<String, prometheus::Error> {
    // Touch the statics so the families exist before the first run.
    lazy_static::initialize(&DETECTION_RUNS);
    lazy_static::initialize(&PLATES_SAVED);
    lazy_static::initialize(&OCR_RESULTS);
    lazy_static::initialize(&REGION_FAILURES);
    lazy_static::initialize(&RUN_SECONDS);

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_plate_metrics() {
        record_outcome("busy");
        let text = render().unwrap();
        assert!(text.contains("plate_detection_runs_total{outcome=\"busy\"}"));
        assert!(text.contains("plate_detection_plates_saved_total"));
    }
}
