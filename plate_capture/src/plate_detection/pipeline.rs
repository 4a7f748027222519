use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};

use super::bounding_box_render::mark_plate;
use super::cascade_detector::DetectorSlot;
use super::deadline::run_with_deadline;
use super::plate_ocr::{best_text, TextRecognizer};
use super::plate_writer::{save_annotated, PlateWriter};
use super::single_flight::{FlightPermit, SingleFlight};
use super::video_reader::{grab_frame, CaptureError, FrameSource};
use super::{DetectionRun, Frame, OcrResult};
use crate::config::Config;
use crate::metrics;

/// Why a trigger produced no result at all.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RunError {
    #[error("detection already in progress")]
    Busy,
    #[error("{0}")]
    ResourceUnavailable(String),
    #[error("{0}")]
    ReadFailure(String),
}

impl RunError {
    fn outcome(&self) -> &'static str {
        match self {
            RunError::Busy => "busy",
            RunError::ResourceUnavailable(_) => "resource_unavailable",
            RunError::ReadFailure(_) => "read_failure",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub device_index: i32,
    pub width: u32,
    pub height: u32,
    pub capture_timeout: Option<Duration>,
    pub ocr_timeout: Option<Duration>,
    pub annotated_dir: Option<PathBuf>,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            device_index: config.camera.device_index,
            width: config.camera.width,
            height: config.camera.height,
            capture_timeout: config.camera.timeout(),
            ocr_timeout: config.ocr.timeout(),
            annotated_dir: config.storage.annotated_dir.clone(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Capture → detect → crop & persist → OCR, one run at a time.
///
/// Overlapping calls to [`PlatePipeline::run`] are turned away with
/// [`RunError::Busy`] instead of waiting. Work abandoned after a deadline
/// keeps the pipeline busy until it actually returns, so a late camera or
/// OCR call never overlaps the next run.
pub struct PlatePipeline {
    guard: SingleFlight,
    frames: Arc<dyn FrameSource>,
    detector: Arc<DetectorSlot>,
    recognizer: Arc<dyn TextRecognizer>,
    writer: PlateWriter,
    settings: PipelineSettings,
}

impl PlatePipeline {
    pub fn new(
        frames: Arc<dyn FrameSource>,
        detector: Arc<DetectorSlot>,
        recognizer: Arc<dyn TextRecognizer>,
        writer: PlateWriter,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            guard: SingleFlight::new(),
            frames,
            detector,
            recognizer,
            writer,
            settings,
        }
    }

    pub fn from_config(
        config: &Config,
        frames: Arc<dyn FrameSource>,
        detector: Arc<DetectorSlot>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Self {
        let writer = PlateWriter::new(&config.storage.plates_dir, config.detector.min_area);
        Self::new(
            frames,
            detector,
            recognizer,
            writer,
            PipelineSettings::from_config(config),
        )
    }

    pub fn writer(&self) -> &PlateWriter {
        &self.writer
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_busy()
    }

    pub fn run(&self) -> Result<DetectionRun, RunError> {
        let Some(permit) = self.guard.try_enter() else {
            warn!("detection already in progress, rejecting trigger");
            metrics::record_outcome(RunError::Busy.outcome());
            return Err(RunError::Busy);
        };

        let span = info_span!("detection_run");
        let _entered = span.enter();
        info!("initializing detection");

        let timer = metrics::RUN_SECONDS.start_timer();
        let outcome = self.run_admitted(&permit);
        timer.observe_duration();
        permit.exit();

        match &outcome {
            Ok(run) => {
                info!(
                    plates = ?run.plates,
                    ocr_results = run.ocr_results.len(),
                    warnings = run.warnings.len(),
                    "detection finished"
                );
                metrics::record_outcome("done");
            }
            Err(e) => {
                error!(error = %e, "detection failed");
                metrics::record_outcome(e.outcome());
            }
        }
        outcome
    }

    fn run_admitted(&self, permit: &FlightPermit) -> Result<DetectionRun, RunError> {
        let detector = self
            .detector
            .get()
            .map_err(|e| RunError::ResourceUnavailable(e.to_string()))?;
        let mut frame = self.capture(permit)?;

        let mut run = DetectionRun::default();
        let candidates = match detector.detect(&frame) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "detector failed on captured frame");
                run.warn(None, e.to_string());
                return Ok(run);
            }
        };

        let found = candidates.len();
        let accepted = self.writer.filter(candidates);
        debug!(found, accepted = accepted.len(), "candidate regions");

        // Crop everything before any marker is drawn on the frame.
        let crops: Vec<_> = accepted
            .into_iter()
            .map(|region| (region, PlateWriter::crop(&frame, &region)))
            .collect();
        let annotate = self.settings.annotated_dir.is_some();

        for (region, crop) in crops {
            let crop = match crop {
                Ok(crop) => crop,
                Err(e) => {
                    region_failed(&mut run, None, e.to_string());
                    continue;
                }
            };
            if annotate {
                mark_plate(&mut frame, &region);
            }

            let filename = match self.writer.persist(&crop, Utc::now()) {
                Ok(filename) => filename,
                Err(e) => {
                    region_failed(&mut run, None, e.to_string());
                    continue;
                }
            };
            metrics::PLATES_SAVED.inc();
            run.plates.push(filename.clone());

            match self.read_plate(&filename, permit) {
                Ok(Some(text)) => {
                    info!(filename = %filename, text = %text, "OCR result");
                    metrics::OCR_RESULTS.inc();
                    run.ocr_results.push(OcrResult { filename, text });
                }
                Ok(None) => debug!(filename = %filename, "no text recognized"),
                Err(message) => region_failed(&mut run, Some(filename), message),
            }
        }

        if let Some(dir) = self.settings.annotated_dir.as_deref() {
            if !run.plates.is_empty() {
                match save_annotated(dir, &frame) {
                    Ok(path) => debug!(path = %path.display(), "annotated frame saved"),
                    Err(e) => warn!(error = %e, "could not save annotated frame"),
                }
            }
        }

        Ok(run)
    }

    fn capture(&self, permit: &FlightPermit) -> Result<Frame, RunError> {
        let frames = self.frames.clone();
        let hold = permit.share();
        let (device_index, width, height) = (
            self.settings.device_index,
            self.settings.width,
            self.settings.height,
        );
        let grabbed = run_with_deadline("camera", self.settings.capture_timeout, move || {
            let grabbed = grab_frame(frames.as_ref(), device_index, width, height);
            hold.exit();
            grabbed
        })
        .map_err(|e| RunError::ReadFailure(e.to_string()))?;

        grabbed.map_err(|e| match e {
            CaptureError::Unavailable(_) => RunError::ResourceUnavailable(e.to_string()),
            CaptureError::ReadFailed(_) | CaptureError::Backend(_) => {
                RunError::ReadFailure(e.to_string())
            }
        })
    }

    fn read_plate(
        &self,
        filename: &str,
        permit: &FlightPermit,
    ) -> Result<Option<String>, String> {
        let recognizer = self.recognizer.clone();
        let path = self.writer.path_of(filename);
        let hold = permit.share();
        let recognitions = run_with_deadline("ocr", self.settings.ocr_timeout, move || {
            let recognized = recognizer.recognize(&path);
            hold.exit();
            recognized
        })
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;
        Ok(best_text(recognitions))
    }
}

fn region_failed(run: &mut DetectionRun, filename: Option<String>, message: String) {
    warn!(filename = ?filename, error = %message, "region skipped");
    metrics::REGION_FAILURES.inc();
    run.warn(filename, message);
}
