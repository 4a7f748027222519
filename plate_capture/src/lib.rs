//! Single-shot license plate capture.
//!
//! One trigger grabs a frame from the camera, runs a cascade classifier over it,
//! writes the plate-sized crops to disk and reads each crop with OCR. Runs are
//! serialized process-wide by [`plate_detection::single_flight::SingleFlight`].

pub mod config;
pub mod metrics;
pub mod plate_detection;

pub use config::Config;
pub use plate_detection::pipeline::{PlatePipeline, RunError};
pub use plate_detection::{CandidateRegion, DetectionRun, Frame, OcrResult, RegionFailure};
