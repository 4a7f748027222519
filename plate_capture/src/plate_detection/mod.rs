pub mod bounding_box_render;
pub mod cascade_detector;
pub mod deadline;
pub mod pipeline;
pub mod plate_ocr;
pub mod plate_writer;
pub mod single_flight;
pub mod video_reader;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;

/// One still image grabbed from the camera, RGB, row-major.
#[derive(Clone)]
pub struct Frame {
    pub pixels: RgbImage,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(pixels: RgbImage) -> Self {
        Self {
            pixels,
            captured_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// A rectangle the detector thinks may hold a plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CandidateRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when the whole rectangle lies inside a `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|r| r <= width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OcrResult {
    pub filename: String,
    pub text: String,
}

/// A region that was accepted but dropped from the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionFailure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub message: String,
}

/// Everything one pipeline run hands back to its caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectionRun {
    pub plates: Vec<String>,
    pub ocr_results: Vec<OcrResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<RegionFailure>,
}

impl DetectionRun {
    fn warn(&mut self, filename: Option<String>, message: impl Into<String>) {
        self.warnings.push(RegionFailure {
            filename,
            message: message.into(),
        });
    }
}
