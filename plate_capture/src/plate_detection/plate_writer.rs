use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbImage};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{CandidateRegion, Frame};

const MAX_NAMES_PER_SECOND: u32 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("region {0:?} lies outside the {1}x{2} frame")]
    OutOfFrame(CandidateRegion, u32, u32),
    #[error("failed to create output directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("no free file name left for second {0}")]
    NamesExhausted(i64),
    #[error("failed to write {0}: {1}")]
    Write(String, String),
}

/// Writes plate crops into the managed output directory.
///
/// Names follow `plate_<unix-seconds>_<seq>.jpg`. Files are created with
/// create-new semantics, so an existing plate is never overwritten.
#[derive(Debug, Clone)]
pub struct PlateWriter {
    dir: PathBuf,
    min_area: u64,
}

impl PlateWriter {
    pub fn new(dir: impl Into<PathBuf>, min_area: u64) -> Self {
        Self {
            dir: dir.into(),
            min_area,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    pub fn accepts(&self, region: &CandidateRegion) -> bool {
        region.area() > self.min_area
    }

    /// Regions large enough to be a plate, in detection order.
    pub fn filter(&self, regions: Vec<CandidateRegion>) -> Vec<CandidateRegion> {
        regions.into_iter().filter(|r| self.accepts(r)).collect()
    }

    pub fn crop(frame: &Frame, region: &CandidateRegion) -> Result<RgbImage, PersistError> {
        if !region.fits_within(frame.width(), frame.height()) {
            return Err(PersistError::OutOfFrame(
                *region,
                frame.width(),
                frame.height(),
            ));
        }
        Ok(image::imageops::crop_imm(
            &frame.pixels,
            region.x,
            region.y,
            region.width,
            region.height,
        )
        .to_image())
    }

    /// Writes `crop` and returns the file name it was stored under.
    pub fn persist(&self, crop: &RgbImage, at: DateTime<Utc>) -> Result<String, PersistError> {
        let filename = write_new(&self.dir, "plate", at.timestamp(), crop)?;
        debug!(path = %self.path_of(&filename).display(), "saved detected plate");
        Ok(filename)
    }
}

/// Creates `<prefix>_<timestamp>_<seq>.jpg` under `dir` with the lowest free
/// `seq` and writes `image` into it. A partially written file is removed.
fn write_new(
    dir: &Path,
    prefix: &str,
    timestamp: i64,
    image: &RgbImage,
) -> Result<String, PersistError> {
    fs::create_dir_all(dir).map_err(|e| PersistError::CreateDir(dir.display().to_string(), e))?;

    let (filename, file) = reserve(dir, prefix, timestamp)?;
    let path = dir.join(&filename);
    if let Err(e) = write_jpeg(file, image) {
        if let Err(rm) = fs::remove_file(&path) {
            warn!(error = %rm, path = %path.display(), "could not remove partial image file");
        }
        return Err(PersistError::Write(path.display().to_string(), e));
    }
    Ok(filename)
}

fn reserve(dir: &Path, prefix: &str, timestamp: i64) -> Result<(String, File), PersistError> {
    for seq in 0..MAX_NAMES_PER_SECOND {
        let filename = format!("{prefix}_{timestamp}_{seq}.jpg");
        let path = dir.join(&filename);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((filename, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(PersistError::Write(path.display().to_string(), e.to_string())),
        }
    }
    Err(PersistError::NamesExhausted(timestamp))
}

fn write_jpeg(file: File, image: &RgbImage) -> Result<(), String> {
    let mut writer = BufWriter::new(file);
    image
        .write_to(&mut writer, ImageFormat::Jpeg)
        .map_err(|e| e.to_string())?;
    writer.flush().map_err(|e| e.to_string())
}

/// Stores the marked-up frame as `frame_<unix-seconds>_<seq>.jpg` under `dir`.
pub fn save_annotated(dir: &Path, frame: &Frame) -> Result<PathBuf, PersistError> {
    let filename = write_new(dir, "frame", frame.captured_at.timestamp(), &frame.pixels)?;
    Ok(dir.join(filename))
}
