use super::{CandidateRegion, Frame};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("classifier file not found at {0}")]
    NotFound(PathBuf),
    #[error("failed to load classifier from {0}: {1}")]
    Malformed(PathBuf, String),
    #[error("detection failed: {0}")]
    Inference(String),
}

/// Proposes plate-shaped rectangles for a frame. Must be deterministic for a
/// given model and frame.
pub trait RegionDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<CandidateRegion>, DetectError>;
}

type Loader = Box<dyn Fn() -> Result<Arc<dyn RegionDetector>, DetectError> + Send + Sync>;

/// Process-wide home of the detection model.
///
/// A successful load is kept for the lifetime of the slot. A failed load is
/// not remembered, so the next run tries again.
pub struct DetectorSlot {
    loader: Loader,
    loaded: Mutex<Option<Arc<dyn RegionDetector>>>,
}

impl DetectorSlot {
    pub fn lazy<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn RegionDetector>, DetectError> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            loaded: Mutex::new(None),
        }
    }

    pub fn ready(detector: Arc<dyn RegionDetector>) -> Self {
        Self {
            loader: Box::new(|| {
                Err(DetectError::Malformed(
                    PathBuf::new(),
                    "preloaded slot has no loader".into(),
                ))
            }),
            loaded: Mutex::new(Some(detector)),
        }
    }

    pub fn get(&self) -> Result<Arc<dyn RegionDetector>, DetectError> {
        let mut loaded = self.loaded.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(detector) = loaded.as_ref() {
            return Ok(detector.clone());
        }
        let detector = (self.loader)()?;
        info!("region detector loaded");
        *loaded = Some(detector.clone());
        Ok(detector)
    }

    /// Loads at startup so the first trigger does not pay for it. Failure is
    /// only logged; the run that needs the model reports it.
    pub fn warm_up(&self) {
        if let Err(e) = self.get() {
            warn!(error = %e, "region detector unavailable at startup");
        }
    }
}

pub fn ensure_model_file(path: &Path) -> Result<(), DetectError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(DetectError::NotFound(path.to_path_buf()))
    }
}

#[cfg(feature = "opencv")]
pub use self::haar::CascadeDetector;

#[cfg(feature = "opencv")]
mod haar {
    use super::{ensure_model_file, CandidateRegion, DetectError, Frame, RegionDetector};
    use opencv::core::Mat;
    use opencv::core::Rect;
    use opencv::core::Size;
    use opencv::core::Vector;
    use opencv::imgproc::cvt_color;
    use opencv::imgproc::COLOR_RGB2GRAY;
    use opencv::objdetect::CascadeClassifier;
    use opencv::prelude::CascadeClassifierTrait;
    use opencv::prelude::CascadeClassifierTraitConst;
    use opencv::prelude::MatTraitConst;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Haar cascade plate detector, e.g. `haarcascade_russian_plate_number.xml`.
    pub struct CascadeDetector {
        classifier: Mutex<CascadeClassifier>,
        scale_factor: f64,
        min_neighbors: i32,
    }

    // detect_multi_scale needs &mut; the mutex serializes every call.
    unsafe impl Send for CascadeDetector {}
    unsafe impl Sync for CascadeDetector {}

    impl CascadeDetector {
        pub fn load(path: &Path, scale_factor: f64, min_neighbors: i32) -> Result<Self, DetectError> {
            ensure_model_file(path)?;
            let malformed = |msg: String| DetectError::Malformed(PathBuf::from(path), msg);
            let path_str = path
                .to_str()
                .ok_or_else(|| malformed("path is not valid UTF-8".into()))?;
            let classifier =
                CascadeClassifier::new(path_str).map_err(|e| malformed(e.to_string()))?;
            if classifier.empty().map_err(|e| malformed(e.to_string()))? {
                return Err(malformed("classifier is empty".into()));
            }
            Ok(Self {
                classifier: Mutex::new(classifier),
                scale_factor,
                min_neighbors,
            })
        }
    }

    fn inference(e: opencv::Error) -> DetectError {
        DetectError::Inference(e.to_string())
    }

    impl RegionDetector for CascadeDetector {
        fn detect(&self, frame: &Frame) -> Result<Vec<CandidateRegion>, DetectError> {
            let flat = Mat::from_slice(frame.pixels.as_raw()).map_err(inference)?;
            let rgb = flat
                .reshape(3, frame.height() as i32)
                .map_err(inference)?;
            let mut grey = Mat::default();
            cvt_color(&rgb, &mut grey, COLOR_RGB2GRAY, 0).map_err(inference)?;

            let mut plates = Vector::<Rect>::new();
            let mut classifier = self
                .classifier
                .lock()
                .map_err(|_| DetectError::Inference("classifier lock poisoned".into()))?;
            classifier
                .detect_multi_scale(
                    &grey,
                    &mut plates,
                    self.scale_factor,
                    self.min_neighbors,
                    0,
                    Size::default(),
                    Size::default(),
                )
                .map_err(inference)?;

            Ok(plates
                .iter()
                .filter(|r| r.x >= 0 && r.y >= 0 && r.width > 0 && r.height > 0)
                .map(|r| {
                    CandidateRegion::new(r.x as u32, r.y as u32, r.width as u32, r.height as u32)
                })
                .collect())
        }
    }
}
