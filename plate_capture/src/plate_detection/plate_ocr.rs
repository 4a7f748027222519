use super::CandidateRegion;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("failed to initialise OCR engine: {0}")]
    Init(String),
    #[error("failed to load image {0}: {1}")]
    Image(String, String),
    #[error("recognition failed: {0}")]
    Recognition(String),
}

/// One piece of text found in an image.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub region: CandidateRegion,
    pub text: String,
    pub confidence: f32,
}

/// Reads text from an image on disk. Results are ordered best first.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image_path: &Path) -> Result<Vec<Recognition>, OcrError>;
}

/// Text of the best recognition, if any.
pub fn best_text(recognitions: Vec<Recognition>) -> Option<String> {
    recognitions.into_iter().next().map(|r| r.text)
}

#[cfg(feature = "tesseract")]
pub use self::tess::TesseractRecognizer;

#[cfg(feature = "tesseract")]
mod tess {
    use super::{CandidateRegion, OcrError, Recognition, TextRecognizer};
    use crate::config::OcrConfig;
    use leptess::leptonica;
    use leptess::tesseract;
    use leptess::tesseract::TessApi;
    use std::ffi::CString;
    use std::path::Path;
    use std::sync::Mutex;

    pub struct TesseractRecognizer {
        ocr: Mutex<TessApi>,
    }

    // TessApi wraps a raw handle; every call goes through the mutex.
    unsafe impl Send for TesseractRecognizer {}
    unsafe impl Sync for TesseractRecognizer {}

    fn set_variable(api: &mut TessApi, name: &str, value: &str) -> Result<(), OcrError> {
        let name_c = CString::new(name).map_err(|e| OcrError::Init(e.to_string()))?;
        let value_c = CString::new(value).map_err(|e| OcrError::Init(e.to_string()))?;
        api.raw
            .set_variable(&name_c, &value_c)
            .map_err(|e| OcrError::Init(format!("{name}={value}: {e:?}")))
    }

    impl TesseractRecognizer {
        pub fn new(config: &OcrConfig) -> Result<Self, OcrError> {
            let data_path = config
                .data_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned());
            let lang = config.language_spec();
            let mut api = tesseract::TessApi::new(data_path.as_deref(), &lang)
                .map_err(|e| OcrError::Init(format!("{e:?}")))?;

            if let Some(whitelist) = config.char_whitelist.as_deref() {
                set_variable(&mut api, "tessedit_char_whitelist", whitelist)?;
            }
            // Plates are a single line of text.
            set_variable(&mut api, "tessedit_pageseg_mode", "7")?;

            Ok(Self {
                ocr: Mutex::new(api),
            })
        }
    }

    impl TextRecognizer for TesseractRecognizer {
        fn recognize(&self, image_path: &Path) -> Result<Vec<Recognition>, OcrError> {
            let unreadable =
                |msg: String| OcrError::Image(image_path.display().to_string(), msg);
            let (width, height) =
                image::image_dimensions(image_path).map_err(|e| unreadable(e.to_string()))?;
            let pix = leptonica::pix_read(image_path).map_err(|e| unreadable(format!("{e:?}")))?;

            let mut api = self
                .ocr
                .lock()
                .map_err(|_| OcrError::Recognition("OCR engine lock poisoned".into()))?;
            api.set_image(&pix);
            let text = api
                .get_utf8_text()
                .map_err(|e| OcrError::Recognition(e.to_string()))?;
            let text = text.trim();
            if text.is_empty() {
                return Ok(vec![]);
            }

            Ok(vec![Recognition {
                region: CandidateRegion::new(0, 0, width, height),
                text: text.to_string(),
                confidence: api.mean_text_conf() as f32 / 100.0,
            }])
        }
    }
}
