use super::Frame;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("could not open camera at index {0}")]
    Unavailable(i32),
    #[error("could not read frame: {0}")]
    ReadFailed(String),
    #[error("camera backend error: {0}")]
    Backend(String),
}

/// Opens camera devices. Implementations are shared for the whole process.
pub trait FrameSource: Send + Sync {
    fn open(&self, device_index: i32) -> Result<Box<dyn Camera>, CaptureError>;
}

/// An opened device.
pub trait Camera: Send {
    fn configure(&mut self, width: u32, height: u32) -> Result<(), CaptureError>;
    fn read(&mut self) -> Result<Frame, CaptureError>;
    fn release(&mut self) -> Result<(), CaptureError>;
}

/// Owns an opened camera and releases it exactly once: explicitly through
/// [`CameraLease::release`] or implicitly on drop.
pub struct CameraLease {
    camera: Option<Box<dyn Camera>>,
    device_index: i32,
}

impl CameraLease {
    pub fn open(source: &dyn FrameSource, device_index: i32) -> Result<Self, CaptureError> {
        let camera = source.open(device_index)?;
        debug!(device_index, "camera opened");
        Ok(Self {
            camera: Some(camera),
            device_index,
        })
    }

    /// Best-effort resolution change. Failure only gets logged.
    pub fn configure(&mut self, width: u32, height: u32) {
        if let Some(camera) = self.camera.as_mut() {
            if let Err(e) = camera.configure(width, height) {
                warn!(error = %e, width, height, "camera ignored requested resolution");
            }
        }
    }

    pub fn read(&mut self) -> Result<Frame, CaptureError> {
        match self.camera.as_mut() {
            Some(camera) => camera.read(),
            None => Err(CaptureError::ReadFailed("camera already released".into())),
        }
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            match camera.release() {
                Ok(()) => debug!(device_index = self.device_index, "camera released"),
                Err(e) => warn!(error = %e, device_index = self.device_index, "camera release failed"),
            }
        }
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Open, configure, grab one frame, release.
pub fn grab_frame(
    source: &dyn FrameSource,
    device_index: i32,
    width: u32,
    height: u32,
) -> Result<Frame, CaptureError> {
    let mut lease = CameraLease::open(source, device_index)?;
    lease.configure(width, height);
    let frame = lease.read()?;
    debug!(width = frame.width(), height = frame.height(), "frame read");
    lease.release();
    Ok(frame)
}

#[cfg(feature = "opencv")]
pub use self::opencv_camera::OpencvFrameSource;

#[cfg(feature = "opencv")]
mod opencv_camera {
    use super::{Camera, CaptureError, Frame, FrameSource};
    use image::RgbImage;
    use opencv::imgproc::cvt_color;
    use opencv::imgproc::COLOR_BGR2RGB;
    use opencv::prelude::Mat;
    use opencv::prelude::MatTraitConst;
    use opencv::prelude::MatTraitConstManual;
    use opencv::prelude::VideoCaptureTrait;
    use opencv::prelude::VideoCaptureTraitConst;
    use opencv::videoio::VideoCapture;
    use opencv::videoio::CAP_ANY;
    use opencv::videoio::CAP_PROP_FRAME_HEIGHT;
    use opencv::videoio::CAP_PROP_FRAME_WIDTH;

    fn backend(e: opencv::Error) -> CaptureError {
        CaptureError::Backend(e.to_string())
    }

    #[derive(Default)]
    pub struct OpencvFrameSource;

    impl FrameSource for OpencvFrameSource {
        fn open(&self, device_index: i32) -> Result<Box<dyn Camera>, CaptureError> {
            let capture = VideoCapture::new(device_index, CAP_ANY)
                .map_err(|_| CaptureError::Unavailable(device_index))?;
            if !capture
                .is_opened()
                .map_err(|_| CaptureError::Unavailable(device_index))?
            {
                return Err(CaptureError::Unavailable(device_index));
            }
            Ok(Box::new(OpencvCamera { capture }))
        }
    }

    struct OpencvCamera {
        capture: VideoCapture,
    }

    // VideoCapture is only touched by the thread that currently owns the lease.
    unsafe impl Send for OpencvCamera {}

    impl Camera for OpencvCamera {
        fn configure(&mut self, width: u32, height: u32) -> Result<(), CaptureError> {
            let w = self
                .capture
                .set(CAP_PROP_FRAME_WIDTH, width as f64)
                .map_err(backend)?;
            let h = self
                .capture
                .set(CAP_PROP_FRAME_HEIGHT, height as f64)
                .map_err(backend)?;
            if w && h {
                Ok(())
            } else {
                Err(CaptureError::Backend(format!(
                    "device refused {width}x{height}"
                )))
            }
        }

        fn read(&mut self) -> Result<Frame, CaptureError> {
            let mut image = Mat::default();
            let grabbed = self.capture.read(&mut image).map_err(backend)?;
            if !grabbed || image.empty() {
                return Err(CaptureError::ReadFailed("no frame returned".into()));
            }

            let mut rgb = Mat::default();
            cvt_color(&image, &mut rgb, COLOR_BGR2RGB, 0).map_err(backend)?;
            let width = rgb.cols() as u32;
            let height = rgb.rows() as u32;
            let data = rgb.data_bytes().map_err(backend)?.to_vec();
            let pixels = RgbImage::from_vec(width, height, data)
                .ok_or_else(|| CaptureError::ReadFailed("frame buffer size mismatch".into()))?;
            Ok(Frame::new(pixels))
        }

        fn release(&mut self) -> Result<(), CaptureError> {
            self.capture.release().map_err(backend)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        released: AtomicUsize,
    }

    struct TestSource {
        counters: Arc<Counters>,
        fail_read: bool,
        fail_configure: bool,
    }

    struct TestCamera {
        counters: Arc<Counters>,
        fail_read: bool,
        fail_configure: bool,
    }

    impl FrameSource for TestSource {
        fn open(&self, device_index: i32) -> Result<Box<dyn Camera>, CaptureError> {
            if device_index < 0 {
                return Err(CaptureError::Unavailable(device_index));
            }
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(TestCamera {
                counters: self.counters.clone(),
                fail_read: self.fail_read,
                fail_configure: self.fail_configure,
            }))
        }
    }

    impl Camera for TestCamera {
        fn configure(&mut self, _width: u32, _height: u32) -> Result<(), CaptureError> {
            if self.fail_configure {
                Err(CaptureError::Backend("fixed resolution".into()))
            } else {
                Ok(())
            }
        }

        fn read(&mut self) -> Result<Frame, CaptureError> {
            if self.fail_read {
                Err(CaptureError::ReadFailed("sensor timeout".into()))
            } else {
                Ok(Frame::new(RgbImage::new(8, 6)))
            }
        }

        fn release(&mut self) -> Result<(), CaptureError> {
            self.counters.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn source(fail_read: bool, fail_configure: bool) -> (TestSource, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        (
            TestSource {
                counters: counters.clone(),
                fail_read,
                fail_configure,
            },
            counters,
        )
    }

    #[test]
    fn grab_releases_once_on_success() {
        let (src, counters) = source(false, false);
        let frame = grab_frame(&src, 0, 640, 480).unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 6));
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn grab_releases_once_on_read_failure() {
        let (src, counters) = source(true, false);
        let err = grab_frame(&src, 0, 640, 480).err().unwrap();
        assert!(matches!(err, CaptureError::ReadFailed(_)));
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn configure_failure_is_not_fatal() {
        let (src, counters) = source(false, true);
        assert!(grab_frame(&src, 0, 1920, 1080).is_ok());
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn open_failure_touches_nothing() {
        let (src, counters) = source(false, false);
        let err = grab_frame(&src, -1, 640, 480).err().unwrap();
        assert!(matches!(err, CaptureError::Unavailable(-1)));
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
        assert_eq!(counters.released.load(Ordering::SeqCst), 0);
    }
}
