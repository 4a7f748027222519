use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use plate_capture::plate_detection::cascade_detector::{
    CascadeDetector, DetectorSlot, RegionDetector,
};
use plate_capture::plate_detection::plate_ocr::TesseractRecognizer;
use plate_capture::plate_detection::video_reader::OpencvFrameSource;
use plate_capture::{Config, PlatePipeline};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(about = "Capture a frame on demand and read the license plates in it")]
struct Args {
    /// TOML config file; built-in defaults are used if it does not exist.
    #[arg(long, env = "PLATE_CAPTURE_CONFIG", default_value = "config.toml")]
    config: PathBuf,
    /// Overrides server.bind from the config file.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match Config::load_or_default(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", args.config.display());
            std::process::exit(1);
        }
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        device_index = config.camera.device_index,
        cascade = %config.detector.cascade_path.display(),
        plates_dir = %config.storage.plates_dir.display(),
        languages = %config.ocr.language_spec(),
        "starting plate capture server"
    );

    if let Err(e) = std::fs::create_dir_all(&config.storage.plates_dir) {
        error!(error = %e, dir = %config.storage.plates_dir.display(), "cannot create plates directory");
        std::process::exit(1);
    }

    let cascade_path = config.detector.cascade_path.clone();
    let (scale_factor, min_neighbors) = (config.detector.scale_factor, config.detector.min_neighbors);
    let detector = Arc::new(DetectorSlot::lazy(move || {
        let detector = CascadeDetector::load(&cascade_path, scale_factor, min_neighbors)?;
        Ok(Arc::new(detector) as Arc<dyn RegionDetector>)
    }));
    detector.warm_up();

    let recognizer = match TesseractRecognizer::new(&config.ocr) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!(error = %e, "failed to initialise OCR");
            std::process::exit(1);
        }
    };

    let pipeline = Arc::new(PlatePipeline::from_config(
        &config,
        Arc::new(OpencvFrameSource),
        detector,
        recognizer,
    ));
    let app = plate_capture_server::router(pipeline, &config.storage.static_dir);

    let addr = config.server.bind.clone();
    info!(addr = %addr, "plate capture server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutting down");
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
