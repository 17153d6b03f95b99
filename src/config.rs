//! Command line and environment configuration.

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::{
    ocr::{OcrEngine, TesseractOcr},
    HandwritingAnalyzer, HandwritingAnalyzerBuilder,
};

#[derive(Parser, Debug)]
#[command(
    name = "handwriting-analyzer",
    version,
    about = "Score handwriting quality and micrography from uploaded images"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level when RUST_LOG is not set
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Analyze a local image and print the JSON report
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "HANDWRITING_ADDR", default_value = "0.0.0.0:8000")]
    pub addr: String,

    /// Largest accepted request body, in megabytes
    #[arg(long, env = "HANDWRITING_MAX_UPLOAD_MB", default_value_t = 20)]
    pub max_upload_mb: usize,

    #[command(flatten)]
    pub ocr: OcrArgs,
}

impl ServeArgs {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Image file (png, jpg or jpeg)
    pub path: PathBuf,

    /// Pretty-print the JSON report
    #[arg(long)]
    pub pretty: bool,

    #[command(flatten)]
    pub ocr: OcrArgs,
}

#[derive(Args, Debug, Clone)]
pub struct OcrArgs {
    /// Tesseract executable used for the OCR fallback
    #[arg(long, env = "TESSERACT_CMD", default_value = "tesseract")]
    pub tesseract_cmd: PathBuf,

    /// Tesseract language pack
    #[arg(long, env = "HANDWRITING_OCR_LANG", default_value = "tur")]
    pub ocr_lang: String,

    /// Tesseract page segmentation mode
    #[arg(long, env = "HANDWRITING_OCR_PSM", default_value_t = 6)]
    pub ocr_psm: u32,

    /// Abort the OCR fallback after this many milliseconds
    #[arg(long, env = "HANDWRITING_OCR_TIMEOUT_MS", default_value_t = 10_000)]
    pub ocr_timeout_ms: u64,

    /// Disable the OCR fallback
    #[arg(long, env = "HANDWRITING_NO_OCR")]
    pub no_ocr: bool,
}

impl OcrArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.ocr_timeout_ms)
    }

    /// Probes the configured engine once. An engine that cannot start leaves
    /// the analyzer without a fallback instead of failing startup.
    pub fn engine(&self) -> Option<Arc<dyn OcrEngine>> {
        if self.no_ocr {
            info!("OCR fallback disabled");
            return None;
        }
        let engine = TesseractOcr::new(&self.tesseract_cmd)
            .language(&self.ocr_lang)
            .page_segmentation(self.ocr_psm);
        match engine.probe() {
            Ok(version) => {
                info!("OCR fallback ready: {version}");
                Some(Arc::new(engine))
            }
            Err(err) => {
                warn!("OCR fallback unavailable, continuing without it: {err}");
                None
            }
        }
    }

    pub fn build_analyzer(&self) -> HandwritingAnalyzer {
        let builder = HandwritingAnalyzerBuilder::new().ocr_timeout(self.timeout());
        let builder = match self.engine() {
            Some(engine) => builder.ocr_engine(engine),
            None => builder,
        };
        builder.build()
    }
}
