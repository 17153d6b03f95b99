//! Optical character recognition used as a fallback when the contour detector
//! finds nothing. The engine is an injectable collaborator; the bundled
//! implementation drives the `tesseract` command line tool.

use std::{
    io::{self, Read, Write},
    path::PathBuf,
    process::{Command, Output, Stdio},
    thread,
    time::{Duration, Instant},
};

use image::{GrayImage, ImageFormat};
use thiserror::Error;
use tracing::instrument;

use crate::BoundingBox;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),
    #[error("OCR timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to start OCR engine: {0}")]
    Spawn(#[source] io::Error),
    #[error("OCR engine failed: {0}")]
    Failed(String),
    #[error("OCR I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode image for OCR: {0}")]
    Image(#[from] image::ImageError),
}

/// One recognized word and where the engine placed it.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    pub bounds: BoundingBox,
    pub confidence: f32,
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
}

impl OcrWord {
    pub fn line_key(&self) -> (u32, u32, u32) {
        (self.block, self.paragraph, self.line)
    }
}

/// Text recognition backend. Implementations must honour `timeout` and return
/// [`OcrError::Timeout`] instead of blocking past it.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Checks the engine can run and returns a version string.
    fn probe(&self) -> Result<String, OcrError>;

    fn recognize(&self, image: &GrayImage, timeout: Duration) -> Result<Vec<OcrWord>, OcrError>;
}

#[derive(Debug, Clone)]
pub struct TesseractOcr {
    command: PathBuf,
    language: String,
    page_segmentation: u32,
    min_confidence: f32,
    min_size: i32,
}

impl TesseractOcr {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn page_segmentation(mut self, psm: u32) -> Self {
        self.page_segmentation = psm;
        self
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            command: "tesseract".into(),
            language: "tur".to_string(),
            page_segmentation: 6,
            min_confidence: 10.0,
            min_size: 5,
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    #[instrument(skip(self), level = "debug")]
    fn probe(&self) -> Result<String, OcrError> {
        let mut command = Command::new(&self.command);
        command.arg("--version");
        let output = run_with_deadline(command, PROBE_TIMEOUT)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Unavailable(stderr.trim().to_string()));
        }
        // older releases print the banner on stderr
        let banner = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Ok(String::from_utf8_lossy(&banner)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    #[instrument(skip(self, image), level = "debug")]
    fn recognize(&self, image: &GrayImage, timeout: Duration) -> Result<Vec<OcrWord>, OcrError> {
        let mut tmp = tempfile::Builder::new().suffix(".png").tempfile()?;
        image.write_to(&mut tmp, ImageFormat::Png)?;
        tmp.flush()?;

        let mut command = Command::new(&self.command);
        command
            .arg(tmp.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg(self.page_segmentation.to_string())
            .arg("tsv");
        let output = run_with_deadline(command, timeout)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(stderr.trim().to_string()));
        }
        let tsv = String::from_utf8_lossy(&output.stdout);
        let words = parse_tsv_words(&tsv, self.min_confidence, self.min_size);
        log::debug!("Tesseract recognized {} words", words.len());
        Ok(words)
    }
}

/// Runs `command`, killing it once `timeout` elapses.
fn run_with_deadline(mut command: Command, timeout: Duration) -> Result<Output, OcrError> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(OcrError::Spawn)?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            log::warn!("Killing OCR process after {timeout:?}");
            let _ = child.kill();
            let _ = child.wait();
            return Err(OcrError::Timeout(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    };

    let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
        handle
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    };
    Ok(Output {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        buffer
    })
}

/// Parses word rows (level 5) of tesseract's TSV output, skipping blank text,
/// low confidence and tiny boxes.
pub fn parse_tsv_words(tsv: &str, min_confidence: f32, min_size: i32) -> Vec<OcrWord> {
    tsv.lines()
        .skip(1)
        .filter_map(|row| {
            let cols = row.split('\t').collect::<Vec<_>>();
            if cols.len() < 12 || cols[0].trim() != "5" {
                return None;
            }
            let text = cols[11].trim();
            let confidence = cols[10].trim().parse::<f32>().unwrap_or(-1.0);
            if text.is_empty() || confidence < min_confidence {
                return None;
            }
            let number = |idx: usize| cols[idx].trim().parse::<i32>().ok();
            let bounds = BoundingBox::new(number(6)?, number(7)?, number(8)?, number(9)?);
            if bounds.width < min_size || bounds.height < min_size {
                return None;
            }
            Some(OcrWord {
                text: text.to_string(),
                bounds,
                confidence,
                block: number(2)?.max(0) as u32,
                paragraph: number(3)?.max(0) as u32,
                line: number(4)?.max(0) as u32,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn parses_word_rows_only() {
        let tsv = format!(
            "{HEADER}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t\n\
             4\t1\t1\t1\t1\t0\t10\t20\t300\t30\t-1\t\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t91.5\tMerhaba\n\
             5\t1\t1\t1\t1\t2\t100\t22\t60\t28\t88\tdünya\n"
        );
        let words = parse_tsv_words(&tsv, 10.0, 5);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "Merhaba");
        assert_eq!(words[0].bounds, BoundingBox::new(10, 20, 80, 30));
        assert_eq!(words[1].line_key(), (1, 1, 1));
        assert!((words[0].confidence - 91.5).abs() < f32::EPSILON);
    }

    #[test]
    fn skips_low_confidence_blank_and_tiny_words() {
        let tsv = format!(
            "{HEADER}\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t5\tlow\n\
             5\t1\t1\t1\t1\t2\t10\t20\t80\t30\t95\t   \n\
             5\t1\t1\t1\t1\t3\t10\t20\t4\t30\t95\tthin\n\
             5\t1\t1\t1\t2\t1\t10\t60\t40\t30\t95\tok\n"
        );
        let words = parse_tsv_words(&tsv, 10.0, 5);
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].text, "ok");
        assert_eq!(words[0].line, 2);
    }

    #[test]
    fn missing_binary_fails_to_spawn() {
        let engine = TesseractOcr::new("/nonexistent/tesseract-binary");
        assert!(matches!(engine.probe(), Err(OcrError::Spawn(_))));
        let image = GrayImage::new(4, 4);
        assert!(matches!(
            engine.recognize(&image, Duration::from_millis(100)),
            Err(OcrError::Spawn(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn slow_process_is_killed_at_deadline() {
        let mut command = Command::new("sleep");
        command.arg("5");
        let started = Instant::now();
        let result = run_with_deadline(command, Duration::from_millis(50));
        assert!(matches!(result, Err(OcrError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
