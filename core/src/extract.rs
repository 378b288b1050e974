use crate::error::{Error, Result};
use crate::process;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;
use tracing::debug;

/// Turns a document on disk into plain text.
pub trait TextExtractor: Send + Sync {
    /// Once `deadline` has passed the implementation stops its work and
    /// returns [`Error::ExtractionTimeout`]; nothing may keep running after
    /// it returns.
    fn extract(&self, path: &Path, deadline: Option<Instant>) -> Result<String>;
}

/// Scanned-PDF OCR: `pdftoppm` rasterises each page into a scratch
/// directory, `tesseract` reads every page image back as text.
#[derive(Debug, Clone)]
pub struct OcrExtractor {
    pub pdftoppm: PathBuf,
    pub tesseract: PathBuf,
    pub language: String,
    pub dpi: u32,
}

impl Default for OcrExtractor {
    fn default() -> Self {
        Self {
            pdftoppm: PathBuf::from("pdftoppm"),
            tesseract: PathBuf::from("tesseract"),
            language: "spa".to_string(),
            dpi: 300,
        }
    }
}

impl OcrExtractor {
    fn failure(path: &Path, message: impl Into<String>) -> Error {
        Error::Extraction { path: path.to_path_buf(), message: message.into() }
    }

    fn run(&self, path: &Path, cmd: &mut Command, started: Instant, deadline: Option<Instant>) -> Result<Vec<u8>> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        let output = process::run(cmd, None, deadline)
            .map_err(|e| Self::failure(path, format!("could not run {program}: {e}")))?
            .ok_or_else(|| Error::ExtractionTimeout { path: path.to_path_buf(), after: started.elapsed() })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::failure(path, format!("{program} exited with {}: {}", output.status, stderr.trim())));
        }
        Ok(output.stdout)
    }
}

impl TextExtractor for OcrExtractor {
    fn extract(&self, path: &Path, deadline: Option<Instant>) -> Result<String> {
        let started = Instant::now();
        let scratch = tempfile::tempdir()?;
        let prefix = scratch.path().join("page");
        self.run(
            path,
            Command::new(&self.pdftoppm)
                .arg("-r")
                .arg(self.dpi.to_string())
                .arg("-png")
                .arg(path)
                .arg(&prefix),
            started,
            deadline,
        )?;

        let mut pages: Vec<PathBuf> = fs::read_dir(scratch.path())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        if pages.is_empty() {
            return Err(Self::failure(path, "no pages rendered"));
        }
        // pdftoppm zero-pads page numbers, so name order is page order.
        pages.sort();

        let mut text = String::new();
        for page in &pages {
            let stdout = self.run(
                path,
                Command::new(&self.tesseract).arg(page).arg("stdout").arg("-l").arg(&self.language),
                started,
                deadline,
            )?;
            text.push_str(&String::from_utf8_lossy(&stdout));
            text.push('\n');
        }
        debug!(path = %path.display(), pages = pages.len(), chars = text.len(), "ocr finished");
        Ok(text)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn extractor(pdftoppm: &str, tesseract: &str) -> OcrExtractor {
        OcrExtractor { pdftoppm: pdftoppm.into(), tesseract: tesseract.into(), ..OcrExtractor::default() }
    }

    #[test]
    fn missing_rasteriser_is_an_extraction_error() {
        let ocr = extractor("/nonexistent/pdftoppm", "tesseract");
        let err = ocr.extract(Path::new("scan.pdf"), None).unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }), "{err}");
    }

    #[test]
    fn failing_rasteriser_is_an_extraction_error() {
        let ocr = extractor("false", "tesseract");
        assert!(matches!(ocr.extract(Path::new("scan.pdf"), None), Err(Error::Extraction { .. })));
    }

    #[test]
    fn no_rendered_pages_is_an_extraction_error() {
        // `true` accepts any arguments and renders nothing.
        let ocr = extractor("true", "tesseract");
        let err = ocr.extract(Path::new("scan.pdf"), None).unwrap_err();
        assert!(err.to_string().contains("no pages rendered"), "{err}");
    }
}
