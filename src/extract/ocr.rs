use super::ExtractionError;

/// OCR engine abstraction (allows mocking for tests).
pub trait OcrEngine: Send + Sync {
    /// Recognise text in a PNG image using the given Tesseract language code(s).
    fn recognize(&self, image_bytes: &[u8], lang: &str) -> Result<String, ExtractionError>;
}

/// Tesseract-backed OCR. Only available with the `ocr` feature.
#[cfg(feature = "ocr")]
pub struct TesseractEngine {
    tessdata_dir: Option<std::path::PathBuf>,
}

#[cfg(feature = "ocr")]
impl TesseractEngine {
    /// `tessdata_dir` of `None` lets Tesseract use its compiled-in search path.
    pub fn new(tessdata_dir: Option<&std::path::Path>) -> Result<Self, ExtractionError> {
        if let Some(dir) = tessdata_dir {
            if !dir.is_dir() {
                return Err(ExtractionError::OcrInit(format!(
                    "tessdata directory not found: {}",
                    dir.display()
                )));
            }
        }
        Ok(Self {
            tessdata_dir: tessdata_dir.map(|d| d.to_path_buf()),
        })
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for TesseractEngine {
    fn recognize(&self, image_bytes: &[u8], lang: &str) -> Result<String, ExtractionError> {
        let datapath = match &self.tessdata_dir {
            Some(dir) => Some(
                dir.to_str()
                    .ok_or_else(|| ExtractionError::OcrInit("Invalid tessdata path".into()))?,
            ),
            None => None,
        };

        let tess = tesseract::Tesseract::new(datapath, Some(lang))
            .map_err(|e| ExtractionError::OcrInit(format!("{e:?}")))?;

        let mut tess = tess
            .set_image_from_mem(image_bytes)
            .map_err(|e| ExtractionError::OcrProcessing {
                page: 0,
                reason: format!("{e:?}"),
            })?;

        tess.get_text().map_err(|e| ExtractionError::OcrProcessing {
            page: 0,
            reason: format!("{e:?}"),
        })
    }
}

/// Mock OCR engine for unit testing without Tesseract.
#[cfg(test)]
pub struct MockOcrEngine {
    text: Option<String>,
}

#[cfg(test)]
impl MockOcrEngine {
    pub fn new(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { text: None }
    }
}

#[cfg(test)]
impl OcrEngine for MockOcrEngine {
    fn recognize(&self, _image_bytes: &[u8], lang: &str) -> Result<String, ExtractionError> {
        assert!(!lang.is_empty());
        self.text.clone().ok_or_else(|| ExtractionError::OcrProcessing {
            page: 0,
            reason: "engine failure".into(),
        })
    }
}
