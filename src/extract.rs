//! Text extraction from raw document bytes.
//!
//! Extraction is a leaf concern of the ingestion pipeline: bytes in, plain
//! UTF-8 text out, `None` when nothing usable could be recovered. The
//! pipeline treats `None` as "leave the document un-processed so a retry can
//! succeed after the file is replaced".

use thiserror::Error;

/// Extensions accepted by the upload path.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

/// Errors raised while extracting text from document bytes.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// PDF parsing failed.
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    /// The file extension names no known extractor.
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),
}

/// Interface implemented by text extractors.
pub trait TextExtractor: Send + Sync {
    /// Extract plain text from raw bytes. Returns `Ok(None)` when the
    /// document parsed but yielded no usable (non-whitespace) text.
    fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<Option<String>, ExtractionError>;
}

/// Extension-dispatching extractor covering the supported upload formats.
pub struct DocumentExtractor;

impl DocumentExtractor {
    /// Construct the default extractor.
    pub const fn new() -> Self {
        Self
    }
}

impl Default for DocumentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractor for DocumentExtractor {
    fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<Option<String>, ExtractionError> {
        let text = match file_extension(file_name).as_deref() {
            Some("pdf") => pdf_extract::extract_text_from_mem(bytes)
                .map_err(|err| ExtractionError::Pdf(err.to_string()))?,
            Some("txt") | Some("md") => String::from_utf8_lossy(bytes).into_owned(),
            _ => return Err(ExtractionError::UnsupportedFormat(file_name.to_string())),
        };

        if text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(text))
        }
    }
}

/// Whether the file name carries an extension the server accepts.
pub fn is_supported_document(file_name: &str) -> bool {
    file_extension(file_name)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn file_extension(file_name: &str) -> Option<String> {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_passed_through() {
        let extractor = DocumentExtractor::new();
        let text = extractor
            .extract("notes.txt", b"hello world")
            .expect("extraction");
        assert_eq!(text.as_deref(), Some("hello world"));
    }

    #[test]
    fn whitespace_only_text_yields_none() {
        let extractor = DocumentExtractor::new();
        let text = extractor
            .extract("blank.md", b"  \n\t  ")
            .expect("extraction");
        assert!(text.is_none());
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let extractor = DocumentExtractor::new();
        let error = extractor.extract("image.png", b"\x89PNG").unwrap_err();
        assert!(matches!(error, ExtractionError::UnsupportedFormat(_)));
    }

    #[test]
    fn supported_extensions_are_case_insensitive() {
        assert!(is_supported_document("Report.PDF"));
        assert!(is_supported_document("notes.txt"));
        assert!(!is_supported_document("archive.zip"));
        assert!(!is_supported_document("no_extension"));
    }
}
