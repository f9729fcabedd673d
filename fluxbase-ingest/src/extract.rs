//! MIME-dispatched text extraction.

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while extracting text from a document.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Bytes for a plain-text MIME type were not valid UTF-8.
    #[error("document bytes are not valid UTF-8")]
    InvalidUtf8,

    /// PDF/image extraction requires an `OcrProvider` but none was configured.
    #[error("MIME type {0:?} requires an OCR provider, none configured")]
    OcrProviderRequired(String),

    /// The configured `OcrProvider` failed.
    #[error("OCR extraction failed: {0}")]
    Ocr(String),
}

/// Capability collaborator for extracting text from non-plain-text formats.
/// fluxbase never implements OCR itself — it only consumes this interface
/// (spec's explicit non-goal on OCR engines).
#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Extract text from PDF bytes, optionally hinting languages present.
    async fn extract_text_from_pdf(&self, bytes: &[u8], langs: &[String]) -> Result<String, ExtractError>;

    /// Extract text from image bytes, optionally hinting languages present.
    async fn extract_text_from_image(&self, bytes: &[u8], langs: &[String]) -> Result<String, ExtractError>;
}

/// Fixed extension → MIME type table used when a caller only has a filename.
const EXTENSION_TABLE: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("markdown", "text/markdown"),
    ("csv", "text/csv"),
    ("tsv", "text/tab-separated-values"),
    ("json", "application/json"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("xml", "application/xml"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("tiff", "image/tiff"),
    ("bmp", "image/bmp"),
];

/// Infer a MIME type from a file extension (case-insensitive, leading dot
/// optional). Returns `None` for unrecognized extensions.
pub fn mime_from_extension(extension: &str) -> Option<&'static str> {
    let normalized = extension.trim_start_matches('.').to_ascii_lowercase();
    EXTENSION_TABLE
        .iter()
        .find(|(ext, _)| *ext == normalized)
        .map(|(_, mime)| *mime)
}

fn is_image_mime(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

/// Dispatches extraction on MIME type, routing PDF and image types through
/// an [`OcrProvider`] collaborator and everything else through plain UTF-8
/// decoding.
pub struct TextExtractor<O: OcrProvider> {
    ocr: Option<O>,
}

impl<O: OcrProvider> TextExtractor<O> {
    /// Build an extractor with no OCR collaborator. PDF/image documents will
    /// fail with [`ExtractError::OcrProviderRequired`].
    pub fn new() -> Self {
        Self { ocr: None }
    }

    /// Build an extractor backed by the given OCR collaborator.
    pub fn with_ocr(ocr: O) -> Self {
        Self { ocr: Some(ocr) }
    }

    /// Extract text from `bytes` known to be of `mime_type`.
    pub async fn extract(&self, bytes: &[u8], mime_type: &str, langs: &[String]) -> Result<String, ExtractError> {
        if mime_type == "application/pdf" {
            let ocr = self
                .ocr
                .as_ref()
                .ok_or_else(|| ExtractError::OcrProviderRequired(mime_type.to_string()))?;
            return ocr
                .extract_text_from_pdf(bytes, langs)
                .await
                .map_err(|e| ExtractError::Ocr(e.to_string()));
        }
        if is_image_mime(mime_type) {
            let ocr = self
                .ocr
                .as_ref()
                .ok_or_else(|| ExtractError::OcrProviderRequired(mime_type.to_string()))?;
            return ocr
                .extract_text_from_image(bytes, langs)
                .await
                .map_err(|e| ExtractError::Ocr(e.to_string()));
        }
        String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::InvalidUtf8)
    }
}

impl<O: OcrProvider> Default for TextExtractor<O> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverCalledOcr;

    #[async_trait]
    impl OcrProvider for NeverCalledOcr {
        async fn extract_text_from_pdf(&self, _bytes: &[u8], _langs: &[String]) -> Result<String, ExtractError> {
            unreachable!("not exercised by plain-text tests")
        }
        async fn extract_text_from_image(&self, _bytes: &[u8], _langs: &[String]) -> Result<String, ExtractError> {
            unreachable!("not exercised by plain-text tests")
        }
    }

    #[test]
    fn extension_table_covers_common_types() {
        assert_eq!(mime_from_extension("txt"), Some("text/plain"));
        assert_eq!(mime_from_extension(".PDF"), Some("application/pdf"));
        assert_eq!(mime_from_extension("jpeg"), Some("image/jpeg"));
        assert_eq!(mime_from_extension("exe"), None);
    }

    #[tokio::test]
    async fn plain_text_decodes_directly() {
        let extractor: TextExtractor<NeverCalledOcr> = TextExtractor::new();
        let text = extractor.extract(b"hello world", "text/plain", &[]).await.unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn invalid_utf8_is_rejected() {
        let extractor: TextExtractor<NeverCalledOcr> = TextExtractor::new();
        let err = extractor.extract(&[0xff, 0xfe], "text/plain", &[]).await.unwrap_err();
        assert!(matches!(err, ExtractError::InvalidUtf8));
    }

    #[tokio::test]
    async fn pdf_without_ocr_provider_fails() {
        let extractor: TextExtractor<NeverCalledOcr> = TextExtractor::new();
        let err = extractor.extract(b"%PDF-1.4", "application/pdf", &[]).await.unwrap_err();
        assert!(matches!(err, ExtractError::OcrProviderRequired(_)));
    }

    struct EchoOcr;

    #[async_trait]
    impl OcrProvider for EchoOcr {
        async fn extract_text_from_pdf(&self, _bytes: &[u8], _langs: &[String]) -> Result<String, ExtractError> {
            Ok("pdf text".to_string())
        }
        async fn extract_text_from_image(&self, _bytes: &[u8], _langs: &[String]) -> Result<String, ExtractError> {
            Ok("image text".to_string())
        }
    }

    #[tokio::test]
    async fn pdf_and_image_route_through_ocr() {
        let extractor = TextExtractor::with_ocr(EchoOcr);
        assert_eq!(
            extractor.extract(b"%PDF", "application/pdf", &[]).await.unwrap(),
            "pdf text"
        );
        assert_eq!(
            extractor.extract(b"\x89PNG", "image/png", &[]).await.unwrap(),
            "image text"
        );
    }
}
