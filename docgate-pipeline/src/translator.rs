/// Upstream error translation
///
/// Upstream services report failures as free-form technical strings
/// ("low confidence in keypoints"). Signed-in users get a stable, actionable
/// shape instead: a user message, a suggestion and a code.
///
/// # Lookup Order
///
/// 1. Trim and lowercase the technical message
/// 2. Exact match against the table, in table order
/// 3. First table entry whose phrase is a substring of the message
/// 4. Fallback: `GEN_UNKNOWN`
///
/// # Example
///
/// ```
/// use docgate_pipeline::translator::ErrorTranslator;
///
/// let translator = ErrorTranslator::new();
/// let error = translator.translate("Document NOT Detected");
/// assert_eq!(error.code, "ID_CROP_003");
/// assert_eq!(error.technical_message, "Document NOT Detected");
/// ```

use serde::{Deserialize, Serialize};

/// Code returned when nothing in the table matches
pub const FALLBACK_CODE: &str = "GEN_UNKNOWN";

const FALLBACK_USER_MESSAGE: &str = "Processing failed";
const FALLBACK_SUGGESTION: &str = "Try again or contact support";

/// Operation family an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDomain {
    Face,
    DocumentCrop,
    Qr,
    Signature,
    Generic,
}

/// One table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMapping {
    pub domain: ErrorDomain,

    /// Lowercased technical phrase
    pub technical: String,

    pub user_message: String,
    pub suggestion: String,
    pub code: String,
}

impl ErrorMapping {
    pub fn new(domain: ErrorDomain, technical: &str, user_message: &str, suggestion: &str, code: &str) -> Self {
        Self {
            domain,
            technical: technical.trim().to_lowercase(),
            user_message: user_message.to_string(),
            suggestion: suggestion.to_string(),
            code: code.to_string(),
        }
    }
}

/// Client-facing error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatedError {
    pub user_message: String,
    pub technical_message: String,
    pub suggestion: String,
    pub code: String,
}

/// Ordered phrase table
#[derive(Debug, Clone)]
pub struct ErrorTranslator {
    mappings: Vec<ErrorMapping>,
}

impl Default for ErrorTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorTranslator {
    /// Translator with the built-in table
    pub fn new() -> Self {
        Self {
            mappings: default_mappings(),
        }
    }

    /// Translator with no entries (everything falls back)
    pub fn empty() -> Self {
        Self { mappings: Vec::new() }
    }

    /// Appends an entry; earlier entries keep precedence
    pub fn add_mapping(&mut self, mapping: ErrorMapping) {
        self.mappings.push(mapping);
    }

    pub fn translate(&self, technical: &str) -> TranslatedError {
        let normalized = technical.trim().to_lowercase();

        let mapping = self
            .mappings
            .iter()
            .find(|m| m.technical == normalized)
            .or_else(|| {
                self.mappings
                    .iter()
                    .find(|m| !m.technical.is_empty() && normalized.contains(&m.technical))
            });

        match mapping {
            Some(m) => TranslatedError {
                user_message: m.user_message.clone(),
                technical_message: technical.to_string(),
                suggestion: m.suggestion.clone(),
                code: m.code.clone(),
            },
            None => TranslatedError {
                user_message: FALLBACK_USER_MESSAGE.to_string(),
                technical_message: technical.to_string(),
                suggestion: FALLBACK_SUGGESTION.to_string(),
                code: FALLBACK_CODE.to_string(),
            },
        }
    }
}

fn default_mappings() -> Vec<ErrorMapping> {
    use ErrorDomain::*;

    vec![
        ErrorMapping::new(
            DocumentCrop,
            "low confidence in keypoints",
            "Please upload a different image",
            "Try uploading a clearer image with better lighting and ensure the ID document is fully visible",
            "ID_CROP_001",
        ),
        ErrorMapping::new(
            DocumentCrop,
            "image too blurry",
            "Image quality is too low",
            "Please upload a sharper, clearer image of your ID document",
            "ID_CROP_002",
        ),
        ErrorMapping::new(
            DocumentCrop,
            "document not detected",
            "ID document not found in image",
            "Please ensure the entire ID document is visible in the image",
            "ID_CROP_003",
        ),
        ErrorMapping::new(
            DocumentCrop,
            "invalid image format",
            "Unsupported image format",
            "Please upload a valid image file (JPG, PNG, etc.)",
            "ID_CROP_004",
        ),
        ErrorMapping::new(
            Face,
            "no face detected",
            "No face found in the image",
            "Please ensure your face is clearly visible in the image",
            "FACE_DET_001",
        ),
        ErrorMapping::new(
            Face,
            "multiple faces detected",
            "Multiple faces detected",
            "Please upload an image with only one face",
            "FACE_DET_002",
        ),
        ErrorMapping::new(
            Face,
            "face too small",
            "Face is too small in the image",
            "Please upload an image where your face takes up more of the frame",
            "FACE_DET_003",
        ),
        ErrorMapping::new(
            Qr,
            "qr code not found",
            "QR code not detected",
            "Please ensure the QR code is clearly visible and not damaged",
            "QR_001",
        ),
        ErrorMapping::new(
            Qr,
            "qr code damaged",
            "QR code appears to be damaged",
            "Please upload an image with a clear, undamaged QR code",
            "QR_002",
        ),
        ErrorMapping::new(
            Signature,
            "signature not clear",
            "Signature is not clear enough",
            "Please upload a clearer image of the signature",
            "SIG_001",
        ),
        ErrorMapping::new(
            Signature,
            "no signature found",
            "No signature detected in the image",
            "Please ensure the signature is clearly visible in the image",
            "SIG_002",
        ),
        ErrorMapping::new(
            Generic,
            "processing failed",
            "Processing failed",
            "Please try again with a different image",
            "GEN_001",
        ),
        ErrorMapping::new(Generic, "timeout", "Request timed out", "Please try again later", "GEN_002"),
        ErrorMapping::new(
            Generic,
            "server error",
            "Service temporarily unavailable",
            "Please try again later",
            "GEN_003",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let error = ErrorTranslator::new().translate("no face detected");
        assert_eq!(error.code, "FACE_DET_001");
        assert_eq!(error.user_message, "No face found in the image");
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let translator = ErrorTranslator::new();
        assert_eq!(
            translator.translate("  Document NOT Detected ").code,
            translator.translate("document not detected").code
        );
    }

    #[test]
    fn test_substring_match() {
        let error = ErrorTranslator::new().translate("Model error: image too blurry (score 0.12)");
        assert_eq!(error.code, "ID_CROP_002");
        assert_eq!(error.technical_message, "Model error: image too blurry (score 0.12)");
    }

    #[test]
    fn test_table_order_breaks_ties() {
        // Contains both "no face detected" and "timeout"; the face entry comes first
        let error = ErrorTranslator::new().translate("no face detected before timeout");
        assert_eq!(error.code, "FACE_DET_001");
    }

    #[test]
    fn test_fallback() {
        let error = ErrorTranslator::new().translate("segmentation fault in worker 3");
        assert_eq!(error.code, FALLBACK_CODE);
        assert_eq!(error.user_message, "Processing failed");
        assert_eq!(error.suggestion, "Try again or contact support");
    }

    #[test]
    fn test_add_mapping() {
        let mut translator = ErrorTranslator::empty();
        assert_eq!(translator.translate("glare detected").code, FALLBACK_CODE);

        translator.add_mapping(ErrorMapping::new(
            ErrorDomain::DocumentCrop,
            "Glare Detected",
            "Too much glare",
            "Avoid direct light on the document",
            "ID_CROP_005",
        ));
        assert_eq!(translator.translate("glare detected").code, "ID_CROP_005");
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(ErrorTranslator::new().translate("qr code damaged")).unwrap();
        assert_eq!(json["code"], "QR_002");
        assert!(json.get("userMessage").is_some());
        assert!(json.get("technicalMessage").is_some());
    }
}
