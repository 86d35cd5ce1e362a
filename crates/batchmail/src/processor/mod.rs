pub mod docx;

use std::path::Path;

use crate::error::ProcessError;

pub use docx::extract_plain_text;

/// Formats an uploaded template body can arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFormat {
    Docx,
    Text,
}

impl TemplateFormat {
    /// `.docx` (any case) is Word; everything else is read as UTF-8 text.
    pub fn from_filename(filename: &str) -> Self {
        let is_docx = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("docx"));
        if is_docx {
            TemplateFormat::Docx
        } else {
            TemplateFormat::Text
        }
    }
}

/// Turns an uploaded template file into a body pattern.
pub fn extract_template_body(filename: &str, bytes: &[u8]) -> Result<String, ProcessError> {
    match TemplateFormat::from_filename(filename) {
        TemplateFormat::Docx => extract_plain_text(bytes),
        TemplateFormat::Text => std::str::from_utf8(bytes)
            .map(|s| s.trim_start_matches('\u{feff}').to_string())
            .map_err(|_| {
                ProcessError::TextExtraction("Template file must be UTF-8 encoded text".to_string())
            }),
    }
}
