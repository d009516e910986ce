use crate::registry::{FileRecord, FileType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four fixed conversion strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineKind {
    /// `.docx/.pptx/.xlsx/.xls`: render a PDF, then MarkItDown on the
    /// original with the PDF as fallback input.
    OfficeMarkitdown,
    /// `.doc/.ppt`: render a PDF, then OCR it.
    LegacyOcr,
    PdfOcr,
    ImageOcr,
}

impl PipelineKind {
    /// Choose the pipeline for `file`. Extension wins over the recorded
    /// type, so a `.docx` is never sent to OCR.
    pub fn select(file: &FileRecord) -> Option<Self> {
        match file.extension().as_deref() {
            Some("pptx" | "docx" | "xlsx" | "xls") => return Some(PipelineKind::OfficeMarkitdown),
            Some("doc" | "ppt") => return Some(PipelineKind::LegacyOcr),
            _ => {}
        }
        match file.file_type {
            FileType::Pdf => Some(PipelineKind::PdfOcr),
            FileType::Image => Some(PipelineKind::ImageOcr),
            FileType::Office | FileType::Text => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::OfficeMarkitdown => "office-markitdown",
            PipelineKind::LegacyOcr => "legacy-ocr",
            PipelineKind::PdfOcr => "pdf-ocr",
            PipelineKind::ImageOcr => "image-ocr",
        }
    }

    /// Whether the run renders an intermediate PDF.
    pub fn renders_pdf(&self) -> bool {
        matches!(self, PipelineKind::OfficeMarkitdown | PipelineKind::LegacyOcr)
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
