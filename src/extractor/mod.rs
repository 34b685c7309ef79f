//! 콘텐츠 추출 모듈
//!
//! 문서 바이트에서 텍스트와 페이지 수를 추출합니다.
//! - PDF 파일: pdf-extract로 텍스트 추출
//! - 텍스트 파일: UTF-8로 직접 읽기 (1페이지)

pub mod pdf;

use std::path::Path;

use anyhow::Result;

use crate::collector::FileType;
use crate::error::RagError;

// ============================================================================
// Extracted Text
// ============================================================================

/// 추출된 텍스트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    /// 추출된 전체 텍스트
    pub text: String,
    /// 페이지 수 (최소 1)
    pub page_count: usize,
}

// ============================================================================
// TextExtractor Trait
// ============================================================================

/// 텍스트 추출기 트레이트
///
/// CPU 바운드 작업이므로 동기 인터페이스입니다.
/// 호출자는 `spawn_blocking`에서 실행합니다.
pub trait TextExtractor: Send + Sync {
    /// 문서 이름(확장자로 형식 판별)과 바이트에서 텍스트 추출
    fn extract(&self, name: &str, bytes: &[u8]) -> Result<ExtractedText>;
}

// ============================================================================
// Content Extractor
// ============================================================================

/// 확장자별 콘텐츠 추출기
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentExtractor;

impl ContentExtractor {
    pub fn new() -> Self {
        Self
    }

    /// 텍스트 파일에서 추출
    fn extract_text(&self, bytes: &[u8]) -> ExtractedText {
        ExtractedText {
            text: String::from_utf8_lossy(bytes).into_owned(),
            page_count: 1,
        }
    }
}

impl TextExtractor for ContentExtractor {
    fn extract(&self, name: &str, bytes: &[u8]) -> Result<ExtractedText> {
        match FileType::from_path(Path::new(name)) {
            Some(FileType::Pdf) => pdf::extract_text_from_pdf(name, bytes),
            Some(FileType::Text) => Ok(self.extract_text(bytes)),
            None => Err(RagError::Extraction {
                source_name: name.to_string(),
                message: "unsupported file type".to_string(),
            }
            .into()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
