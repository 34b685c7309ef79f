//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 PDF에서 텍스트를 추출합니다.

use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

use super::ExtractedText;

/// 페이지 구분자 패턴 (예: "--- Page 1 ---")
fn page_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$")
            .expect("Invalid regex")
    })
}

/// PDF 바이트에서 텍스트와 페이지 수 추출
///
/// 페이지 텍스트는 빈 줄로 이어 붙입니다. 텍스트가 없으면(스캔 문서 등)
/// 빈 텍스트를 반환하고 경고만 남깁니다.
pub fn extract_text_from_pdf(name: &str, bytes: &[u8]) -> Result<ExtractedText> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .with_context(|| format!("Failed to extract text from PDF: {}", name))?;

    let page_count = count_pages(&text);

    // 텍스트가 비어있으면 경고
    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {}. It might be a scanned document.",
            name
        );
        return Ok(ExtractedText {
            text: String::new(),
            page_count,
        });
    }

    let pages = split_pdf_pages(&text);
    Ok(ExtractedText {
        text: pages.join("\n\n"),
        page_count: page_count.max(pages.len()),
    })
}

/// 폼피드 기준 페이지 수 (빈 페이지 포함, 최소 1)
fn count_pages(text: &str) -> usize {
    let text = text.strip_suffix('\x0c').unwrap_or(text);
    text.split('\x0c').count().max(1)
}

/// PDF 텍스트를 페이지별로 분리
fn split_pdf_pages(text: &str) -> Vec<String> {
    // 폼피드 문자 (\x0c)로 페이지 분리 시도
    let pages: Vec<String> = text
        .split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if pages.len() > 1 {
        return pages;
    }

    // 페이지 구분자 패턴으로 시도 (일부 PDF에서 사용)
    let marker = page_marker_regex();
    if marker.is_match(text) {
        let pages: Vec<String> = marker
            .split(text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if pages.len() > 1 {
            return pages;
        }
    }

    // 분리 실패 - 전체를 하나의 페이지로
    vec![text.trim().to_string()]
}

// ============================================================================
// Tests
// ============================================================================
