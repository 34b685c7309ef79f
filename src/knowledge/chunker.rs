//! Text Chunking Module
//!
//! 추출된 문서 텍스트를 임베딩용 오버랩 청크로 분할합니다.
//! 목표 위치 근처의 문장 경계(없으면 단어 경계)에서 자르며,
//! 모든 오프셋은 `clean_text`로 정규화된 텍스트 기준의 바이트 위치입니다.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RagError;

/// 분할 지점 탐색 범위 (목표 위치 ± 문자 수)
pub const DEFAULT_SEARCH_RANGE: usize = 100;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// 목표 청크 크기
    pub chunk_size: usize,
    /// 연속 청크 간 오버랩 크기
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, RagError> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// overlap >= size 이거나 size == 0 이면 거부 (보정하지 않음)
    pub fn validate(&self) -> Result<(), RagError> {
        if self.chunk_size == 0 || self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidChunkConfig {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
            });
        }
        Ok(())
    }

    /// 청크 간 전진 폭
    pub fn stride(&self) -> usize {
        self.chunk_size.saturating_sub(self.chunk_overlap)
    }
}

// ============================================================================
// TextChunk
// ============================================================================

/// 정규화 텍스트의 한 구간
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    /// 앞뒤 공백이 제거된 청크 텍스트
    pub text: String,
    /// 문서 내 청크 순번 (0부터 연속)
    pub chunk_index: usize,
    /// 시작 오프셋 (포함)
    pub start_offset: usize,
    /// 끝 오프셋 (제외)
    pub end_offset: usize,
}

// ============================================================================
// Preprocessing
// ============================================================================

fn excess_newlines() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("Invalid regex"))
}

fn horizontal_space() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+").expect("Invalid regex"))
}

fn sentence_ending() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").expect("Invalid regex"))
}

/// 텍스트 정규화
///
/// - 줄바꿈을 `\n`으로 통일
/// - 3개 이상 연속 줄바꿈을 2개로 축소
/// - 연속 공백/탭을 공백 하나로 축소
/// - 앞뒤 공백 제거
pub fn clean_text(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let collapsed = excess_newlines().replace_all(&normalized, "\n\n");
    let spaced = horizontal_space().replace_all(&collapsed, " ");
    spaced.trim().to_string()
}

// ============================================================================
// Splitting
// ============================================================================

/// 텍스트를 오버랩 청크로 분할
///
/// `clean_text` 적용 후 `split_clean_text`를 호출합니다.
pub fn split_text_into_chunks(text: &str, config: &ChunkConfig) -> Result<Vec<TextChunk>, RagError> {
    config.validate()?;
    let cleaned = clean_text(text);
    split_clean_text(&cleaned, config)
}

/// 이미 정규화된 텍스트를 분할
///
/// 오프셋은 `cleaned` 기준입니다. 빈 텍스트는 청크를 만들지 않습니다.
pub fn split_clean_text(cleaned: &str, config: &ChunkConfig) -> Result<Vec<TextChunk>, RagError> {
    config.validate()?;

    if cleaned.is_empty() {
        return Ok(vec![]);
    }

    // 청크 크기 이하면 단일 청크
    if cleaned.len() <= config.chunk_size {
        return Ok(vec![TextChunk {
            text: cleaned.to_string(),
            chunk_index: 0,
            start_offset: 0,
            end_offset: cleaned.len(),
        }]);
    }

    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut current = 0usize;

    while current < cleaned.len() {
        let target = current + config.chunk_size;

        // 마지막 청크: 남은 텍스트 전부
        if target >= cleaned.len() {
            let tail = cleaned[current..].trim();
            if !tail.is_empty() {
                chunks.push(TextChunk {
                    text: tail.to_string(),
                    chunk_index: chunks.len(),
                    start_offset: current,
                    end_offset: cleaned.len(),
                });
            }
            break;
        }

        let target = floor_char_boundary(cleaned, target);
        let mut split = find_best_split_point(cleaned, target, DEFAULT_SEARCH_RANGE);
        if split <= current {
            // 탐색 창이 청크 시작보다 앞에서 잡힌 경우 목표 위치에서 자름
            split = ceil_char_boundary(cleaned, target.max(current + 1));
        }

        let piece = cleaned[current..split].trim();
        if !piece.is_empty() {
            chunks.push(TextChunk {
                text: piece.to_string(),
                chunk_index: chunks.len(),
                start_offset: current,
                end_offset: split,
            });
        }

        // 오버랩만큼 되돌아가되, 전진하지 못하면 분할 지점부터 시작
        let next = ceil_char_boundary(cleaned, split.saturating_sub(config.chunk_overlap));
        current = if next <= current { split } else { next };
    }

    Ok(chunks)
}

/// 목표 위치 근처의 최적 분할 지점
///
/// 1. `±search_range` 창 안의 문장 끝(`.`, `!`, `?` + 공백) 중 목표에 가장 가까운 곳
/// 2. 목표 앞/뒤의 가장 가까운 공백 바로 다음
/// 3. 둘 다 없으면 목표 위치
pub fn find_best_split_point(text: &str, target: usize, search_range: usize) -> usize {
    let target = floor_char_boundary(text, target);
    let window_start = floor_char_boundary(text, target.saturating_sub(search_range));
    let window_end = ceil_char_boundary(text, (target + search_range).min(text.len()));
    let window = &text[window_start..window_end];

    let mut best: Option<usize> = None;
    for m in sentence_ending().find_iter(window) {
        let position = window_start + m.end();
        if position + search_range < target || position > target + search_range {
            continue;
        }
        let closer = match best {
            None => true,
            Some(b) => position.abs_diff(target) < b.abs_diff(target),
        };
        if closer {
            best = Some(position);
        }
    }

    if let Some(position) = best {
        return position;
    }

    // 단어 경계 폴백 (공백은 ASCII라 바이트 검색이 안전함)
    let bytes = text.as_bytes();
    let before = bytes[..(target + 1).min(bytes.len())]
        .iter()
        .rposition(|&b| b == b' ');
    let after = bytes
        .get(target..)
        .and_then(|rest| rest.iter().position(|&b| b == b' '))
        .map(|p| target + p);

    match (before, after) {
        (Some(b), Some(a)) => {
            if target - b < a - target {
                b + 1
            } else {
                a + 1
            }
        }
        (Some(b), None) => b + 1,
        (None, Some(a)) => a + 1,
        (None, None) => target,
    }
}

/// 예상 청크 수 (진행률 표시용 상한 추정치)
///
/// `ceil(text_len / (chunk_size - chunk_overlap))`
pub fn estimate_chunk_count(text_len: usize, config: &ChunkConfig) -> Result<usize, RagError> {
    config.validate()?;
    Ok(text_len.div_ceil(config.stride()))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// UTF-8 경계 조정 (인덱스 이하로)
#[inline]
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i > 0 && !s.is_char_boundary(i) {
            i -= 1;
        }
        i
    }
}

/// UTF-8 경계 조정 (인덱스 이상으로)
#[inline]
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i < s.len() && !s.is_char_boundary(i) {
            i += 1;
        }
        i
    }
}

/// 문자 수 기준으로 자르기 (UTF-8 안전)
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// "abcdefghi " 반복 - 10바이트마다 공백, 문장 부호 없음
    fn word_text(len: usize) -> String {
        let mut text = "abcdefghi ".repeat(len / 10 + 1);
        text.truncate(len);
        // 끝이 공백이면 clean_text에서 잘리므로 문자로 대체
        if text.ends_with(' ') {
            text.pop();
            text.push('j');
        }
        text
    }

    /// 결정적 의사난수 문장 텍스트
    fn prose(seed: u64, sentences: usize) -> String {
        let words = [
            "patient", "intake", "form", "must", "be", "reviewed", "by", "the", "nurse",
            "before", "device", "shipment", "HubSpot", "stage", "is", "updated", "daily",
        ];
        let mut state = seed;
        let mut next = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as usize
        };
        let mut out = String::new();
        for _ in 0..sentences {
            let n = 4 + next() % 14;
            for w in 0..n {
                if w > 0 {
                    out.push(' ');
                }
                out.push_str(words[next() % words.len()]);
            }
            out.push_str(match next() % 5 {
                0 => "! ",
                1 => "? ",
                2 => ".\n\n",
                _ => ". ",
            });
        }
        out
    }

    fn assert_chunk_invariants(cleaned: &str, chunks: &[TextChunk], config: &ChunkConfig) {
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks.last().map(|c| c.end_offset), Some(cleaned.len()));

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert!(chunk.start_offset < chunk.end_offset);
            assert!(chunk.end_offset <= cleaned.len());
            assert_eq!(chunk.text, cleaned[chunk.start_offset..chunk.end_offset].trim());
        }

        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            // 건너뛴 구간이 있다면 공백뿐이어야 함
            assert!(
                next.start_offset <= prev.end_offset
                    || cleaned[prev.end_offset..next.start_offset].trim().is_empty()
            );
            assert!(next.start_offset > prev.start_offset);
            assert!(prev.end_offset.saturating_sub(next.start_offset) <= config.chunk_overlap);
        }
    }

    #[test]
    fn test_clean_text() {
        let raw = "  Title\r\n\r\n\r\n\r\nBody\t\t text   here \n\n\n\nEnd  ";
        assert_eq!(clean_text(raw), "Title\n\nBody text here \n\nEnd");
    }

    #[test]
    fn test_clean_text_bare_carriage_return() {
        assert_eq!(clean_text("a\rb"), "a\nb");
    }

    #[test]
    fn test_config_rejects_overlap_ge_size() {
        assert!(ChunkConfig::new(100, 100).is_err());
        assert!(ChunkConfig::new(100, 150).is_err());
        assert!(ChunkConfig::new(0, 0).is_err());
        assert!(ChunkConfig::new(100, 99).is_ok());

        let bad = ChunkConfig {
            chunk_size: 50,
            chunk_overlap: 50,
        };
        let result = split_text_into_chunks("some text", &bad);
        assert!(matches!(
            result,
            Err(RagError::InvalidChunkConfig {
                chunk_size: 50,
                chunk_overlap: 50
            })
        ));
    }

    #[test]
    fn test_default_config() {
        let config = ChunkConfig::default();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.stride(), 800);
    }

    #[test]
    fn test_short_text_single_chunk() {
        let config = ChunkConfig::default();
        let raw = "  Short   paragraph.\r\nSecond line. ";
        let chunks = split_text_into_chunks(raw, &config).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, clean_text(raw));
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, clean_text(raw).len());
    }

    #[test]
    fn test_exact_chunk_size_single_chunk() {
        let config = ChunkConfig::new(100, 20).unwrap();
        let text = word_text(100);
        let chunks = split_text_into_chunks(&text, &config).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        let config = ChunkConfig::default();
        assert!(split_text_into_chunks("", &config).unwrap().is_empty());
        assert!(split_text_into_chunks(" \n\t\r\n ", &config).unwrap().is_empty());
    }

    #[test]
    fn test_2500_char_document_three_chunks() {
        let config = ChunkConfig::default();
        let text = word_text(2500);
        assert_eq!(clean_text(&text).len(), 2500);

        let chunks = split_text_into_chunks(&text, &config).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].end_offset, 2500);
        for pair in chunks.windows(2) {
            assert!(pair[0].end_offset - pair[1].start_offset <= 200);
        }
        assert_chunk_invariants(&text, &chunks, &config);
    }

    #[test]
    fn test_prefers_sentence_boundary() {
        // 목표 위치(50) 앞 10바이트 지점에 문장 끝
        let mut text = "a".repeat(38);
        text.push_str(". ");
        text.push_str(&"b ".repeat(40));
        let split = find_best_split_point(&text, 50, 20);
        assert_eq!(split, 40);
    }

    #[test]
    fn test_closest_sentence_boundary_wins() {
        let text = "One two. Three four five six seven. Eight nine ten eleven twelve.";
        // "four five six seven. " 끝 위치와 "two. " 끝 위치 중 목표 30에 가까운 쪽
        let split = find_best_split_point(text, 30, 100);
        assert_eq!(&text[..split], "One two. Three four five six seven. ");
    }

    #[test]
    fn test_falls_back_to_nearest_space() {
        let text = "aaaa bbbbbbbbbbbbbbbbbbbbbb cccc";
        // 목표 10: 앞 공백 4, 뒤 공백 27 -> 앞쪽이 더 가까움
        assert_eq!(find_best_split_point(text, 10, 3), 5);
        // 목표 25: 뒤 공백 27이 더 가까움
        assert_eq!(find_best_split_point(text, 25, 1), 28);
    }

    #[test]
    fn test_mid_word_last_resort() {
        let text = "x".repeat(300);
        assert_eq!(find_best_split_point(&text, 120, 100), 120);

        let config = ChunkConfig::new(100, 10).unwrap();
        let chunks = split_text_into_chunks(&text, &config).unwrap();
        assert_eq!(chunks[0].end_offset, 100);
        assert_eq!(chunks[1].start_offset, 90);
        assert_chunk_invariants(&text, &chunks, &config);
    }

    #[test]
    fn test_invariants_hold_across_configs() {
        let configs = [
            ChunkConfig::new(1000, 200).unwrap(),
            ChunkConfig::new(300, 50).unwrap(),
            ChunkConfig::new(120, 0).unwrap(),
            ChunkConfig::new(60, 59).unwrap(),
            ChunkConfig::new(40, 10).unwrap(),
        ];

        for seed in 1..6u64 {
            let cleaned = clean_text(&prose(seed, 120));
            for config in &configs {
                let chunks = split_clean_text(&cleaned, config).unwrap();
                assert_chunk_invariants(&cleaned, &chunks, config);
            }
        }
    }

    #[test]
    fn test_small_chunk_size_makes_progress() {
        // 탐색 범위(100)가 청크 크기보다 커도 무한 루프 없이 끝나야 함
        let cleaned = clean_text(&prose(7, 40));
        let config = ChunkConfig::new(10, 9).unwrap();
        let chunks = split_clean_text(&cleaned, &config).unwrap();
        assert_chunk_invariants(&cleaned, &chunks, &config);
    }

    #[test]
    fn test_multibyte_text() {
        let text = "환자 접수 절차는 간호사가 검토합니다. ".repeat(60);
        let config = ChunkConfig::new(200, 40).unwrap();
        let cleaned = clean_text(&text);
        let chunks = split_clean_text(&cleaned, &config).unwrap();
        assert!(chunks.len() > 1);
        assert_chunk_invariants(&cleaned, &chunks, &config);
    }

    #[test]
    fn test_estimate_chunk_count() {
        let config = ChunkConfig::default();
        assert_eq!(estimate_chunk_count(0, &config).unwrap(), 0);
        assert_eq!(estimate_chunk_count(800, &config).unwrap(), 1);
        assert_eq!(estimate_chunk_count(801, &config).unwrap(), 2);
        assert_eq!(estimate_chunk_count(2500, &config).unwrap(), 4);

        let bad = ChunkConfig {
            chunk_size: 10,
            chunk_overlap: 10,
        };
        assert!(estimate_chunk_count(100, &bad).is_err());
    }

    #[test]
    fn test_estimate_is_upper_bound_for_word_text() {
        for len in [900, 1500, 2500, 4000, 9999] {
            for config in [ChunkConfig::default(), ChunkConfig::new(500, 100).unwrap()] {
                let text = word_text(len);
                let actual = split_text_into_chunks(&text, &config).unwrap().len();
                let estimate = estimate_chunk_count(clean_text(&text).len(), &config).unwrap();
                assert!(estimate >= actual, "len={} estimate={} actual={}", len, estimate, actual);
            }
        }
    }

    #[test]
    fn test_floor_char_boundary() {
        let s = "Hello, 세계!"; // UTF-8 다중 바이트 문자

        assert_eq!(floor_char_boundary(s, 5), 5);
        assert_eq!(floor_char_boundary(s, 8), 7);
        assert_eq!(floor_char_boundary(s, 100), s.len());
        assert_eq!(floor_char_boundary("", 0), 0);
    }

    #[test]
    fn test_ceil_char_boundary() {
        let s = "Hello, 세계!";
        assert_eq!(ceil_char_boundary(s, 8), 10);
        assert_eq!(ceil_char_boundary(s, 7), 7);
        assert_eq!(ceil_char_boundary(s, 100), s.len());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello");
        assert_eq!(truncate_chars("안녕하세요 세계", 5), "안녕하세요");
    }
}
