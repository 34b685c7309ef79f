//! 응답 텍스트의 `[Source N]` / `[Source N: 제목]` 태그 파싱
//!
//! 결과는 항상 번호 오름차순입니다 (컨텍스트 조립의 등장 순서와 다를 수 있음).

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// 인용된 출처 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitedSource {
    pub number: u32,
    pub title: Option<String>,
}

/// 파싱 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CitationReferences {
    /// 중복 제거, 오름차순
    pub source_numbers: Vec<u32>,
    pub sources: Vec<CitedSource>,
}

impl CitationReferences {
    pub fn has_source_references(&self) -> bool {
        !self.source_numbers.is_empty()
    }
}

fn citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\[Source\s+(\d+)(?::\s*([^\]]+))?\]").expect("Invalid regex")
    })
}

/// 텍스트에서 인용 번호와 제목 추출
///
/// 같은 번호가 여러 번 나오면 제목이 있는 쪽을 우선합니다.
pub fn parse_citation_references(text: &str) -> CitationReferences {
    let mut found: BTreeMap<u32, Option<String>> = BTreeMap::new();

    for caps in citation_regex().captures_iter(text) {
        // 범위를 넘는 번호는 무시
        let Some(number) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
            continue;
        };
        let title = caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .filter(|t| !t.is_empty());

        let slot = found.entry(number).or_insert(None);
        if slot.is_none() {
            *slot = title;
        }
    }

    CitationReferences {
        source_numbers: found.keys().copied().collect(),
        sources: found
            .into_iter()
            .map(|(number, title)| CitedSource { number, title })
            .collect(),
    }
}
