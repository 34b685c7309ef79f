//! 검색 및 컨텍스트 조립
//!
//! 질의 임베딩 → 벡터 인덱스 top-K → 최소 스코어 필터 → 번호 붙은 컨텍스트 블록.
//! 인덱스가 돌려준 순서(유사도 내림차순)를 그대로 유지하며 재정렬하지 않습니다.

mod citation;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::{Settings, DEFAULT_MIN_SCORE, DEFAULT_TOP_K};
use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::knowledge::{IndexMatch, QueryFilter, RetrievedChunk, VectorIndex};

pub use citation::{parse_citation_references, CitationReferences, CitedSource};

/// 청크 블록 구분자
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// 관련 문서가 없을 때 모델에 전달하는 컨텍스트
pub const NO_CONTEXT_SECTION: &str = "CONTEXT:\n\
No relevant training documents were found for this query. \
Please inform the user that you don't have specific information about their question \
in the knowledge base, and suggest they contact their supervisor or HR for assistance.";

const CONTEXT_HEADER: &str = "CONTEXT FROM TRAINING DOCUMENTS:\n\
Use this context to answer the user's question. \
Always cite the source of your information using the [Source N] labels.";

const CITATION_INSTRUCTIONS: &str = "CITATION INSTRUCTIONS:\n\
- Reference specific sources (e.g., \"According to [Source 1]...\")\n\
- If information spans multiple sources, cite all relevant sources\n\
- If the retrieved context doesn't fully answer the question, acknowledge what is missing";

// ============================================================================
// Types
// ============================================================================

/// 검색 설정
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// 이 값 미만의 매치는 버림
    pub min_score: f32,
    pub filter: Option<QueryFilter>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_score: DEFAULT_MIN_SCORE,
            filter: None,
        }
    }
}

impl RetrievalConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            top_k: settings.top_k,
            min_score: settings.min_score,
            filter: None,
        }
    }
}

/// 컨텍스트에 등장한 고유 문서 (첫 등장 순서)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub source: String,
    pub title: Option<String>,
    pub category: Option<String>,
}

/// 렌더링된 컨텍스트와 출처 목록
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedContext {
    pub context_text: String,
    pub sources: Vec<SourceRef>,
}

/// 생성 단계에 넘길 검색 결과 전체
#[derive(Debug, Clone, PartialEq)]
pub struct RagContext {
    /// 프롬프트에 그대로 넣는 섹션
    pub context_section: String,
    pub sources: Vec<SourceRef>,
    pub chunks: Vec<RetrievedChunk>,
}

// ============================================================================
// Retriever
// ============================================================================

/// 질의 → 컨텍스트 검색기
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// 최소 스코어를 넘는 청크 검색 (인덱스 순서 유지)
    pub async fn retrieve_context(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        let vector = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query")?;

        let matches = self
            .index
            .query(&vector, self.config.top_k, self.config.filter.as_ref())
            .await
            .with_context(|| format!("Failed to query {}", self.index.name()))?;

        let total = matches.len();
        let chunks = filter_matches(matches, self.config.min_score);
        tracing::debug!(
            "Retrieved {} of {} matches (min score {})",
            chunks.len(),
            total,
            self.config.min_score
        );

        Ok(chunks)
    }

    /// 프롬프트용 컨텍스트 조립
    ///
    /// 임베딩이나 인덱스 실패는 `KnowledgeBaseUnavailable`로 분류합니다.
    /// 관련 문서가 없는 것은 에러가 아니라 안내 문구가 담긴 컨텍스트입니다.
    pub async fn get_rag_context(&self, query: &str) -> Result<RagContext, RagError> {
        let chunks = self.retrieve_context(query).await.map_err(|e| {
            tracing::warn!("Knowledge base lookup failed: {:#}", e);
            RagError::KnowledgeBaseUnavailable(format!("{:#}", e))
        })?;

        let formatted = format_context_for_prompt(&chunks);
        Ok(RagContext {
            context_section: build_context_section(&formatted),
            sources: formatted.sources,
            chunks,
        })
    }
}

// ============================================================================
// Context Formatting
// ============================================================================

/// 최소 스코어 미만 제거 후 메타데이터 해석
pub fn filter_matches(matches: Vec<IndexMatch>, min_score: f32) -> Vec<RetrievedChunk> {
    matches
        .into_iter()
        .filter(|m| m.score >= min_score)
        .map(RetrievedChunk::from)
        .collect()
}

/// `[Source N: 라벨]` 블록으로 렌더링하고 고유 출처 수집
///
/// N은 목록에서의 위치(1부터), 라벨은 title이 있으면 title, 없으면 source.
pub fn format_context_for_prompt(chunks: &[RetrievedChunk]) -> FormattedContext {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    let mut blocks = Vec::with_capacity(chunks.len());

    for (i, chunk) in chunks.iter().enumerate() {
        let meta = &chunk.metadata;
        blocks.push(format!("[Source {}: {}]\n{}", i + 1, meta.label(), meta.text));

        if seen.insert(meta.source.clone()) {
            sources.push(SourceRef {
                source: meta.source.clone(),
                title: meta.title.clone(),
                category: meta.category.clone(),
            });
        }
    }

    FormattedContext {
        context_text: blocks.join(CONTEXT_SEPARATOR),
        sources,
    }
}

/// 시스템 프롬프트에 넣을 컨텍스트 섹션
pub fn build_context_section(formatted: &FormattedContext) -> String {
    if formatted.context_text.is_empty() {
        return NO_CONTEXT_SECTION.to_string();
    }

    format!(
        "{}\n\n{}{}{}",
        CONTEXT_HEADER, formatted.context_text, CONTEXT_SEPARATOR, CITATION_INSTRUCTIONS
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{index_match, FailingIndex, HashEmbedder, StaticIndex};

    fn retriever(index: Arc<dyn VectorIndex>, config: RetrievalConfig) -> Retriever {
        Retriever::new(Arc::new(HashEmbedder::new(16)), index, config)
    }

    #[test]
    fn test_default_config() {
        let config = RetrievalConfig::default();
        assert_eq!(config.top_k, 5);
        assert_eq!(config.min_score, 0.4);
        assert!(config.filter.is_none());
    }

    #[test]
    fn test_filter_matches_keeps_order() {
        let matches = vec![
            index_match("a", 0.9, "a.pdf", None, "alpha"),
            index_match("b", 0.3, "b.pdf", None, "beta"),
            index_match("c", 0.4, "c.pdf", None, "gamma"),
        ];
        let chunks = filter_matches(matches, 0.4);
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_missing_metadata_defaults() {
        let chunks = filter_matches(
            vec![IndexMatch {
                id: "x".to_string(),
                score: 0.8,
                metadata: serde_json::json!({}),
            }],
            0.0,
        );
        assert_eq!(chunks[0].metadata.source, "Unknown");

        let formatted = format_context_for_prompt(&chunks);
        assert_eq!(formatted.context_text, "[Source 1: Unknown]\n");
    }

    #[test]
    fn test_format_context_labels_and_sources() {
        let chunks = filter_matches(
            vec![
                index_match("1", 0.9, "intake.pdf", Some("Intake SOP"), "Step one."),
                index_match("2", 0.8, "hubspot.pdf", None, "Log the call."),
                index_match("3", 0.7, "intake.pdf", Some("Intake SOP"), "Step two."),
            ],
            0.4,
        );

        let formatted = format_context_for_prompt(&chunks);
        assert_eq!(
            formatted.context_text,
            "[Source 1: Intake SOP]\nStep one.\n\n---\n\n\
             [Source 2: hubspot.pdf]\nLog the call.\n\n---\n\n\
             [Source 3: Intake SOP]\nStep two."
        );

        let names: Vec<&str> = formatted.sources.iter().map(|s| s.source.as_str()).collect();
        assert_eq!(names, vec!["intake.pdf", "hubspot.pdf"]);
        assert_eq!(formatted.sources[0].title.as_deref(), Some("Intake SOP"));
    }

    #[test]
    fn test_empty_context_uses_sentinel() {
        let formatted = format_context_for_prompt(&[]);
        assert!(formatted.sources.is_empty());
        assert_eq!(build_context_section(&formatted), NO_CONTEXT_SECTION);
    }

    #[test]
    fn test_context_section_wraps_blocks() {
        let chunks = filter_matches(vec![index_match("1", 0.9, "a.pdf", None, "Body")], 0.4);
        let section = build_context_section(&format_context_for_prompt(&chunks));
        assert!(section.starts_with(CONTEXT_HEADER));
        assert!(section.contains("[Source 1: a.pdf]\nBody"));
        assert!(section.ends_with(CITATION_INSTRUCTIONS));
    }

    #[tokio::test]
    async fn test_below_threshold_gives_sentinel() {
        let index = Arc::new(StaticIndex::new(vec![index_match(
            "1", 0.3, "a.pdf", None, "weak",
        )]));
        let context = retriever(index, RetrievalConfig::default())
            .get_rag_context("anything")
            .await
            .unwrap();

        assert_eq!(context.context_section, NO_CONTEXT_SECTION);
        assert!(context.sources.is_empty());
        assert!(context.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let index = Arc::new(StaticIndex::new(vec![index_match(
            "1", 0.4, "a.pdf", None, "borderline",
        )]));
        let context = retriever(index, RetrievalConfig::default())
            .get_rag_context("anything")
            .await
            .unwrap();

        assert_eq!(context.chunks.len(), 1);
        assert!(context.context_section.contains("[Source 1: a.pdf]"));
    }

    #[tokio::test]
    async fn test_top_k_and_filter_are_forwarded() {
        let index = Arc::new(StaticIndex::new(vec![
            index_match("1", 0.9, "a.pdf", None, "one"),
            index_match("2", 0.8, "b.pdf", None, "two"),
            index_match("3", 0.7, "c.pdf", None, "three"),
        ]));
        let config = RetrievalConfig {
            top_k: 2,
            min_score: 0.0,
            filter: Some(QueryFilter::by_category("hr")),
        };

        let chunks = retriever(index.clone(), config)
            .retrieve_context("question")
            .await
            .unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(
            index.queries(),
            vec![(2, Some(QueryFilter::by_category("hr")))]
        );
    }

    #[tokio::test]
    async fn test_index_failure_is_unavailable() {
        let err = retriever(Arc::new(FailingIndex), RetrievalConfig::default())
            .get_rag_context("question")
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::KnowledgeBaseUnavailable(_)));
    }
}
