//! Vector Index - 벡터 인덱스 트레이트 및 레코드 타입
//!
//! 임베딩 벡터와 청크 메타데이터를 (id, vector, metadata) 레코드로 저장하고
//! 최근접 이웃 검색을 수행하는 외부 인덱스의 공통 인터페이스입니다.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 메타데이터에 source가 없을 때 사용하는 값
pub const UNKNOWN_SOURCE: &str = "Unknown";

// ============================================================================
// Types
// ============================================================================

/// 청크 메타데이터 (인덱스에 레코드와 함께 저장)
///
/// 필드 이름은 인덱스에 저장되는 키(camelCase)와 같습니다.
/// `None` 필드는 직렬화하지 않습니다 (Pinecone은 null 메타데이터를 거부함).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// 원본 파일 이름
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// 추정 페이지 번호 (1부터)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    /// 청크 텍스트 미리보기 (잘린 텍스트)
    #[serde(default)]
    pub text: String,
}

impl ChunkMetadata {
    /// 인덱스에서 돌아온 JSON 메타데이터를 관대하게 해석
    ///
    /// 누락된 필드는 기본값(`source = "Unknown"`, 빈 텍스트)을 사용합니다.
    /// 숫자는 인덱스에 따라 실수(`3.0`)로 돌아오므로 f64로 읽어 변환합니다.
    pub fn from_value(value: &Value) -> Self {
        let str_field = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let int_field = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_f64)
                .filter(|n| *n >= 0.0)
                .map(|n| n as u32)
        };

        Self {
            source: str_field("source").unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
            title: str_field("title"),
            category: str_field("category"),
            page_number: int_field("pageNumber"),
            chunk_index: int_field("chunkIndex"),
            total_chunks: int_field("totalChunks"),
            text: str_field("text").unwrap_or_default(),
        }
    }

    /// 표시용 라벨 (title 우선, 없으면 source)
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.source)
    }
}

/// 저장용 레코드
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// 결정적 ID (파일 이름 + 청크 인덱스)
    pub id: String,
    /// 임베딩 벡터
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// 인덱스 검색 결과 (가공 전)
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub id: String,
    /// 유사도 스코어 (높을수록 관련성 높음)
    pub score: f32,
    /// 인덱스가 돌려준 메타데이터 그대로
    pub metadata: Value,
}

/// 검색 결과 (메타데이터 해석 완료)
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub id: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

impl From<IndexMatch> for RetrievedChunk {
    fn from(m: IndexMatch) -> Self {
        Self {
            metadata: ChunkMetadata::from_value(&m.metadata),
            id: m.id,
            score: m.score,
        }
    }
}

/// 메타데이터 동등 조건 필터
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub source: Option<String>,
    pub category: Option<String>,
}

impl QueryFilter {
    pub fn by_category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.category.is_none()
    }

    /// (메타데이터 키, 값) 조건 목록
    pub fn conditions(&self) -> Vec<(&'static str, &str)> {
        let mut conditions = Vec::new();
        if let Some(ref source) = self.source {
            conditions.push(("source", source.as_str()));
        }
        if let Some(ref category) = self.category {
            conditions.push(("category", category.as_str()));
        }
        conditions
    }

    /// 메타데이터가 모든 조건을 만족하는지
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.source.as_ref().map_or(true, |s| *s == metadata.source)
            && self
                .category
                .as_ref()
                .map_or(true, |c| metadata.category.as_ref() == Some(c))
    }
}

// ============================================================================
// VectorIndex Trait
// ============================================================================

/// VectorIndex 트레이트 (async)
///
/// 구현체는 프로세스 수명 동안 하나를 만들어 공유합니다 (`Arc<dyn VectorIndex>`).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 최근접 이웃 검색 (스코어 내림차순)
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<IndexMatch>>;

    /// 레코드 업서트 (같은 id는 교체)
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<usize>;

    /// id로 레코드 삭제
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// 저장된 벡터 개수
    async fn count(&self) -> Result<usize>;

    /// 인덱스 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(source: &str, category: Option<&str>) -> ChunkMetadata {
        ChunkMetadata {
            source: source.to_string(),
            title: None,
            category: category.map(str::to_string),
            page_number: Some(1),
            chunk_index: Some(0),
            total_chunks: Some(1),
            text: "text".to_string(),
        }
    }

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_mismatched() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_metadata_serializes_camel_case_without_nulls() {
        let meta = metadata("Intake SOP.pdf", None);
        let value = serde_json::to_value(&meta).unwrap();

        assert_eq!(value["source"], "Intake SOP.pdf");
        assert_eq!(value["chunkIndex"], 0);
        assert_eq!(value["pageNumber"], 1);
        assert!(value.get("category").is_none());
        assert!(value.get("title").is_none());
    }

    #[test]
    fn test_metadata_from_value_defaults() {
        let meta = ChunkMetadata::from_value(&json!({ "text": "hello" }));
        assert_eq!(meta.source, UNKNOWN_SOURCE);
        assert_eq!(meta.text, "hello");
        assert!(meta.chunk_index.is_none());

        let meta = ChunkMetadata::from_value(&Value::Null);
        assert_eq!(meta.source, UNKNOWN_SOURCE);
        assert_eq!(meta.text, "");
    }

    #[test]
    fn test_metadata_from_value_float_numbers() {
        let meta = ChunkMetadata::from_value(&json!({
            "source": "a.pdf",
            "title": "Intake SOP",
            "chunkIndex": 3.0,
            "totalChunks": 7.0,
            "pageNumber": 2
        }));
        assert_eq!(meta.chunk_index, Some(3));
        assert_eq!(meta.total_chunks, Some(7));
        assert_eq!(meta.page_number, Some(2));
        assert_eq!(meta.label(), "Intake SOP");
    }

    #[test]
    fn test_query_filter() {
        let filter = QueryFilter::by_category("clinical");
        assert!(!filter.is_empty());
        assert!(filter.matches(&metadata("a.pdf", Some("clinical"))));
        assert!(!filter.matches(&metadata("a.pdf", Some("hubspot"))));
        assert!(!filter.matches(&metadata("a.pdf", None)));
        assert_eq!(filter.conditions(), vec![("category", "clinical")]);

        assert!(QueryFilter::default().is_empty());
        assert!(QueryFilter::default().matches(&metadata("a.pdf", None)));
    }
}
