//! 에러 분류 - 설정/추출/임베딩/업서트/검색 실패를 구분합니다.
//!
//! 외부 서비스 경계(임베딩, 벡터 인덱스)는 `anyhow::Result`를 반환하고,
//! 재시도 여부나 사용자 메시지를 결정해야 하는 지점에서만 `RagError`로 분류합니다.

use thiserror::Error;

/// RAG 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 필수 환경변수 누락 또는 잘못된 설정값 (재시도 없음)
    #[error("configuration error: {0}")]
    Config(String),

    /// 청크 설정 위반 (overlap >= size). 보정하지 않고 거부합니다.
    #[error("invalid chunk config: overlap ({chunk_overlap}) must be less than chunk size ({chunk_size})")]
    InvalidChunkConfig {
        chunk_size: usize,
        chunk_overlap: usize,
    },

    /// 수집할 문서가 하나도 없음
    #[error("no documents found in {location}")]
    NoDocuments { location: String },

    /// 단일 문서 텍스트 추출 실패 (문서 단위로 건너뜀)
    #[error("failed to extract text from {source_name}: {message}")]
    Extraction {
        source_name: String,
        message: String,
    },

    /// 임베딩 API rate limit (429) - 쿨다운 후 같은 배치 재시도
    #[error("embedding request rate limited: {0}")]
    RateLimited(String),

    /// 그 외 임베딩 실패 (배치 단위로 버림)
    #[error("embedding request failed: {0}")]
    Embedding(String),

    /// 벡터 인덱스 업서트 실패 (실행 전체 중단)
    #[error("vector index upsert failed: {0}")]
    Upsert(String),

    /// 질의 중 임베딩/검색 실패 - 모델 장애와 구분되는 "지식베이스 사용 불가"
    #[error("knowledge base unavailable: {0}")]
    KnowledgeBaseUnavailable(String),
}

impl RagError {
    /// 설정 에러 여부 (CLI 종료 코드/메시지 분기용)
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            RagError::Config(_) | RagError::InvalidChunkConfig { .. } | RagError::NoDocuments { .. }
        )
    }
}

/// anyhow 에러 체인이 rate limit 신호인지 판별
///
/// 프로바이더가 올린 `RagError::RateLimited`를 우선 확인하고,
/// 그 외 외부 에러는 메시지("429", "rate limit")로 판별합니다.
pub fn is_rate_limited(err: &anyhow::Error) -> bool {
    let typed = err
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<RagError>(), Some(RagError::RateLimited(_))));
    if typed {
        return true;
    }

    let message = format!("{:#}", err).to_lowercase();
    message.contains("429") || message.contains("rate limit")
}

// ============================================================================
// Tests
// ============================================================================
