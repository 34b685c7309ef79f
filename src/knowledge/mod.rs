//! Knowledge 모듈 - 청킹과 벡터 인덱스
//!
//! - Chunker: 문장 경계를 존중하는 슬라이딩 윈도우 분할
//! - VectorIndex: 벡터 인덱스 공통 인터페이스
//! - Pinecone / LanceDB / Memory: 인덱스 구현체
//! - Ledger: SQLite 수집 원장

mod chunker;
mod ledger;
mod lance;
mod memory;
mod pinecone;
mod vector;

use std::sync::Arc;

use anyhow::Result;

use crate::config::{Settings, VectorBackend};
use crate::error::RagError;

// Re-exports
pub use chunker::{
    clean_text, estimate_chunk_count, find_best_split_point, split_clean_text,
    split_text_into_chunks, truncate_chars, ChunkConfig, TextChunk, DEFAULT_SEARCH_RANGE,
};
pub use lance::LanceIndex;
pub use ledger::{content_hash, IngestLedger, LedgerEntry, LedgerStats};
pub use memory::MemoryIndex;
pub use pinecone::PineconeIndex;
pub use vector::{
    cosine_similarity, ChunkMetadata, ChunkRecord, IndexMatch, QueryFilter, RetrievedChunk,
    VectorIndex, UNKNOWN_SOURCE,
};

/// 설정된 백엔드로 벡터 인덱스 생성
///
/// 필수 변수가 없으면 연결을 시도하기 전에 설정 에러로 실패합니다.
pub async fn open_vector_index(settings: &Settings) -> Result<Arc<dyn VectorIndex>> {
    settings.require_vector_index()?;

    let index: Arc<dyn VectorIndex> = match settings.vector_backend {
        VectorBackend::Pinecone => {
            let api_key = settings
                .pinecone_api_key
                .as_deref()
                .ok_or_else(|| RagError::Config("PINECONE_API_KEY is not set".to_string()))?;
            let host = settings.pinecone_index_host.as_deref();
            let namespace = settings.pinecone_namespace.clone();

            let index = match settings.pinecone_index_name.as_deref() {
                Some(name) => PineconeIndex::connect(api_key, name, host, namespace).await?,
                None => {
                    let host = host.ok_or_else(|| {
                        RagError::Config("PINECONE_INDEX_NAME is not set".to_string())
                    })?;
                    PineconeIndex::new(api_key, host, namespace)?
                }
            };
            Arc::new(index)
        }
        VectorBackend::Lance => Arc::new(
            LanceIndex::open(&settings.lance_path(), settings.embedding_dimensions).await?,
        ),
    };

    tracing::info!(
        "Using vector index: {} ({})",
        index.name(),
        settings.vector_backend
    );
    Ok(index)
}
