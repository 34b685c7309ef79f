//! trainbot-rag - 교육 문서 RAG 파이프라인
//!
//! 문서 폴더의 PDF/텍스트를 청킹·임베딩해 벡터 인덱스에 저장하고,
//! 질의 시 관련 청크를 `[Source N]` 라벨이 붙은 프롬프트 컨텍스트로 조립합니다.

pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod knowledge;
pub mod retrieval;

#[cfg(test)]
mod testing;

// Re-exports
pub use collector::{DirectorySource, DocumentSource, FileType};
pub use config::{Settings, VectorBackend};
pub use embedding::{create_embedder, EmbeddingProvider, OpenAiEmbedding};
pub use error::RagError;
pub use extractor::{ContentExtractor, ExtractedText, TextExtractor};
pub use ingest::{IngestConfig, IngestSummary, IngestionPipeline, RetryPolicy};
pub use knowledge::{
    open_vector_index, split_text_into_chunks, ChunkConfig, ChunkMetadata, IngestLedger,
    LanceIndex, MemoryIndex, PineconeIndex, QueryFilter, RetrievedChunk, TextChunk, VectorIndex,
};
pub use retrieval::{
    parse_citation_references, CitationReferences, RagContext, RetrievalConfig, Retriever,
    SourceRef,
};
