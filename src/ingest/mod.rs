//! 수집 파이프라인 - 문서 → 텍스트 → 청크 → 임베딩 → 벡터 인덱스
//!
//! 문서는 순서대로 하나씩 처리합니다. 실패 범위는 단계마다 다릅니다.
//! - 추출 실패: 해당 문서만 건너뜀
//! - 임베딩 실패: rate limit은 쿨다운 후 같은 배치 재시도, 그 외는 배치 버림
//! - 업서트 실패: 실행 전체 중단 (id가 결정적이므로 재실행 안전)

mod retry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::collector::DocumentSource;
use crate::config::Settings;
use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::extractor::{ExtractedText, TextExtractor};
use crate::knowledge::{
    clean_text, content_hash, split_clean_text, truncate_chars, ChunkConfig, ChunkMetadata,
    ChunkRecord, IngestLedger, LedgerEntry, VectorIndex,
};

pub use retry::{retry_on_rate_limit, RetryPolicy, DEFAULT_COOLDOWN, DEFAULT_MAX_ATTEMPTS};

/// 성공한 임베딩 배치 사이 대기
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(100);

/// 메타데이터에 저장하는 청크 텍스트 길이 (문자)
pub const DEFAULT_PREVIEW_CHARS: usize = 1000;

// ============================================================================
// Types
// ============================================================================

/// 수집 설정
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub chunk: ChunkConfig,
    /// 임베딩 배치 크기
    pub embed_batch_size: usize,
    /// 업서트 배치 크기
    pub upsert_batch_size: usize,
    pub batch_delay: Duration,
    pub retry: RetryPolicy,
    pub preview_chars: usize,
    /// 모든 레코드에 붙일 카테고리
    pub category: Option<String>,
    /// 원장과 무관하게 모든 문서 재수집
    pub force: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            embed_batch_size: 10,
            upsert_batch_size: 100,
            batch_delay: DEFAULT_BATCH_DELAY,
            retry: RetryPolicy::default(),
            preview_chars: DEFAULT_PREVIEW_CHARS,
            category: None,
            force: false,
        }
    }
}

impl IngestConfig {
    /// 설정에서 생성
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            chunk: settings.chunk,
            embed_batch_size: settings.embed_batch_size,
            upsert_batch_size: settings.upsert_batch_size,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), RagError> {
        self.chunk.validate()?;
        if self.embed_batch_size == 0 || self.upsert_batch_size == 0 {
            return Err(RagError::Config(
                "batch sizes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 임베딩 전 청크
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedChunk {
    pub id: String,
    /// 임베딩할 전체 청크 텍스트
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// 실행 요약
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub documents_found: usize,
    pub documents_processed: usize,
    /// 변경 없어 건너뛴 문서
    pub documents_skipped: usize,
    pub documents_failed: usize,
    pub chunks_created: usize,
    pub vectors_stored: usize,
    pub batches_dropped: usize,
    /// 청크 수가 줄어 삭제한 이전 id
    pub stale_deleted: usize,
}

/// 업서트 후 원장에 기록할 문서
#[derive(Debug)]
struct PendingDocument {
    source: String,
    hash: String,
    chunk_count: usize,
    previous_chunks: Option<usize>,
}

// ============================================================================
// IngestionPipeline
// ============================================================================

/// 수집 파이프라인
///
/// 임베더와 인덱스는 호출자가 만들어 주입합니다.
pub struct IngestionPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    extractor: Arc<dyn TextExtractor>,
    ledger: Option<IngestLedger>,
    config: IngestConfig,
}

impl IngestionPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        extractor: Arc<dyn TextExtractor>,
        config: IngestConfig,
    ) -> Result<Self, RagError> {
        config.validate()?;
        Ok(Self {
            embedder,
            index,
            extractor,
            ledger: None,
            config,
        })
    }

    /// 원장 연결 (변경 없는 문서 건너뛰기, 줄어든 청크 정리)
    pub fn with_ledger(mut self, ledger: IngestLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// 전체 수집 실행
    pub async fn run(&self, source: &dyn DocumentSource) -> Result<IngestSummary> {
        let names = source.list().await?;
        if names.is_empty() {
            return Err(RagError::NoDocuments {
                location: source.describe(),
            }
            .into());
        }

        let mut summary = IngestSummary {
            documents_found: names.len(),
            ..Default::default()
        };
        tracing::info!("Found {} document(s) to process", names.len());

        let mut all_chunks: Vec<ProcessedChunk> = Vec::new();
        let mut pending: Vec<PendingDocument> = Vec::new();

        for (i, name) in names.iter().enumerate() {
            tracing::info!("({}/{}) Processing: {}", i + 1, names.len(), name);

            let bytes = match source.read(name).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!("Skipping {}: {:#}", name, e);
                    summary.documents_failed += 1;
                    continue;
                }
            };

            let hash = content_hash(&bytes);
            let previous = self.previous_entry(name)?;
            if !self.config.force {
                if let Some(ref entry) = previous {
                    let category = self.config.category.as_deref();
                    if entry.is_current(&hash, category, &self.config.chunk) {
                        tracing::info!("  - Unchanged since {}, skipping", entry.ingested_at);
                        summary.documents_skipped += 1;
                        continue;
                    }
                }
            }

            let extracted = match self.extract(name, bytes).await {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to extract {}: {:#}", name, e);
                    summary.documents_failed += 1;
                    continue;
                }
            };
            tracing::info!(
                "  - Extracted {} characters from {} pages",
                extracted.text.chars().count(),
                extracted.page_count
            );

            let chunks = self.process_document(name, &extracted)?;
            tracing::info!("  - Created {} chunks", chunks.len());

            summary.documents_processed += 1;
            pending.push(PendingDocument {
                source: name.clone(),
                hash,
                chunk_count: chunks.len(),
                previous_chunks: previous.map(|e| e.chunk_count),
            });
            all_chunks.extend(chunks);
        }

        summary.chunks_created = all_chunks.len();
        if all_chunks.is_empty() {
            tracing::warn!("No chunks were created from the documents");
        }

        let (records, dropped) = self.embed_chunks(&all_chunks).await;
        summary.batches_dropped = dropped;

        if !all_chunks.is_empty() && records.is_empty() {
            return Err(RagError::Embedding("no embeddings were generated".to_string()).into());
        }

        summary.vectors_stored = self.upsert_records(&records).await?;

        let mut stored: HashMap<&str, usize> = HashMap::new();
        for record in &records {
            *stored.entry(record.metadata.source.as_str()).or_default() += 1;
        }

        for doc in &pending {
            summary.stale_deleted += self.prune_stale(doc).await;

            if let Some(ref ledger) = self.ledger {
                let vectors = stored.get(doc.source.as_str()).copied().unwrap_or(0);
                if let Err(e) = ledger.record(
                    &doc.source,
                    &doc.hash,
                    doc.chunk_count,
                    vectors,
                    self.config.category.as_deref(),
                    &self.config.chunk,
                ) {
                    tracing::warn!("Failed to record {} in ledger: {:#}", doc.source, e);
                }
            }
        }

        tracing::info!(
            "Ingestion complete: {} processed, {} skipped, {} failed, {} chunks, {} vectors",
            summary.documents_processed,
            summary.documents_skipped,
            summary.documents_failed,
            summary.chunks_created,
            summary.vectors_stored
        );
        Ok(summary)
    }

    fn previous_entry(&self, source: &str) -> Result<Option<LedgerEntry>> {
        match self.ledger {
            Some(ref ledger) => ledger.get(source),
            None => Ok(None),
        }
    }

    /// 추출은 CPU 바운드이므로 spawn_blocking에서 실행
    async fn extract(&self, name: &str, bytes: Vec<u8>) -> Result<ExtractedText> {
        let extractor = Arc::clone(&self.extractor);
        let owned = name.to_string();

        tokio::task::spawn_blocking(move || extractor.extract(&owned, &bytes))
            .await
            .map_err(|e| RagError::Extraction {
                source_name: name.to_string(),
                message: format!("extraction task failed: {}", e),
            })?
    }

    /// 추출된 텍스트를 id와 메타데이터가 붙은 청크로 변환
    pub fn process_document(
        &self,
        source: &str,
        extracted: &ExtractedText,
    ) -> Result<Vec<ProcessedChunk>, RagError> {
        let cleaned = clean_text(&extracted.text);
        let chunks = split_clean_text(&cleaned, &self.config.chunk)?;
        let total = chunks.len();

        Ok(chunks
            .into_iter()
            .map(|chunk| {
                let page =
                    estimate_page_number(chunk.start_offset, cleaned.len(), extracted.page_count);
                let metadata = ChunkMetadata {
                    source: source.to_string(),
                    title: None,
                    category: self.config.category.clone(),
                    page_number: Some(page as u32),
                    chunk_index: Some(chunk.chunk_index as u32),
                    total_chunks: Some(total as u32),
                    text: truncate_chars(&chunk.text, self.config.preview_chars).to_string(),
                };
                ProcessedChunk {
                    id: chunk_id(source, chunk.chunk_index),
                    text: chunk.text,
                    metadata,
                }
            })
            .collect())
    }

    /// 배치 단위 임베딩 (버린 배치 수를 함께 반환)
    async fn embed_chunks(&self, chunks: &[ProcessedChunk]) -> (Vec<ChunkRecord>, usize) {
        let mut records = Vec::with_capacity(chunks.len());
        let mut dropped = 0;

        if chunks.is_empty() {
            return (records, dropped);
        }

        let batches: Vec<&[ProcessedChunk]> =
            chunks.chunks(self.config.embed_batch_size).collect();
        tracing::info!(
            "Generating embeddings for {} chunks with {} (batch size: {})",
            chunks.len(),
            self.embedder.name(),
            self.config.embed_batch_size
        );

        for (i, batch) in batches.iter().enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            tracing::debug!("Embedding batch {}/{}", i + 1, batches.len());

            let result =
                retry_on_rate_limit(&self.config.retry, || self.embedder.embed_batch(&texts))
                    .await;

            match result {
                Ok(vectors) if vectors.len() == batch.len() => {
                    records.extend(batch.iter().zip(vectors).map(|(chunk, vector)| {
                        ChunkRecord {
                            id: chunk.id.clone(),
                            vector,
                            metadata: chunk.metadata.clone(),
                        }
                    }));

                    if i + 1 < batches.len() && !self.config.batch_delay.is_zero() {
                        tokio::time::sleep(self.config.batch_delay).await;
                    }
                }
                Ok(vectors) => {
                    tracing::warn!(
                        "Dropping batch {}: got {} embeddings for {} chunks",
                        i + 1,
                        vectors.len(),
                        batch.len()
                    );
                    dropped += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to generate embeddings for batch {}: {:#}",
                        i + 1,
                        e
                    );
                    dropped += 1;
                }
            }
        }

        (records, dropped)
    }

    /// 배치 단위 업서트 (실패 시 즉시 중단)
    async fn upsert_records(&self, records: &[ChunkRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        tracing::info!(
            "Upserting {} vectors to {}",
            records.len(),
            self.index.name()
        );

        let mut stored = 0;
        for (i, batch) in records.chunks(self.config.upsert_batch_size).enumerate() {
            tracing::debug!("Upserting batch {} ({} vectors)", i + 1, batch.len());
            match self.index.upsert(batch).await {
                Ok(_) => stored += batch.len(),
                Err(e) => {
                    tracing::error!("Failed to upsert batch {}: {:#}", i + 1, e);
                    return Err(RagError::Upsert(format!("{:#}", e)).into());
                }
            }
        }

        Ok(stored)
    }

    /// 이전보다 청크 수가 줄었으면 남은 id 삭제
    async fn prune_stale(&self, doc: &PendingDocument) -> usize {
        let previous = match doc.previous_chunks {
            Some(p) if p > doc.chunk_count => p,
            _ => return 0,
        };

        let stale: Vec<String> = (doc.chunk_count..previous)
            .map(|i| chunk_id(&doc.source, i))
            .collect();

        match self.index.delete(&stale).await {
            Ok(n) => {
                tracing::info!("Removed {} stale chunk(s) of {}", n, doc.source);
                n
            }
            Err(e) => {
                tracing::warn!("Failed to remove stale chunks of {}: {:#}", doc.source, e);
                0
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 결정적 청크 id (`<정리된 파일 이름>_chunk_<인덱스>`)
pub fn chunk_id(source: &str, chunk_index: usize) -> String {
    format!("{}_chunk_{}", sanitize_source(source), chunk_index)
}

/// ASCII 영숫자가 아닌 문자를 `_`로 치환
pub fn sanitize_source(source: &str) -> String {
    source
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// 오프셋으로 페이지 번호 추정 (선형 보간, 1부터)
///
/// 추출기가 페이지 경계를 주지 않으므로 근사치입니다.
pub fn estimate_page_number(offset: usize, total_len: usize, page_count: usize) -> usize {
    if page_count <= 1 || total_len == 0 {
        return 1;
    }

    let chars_per_page = total_len as f64 / page_count as f64;
    let page = (offset as f64 / chars_per_page).floor() as usize + 1;
    page.min(page_count)
}

// ============================================================================
// Tests
// ============================================================================
