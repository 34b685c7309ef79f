//! In-memory Vector Index - 전수 코사인 검색
//!
//! 외부 서비스 없이 파이프라인을 돌릴 때와 테스트에서 사용합니다.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::vector::{cosine_similarity, ChunkRecord, IndexMatch, QueryFilter, VectorIndex};

/// 메모리 벡터 인덱스
///
/// 삽입 순서를 유지하며, 같은 id는 제자리에서 교체합니다.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<ChunkRecord>,
    positions: HashMap<String, usize>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 레코드 스냅샷 (삽입 순서)
    pub fn records(&self) -> Vec<ChunkRecord> {
        self.inner
            .lock()
            .map(|state| state.records.clone())
            .unwrap_or_default()
    }

    /// id로 레코드 조회
    pub fn get(&self, id: &str) -> Option<ChunkRecord> {
        let state = self.inner.lock().ok()?;
        state.positions.get(id).map(|&i| state.records[i].clone())
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<IndexMatch>> {
        let state = self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut scored: Vec<(f32, &ChunkRecord)> = state
            .records
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.metadata)))
            .map(|r| (cosine_similarity(vector, &r.vector).clamp(0.0, 1.0), r))
            .collect();

        // 안정 정렬: 동점은 삽입 순서 유지
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(score, record)| -> Result<IndexMatch> {
                Ok(IndexMatch {
                    id: record.id.clone(),
                    score,
                    metadata: serde_json::to_value(&record.metadata)?,
                })
            })
            .collect()
    }

    async fn upsert(&self, records: &[ChunkRecord]) -> Result<usize> {
        let mut state = self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        for record in records {
            match state.positions.get(&record.id).copied() {
                Some(i) => state.records[i] = record.clone(),
                None => {
                    let position = state.records.len();
                    state.positions.insert(record.id.clone(), position);
                    state.records.push(record.clone());
                }
            }
        }

        Ok(records.len())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut state = self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let before = state.records.len();
        state.records.retain(|r| !ids.contains(&r.id));
        let removed = before - state.records.len();

        let positions = state
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        state.positions = positions;

        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        let state = self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(state.records.len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// Tests
// ============================================================================
