//! 테스트용 가짜 임베더와 인덱스

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::knowledge::{ChunkRecord, IndexMatch, QueryFilter, VectorIndex};

/// 단어 해시 기반 결정적 임베더
///
/// 같은 텍스트는 항상 같은 벡터, 단어가 겹칠수록 높은 유사도.
#[derive(Debug)]
pub struct HashEmbedder {
    dimension: usize,
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            // FNV-1a
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in word.to_lowercase().bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            vector[(hash % self.dimension as u64) as usize] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// 배치 호출 결과 스크립트
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    RateLimited,
    Fail,
}

/// 스크립트대로 실패하는 임베더 (스크립트가 끝나면 성공)
#[derive(Debug)]
pub struct ScriptedEmbedder {
    inner: HashEmbedder,
    script: Mutex<VecDeque<Outcome>>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl ScriptedEmbedder {
    pub fn new(dimension: usize, script: &[Outcome]) -> Self {
        Self {
            inner: HashEmbedder::new(dimension),
            script: Mutex::new(script.iter().copied().collect()),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// 호출된 배치 입력 (실패한 호출 포함)
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        Ok(vectors.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batches.lock().unwrap().push(texts.to_vec());
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Ok);

        match outcome {
            Outcome::Ok => self.inner.embed_batch(texts).await,
            Outcome::RateLimited => Err(RagError::RateLimited("429 Too Many Requests".into()).into()),
            Outcome::Fail => Err(RagError::Embedding("invalid input".into()).into()),
        }
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// 모든 호출이 실패하는 인덱스
#[derive(Debug, Default)]
pub struct FailingIndex;

#[async_trait]
impl VectorIndex for FailingIndex {
    async fn query(
        &self,
        _vector: &[f32],
        _top_k: usize,
        _filter: Option<&QueryFilter>,
    ) -> Result<Vec<IndexMatch>> {
        anyhow::bail!("index unreachable")
    }

    async fn upsert(&self, _records: &[ChunkRecord]) -> Result<usize> {
        anyhow::bail!("index unreachable")
    }

    async fn delete(&self, _ids: &[String]) -> Result<usize> {
        anyhow::bail!("index unreachable")
    }

    async fn count(&self) -> Result<usize> {
        anyhow::bail!("index unreachable")
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// 고정된 검색 결과를 돌려주는 인덱스
#[derive(Debug, Default)]
pub struct StaticIndex {
    matches: Vec<IndexMatch>,
    queries: Mutex<Vec<(usize, Option<QueryFilter>)>>,
}

impl StaticIndex {
    pub fn new(matches: Vec<IndexMatch>) -> Self {
        Self {
            matches,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// 받은 질의 (top_k, filter)
    pub fn queries(&self) -> Vec<(usize, Option<QueryFilter>)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorIndex for StaticIndex {
    async fn query(
        &self,
        _vector: &[f32],
        top_k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<IndexMatch>> {
        self.queries
            .lock()
            .unwrap()
            .push((top_k, filter.cloned()));
        Ok(self.matches.iter().take(top_k).cloned().collect())
    }

    async fn upsert(&self, records: &[ChunkRecord]) -> Result<usize> {
        Ok(records.len())
    }

    async fn delete(&self, _ids: &[String]) -> Result<usize> {
        Ok(0)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.matches.len())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// 검색 결과 하나 생성
pub fn index_match(id: &str, score: f32, source: &str, title: Option<&str>, text: &str) -> IndexMatch {
    let mut metadata = json!({ "source": source, "text": text });
    if let Some(title) = title {
        metadata["title"] = json!(title);
    }
    IndexMatch {
        id: id.to_string(),
        score,
        metadata,
    }
}
