//! Pinecone Vector Index - 호스팅 벡터 DB (REST)
//!
//! ref: https://docs.pinecone.io/reference/api/data-plane
//!
//! 데이터 플레인(upsert/query/delete/describe_index_stats)은 인덱스 호스트로,
//! 호스트를 모를 때는 컨트롤 플레인에서 인덱스 이름으로 조회합니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::vector::{ChunkMetadata, ChunkRecord, IndexMatch, QueryFilter, VectorIndex};
use crate::error::RagError;

/// 컨트롤 플레인 엔드포인트
const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";

/// API 버전 헤더 값
const API_VERSION: &str = "2024-07";

/// 요청 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// PineconeIndex
// ============================================================================

/// Pinecone 인덱스 클라이언트
#[derive(Debug, Clone)]
pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    namespace: Option<String>,
    name: String,
}

impl PineconeIndex {
    /// 인덱스 호스트를 알고 있을 때 생성
    ///
    /// # Arguments
    /// * `api_key` - Pinecone API 키
    /// * `host` - 인덱스 호스트 (`https://` 생략 가능)
    /// * `namespace` - 네임스페이스 (없으면 기본)
    pub fn new(api_key: &str, host: &str, namespace: Option<String>) -> Result<Self> {
        let client = build_client(api_key)?;
        let host = normalize_host(host)?;
        let name = host
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .split('.')
            .next()
            .unwrap_or("pinecone")
            .to_string();

        Ok(Self {
            client,
            host,
            namespace,
            name,
        })
    }

    /// 인덱스 이름으로 호스트를 조회하여 연결
    pub async fn connect(
        api_key: &str,
        index_name: &str,
        host: Option<&str>,
        namespace: Option<String>,
    ) -> Result<Self> {
        if let Some(host) = host {
            let mut index = Self::new(api_key, host, namespace)?;
            index.name = index_name.to_string();
            return Ok(index);
        }

        let client = build_client(api_key)?;
        let url = format!("{}/indexes/{}", CONTROL_PLANE_URL, index_name);
        let response = client
            .get(&url)
            .send()
            .await
            .context("Failed to send Pinecone describe_index request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Pinecone response body")?;

        if !status.is_success() {
            anyhow::bail!(
                "Pinecone describe_index failed for '{}' ({}): {}",
                index_name,
                status,
                body
            );
        }

        let description: IndexDescription =
            serde_json::from_str(&body).context("Failed to parse Pinecone index description")?;
        tracing::debug!(
            "Resolved Pinecone index '{}' -> {} (dimension: {:?})",
            index_name,
            description.host,
            description.dimension
        );

        Ok(Self {
            client,
            host: normalize_host(&description.host)?,
            namespace,
            name: index_name.to_string(),
        })
    }

    /// 인덱스 호스트 URL
    pub fn host(&self) -> &str {
        &self.host
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<String> {
        let url = format!("{}{}", self.host, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send Pinecone request: {}", path))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read Pinecone response body")?;

        if !status.is_success() {
            anyhow::bail!("Pinecone API error ({}) on {}: {}", status, path, text);
        }

        Ok(text)
    }
}

fn build_client(api_key: &str) -> Result<reqwest::Client> {
    if api_key.trim().is_empty() {
        return Err(RagError::Config("PINECONE_API_KEY is empty".to_string()).into());
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        "Api-Key",
        HeaderValue::from_str(api_key.trim()).context("Invalid Pinecone API key")?,
    );
    headers.insert("X-Pinecone-API-Version", HeaderValue::from_static(API_VERSION));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .default_headers(headers)
        .build()
        .context("Failed to create HTTP client")
}

/// 호스트 정규화 (스킴 보정, 끝 슬래시 제거)
///
/// 스킴을 뗀 나머지가 비어 있거나 호스트가 없으면 설정 에러입니다.
fn normalize_host(host: &str) -> Result<String> {
    let trimmed = host.trim();
    let (scheme, rest) = match trimmed.split_once("://") {
        Some((scheme @ ("http" | "https"), rest)) => (scheme, rest),
        Some((scheme, _)) => {
            return Err(RagError::Config(format!(
                "unsupported scheme '{}' in Pinecone index host '{}'",
                scheme, trimmed
            ))
            .into())
        }
        None => ("https", trimmed),
    };

    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return Err(RagError::Config(format!("Pinecone index host '{}' is empty", trimmed)).into());
    }

    let normalized = format!("{}://{}", scheme, rest);
    let url = url::Url::parse(&normalized).map_err(|e| {
        RagError::Config(format!("invalid Pinecone index host '{}': {}", trimmed, e))
    })?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(
            RagError::Config(format!("Pinecone index host '{}' has no host name", trimmed)).into(),
        );
    }

    Ok(normalized)
}

/// 필터를 Pinecone 메타데이터 필터 문법으로 변환
fn filter_to_json(filter: &QueryFilter) -> Option<Value> {
    if filter.is_empty() {
        return None;
    }

    let mut map = Map::new();
    for (key, value) in filter.conditions() {
        map.insert(key.to_string(), json!({ "$eq": value }));
    }
    Some(Value::Object(map))
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct IndexDescription {
    host: String,
    #[serde(default)]
    dimension: Option<usize>,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a ChunkMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    ids: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexStats {
    #[serde(default)]
    total_vector_count: usize,
    #[serde(default)]
    namespaces: Map<String, Value>,
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<IndexMatch>> {
        let request = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            include_values: false,
            filter: filter.and_then(filter_to_json),
            namespace: self.namespace.as_deref(),
        };

        let body = self.post("/query", &request).await?;
        let response: QueryResponse =
            serde_json::from_str(&body).context("Failed to parse Pinecone query response")?;

        Ok(response
            .matches
            .into_iter()
            .map(|m| IndexMatch {
                id: m.id,
                score: m.score.unwrap_or(0.0).clamp(0.0, 1.0),
                metadata: m.metadata.unwrap_or(Value::Null),
            })
            .collect())
    }

    async fn upsert(&self, records: &[ChunkRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let request = UpsertRequest {
            vectors: records
                .iter()
                .map(|r| UpsertVector {
                    id: &r.id,
                    values: &r.vector,
                    metadata: &r.metadata,
                })
                .collect(),
            namespace: self.namespace.as_deref(),
        };

        let body = self.post("/vectors/upsert", &request).await?;
        let response: UpsertResponse =
            serde_json::from_str(&body).context("Failed to parse Pinecone upsert response")?;

        Ok(response.upserted_count.unwrap_or(records.len()))
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let request = DeleteRequest {
            ids,
            namespace: self.namespace.as_deref(),
        };
        self.post("/vectors/delete", &request).await?;

        // Pinecone은 삭제 개수를 돌려주지 않음
        Ok(ids.len())
    }

    async fn count(&self) -> Result<usize> {
        let body = self.post("/describe_index_stats", &json!({})).await?;
        let stats: IndexStats =
            serde_json::from_str(&body).context("Failed to parse Pinecone index stats")?;

        let count = match self.namespace {
            Some(ref ns) => stats
                .namespaces
                .get(ns)
                .and_then(|n| n.get("vectorCount"))
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize,
            None => stats.total_vector_count,
        };
        Ok(count)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Tests
// ============================================================================
