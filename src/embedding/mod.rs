//! 임베딩 모듈 - OpenAI 호환 API를 통한 텍스트 벡터화
//!
//! 문서 청크와 질의를 같은 모델로 벡터화합니다.
//! rate limit(429)은 `RagError::RateLimited`로 올려 보내고,
//! 재시도는 호출자(수집 파이프라인)가 결정합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OpenAiEmbedding::new(api_key, base_url, model, 1536)?;
//! let embedding = embedder.embed("환자 접수 절차").await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::RagError;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    ///
    /// 입력 순서대로 텍스트마다 벡터 하나를 반환합니다.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI Embedding
// ============================================================================

/// 요청 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenAI 호환 임베딩 구현체
///
/// ref: https://platform.openai.com/docs/api-reference/embeddings
#[derive(Debug, Clone)]
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedding {
    /// 새 임베딩 클라이언트 생성
    ///
    /// # Arguments
    /// * `api_key` - API 키
    /// * `base_url` - API 주소 (예: `https://api.openai.com/v1`)
    /// * `model` - 임베딩 모델 이름
    /// * `dimension` - 출력 차원
    pub fn new(api_key: &str, base_url: &str, model: &str, dimension: usize) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(RagError::Config("OPENAI_API_KEY is empty".to_string()).into());
        }
        if model.trim().is_empty() {
            return Err(RagError::Config("EMBEDDING_MODEL is empty".to_string()).into());
        }
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }

        let base = base_url.trim().trim_end_matches('/');
        url::Url::parse(base)
            .map_err(|e| RagError::Config(format!("invalid OPENAI_BASE_URL '{}': {}", base, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                .context("Invalid API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base),
            model: model.trim().to_string(),
            dimension,
        })
    }

    /// 설정에서 생성
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.require_embedding()?;
        Self::new(
            api_key,
            &settings.openai_base_url,
            &settings.embedding_model,
            settings.embedding_dimensions,
        )
    }

    /// 요청 엔드포인트
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `dimensions` 파라미터는 text-embedding-3 계열만 지원
    fn requested_dimensions(&self) -> Option<usize> {
        if self.model.starts_with("text-embedding-3") {
            Some(self.dimension)
        } else {
            None
        }
    }

    async fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.requested_dimensions(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Embedding(format!("failed to send request: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RagError::RateLimited(api_error_message(&body)).into());
        }
        if !status.is_success() {
            return Err(
                RagError::Embedding(format!("{} ({})", api_error_message(&body), status)).into(),
            );
        }

        let mut parsed: EmbedResponse =
            serde_json::from_str(&body).context("Failed to parse embedding response")?;
        parsed.data.sort_by_key(|entry| entry.index);

        if parsed.data.len() != inputs.len() {
            return Err(RagError::Embedding(format!(
                "returned {} embeddings for {} inputs",
                parsed.data.len(),
                inputs.len()
            ))
            .into());
        }

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        if let Some(v) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(RagError::Embedding(format!(
                "expected dimension {}, got {}",
                self.dimension,
                v.len()
            ))
            .into());
        }

        Ok(vectors)
    }
}

/// 임베딩 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

/// 임베딩 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// API 에러 응답
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// 에러 본문에서 메시지 추출 (JSON이 아니면 본문 그대로)
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // 빈 텍스트 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let mut vectors = self.request(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("empty embedding response".to_string()).into())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // API는 빈 입력을 거부하므로 빈 텍스트는 영벡터로 채움
        let non_empty: Vec<(usize, &str)> = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(i, t)| (i, t.as_str()))
            .collect();

        let mut results = vec![vec![0.0; self.dimension]; texts.len()];
        if non_empty.is_empty() {
            return Ok(results);
        }

        let inputs: Vec<&str> = non_empty.iter().map(|(_, t)| *t).collect();
        tracing::debug!("Embedding {} texts with {}", inputs.len(), self.model);
        let vectors = self.request(&inputs).await?;

        for ((i, _), vector) in non_empty.into_iter().zip(vectors) {
            results[i] = vector;
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 임베딩 프로바이더 생성
///
/// API 키가 없으면 설정 에러로 즉시 실패합니다.
pub fn create_embedder(settings: &Settings) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder = OpenAiEmbedding::from_settings(settings)?;
    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(Arc::new(embedder))
}

// ============================================================================
// Tests
// ============================================================================
