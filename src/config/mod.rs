//! 설정 모듈 - 환경변수 기반 Settings
//!
//! `.env.local`, `.env` 순서로 읽은 뒤 프로세스 환경변수에서 설정을 구성합니다.
//! 필수 자격증명은 처리 시작 전에 한 번에 검증합니다.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::RagError;
use crate::knowledge::ChunkConfig;

/// 기본 OpenAI API 주소
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// 기본 임베딩 모델
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
/// 기본 임베딩 차원
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
/// 기본 검색 결과 수
pub const DEFAULT_TOP_K: usize = 5;
/// 기본 최소 유사도
pub const DEFAULT_MIN_SCORE: f32 = 0.4;
/// 기본 임베딩 배치 크기
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 10;
/// 기본 업서트 배치 크기
pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 100;
/// 기본 문서 디렉토리
pub const DEFAULT_DOCS_DIR: &str = "./docs";

// ============================================================================
// VectorBackend
// ============================================================================

/// 벡터 인덱스 백엔드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorBackend {
    /// 호스팅 Pinecone 인덱스
    #[default]
    Pinecone,
    /// 로컬 LanceDB
    Lance,
}

impl FromStr for VectorBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pinecone" => Ok(Self::Pinecone),
            "lance" | "lancedb" => Ok(Self::Lance),
            other => Err(RagError::Config(format!(
                "VECTOR_BACKEND must be 'pinecone' or 'lance', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for VectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pinecone => write!(f, "pinecone"),
            Self::Lance => write!(f, "lance"),
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// 실행 설정
#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub vector_backend: VectorBackend,
    pub pinecone_api_key: Option<String>,
    pub pinecone_index_name: Option<String>,
    pub pinecone_index_host: Option<String>,
    pub pinecone_namespace: Option<String>,
    /// 원장(SQLite)과 로컬 벡터 DB 위치
    pub data_dir: PathBuf,
    pub docs_dir: PathBuf,
    pub top_k: usize,
    pub min_score: f32,
    pub chunk: ChunkConfig,
    pub embed_batch_size: usize,
    pub upsert_batch_size: usize,
}

impl Settings {
    /// `.env.local`, `.env` 파일을 읽은 뒤 환경변수에서 생성
    pub fn load() -> Result<Self, RagError> {
        load_dotenv();
        Self::from_env()
    }

    /// 프로세스 환경변수에서 생성
    pub fn from_env() -> Result<Self, RagError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 조회 함수로부터 생성 (빈 값은 없는 것으로 취급)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RagError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let chunk = ChunkConfig::new(
            parse_or(&get, "CHUNK_SIZE", ChunkConfig::default().chunk_size)?,
            parse_or(&get, "CHUNK_OVERLAP", ChunkConfig::default().chunk_overlap)?,
        )?;

        let embedding_dimensions =
            parse_or(&get, "EMBEDDING_DIMENSIONS", DEFAULT_EMBEDDING_DIMENSIONS)?;
        let top_k = parse_or(&get, "RAG_TOP_K", DEFAULT_TOP_K)?;
        let min_score: f32 = parse_or(&get, "RAG_MIN_SCORE", DEFAULT_MIN_SCORE)?;
        let embed_batch_size = parse_or(&get, "EMBED_BATCH_SIZE", DEFAULT_EMBED_BATCH_SIZE)?;
        let upsert_batch_size = parse_or(&get, "UPSERT_BATCH_SIZE", DEFAULT_UPSERT_BATCH_SIZE)?;

        ensure_positive("EMBEDDING_DIMENSIONS", embedding_dimensions)?;
        ensure_positive("RAG_TOP_K", top_k)?;
        ensure_positive("EMBED_BATCH_SIZE", embed_batch_size)?;
        ensure_positive("UPSERT_BATCH_SIZE", upsert_batch_size)?;
        if !(0.0..=1.0).contains(&min_score) {
            return Err(RagError::Config(format!(
                "RAG_MIN_SCORE must be between 0 and 1, got {}",
                min_score
            )));
        }

        let vector_backend = match get("VECTOR_BACKEND") {
            Some(value) => value.parse()?,
            None => VectorBackend::default(),
        };

        let data_dir = get("TRAINBOT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            embedding_model: get("EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_dimensions,
            vector_backend,
            pinecone_api_key: get("PINECONE_API_KEY"),
            pinecone_index_name: get("PINECONE_INDEX_NAME"),
            pinecone_index_host: get("PINECONE_INDEX_HOST"),
            pinecone_namespace: get("PINECONE_NAMESPACE"),
            data_dir,
            docs_dir: get("DOCS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCS_DIR)),
            top_k,
            min_score,
            chunk,
            embed_batch_size,
            upsert_batch_size,
        })
    }

    /// 임베딩 API 키 확인
    pub fn require_embedding(&self) -> Result<&str, RagError> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| missing(&["OPENAI_API_KEY"]))
    }

    /// 선택된 벡터 백엔드에 필요한 변수 확인
    pub fn require_vector_index(&self) -> Result<(), RagError> {
        let names = self.missing_vector_vars();
        if names.is_empty() {
            Ok(())
        } else {
            Err(missing(&names))
        }
    }

    /// 수집/질의 전 검증 (누락된 변수를 모두 나열)
    pub fn require_pipeline(&self) -> Result<(), RagError> {
        let mut names = Vec::new();
        if self.openai_api_key.is_none() {
            names.push("OPENAI_API_KEY");
        }
        names.extend(self.missing_vector_vars());

        if names.is_empty() {
            Ok(())
        } else {
            Err(missing(&names))
        }
    }

    fn missing_vector_vars(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.vector_backend == VectorBackend::Pinecone {
            if self.pinecone_api_key.is_none() {
                names.push("PINECONE_API_KEY");
            }
            if self.pinecone_index_name.is_none() && self.pinecone_index_host.is_none() {
                names.push("PINECONE_INDEX_NAME");
            }
        }
        names
    }

    /// 원장 DB 경로
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger.db")
    }

    /// LanceDB 경로
    pub fn lance_path(&self) -> PathBuf {
        self.data_dir.join("vectors.lance")
    }
}

/// `.env.local`, `.env` 파일 로드 (없으면 무시)
///
/// 먼저 읽은 값이 우선합니다 (이미 설정된 변수는 덮어쓰지 않음).
pub fn load_dotenv() {
    for file in [".env.local", ".env"] {
        match dotenv::from_filename(file) {
            Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
            Err(dotenv::Error::Io(_)) => {}
            Err(e) => tracing::warn!("Failed to parse {}: {}", file, e),
        }
    }
}

/// 기본 데이터 디렉토리
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".trainbot-rag")
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, RagError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| RagError::Config(format!("{} has invalid value '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

fn ensure_positive(key: &str, value: usize) -> Result<(), RagError> {
    if value == 0 {
        return Err(RagError::Config(format!("{} must be greater than 0", key)));
    }
    Ok(())
}

fn missing(names: &[&str]) -> RagError {
    RagError::Config(format!(
        "missing required environment variable(s): {}",
        names.join(", ")
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, RagError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.openai_base_url, DEFAULT_OPENAI_BASE_URL);
        assert_eq!(s.embedding_model, "text-embedding-3-small");
        assert_eq!(s.embedding_dimensions, 1536);
        assert_eq!(s.vector_backend, VectorBackend::Pinecone);
        assert_eq!(s.top_k, 5);
        assert!((s.min_score - 0.4).abs() < f32::EPSILON);
        assert_eq!(s.chunk, ChunkConfig::default());
        assert_eq!(s.embed_batch_size, 10);
        assert_eq!(s.upsert_batch_size, 100);
        assert_eq!(s.docs_dir, PathBuf::from("./docs"));
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("RAG_TOP_K", "8"),
            ("RAG_MIN_SCORE", "0.65"),
            ("CHUNK_SIZE", "500"),
            ("CHUNK_OVERLAP", "50"),
            ("VECTOR_BACKEND", "lance"),
            ("TRAINBOT_DATA_DIR", "/tmp/trainbot"),
        ])
        .unwrap();
        assert_eq!(s.top_k, 8);
        assert_eq!(s.chunk.chunk_size, 500);
        assert_eq!(s.chunk.chunk_overlap, 50);
        assert_eq!(s.vector_backend, VectorBackend::Lance);
        assert_eq!(s.ledger_path(), PathBuf::from("/tmp/trainbot/ledger.db"));
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = settings(&[("RAG_TOP_K", "five")]).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("RAG_TOP_K"));
    }

    #[test]
    fn test_invalid_chunk_config_rejected() {
        let err = settings(&[("CHUNK_SIZE", "200"), ("CHUNK_OVERLAP", "200")]).unwrap_err();
        assert!(matches!(err, RagError::InvalidChunkConfig { .. }));
    }

    #[test]
    fn test_min_score_range() {
        assert!(settings(&[("RAG_MIN_SCORE", "1.5")]).is_err());
        assert!(settings(&[("RAG_MIN_SCORE", "0")]).is_ok());
    }

    #[test]
    fn test_unknown_backend() {
        assert!(settings(&[("VECTOR_BACKEND", "qdrant")]).is_err());
    }

    #[test]
    fn test_require_pipeline_lists_all_missing() {
        let s = settings(&[]).unwrap();
        let message = s.require_pipeline().unwrap_err().to_string();
        assert!(message.contains("OPENAI_API_KEY"));
        assert!(message.contains("PINECONE_API_KEY"));
        assert!(message.contains("PINECONE_INDEX_NAME"));
    }

    #[test]
    fn test_require_pipeline_lance_needs_only_openai() {
        let s = settings(&[("VECTOR_BACKEND", "lance"), ("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert!(s.require_pipeline().is_ok());
        assert_eq!(s.require_embedding().unwrap(), "sk-test");
    }

    #[test]
    fn test_blank_values_are_missing() {
        let s = settings(&[("OPENAI_API_KEY", "   ")]).unwrap();
        assert!(s.require_embedding().is_err());
    }

    #[test]
    fn test_pinecone_host_satisfies_index_name() {
        let s = settings(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("PINECONE_API_KEY", "pc-test"),
            ("PINECONE_INDEX_HOST", "docs-abc.svc.pinecone.io"),
        ])
        .unwrap();
        assert!(s.require_vector_index().is_ok());
    }
}
