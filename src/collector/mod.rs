//! 문서 수집 모듈
//!
//! 문서 디렉토리에서 수집 대상 파일을 찾아 (이름, 바이트)로 제공합니다.
//! 숨김 파일과 지원하지 않는 확장자는 건너뜁니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ignore::WalkBuilder;

// ============================================================================
// File Types
// ============================================================================

/// 지원하는 파일 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// PDF 파일
    Pdf,
    /// 텍스트 파일 (txt, 마크다운)
    Text,
}

impl FileType {
    /// 확장자로 파일 타입 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(FileType::Pdf),
            "txt" | "md" | "markdown" => Some(FileType::Text),
            _ => None,
        }
    }

    /// 파일 경로(또는 이름)에서 타입 결정
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

// ============================================================================
// DocumentSource Trait
// ============================================================================

/// 문서 소스 트레이트
///
/// 수집 가능한 원본 문서를 나열하고 이름으로 읽습니다.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// 문서 이름 목록 (정렬됨)
    async fn list(&self) -> Result<Vec<String>>;

    /// 문서 원본 바이트 읽기
    async fn read(&self, name: &str) -> Result<Vec<u8>>;

    /// 로그/에러 메시지용 위치 설명
    fn describe(&self) -> String;
}

// ============================================================================
// DirectorySource
// ============================================================================

/// 로컬 디렉토리 문서 소스
///
/// 문서 이름은 루트 기준 상대 경로입니다 (비재귀 모드에서는 파일 이름).
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    recursive: bool,
    include_text: bool,
}

impl DirectorySource {
    /// 새 디렉토리 소스 (비재귀, PDF와 텍스트 모두 수집)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: false,
            include_text: true,
        }
    }

    /// 하위 디렉토리까지 수집
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// 텍스트 파일 포함 여부 (false면 PDF만)
    pub fn include_text(mut self, include_text: bool) -> Self {
        self.include_text = include_text;
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        match FileType::from_path(path) {
            Some(FileType::Pdf) => true,
            Some(FileType::Text) => self.include_text,
            None => false,
        }
    }

    fn collect_names(&self) -> Vec<String> {
        if !self.root.is_dir() {
            tracing::warn!("Docs folder does not exist: {}", self.root.display());
            return Vec::new();
        }

        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(false)
            .sort_by_file_name(|a, b| a.cmp(b));
        if !self.recursive {
            builder.max_depth(Some(1));
        }

        let mut names = Vec::new();
        for entry in builder.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            // 파일만 처리
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }
            if !self.accepts(entry.path()) {
                continue;
            }

            match entry.path().strip_prefix(&self.root) {
                Ok(relative) => names.push(relative.to_string_lossy().replace('\\', "/")),
                Err(_) => tracing::debug!("Skipping entry outside root: {:?}", entry.path()),
            }
        }

        names.sort();
        names
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    async fn list(&self) -> Result<Vec<String>> {
        let source = self.clone();
        let names = tokio::task::spawn_blocking(move || source.collect_names())
            .await
            .context("Directory walk task failed")?;

        tracing::info!("Found {} document(s) in {}", names.len(), self.describe());
        Ok(names)
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.root.join(name);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read document: {:?}", path))
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
