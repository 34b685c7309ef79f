//! Ingest Ledger - rusqlite 기반 수집 기록
//!
//! 수집에 성공한 문서마다 내용 해시, 청크 수, 저장된 벡터 수를 기록합니다.
//! 다음 수집 때 내용이 같은 문서는 건너뛰고, 청크 수가 줄어든 문서는
//! 남은 id를 인덱스에서 지울 수 있게 합니다.
//! 저장 위치: <data dir>/ledger.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::chunker::ChunkConfig;

// ============================================================================
// Types
// ============================================================================

/// 문서 수집 기록
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    /// 문서 이름 (메타데이터 source와 동일)
    pub source: String,
    /// 원본 바이트의 SHA-256 (hex)
    pub content_hash: String,
    pub chunk_count: usize,
    pub vector_count: usize,
    pub category: Option<String>,
    /// 수집 당시 청크 설정 (이전 스키마에서 옮겨진 행은 0)
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub ingested_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// 모든 청크가 벡터로 저장되었는지
    pub fn is_complete(&self) -> bool {
        self.vector_count >= self.chunk_count
    }

    /// 같은 내용, 카테고리, 청크 설정으로 빠짐없이 저장되었는지
    ///
    /// 하나라도 다르면 다시 수집해야 합니다.
    pub fn is_current(
        &self,
        content_hash: &str,
        category: Option<&str>,
        chunk: &ChunkConfig,
    ) -> bool {
        self.content_hash == content_hash
            && self.is_complete()
            && self.category.as_deref() == category
            && self.chunk_size == chunk.chunk_size
            && self.chunk_overlap == chunk.chunk_overlap
    }
}

/// 원장 통계
#[derive(Debug, Clone, Serialize)]
pub struct LedgerStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub vector_count: usize,
    pub last_ingested_at: Option<DateTime<Utc>>,
    pub db_path: PathBuf,
}

// ============================================================================
// IngestLedger
// ============================================================================

/// 수집 원장
#[derive(Clone)]
pub struct IngestLedger {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl IngestLedger {
    /// 원장 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create ledger directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        ledger.initialize()?;
        Ok(ledger)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS ingested_documents (
                source TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                vector_count INTEGER NOT NULL,
                category TEXT,
                chunk_size INTEGER NOT NULL DEFAULT 0,
                chunk_overlap INTEGER NOT NULL DEFAULT 0,
                ingested_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create ingested_documents table")?;

        // 청크 설정 컬럼이 없던 원장 업그레이드
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('ingested_documents')")?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()
            .context("Failed to read ledger schema")?;
        drop(stmt);
        for column in ["chunk_size", "chunk_overlap"] {
            if !columns.iter().any(|c| c == column) {
                conn.execute(
                    &format!(
                        "ALTER TABLE ingested_documents ADD COLUMN {} INTEGER NOT NULL DEFAULT 0",
                        column
                    ),
                    [],
                )
                .with_context(|| format!("Failed to add {} column", column))?;
            }
        }

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ingested_at ON ingested_documents(ingested_at)",
            [],
        )
        .context("Failed to create ingested_at index")?;

        tracing::debug!("Ingest ledger initialized at {:?}", self.db_path);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 문서 기록 조회
    pub fn get(&self, source: &str) -> Result<Option<LedgerEntry>> {
        let conn = self.lock()?;

        let entry = conn
            .query_row(
                "SELECT source, content_hash, chunk_count, vector_count, category,
                        chunk_size, chunk_overlap, ingested_at
                 FROM ingested_documents WHERE source = ?1",
                params![source],
                row_to_entry,
            )
            .optional()
            .context("Failed to query ledger")?;

        Ok(entry)
    }

    /// 문서 기록 저장 (같은 source는 교체)
    pub fn record(
        &self,
        source: &str,
        content_hash: &str,
        chunk_count: usize,
        vector_count: usize,
        category: Option<&str>,
        chunk: &ChunkConfig,
    ) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT OR REPLACE INTO ingested_documents
             (source, content_hash, chunk_count, vector_count, category,
              chunk_size, chunk_overlap, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                source,
                content_hash,
                chunk_count as i64,
                vector_count as i64,
                category,
                chunk.chunk_size as i64,
                chunk.chunk_overlap as i64,
                now
            ],
        )
        .context("Failed to record ingested document")?;

        tracing::debug!("Recorded {} ({} chunks)", source, chunk_count);
        Ok(())
    }

    /// 기록 목록 (최신순)
    pub fn list(&self, limit: usize) -> Result<Vec<LedgerEntry>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT source, content_hash, chunk_count, vector_count, category,
                        chunk_size, chunk_overlap, ingested_at
             FROM ingested_documents
             ORDER BY ingested_at DESC, source ASC
             LIMIT ?1",
        )?;

        let entries = stmt
            .query_map(params![limit as i64], row_to_entry)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(entries)
    }

    /// 기록 삭제
    pub fn remove(&self, source: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM ingested_documents WHERE source = ?1",
            params![source],
        )?;
        Ok(rows > 0)
    }

    /// 원장 통계
    pub fn stats(&self) -> Result<LedgerStats> {
        let conn = self.lock()?;

        let (documents, chunks, vectors): (i64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(chunk_count), 0), COALESCE(SUM(vector_count), 0)
                 FROM ingested_documents",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .context("Failed to read ledger stats")?;

        let last: Option<String> = conn
            .query_row(
                "SELECT MAX(ingested_at) FROM ingested_documents",
                [],
                |row| row.get(0),
            )
            .context("Failed to read last ingestion time")?;

        Ok(LedgerStats {
            document_count: documents as usize,
            chunk_count: chunks as usize,
            vector_count: vectors as usize,
            last_ingested_at: last.map(parse_datetime),
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 원본 바이트의 SHA-256 hex 문자열
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        source: row.get(0)?,
        content_hash: row.get(1)?,
        chunk_count: row.get::<_, i64>(2)? as usize,
        vector_count: row.get::<_, i64>(3)? as usize,
        category: row.get(4)?,
        chunk_size: row.get::<_, i64>(5)? as usize,
        chunk_overlap: row.get::<_, i64>(6)? as usize,
        ingested_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
