//! CLI 모듈
//!
//! trainbot-rag CLI 명령어 정의 및 구현

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::collector::{DirectorySource, DocumentSource};
use crate::config::Settings;
use crate::embedding::create_embedder;
use crate::error::RagError;
use crate::extractor::{ContentExtractor, TextExtractor};
use crate::ingest::{IngestConfig, IngestSummary, IngestionPipeline};
use crate::knowledge::{
    clean_text, estimate_chunk_count, open_vector_index, split_clean_text, ChunkConfig,
    IngestLedger, QueryFilter,
};
use crate::retrieval::{parse_citation_references, RetrievalConfig, Retriever};

/// 설정 에러 종료 코드
pub const EXIT_CONFIG: i32 = 2;
/// 지식베이스 사용 불가 종료 코드
pub const EXIT_KNOWLEDGE_BASE: i32 = 3;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "trainbot-rag")]
#[command(version, about = "교육 문서 RAG 수집/검색 도구", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 문서 폴더를 벡터 인덱스에 수집
    Ingest {
        /// 문서 폴더 (기본: DOCS_DIR 또는 ./docs)
        #[arg(short, long)]
        docs: Option<PathBuf>,

        /// 모든 청크에 붙일 카테고리
        #[arg(short, long)]
        category: Option<String>,

        /// 변경 없는 문서도 다시 수집
        #[arg(long)]
        force: bool,

        /// 하위 폴더까지 수집
        #[arg(short, long)]
        recursive: bool,

        /// PDF만 수집 (.txt/.md 제외)
        #[arg(long)]
        pdf_only: bool,
    },

    /// 질문에 대한 컨텍스트 검색
    Query {
        /// 질문
        question: String,

        /// 검색 개수 (기본: RAG_TOP_K)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// 최소 유사도 (기본: RAG_MIN_SCORE)
        #[arg(short, long)]
        min_score: Option<f32>,

        /// 카테고리 필터
        #[arg(short, long)]
        category: Option<String>,
    },

    /// 응답 텍스트의 [Source N] 인용 파싱 (인자가 없으면 stdin)
    Citations {
        text: Option<String>,
    },

    /// 파일 하나를 오프라인으로 청킹
    Chunk {
        /// PDF 또는 텍스트 파일
        file: PathBuf,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        chunk_overlap: Option<usize>,
    },

    /// 수집 원장 목록
    List {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest {
            docs,
            category,
            force,
            recursive,
            pdf_only,
        } => cmd_ingest(docs, category, force, recursive, pdf_only).await,
        Commands::Query {
            question,
            top_k,
            min_score,
            category,
        } => cmd_query(&question, top_k, min_score, category).await,
        Commands::Citations { text } => cmd_citations(text),
        Commands::Chunk {
            file,
            chunk_size,
            chunk_overlap,
        } => cmd_chunk(&file, chunk_size, chunk_overlap),
        Commands::List { limit } => cmd_list(limit),
        Commands::Status => cmd_status().await,
    }
}

/// 에러 종류별 종료 코드
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<RagError>() {
        Some(e) if e.is_config() => EXIT_CONFIG,
        Some(RagError::KnowledgeBaseUnavailable(_)) => EXIT_KNOWLEDGE_BASE,
        _ => 1,
    }
}

/// 에러를 사용자 메시지로 출력
pub fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<RagError>() {
        Some(RagError::NoDocuments { location }) => {
            eprintln!("[!] 수집할 문서가 없습니다: {}", location);
            eprintln!("    PDF, .txt, .md 파일을 폴더에 넣어주세요.");
        }
        Some(e) if e.is_config() => {
            eprintln!("[!] 설정 오류: {}", e);
            eprintln!("    .env 파일 또는 환경변수를 확인하세요.");
        }
        Some(RagError::KnowledgeBaseUnavailable(reason)) => {
            eprintln!("[!] 지식베이스를 사용할 수 없습니다.");
            eprintln!("    원인: {}", reason);
        }
        Some(RagError::Upsert(reason)) => {
            eprintln!("[!] 벡터 저장 실패로 수집을 중단했습니다.");
            eprintln!("    원인: {}", reason);
            eprintln!("    같은 명령으로 다시 실행해도 안전합니다.");
        }
        _ => eprintln!("[!] 오류: {:#}", err),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
async fn cmd_ingest(
    docs: Option<PathBuf>,
    category: Option<String>,
    force: bool,
    recursive: bool,
    pdf_only: bool,
) -> Result<()> {
    let settings = Settings::load()?;
    settings.require_pipeline()?;

    let docs_dir = docs.unwrap_or_else(|| settings.docs_dir.clone());
    let source = DirectorySource::new(&docs_dir)
        .recursive(recursive)
        .include_text(!pdf_only);
    println!("[*] 문서 폴더: {}", source.describe());

    let embedder = create_embedder(&settings)?;
    let index = open_vector_index(&settings).await?;
    let ledger = IngestLedger::open(&settings.ledger_path())?;

    let config = IngestConfig {
        category,
        force,
        ..IngestConfig::from_settings(&settings)
    };
    let extractor = Arc::new(ContentExtractor::new());
    let pipeline = IngestionPipeline::new(embedder, index, extractor, config)?.with_ledger(ledger);

    let summary = pipeline.run(&source).await?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &IngestSummary) {
    println!();
    println!("[OK] 수집 완료");
    println!("     발견: {} 문서", summary.documents_found);
    println!("     처리: {} 문서", summary.documents_processed);
    if summary.documents_skipped > 0 {
        println!("     변경 없음: {} 문서", summary.documents_skipped);
    }
    if summary.documents_failed > 0 {
        println!("[!]  실패: {} 문서", summary.documents_failed);
    }
    println!("     청크: {}", summary.chunks_created);
    println!("     저장된 벡터: {}", summary.vectors_stored);
    if summary.batches_dropped > 0 {
        println!("[!]  버린 임베딩 배치: {}", summary.batches_dropped);
    }
    if summary.stale_deleted > 0 {
        println!("     정리한 이전 청크: {}", summary.stale_deleted);
    }
}

/// 검색 명령어 (query)
async fn cmd_query(
    question: &str,
    top_k: Option<usize>,
    min_score: Option<f32>,
    category: Option<String>,
) -> Result<()> {
    let settings = Settings::load()?;
    settings.require_pipeline()?;

    let config = query_config(&settings, top_k, min_score, category)?;

    // 연결 실패도 지식베이스 장애로 분류
    let embedder = create_embedder(&settings)?;
    let index = open_vector_index(&settings)
        .await
        .map_err(|e| RagError::KnowledgeBaseUnavailable(format!("{:#}", e)))?;
    let retriever = Retriever::new(embedder, index, config);

    println!("[*] 검색 중: \"{}\"", question);
    let context = retriever.get_rag_context(question).await?;

    if context.chunks.is_empty() {
        println!("\n[!] 관련 문서를 찾지 못했습니다.\n");
    } else {
        println!("\n[OK] 검색 결과 ({} 건):\n", context.chunks.len());
        for (i, chunk) in context.chunks.iter().enumerate() {
            let meta = &chunk.metadata;
            let page = meta
                .page_number
                .map(|p| format!(", p.{}", p))
                .unwrap_or_default();
            println!(
                "  [Source {}] {} (score: {:.3}{})",
                i + 1,
                meta.label(),
                chunk.score,
                page
            );
            println!("     {}", truncate_text(&meta.text, 120));
        }

        println!("\n[*] 출처:");
        for source in &context.sources {
            match source.category {
                Some(ref c) => println!("  - {} [{}]", source.source, c),
                None => println!("  - {}", source.source),
            }
        }
        println!();
    }

    println!("{}", context.context_section);
    Ok(())
}

/// 환경 설정에 CLI 옵션을 덮어쓴 검색 설정
fn query_config(
    settings: &Settings,
    top_k: Option<usize>,
    min_score: Option<f32>,
    category: Option<String>,
) -> Result<RetrievalConfig, RagError> {
    let mut config = RetrievalConfig::from_settings(settings);
    if let Some(k) = top_k {
        if k == 0 {
            return Err(RagError::Config("top k must be greater than 0".to_string()));
        }
        config.top_k = k;
    }
    if let Some(score) = min_score {
        if !(0.0..=1.0).contains(&score) {
            return Err(RagError::Config(format!(
                "min score must be between 0 and 1 (got {})",
                score
            )));
        }
        config.min_score = score;
    }
    config.filter = category.map(QueryFilter::by_category);
    Ok(config)
}

/// 인용 파싱 명령어 (citations)
fn cmd_citations(text: Option<String>) -> Result<()> {
    let text = match text {
        Some(t) => t,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    let refs = parse_citation_references(&text);
    if !refs.has_source_references() {
        println!("[!] 인용된 출처가 없습니다.");
        return Ok(());
    }

    println!("[OK] 인용된 출처 ({} 건):", refs.sources.len());
    for cited in &refs.sources {
        match cited.title {
            Some(ref title) => println!("  [Source {}] {}", cited.number, title),
            None => println!("  [Source {}]", cited.number),
        }
    }
    Ok(())
}

/// 청킹 미리보기 명령어 (chunk)
///
/// 자격 증명 없이 추출과 분할만 수행합니다.
fn cmd_chunk(file: &Path, chunk_size: Option<usize>, chunk_overlap: Option<usize>) -> Result<()> {
    let settings = Settings::load()?;
    let config = preview_chunk_config(&settings, chunk_size, chunk_overlap)?;

    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.display().to_string());

    let extracted = ContentExtractor::new().extract(&name, &bytes)?;
    let cleaned = clean_text(&extracted.text);
    let chunks = split_clean_text(&cleaned, &config)?;
    let upper_bound = estimate_chunk_count(cleaned.len(), &config)?;

    println!("[*] 파일: {} ({} 페이지)", name, extracted.page_count);
    println!(
        "    정리된 텍스트: {} (청크 상한: {})",
        format_bytes(cleaned.len()),
        upper_bound
    );
    println!("[OK] 청크 {} 개:\n", chunks.len());

    for chunk in &chunks {
        println!(
            "  #{:<4} [{}..{}] {}",
            chunk.chunk_index,
            chunk.start_offset,
            chunk.end_offset,
            truncate_text(&chunk.text, 80)
        );
    }
    Ok(())
}

/// 환경 청크 설정에 CLI 옵션을 덮어씀 (검증은 보정 없이 거부)
fn preview_chunk_config(
    settings: &Settings,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
) -> Result<ChunkConfig, RagError> {
    ChunkConfig::new(
        chunk_size.unwrap_or(settings.chunk.chunk_size),
        chunk_overlap.unwrap_or(settings.chunk.chunk_overlap),
    )
}

/// 원장 목록 명령어 (list)
fn cmd_list(limit: usize) -> Result<()> {
    let settings = Settings::load()?;
    let ledger = IngestLedger::open(&settings.ledger_path())?;
    let entries = ledger.list(limit)?;

    if entries.is_empty() {
        println!("[!] 수집된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 수집된 문서 ({} 건):\n", entries.len());
    for entry in &entries {
        let category = entry.category.as_deref().unwrap_or("-");
        let marker = if entry.is_complete() { "" } else { " (일부 누락)" };
        println!("  {} [{}]{}", entry.source, category, marker);
        println!(
            "        청크: {}, 벡터: {}, 수집: {}",
            entry.chunk_count,
            entry.vector_count,
            entry.ingested_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status() -> Result<()> {
    println!("trainbot-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let settings = Settings::load()?;
    println!("[*] 데이터 디렉토리: {}", settings.data_dir.display());
    println!("[*] 문서 폴더: {}", settings.docs_dir.display());
    println!("[*] 벡터 백엔드: {}", settings.vector_backend);

    match settings.require_embedding() {
        Ok(_) => println!(
            "[OK] 임베딩: {} ({}차원)",
            settings.embedding_model, settings.embedding_dimensions
        ),
        Err(e) => println!("[!] 임베딩: {}", e),
    }

    match IngestLedger::open(&settings.ledger_path()).and_then(|l| l.stats()) {
        Ok(stats) => {
            println!("[OK] 수집 문서: {} 건", stats.document_count);
            println!(
                "     청크: {}, 벡터: {}",
                stats.chunk_count, stats.vector_count
            );
            if let Some(last) = stats.last_ingested_at {
                println!("     마지막 수집: {}", last.format("%Y-%m-%d %H:%M"));
            }
            if let Ok(meta) = std::fs::metadata(&stats.db_path) {
                println!("     원장 크기: {}", format_bytes(meta.len() as usize));
            }
        }
        Err(e) => println!("[!] 원장 조회 실패: {}", e),
    }

    if let Err(e) = settings.require_vector_index() {
        println!("[!] 벡터 인덱스: {}", e);
        return Ok(());
    }
    match open_vector_index(&settings).await {
        Ok(index) => match index.count().await {
            Ok(count) => println!("[OK] 벡터 인덱스 ({}): {} 벡터", index.name(), count),
            Err(e) => println!("[!] 벡터 수 조회 실패: {}", e),
        },
        Err(e) => println!("[!] 벡터 인덱스 연결 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전, 한 줄로)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_command() {
        let cli = Cli::try_parse_from([
            "trainbot-rag",
            "query",
            "How do I log a call?",
            "-k",
            "3",
            "--category",
            "hubspot",
        ])
        .unwrap();

        match cli.command {
            Commands::Query {
                question,
                top_k,
                min_score,
                category,
            } => {
                assert_eq!(question, "How do I log a call?");
                assert_eq!(top_k, Some(3));
                assert_eq!(min_score, None);
                assert_eq!(category.as_deref(), Some("hubspot"));
            }
            _ => panic!("expected query command"),
        }
    }

    #[test]
    fn test_parse_ingest_flags() {
        let cli =
            Cli::try_parse_from(["trainbot-rag", "ingest", "--docs", "./manuals", "--force"])
                .unwrap();
        match cli.command {
            Commands::Ingest {
                docs,
                force,
                recursive,
                ..
            } => {
                assert_eq!(docs, Some(PathBuf::from("./manuals")));
                assert!(force);
                assert!(!recursive);
            }
            _ => panic!("expected ingest command"),
        }
    }

    #[test]
    fn test_parse_pdf_only_flag() {
        let cli = Cli::try_parse_from(["trainbot-rag", "ingest", "--pdf-only"]).unwrap();
        match cli.command {
            Commands::Ingest { pdf_only, .. } => assert!(pdf_only),
            _ => panic!("expected ingest command"),
        }
    }

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, RagError> {
        Settings::from_lookup(|key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
    }

    #[test]
    fn test_query_config_rejects_bad_overrides() {
        let base = settings(&[]).unwrap();

        let err = query_config(&base, Some(0), None, None).unwrap_err();
        assert!(err.is_config());
        assert!(query_config(&base, None, Some(1.5), None).is_err());

        let config = query_config(&base, Some(2), Some(0.6), Some("hr".to_string())).unwrap();
        assert_eq!(config.top_k, 2);
        assert_eq!(config.min_score, 0.6);
        assert_eq!(config.filter, Some(QueryFilter::by_category("hr")));
    }

    #[test]
    fn test_invalid_chunk_env_is_not_replaced_by_defaults() {
        let err = settings(&[("CHUNK_SIZE", "100"), ("CHUNK_OVERLAP", "500")]).unwrap_err();
        assert!(matches!(
            err,
            RagError::InvalidChunkConfig {
                chunk_size: 100,
                chunk_overlap: 500
            }
        ));
        assert_eq!(exit_code(&err.into()), EXIT_CONFIG);
    }

    #[test]
    fn test_preview_chunk_config_overrides() {
        let base = settings(&[("CHUNK_SIZE", "400"), ("CHUNK_OVERLAP", "50")]).unwrap();

        let config = preview_chunk_config(&base, None, Some(100)).unwrap();
        assert_eq!((config.chunk_size, config.chunk_overlap), (400, 100));

        let err = preview_chunk_config(&base, Some(100), Some(500)).unwrap_err();
        assert!(matches!(err, RagError::InvalidChunkConfig { .. }));
    }

    #[test]
    fn test_exit_codes() {
        let config: anyhow::Error = RagError::Config("OPENAI_API_KEY".into()).into();
        let empty: anyhow::Error = RagError::NoDocuments {
            location: "./docs".into(),
        }
        .into();
        let kb: anyhow::Error = RagError::KnowledgeBaseUnavailable("timeout".into()).into();
        let upsert: anyhow::Error = RagError::Upsert("503".into()).into();

        assert_eq!(exit_code(&config), EXIT_CONFIG);
        assert_eq!(exit_code(&empty), EXIT_CONFIG);
        assert_eq!(exit_code(&kb), EXIT_KNOWLEDGE_BASE);
        assert_eq!(exit_code(&upsert), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
        assert_eq!(truncate_text("안녕하세요 세계", 5), "안녕하세요...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }
}
