//! LanceDB Vector Index - 로컬 디스크 벡터 검색
//!
//! 호스팅 인덱스 없이 청크 벡터를 로컬 `.lance` 디렉토리에 저장합니다.
//! id 기준 merge-insert로 업서트하고, 코사인 거리로 검색합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::Table;
use lancedb::DistanceType;

use super::vector::{ChunkMetadata, ChunkRecord, IndexMatch, QueryFilter, VectorIndex};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "chunks";

// ============================================================================
// LanceIndex
// ============================================================================

/// LanceDB 벡터 인덱스
pub struct LanceIndex {
    db: Connection,
    dimension: usize,
}

impl LanceIndex {
    /// LanceDB 인덱스 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원 (테이블 스키마에 고정)
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }

        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db, dimension })
    }

    /// 청크 테이블 스키마
    fn schema(&self) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, true),
            Field::new("category", DataType::Utf8, true),
            Field::new("page_number", DataType::Int32, true),
            Field::new("chunk_index", DataType::Int32, true),
            Field::new("total_chunks", DataType::Int32, true),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                false,
            ),
        ]))
    }

    /// 레코드들을 Arrow RecordBatch로 변환
    fn records_to_batch(&self, records: &[ChunkRecord]) -> Result<RecordBatch> {
        if let Some(bad) = records.iter().find(|r| r.vector.len() != self.dimension) {
            anyhow::bail!(
                "Vector for {} has dimension {}, expected {}",
                bad.id,
                bad.vector.len(),
                self.dimension
            );
        }

        let meta = |f: fn(&ChunkMetadata) -> Option<u32>| -> Int32Array {
            records
                .iter()
                .map(|r| f(&r.metadata).map(|n| n as i32))
                .collect()
        };
        let text = |f: fn(&ChunkMetadata) -> Option<&str>| -> StringArray {
            records.iter().map(|r| f(&r.metadata)).collect()
        };

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let sources: Vec<&str> = records.iter().map(|r| r.metadata.source.as_str()).collect();
        let texts: Vec<&str> = records.iter().map(|r| r.metadata.text.as_str()).collect();

        // 임베딩을 FixedSizeList로 변환
        let flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.vector.iter().copied())
            .collect();
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create vector array")?;

        RecordBatch::try_new(
            self.schema(),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(sources)),
                Arc::new(text(|m| m.title.as_deref())),
                Arc::new(text(|m| m.category.as_deref())),
                Arc::new(meta(|m| m.page_number)),
                Arc::new(meta(|m| m.chunk_index)),
                Arc::new(meta(|m| m.total_chunks)),
                Arc::new(StringArray::from(texts)),
                Arc::new(vectors),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// 테이블 열기 (없으면 None)
    async fn table(&self) -> Result<Option<Table>> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list LanceDB tables")?;

        if !names.iter().any(|n| n == TABLE_NAME) {
            return Ok(None);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table")?;
        Ok(Some(table))
    }
}

/// 필터를 LanceDB SQL 조건식으로 변환
fn filter_to_sql(filter: &QueryFilter) -> Option<String> {
    if filter.is_empty() {
        return None;
    }

    let clauses: Vec<String> = filter
        .conditions()
        .into_iter()
        .map(|(key, value)| format!("{} = '{}'", key, escape_sql(value)))
        .collect();
    Some(clauses.join(" AND "))
}

/// 작은따옴표 이스케이프
fn escape_sql(value: &str) -> String {
    value.replace('\'', "''")
}

/// 결과 배치를 검색 결과로 변환
fn batch_to_matches(batch: &RecordBatch) -> Result<Vec<IndexMatch>> {
    let strings = |name: &str| {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
    };
    let ints = |name: &str| {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
            .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
    };

    let ids = strings("id")?;
    let sources = strings("source")?;
    let titles = strings("title")?;
    let categories = strings("category")?;
    let texts = strings("text")?;
    let pages = ints("page_number")?;
    let indices = ints("chunk_index")?;
    let totals = ints("total_chunks")?;

    // _distance 컬럼 (LanceDB가 자동 추가)
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

    let opt_str = |col: &StringArray, i: usize| {
        (!col.is_null(i)).then(|| col.value(i).to_string())
    };
    let opt_u32 = |col: &Int32Array, i: usize| {
        (!col.is_null(i) && col.value(i) >= 0).then(|| col.value(i) as u32)
    };

    let mut matches = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let metadata = ChunkMetadata {
            source: sources.value(i).to_string(),
            title: opt_str(titles, i),
            category: opt_str(categories, i),
            page_number: opt_u32(pages, i),
            chunk_index: opt_u32(indices, i),
            total_chunks: opt_u32(totals, i),
            text: texts.value(i).to_string(),
        };

        // 코사인 거리(0~2)를 유사도(0~1)로 변환
        let score = (1.0 - distances.value(i)).clamp(0.0, 1.0);

        matches.push(IndexMatch {
            id: ids.value(i).to_string(),
            score,
            metadata: serde_json::to_value(&metadata)?,
        });
    }

    Ok(matches)
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<IndexMatch>> {
        let table = match self.table().await? {
            Some(t) => t,
            None => return Ok(vec![]),
        };

        let mut query = table
            .vector_search(vector.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(top_k);
        if let Some(condition) = filter.and_then(filter_to_sql) {
            query = query.only_if(condition);
        }

        let stream = query
            .execute()
            .await
            .context("Failed to execute vector search")?;
        let batches: Vec<RecordBatch> = stream.try_collect().await?;

        let mut matches = Vec::new();
        for batch in &batches {
            matches.extend(batch_to_matches(batch)?);
        }

        // 배치 경계와 무관하게 스코어 내림차순
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(matches)
    }

    async fn upsert(&self, records: &[ChunkRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let batch = self.records_to_batch(records)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.table().await? {
            Some(table) => {
                let mut merge = table.merge_insert(&["id"]);
                merge
                    .when_matched_update_all(None)
                    .when_not_matched_insert_all();
                merge
                    .execute(Box::new(batches))
                    .await
                    .context("Failed to merge vectors into table")?;
            }
            None => {
                self.db
                    .create_table(TABLE_NAME, batches)
                    .execute()
                    .await
                    .context("Failed to create table")?;
            }
        }

        Ok(records.len())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let table = match self.table().await? {
            Some(t) => t,
            None => return Ok(0),
        };

        let before = table.count_rows(None).await.context("Failed to count rows")?;

        let list: Vec<String> = ids
            .iter()
            .map(|id| format!("'{}'", escape_sql(id)))
            .collect();
        let filter = format!("id IN ({})", list.join(", "));
        table
            .delete(&filter)
            .await
            .context("Failed to delete vectors")?;

        let after = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(before.saturating_sub(after))
    }

    async fn count(&self) -> Result<usize> {
        match self.table().await? {
            Some(table) => table.count_rows(None).await.context("Failed to count rows"),
            None => Ok(0),
        }
    }

    fn name(&self) -> &str {
        "lancedb"
    }
}

// ============================================================================
// Tests
// ============================================================================
