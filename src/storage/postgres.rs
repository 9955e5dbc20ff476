use super::{RecordStore, RecordUnitOfWork};
use crate::config::DatabaseConfig;
use crate::db::{CandidateRecord, PgPool, RowFields, Timestamp};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use tracing::debug;

/// candidates 表的 PostgreSQL 实现
pub struct PgRecordStore {
    pool: PgPool,
    name: String,
}

impl PgRecordStore {
    /// 连接数据库并确认 candidates 表可读
    pub async fn connect(config: &DatabaseConfig) -> SyncResult<Self> {
        let pool = crate::db::connect(config)
            .await
            .map_err(|e| SyncError::Config(format!("连接数据库失败: {}", e)))?;

        sqlx::query("SELECT 1 FROM candidates LIMIT 1")
            .fetch_optional(&pool)
            .await
            .map_err(|e| SyncError::Config(format!("candidates 表不可用: {}", e)))?;

        let name = format!("postgres://{}:{}/{}", config.host, config.port, config.name);
        Ok(Self::from_pool(pool, name))
    }

    pub fn from_pool(pool: PgPool, name: String) -> Self {
        Self { pool, name }
    }

    /// 关闭连接池（进程退出时调用）
    pub async fn close(&self) {
        debug!("关闭数据库连接池...");
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn max_updated_among_live(&self) -> SyncResult<Option<Timestamp>> {
        Ok(CandidateRecord::max_updated_live(&self.pool).await?)
    }

    async fn max_updated_among_deleted(&self) -> SyncResult<Option<Timestamp>> {
        Ok(CandidateRecord::max_updated_deleted(&self.pool).await?)
    }

    async fn list_all(&self) -> SyncResult<Vec<CandidateRecord>> {
        Ok(CandidateRecord::load_live(&self.pool).await?)
    }

    async fn begin(&self) -> SyncResult<Box<dyn RecordUnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 基于单个事务的写入单元
struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RecordUnitOfWork for PgUnitOfWork {
    async fn upsert_at(
        &mut self,
        position: usize,
        fields: &RowFields,
        ts: Timestamp,
    ) -> SyncResult<()> {
        let updated = CandidateRecord::update_at_position(&mut *self.tx, position, fields, ts).await?;
        if updated == 0 {
            let id = CandidateRecord::insert(&mut *self.tx, fields, ts).await?;
            debug!("位置 {} 无记录，已插入 id={}", position, id);
        }
        Ok(())
    }

    async fn insert(&mut self, fields: &RowFields, ts: Timestamp) -> SyncResult<i64> {
        Ok(CandidateRecord::insert(&mut *self.tx, fields, ts).await?)
    }

    async fn delete_by_id(&mut self, id: i64) -> SyncResult<()> {
        let deleted = CandidateRecord::soft_delete(&mut *self.tx, id).await?;
        if deleted == 0 {
            debug!("记录 id={} 已不存在，跳过删除", id);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> SyncResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> SyncResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
