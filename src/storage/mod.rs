pub mod auth;
pub mod postgres;
pub mod sheets;

use crate::db::{CandidateRecord, RowFields, Timestamp};
use crate::error::SyncResult;
use async_trait::async_trait;

pub use auth::{ServiceAccountKey, TokenProvider};
pub use postgres::PgRecordStore;
pub use sheets::GoogleSheetStore;

// ============ 公共常量 ============

/// HTTP 请求超时（秒）
pub const HTTP_TIMEOUT_SECS: u64 = 60;

/// 数据库一侧的存储接口
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 未删除记录中最大的修改时间
    async fn max_updated_among_live(&self) -> SyncResult<Option<Timestamp>>;

    /// 软删除记录中最大的修改时间
    async fn max_updated_among_deleted(&self) -> SyncResult<Option<Timestamp>>;

    /// 按位置顺序列出所有未删除记录
    async fn list_all(&self) -> SyncResult<Vec<CandidateRecord>>;

    /// 开启一个写入单元，提交前所有写入都不可见
    async fn begin(&self) -> SyncResult<Box<dyn RecordUnitOfWork>>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 数据库写入单元，整体提交或整体回滚
#[async_trait]
pub trait RecordUnitOfWork: Send {
    /// 覆盖第 position 条记录（1 起始），不存在时插入
    async fn upsert_at(
        &mut self,
        position: usize,
        fields: &RowFields,
        ts: Timestamp,
    ) -> SyncResult<()>;

    /// 插入新记录，返回新 id
    async fn insert(&mut self, fields: &RowFields, ts: Timestamp) -> SyncResult<i64>;

    /// 按 id 删除记录
    async fn delete_by_id(&mut self, id: i64) -> SyncResult<()>;

    async fn commit(self: Box<Self>) -> SyncResult<()>;

    async fn rollback(self: Box<Self>) -> SyncResult<()>;
}

/// 表格一侧的存储接口，行号相对表头从 1 开始
#[async_trait]
pub trait SheetStore: Send + Sync {
    /// 文档级最后修改时间
    async fn last_modified(&self) -> SyncResult<Timestamp>;

    /// 读取表头以下的所有数据行
    async fn read_data_rows(&self) -> SyncResult<Vec<RowFields>>;

    /// 从 start_row 起逐行覆盖
    async fn bulk_update_range(&self, start_row: usize, rows: &[RowFields]) -> SyncResult<()>;

    /// 在 position 处插入行，原有行下移
    async fn insert_rows_at(&self, position: usize, rows: &[RowFields]) -> SyncResult<()>;

    /// 从 position 起删除 count 行
    async fn delete_rows_at(&self, position: usize, count: usize) -> SyncResult<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}
