pub mod models;
pub use models::*;

use crate::config::DatabaseConfig;
use anyhow::Result;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
pub use sqlx::PgPool;
use std::time::Duration;

const SELECT_COLUMNS: &str = "id, first_name, last_name, email, phone, last_updated";

/// 建立连接池
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.name);

    // 同步循环是单任务顺序执行，不需要太多连接
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect_with(options)
        .await?;

    Ok(pool)
}

impl CandidateRecord {
    /// 未删除记录中最大的 last_updated
    pub async fn max_updated_live<'e, E>(executor: E) -> sqlx::Result<Option<Timestamp>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_scalar("SELECT MAX(last_updated) FROM candidates WHERE NOT deleted")
            .fetch_one(executor)
            .await
    }

    /// 软删除记录中最大的 last_updated
    pub async fn max_updated_deleted<'e, E>(executor: E) -> sqlx::Result<Option<Timestamp>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_scalar("SELECT MAX(last_updated) FROM candidates WHERE deleted")
            .fetch_one(executor)
            .await
    }

    /// 按 id 顺序加载所有未删除记录
    pub async fn load_live<'e, E>(executor: E) -> sqlx::Result<Vec<CandidateRecord>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let rows = sqlx::query_as::<_, CandidateRow>(&format!(
            "SELECT {} FROM candidates WHERE NOT deleted ORDER BY id",
            SELECT_COLUMNS
        ))
        .fetch_all(executor)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// 更新第 position 条（1 起始）未删除记录，返回受影响行数
    pub async fn update_at_position<'e, E>(
        executor: E,
        position: usize,
        fields: &RowFields,
        ts: Timestamp,
    ) -> sqlx::Result<u64>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let offset = position.saturating_sub(1) as i64;
        let result = sqlx::query(
            r#"
            UPDATE candidates SET
                first_name = $1,
                last_name = $2,
                email = $3,
                phone = $4,
                last_updated = $5
            WHERE id = (
                SELECT id FROM candidates WHERE NOT deleted ORDER BY id OFFSET $6 LIMIT 1
            )
            "#,
        )
        .bind(&fields.first)
        .bind(&fields.last)
        .bind(&fields.email)
        .bind(&fields.phone)
        .bind(ts)
        .bind(offset)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// 插入新记录，返回分配的 id
    pub async fn insert<'e, E>(executor: E, fields: &RowFields, ts: Timestamp) -> sqlx::Result<i64>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_scalar(
            r#"
            INSERT INTO candidates (first_name, last_name, email, phone, last_updated, deleted)
            VALUES ($1, $2, $3, $4, $5, FALSE)
            RETURNING id
            "#,
        )
        .bind(&fields.first)
        .bind(&fields.last)
        .bind(&fields.email)
        .bind(&fields.phone)
        .bind(ts)
        .fetch_one(executor)
        .await
    }

    /// 软删除：保留行并推进 last_updated，使删除能被水位线检测到
    pub async fn soft_delete<'e, E>(executor: E, id: i64) -> sqlx::Result<u64>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE candidates SET deleted = TRUE, last_updated = NOW() WHERE id = $1 AND NOT deleted",
        )
        .bind(id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }
}
