//! 应用配置模块
//!
//! 所有配置都来自环境变量（启动时通过 dotenvy 加载 `.env`），启动后只读。

use crate::core::ConflictPolicy;
use crate::error::{SyncError, SyncResult};
use std::path::PathBuf;
use std::time::Duration;

/// 数据库连接参数
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

/// 应用配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 表格名称（按标题查找）
    pub sheet: String,
    pub database: DatabaseConfig,
    /// 同步间隔
    pub poll_interval: Duration,
    /// 双方同时修改时的冲突策略
    pub conflict_policy: ConflictPolicy,
    /// 服务账号密钥文件
    pub service_account_file: PathBuf,
}

fn default_db_port() -> u16 {
    5432
}

fn default_service_account_file() -> PathBuf {
    PathBuf::from("service_account.json")
}

impl AppConfig {
    /// 从进程环境变量加载
    pub fn from_env() -> SyncResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源加载
    pub fn from_lookup<F>(lookup: F) -> SyncResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| SyncError::Config(format!("缺少环境变量 {}", key)))
        };

        let port = match get("DB_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| SyncError::Config(format!("DB_PORT 无效: {}", raw)))?,
            None => default_db_port(),
        };

        let database = DatabaseConfig {
            host: get("DB_HOST").unwrap_or_else(|| "localhost".to_string()),
            port,
            user: require("DB_USER")?,
            password: get("DB_PASS").unwrap_or_default(),
            name: require("DB_NAME")?,
        };

        let interval_raw = require("UPDATE_INTERVAL")?;
        let interval_secs = interval_raw
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| {
                SyncError::Config(format!("UPDATE_INTERVAL 必须是正整数秒: {}", interval_raw))
            })?;

        // 未设置时默认数据库优先；设置了但无法识别则拒绝启动
        let conflict_policy = match get("CONFLICT_POLICY") {
            Some(raw) => raw.parse::<ConflictPolicy>()?,
            None => ConflictPolicy::DatabaseWins,
        };

        Ok(Self {
            sheet: require("SHEET")?,
            database,
            poll_interval: Duration::from_secs(interval_secs),
            conflict_policy,
            service_account_file: get("SERVICE_ACCOUNT_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(default_service_account_file),
        })
    }
}
