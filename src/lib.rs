use std::sync::Arc;

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod logging;
pub mod storage;

#[cfg(test)]
mod testing;

pub use config::{AppConfig, DatabaseConfig};
pub use core::{ConflictPolicy, LoopExit, SyncConfig, SyncEngine, SyncState};
pub use error::{SyncError, SyncResult};

use storage::{sheets, GoogleSheetStore, PgRecordStore, ServiceAccountKey, TokenProvider};

/// 应用运行所需的资源，启动时创建一次
pub struct AppState {
    pub config: AppConfig,
    pub records: Arc<PgRecordStore>,
    pub sheet: Arc<GoogleSheetStore>,
}

impl AppState {
    /// 打开两侧存储，任何一侧不可用都视为配置错误
    pub async fn new(config: AppConfig) -> SyncResult<Self> {
        let key = ServiceAccountKey::load(&config.service_account_file)?;
        let client = sheets::http_client()?;
        let auth = TokenProvider::new(client.clone(), key)?;
        tracing::debug!("使用服务账号: {}", auth.client_email());

        let sheet = GoogleSheetStore::open(client, auth, &config.sheet)
            .await
            .map_err(|e| match e {
                SyncError::Config(_) => e,
                other => SyncError::Config(format!("无法打开表格 {}: {}", config.sheet, other)),
            })?;
        let records = PgRecordStore::connect(&config.database).await?;

        Ok(Self {
            config,
            records: Arc::new(records),
            sheet: Arc::new(sheet),
        })
    }

    pub fn engine(&self) -> SyncEngine {
        SyncEngine::with_config(
            self.records.clone(),
            self.sheet.clone(),
            SyncConfig {
                poll_interval: self.config.poll_interval,
                conflict_policy: self.config.conflict_policy,
            },
        )
    }

    /// 清理资源（进程退出前调用）
    pub async fn cleanup(&self) {
        tracing::info!("正在清理应用资源...");
        self.records.close().await;
        tracing::info!("资源清理完成");
    }
}
