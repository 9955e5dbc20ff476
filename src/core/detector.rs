//! 变更检测 - 比较两侧当前水位与上一周期状态

use crate::core::state::{Observation, SyncState};
use crate::db::Timestamp;
use crate::error::SyncResult;
use crate::storage::{RecordStore, SheetStore};
use std::fmt;
use tracing::debug;

/// 周期分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    NoChange,
    SheetChanged,
    DbChanged,
    BothChanged,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::NoChange => write!(f, "no_change"),
            ChangeKind::SheetChanged => write!(f, "sheet_changed"),
            ChangeKind::DbChanged => write!(f, "db_changed"),
            ChangeKind::BothChanged => write!(f, "both_changed"),
        }
    }
}

pub struct ChangeDetector;

impl ChangeDetector {
    /// 纯分类，不触碰任何存储
    pub fn classify(observation: &Observation, state: &SyncState) -> ChangeKind {
        let sheet_changed = state.last_sheet_update.changed(Some(observation.sheet));
        let db_changed = state.last_db_update.changed(observation.db);

        match (sheet_changed, db_changed) {
            (false, false) => ChangeKind::NoChange,
            (true, false) => ChangeKind::SheetChanged,
            (false, true) => ChangeKind::DbChanged,
            (true, true) => ChangeKind::BothChanged,
        }
    }

    /// 读取两侧当前水位
    ///
    /// 数据库水位取未删除与软删除记录的最大值，否则只有删除的变更无法被发现。
    pub async fn observe(
        records: &dyn RecordStore,
        sheet: &dyn SheetStore,
    ) -> SyncResult<Observation> {
        let sheet_ts = sheet
            .last_modified()
            .await
            .map_err(|e| e.context("读取表格修改时间"))?;
        let live = records
            .max_updated_among_live()
            .await
            .map_err(|e| e.context("读取数据库水位"))?;
        let deleted = records
            .max_updated_among_deleted()
            .await
            .map_err(|e| e.context("读取数据库删除水位"))?;

        let db_ts = max_timestamp(live, deleted);
        debug!(
            sheet = %sheet_ts.to_rfc3339(),
            live = ?live,
            deleted = ?deleted,
            "观察到水位"
        );

        Ok(Observation {
            sheet: sheet_ts,
            db: db_ts,
        })
    }
}

fn max_timestamp(a: Option<Timestamp>, b: Option<Timestamp>) -> Option<Timestamp> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
