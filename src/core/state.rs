//! 同步状态 - 上一周期观察到的水位线

use crate::db::Timestamp;
use std::fmt;

/// 单侧水位线
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    /// 启动后尚未同步过，任何观察值都视为已变化
    NeverSynced,
    /// 已观察到的值；数据库为空时为 None
    Seen(Option<Timestamp>),
}

impl Watermark {
    /// 当前观察值相对本水位线是否发生变化
    pub fn changed(&self, current: Option<Timestamp>) -> bool {
        match self {
            Watermark::NeverSynced => true,
            Watermark::Seen(last) => *last != current,
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::NeverSynced => write!(f, "never"),
            Watermark::Seen(None) => write!(f, "empty"),
            Watermark::Seen(Some(ts)) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

/// 传播方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// 表格 -> 数据库
    SheetToDb,
    /// 数据库 -> 表格
    DbToSheet,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::SheetToDb => write!(f, "sheet->db"),
            Direction::DbToSheet => write!(f, "db->sheet"),
        }
    }
}

/// 一次观察得到的两侧水位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub sheet: Timestamp,
    pub db: Option<Timestamp>,
}

/// 周期之间传递的同步状态，不做持久化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncState {
    pub last_sheet_update: Watermark,
    pub last_db_update: Watermark,
    /// 上次部分写入的方向，下个周期按此方向继续
    pub resume: Option<Direction>,
}

impl SyncState {
    /// 进程启动时的初始状态
    pub fn never_synced() -> Self {
        Self {
            last_sheet_update: Watermark::NeverSynced,
            last_db_update: Watermark::NeverSynced,
            resume: None,
        }
    }

    /// 周期完整成功后推进到本次观察值
    pub fn advanced(observation: &Observation) -> Self {
        Self {
            last_sheet_update: Watermark::Seen(Some(observation.sheet)),
            last_db_update: Watermark::Seen(observation.db),
            resume: None,
        }
    }

    /// 写入失败时保留水位线，只记下需要续做的方向
    pub fn with_resume(self, direction: Direction) -> Self {
        Self {
            resume: Some(direction),
            ..self
        }
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::never_synced()
    }
}
