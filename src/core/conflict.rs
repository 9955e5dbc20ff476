use crate::core::detector::ChangeKind;
use crate::core::state::Direction;
use crate::error::SyncError;
use std::str::FromStr;

/// 冲突解决策略：双方在同一周期都有修改时保留哪一侧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    SheetWins,
    DatabaseWins,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::SheetWins => write!(f, "sheet"),
            ConflictPolicy::DatabaseWins => write!(f, "database"),
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sheet" => Ok(ConflictPolicy::SheetWins),
            "database" | "db" => Ok(ConflictPolicy::DatabaseWins),
            other => Err(SyncError::Config(format!(
                "无效的冲突策略: {} (可选 sheet 或 database)",
                other
            ))),
        }
    }
}

impl ConflictPolicy {
    /// 根据分类选择传播方向，NoChange 返回 None
    pub fn direction(&self, kind: ChangeKind) -> Option<Direction> {
        match kind {
            ChangeKind::NoChange => None,
            ChangeKind::SheetChanged => Some(Direction::SheetToDb),
            ChangeKind::DbChanged => Some(Direction::DbToSheet),
            ChangeKind::BothChanged => Some(match self {
                ConflictPolicy::SheetWins => Direction::SheetToDb,
                ConflictPolicy::DatabaseWins => Direction::DbToSheet,
            }),
        }
    }

    /// 有未完成的写入时优先沿原方向继续
    pub fn resolve(&self, kind: ChangeKind, resume: Option<Direction>) -> Option<Direction> {
        match (kind, resume) {
            (ChangeKind::NoChange, _) => None,
            (_, Some(direction)) => Some(direction),
            (kind, None) => self.direction(kind),
        }
    }
}
