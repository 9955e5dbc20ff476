use chrono::{DateTime, Utc};

/// 时间戳类型
pub type Timestamp = DateTime<Utc>;

/// 一行的可同步字段（表格与数据库共享的投影）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RowFields {
    pub first: String,
    pub last: String,
    pub email: String,
    pub phone: String,
}

impl RowFields {
    pub fn new(
        first: impl Into<String>,
        last: impl Into<String>,
        email: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            first: first.into(),
            last: last.into(),
            email: email.into(),
            phone: phone.into(),
        }
    }

    /// 从表格单元格构造，缺失的单元格视为空字符串
    pub fn from_cells(cells: &[String]) -> Self {
        let cell = |i: usize| cells.get(i).cloned().unwrap_or_default();
        Self {
            first: cell(0),
            last: cell(1),
            email: cell(2),
            phone: cell(3),
        }
    }

    /// 四个字段都为空
    pub fn is_blank(&self) -> bool {
        self.first.is_empty() && self.last.is_empty() && self.email.is_empty() && self.phone.is_empty()
    }

    /// 按列顺序输出单元格
    pub fn to_cells(&self) -> Vec<String> {
        vec![
            self.first.clone(),
            self.last.clone(),
            self.email.clone(),
            self.phone.clone(),
        ]
    }
}

/// 候选人记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub id: i64,
    pub fields: RowFields,
    pub last_updated: Timestamp,
}

// 数据库表模型
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CandidateRow {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub last_updated: Timestamp,
}

impl From<CandidateRow> for CandidateRecord {
    fn from(row: CandidateRow) -> Self {
        CandidateRecord {
            id: row.id,
            fields: RowFields {
                first: row.first_name.unwrap_or_default(),
                last: row.last_name.unwrap_or_default(),
                email: row.email.unwrap_or_default(),
                phone: row.phone.unwrap_or_default(),
            },
            last_updated: row.last_updated,
        }
    }
}
