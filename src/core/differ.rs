use crate::db::RowFields;

/// 编辑动作，位置从 1 开始
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOp {
    /// 覆盖重叠区间内内容不同的行
    Update { position: usize, fields: RowFields },
    /// 源比目标多出的尾部行
    Insert { position: usize, fields: RowFields },
    /// 目标比源多出的尾部行
    Delete { position: usize },
}

impl EditOp {
    pub fn position(&self) -> usize {
        match self {
            EditOp::Update { position, .. }
            | EditOp::Insert { position, .. }
            | EditOp::Delete { position } => *position,
        }
    }
}

/// 编辑脚本：先 Update，再 Insert 或 Delete（二者互斥）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditScript {
    pub ops: Vec<EditOp>,
}

impl EditScript {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn updates(&self) -> impl Iterator<Item = (usize, &RowFields)> {
        self.ops.iter().filter_map(|op| match op {
            EditOp::Update { position, fields } => Some((*position, fields)),
            _ => None,
        })
    }

    pub fn inserts(&self) -> impl Iterator<Item = (usize, &RowFields)> {
        self.ops.iter().filter_map(|op| match op {
            EditOp::Insert { position, fields } => Some((*position, fields)),
            _ => None,
        })
    }

    pub fn deletes(&self) -> impl Iterator<Item = usize> + '_ {
        self.ops.iter().filter_map(|op| match op {
            EditOp::Delete { position } => Some(*position),
            _ => None,
        })
    }

    /// 统计编辑动作
    pub fn summary(&self) -> EditSummary {
        let mut summary = EditSummary::default();
        for op in &self.ops {
            match op {
                EditOp::Update { .. } => summary.update_count += 1,
                EditOp::Insert { .. } => summary.insert_count += 1,
                EditOp::Delete { .. } => summary.delete_count += 1,
            }
        }
        summary
    }
}

/// 动作统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditSummary {
    pub update_count: usize,
    pub insert_count: usize,
    pub delete_count: usize,
}

impl EditSummary {
    pub fn total(&self) -> usize {
        self.update_count + self.insert_count + self.delete_count
    }
}

/// 按位置对齐两个行序列，计算把 target 变成 source 所需的编辑脚本
///
/// 第 i 行只和第 i 行比较，不做基于内容的匹配；字段按字符串精确比较。
pub fn diff(source: &[RowFields], target: &[RowFields]) -> EditScript {
    let mut ops = Vec::new();

    for (index, (src, dst)) in source.iter().zip(target.iter()).enumerate() {
        if src != dst {
            ops.push(EditOp::Update {
                position: index + 1,
                fields: src.clone(),
            });
        }
    }

    if source.len() > target.len() {
        for (index, src) in source.iter().enumerate().skip(target.len()) {
            ops.push(EditOp::Insert {
                position: index + 1,
                fields: src.clone(),
            });
        }
    } else {
        for index in source.len()..target.len() {
            ops.push(EditOp::Delete { position: index + 1 });
        }
    }

    EditScript { ops }
}

/// 去掉尾部的全空行
///
/// Sheets 读取时不返回尾部空行，两侧都按去尾后的序列比较，
/// 否则数据库里的尾部空记录会在下个周期被当成表格删除。
pub fn trim_blank_tail(rows: &[RowFields]) -> &[RowFields] {
    let len = rows
        .iter()
        .rposition(|row| !row.is_blank())
        .map_or(0, |last| last + 1);
    &rows[..len]
}
