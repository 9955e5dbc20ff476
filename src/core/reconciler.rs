//! 协调器 - 把编辑脚本写入过期的一侧

use crate::core::differ::{diff, trim_blank_tail, EditOp, EditScript, EditSummary};
use crate::core::state::{Direction, Observation};
use crate::db::{CandidateRecord, RowFields};
use crate::error::{SyncError, SyncResult};
use crate::storage::{RecordStore, SheetStore};
use tracing::{debug, info, warn};

/// 一次协调的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    pub direction: Direction,
    pub summary: EditSummary,
    /// 实际发出的写调用次数
    pub writes: usize,
}

pub struct Reconciler<'a> {
    records: &'a dyn RecordStore,
    sheet: &'a dyn SheetStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(records: &'a dyn RecordStore, sheet: &'a dyn SheetStore) -> Self {
        Self { records, sheet }
    }

    /// 读取两侧快照，按方向计算并应用编辑脚本
    pub async fn reconcile(
        &self,
        direction: Direction,
        observation: &Observation,
    ) -> SyncResult<ApplyReport> {
        let sheet_rows = self
            .sheet
            .read_data_rows()
            .await
            .map_err(|e| e.context("读取表格数据"))?;
        let records = self
            .records
            .list_all()
            .await
            .map_err(|e| e.context("读取数据库记录"))?;
        let db_rows: Vec<RowFields> = records.iter().map(|r| r.fields.clone()).collect();
        // 尾部空行在表格侧读不回来，两侧都不参与比较
        let sheet_rows = trim_blank_tail(&sheet_rows);
        let db_rows = trim_blank_tail(&db_rows);

        let (script, writes) = match direction {
            Direction::SheetToDb => {
                let script = diff(sheet_rows, db_rows);
                log_script(direction, &script, sheet_rows.len(), db_rows.len());
                let writes = self.apply_to_db(&script, &records, observation).await?;
                (script, writes)
            }
            Direction::DbToSheet => {
                let script = diff(db_rows, sheet_rows);
                log_script(direction, &script, db_rows.len(), sheet_rows.len());
                let writes = self.apply_to_sheet(&script, db_rows).await?;
                (script, writes)
            }
        };

        let report = ApplyReport {
            direction,
            summary: script.summary(),
            writes,
        };
        if writes > 0 {
            info!(
                direction = %direction,
                updates = report.summary.update_count,
                inserts = report.summary.insert_count,
                deletes = report.summary.delete_count,
                "reconciliation applied"
            );
        }
        Ok(report)
    }

    /// 在一个写入单元中应用到数据库，任何失败都整体回滚
    async fn apply_to_db(
        &self,
        script: &EditScript,
        records: &[CandidateRecord],
        observation: &Observation,
    ) -> SyncResult<usize> {
        if script.is_empty() {
            return Ok(0);
        }

        // 新写入的记录使用表格的修改时间
        let ts = observation.sheet;
        let mut uow = self.records.begin().await?;
        let mut writes = 0usize;

        for op in &script.ops {
            let result = match op {
                EditOp::Update { position, fields } => uow.upsert_at(*position, fields, ts).await,
                EditOp::Insert { fields, .. } => uow.insert(fields, ts).await.map(|id| {
                    debug!("新增记录 id={}", id);
                }),
                EditOp::Delete { position } => match records.get(position - 1) {
                    Some(record) => uow.delete_by_id(record.id).await,
                    None => Err(SyncError::Fatal(format!("删除位置 {} 超出快照范围", position))),
                },
            };

            if let Err(e) = result {
                warn!("数据库写入失败，回滚本周期的 {} 次写入: {}", writes, e);
                if let Err(rollback_err) = uow.rollback().await {
                    warn!("回滚失败: {}", rollback_err);
                }
                return Err(e.context("写入数据库"));
            }
            writes += 1;
        }

        uow.commit().await.map_err(|e| e.context("提交数据库事务"))?;
        Ok(writes)
    }

    /// 应用到表格：先整体覆盖更新区间，再插入或删除尾部
    ///
    /// 表格没有跨调用事务，中途失败返回 `PartialApply`。
    async fn apply_to_sheet(&self, script: &EditScript, source: &[RowFields]) -> SyncResult<usize> {
        let plan = SheetPlan::from_script(script, source);
        let total = plan.calls();
        let mut applied = 0usize;

        if let Some((start, rows)) = &plan.update {
            self.sheet
                .bulk_update_range(*start, rows)
                .await
                .map_err(|e| partial(e, applied, total))?;
            applied += 1;
        }

        if let Some((position, rows)) = &plan.insert {
            self.sheet
                .insert_rows_at(*position, rows)
                .await
                .map_err(|e| partial(e, applied, total))?;
            applied += 1;
        }

        if let Some((position, count)) = plan.delete {
            self.sheet
                .delete_rows_at(position, count)
                .await
                .map_err(|e| partial(e, applied, total))?;
            applied += 1;
        }

        Ok(applied)
    }
}

/// 表格写入计划，每一项对应一次 API 调用
#[derive(Debug, Default, PartialEq, Eq)]
struct SheetPlan {
    update: Option<(usize, Vec<RowFields>)>,
    insert: Option<(usize, Vec<RowFields>)>,
    delete: Option<(usize, usize)>,
}

impl SheetPlan {
    fn from_script(script: &EditScript, source: &[RowFields]) -> Self {
        let mut plan = SheetPlan::default();

        // 覆盖从第一个到最后一个更新位置的整段，中间未变化的行原样写回
        let positions: Vec<usize> = script.updates().map(|(p, _)| p).collect();
        if let (Some(&first), Some(&last)) = (positions.first(), positions.last()) {
            plan.update = Some((first, source[first - 1..last].to_vec()));
        }

        let inserts: Vec<(usize, &RowFields)> = script.inserts().collect();
        if let Some(&(position, _)) = inserts.first() {
            plan.insert = Some((position, inserts.iter().map(|(_, f)| (*f).clone()).collect()));
        }

        let deletes: Vec<usize> = script.deletes().collect();
        if let Some(&position) = deletes.first() {
            plan.delete = Some((position, deletes.len()));
        }

        plan
    }

    fn calls(&self) -> usize {
        [
            self.update.is_some(),
            self.insert.is_some(),
            self.delete.is_some(),
        ]
        .iter()
        .filter(|x| **x)
        .count()
    }
}

/// 已有写入生效后的任何失败都归为部分写入，由下个周期沿原方向续做
fn partial(err: SyncError, applied: usize, total: usize) -> SyncError {
    if applied == 0 {
        return err.context("写入表格");
    }
    warn!("表格写入中途失败，已完成 {}/{} 次调用: {}", applied, total, err);
    SyncError::PartialApply {
        applied,
        total,
        reason: err.to_string(),
    }
}

fn log_script(direction: Direction, script: &EditScript, source_len: usize, target_len: usize) {
    let summary = script.summary();
    info!(
        direction = %direction,
        source_rows = source_len,
        target_rows = target_len,
        ops = script.len(),
        updates = summary.update_count,
        inserts = summary.insert_count,
        deletes = summary.delete_count,
        "edit script size"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ts, Fault, MemoryRecordStore, MemorySheetStore};

    fn ab() -> RowFields {
        RowFields::new("A", "B", "a@x", "1")
    }

    fn cd() -> RowFields {
        RowFields::new("C", "D", "c@x", "2")
    }

    fn ef() -> RowFields {
        RowFields::new("E", "F", "e@x", "3")
    }

    fn observation() -> Observation {
        Observation {
            sheet: ts(20),
            db: Some(ts(10)),
        }
    }

    #[tokio::test]
    async fn test_sheet_to_db_converges() {
        let records = MemoryRecordStore::with_rows(&[ab(), ab(), cd()], ts(10));
        let sheet = MemorySheetStore::new(vec![cd(), ab()], ts(20));

        let report = Reconciler::new(&records, &sheet)
            .reconcile(Direction::SheetToDb, &observation())
            .await
            .unwrap();

        assert_eq!(records.live_fields(), vec![cd(), ab()]);
        assert_eq!(report.summary.update_count, 1);
        assert_eq!(report.summary.delete_count, 1);
        assert_eq!(sheet.write_count(), 0);
        assert_eq!(records.commits(), 1);
    }

    #[tokio::test]
    async fn test_sheet_insert_uses_sheet_timestamp() {
        let records = MemoryRecordStore::with_rows(&[ab()], ts(10));
        let sheet = MemorySheetStore::new(vec![ab(), cd()], ts(20));

        Reconciler::new(&records, &sheet)
            .reconcile(Direction::SheetToDb, &observation())
            .await
            .unwrap();

        let all = records.snapshot();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].fields, cd());
        assert_eq!(all[1].last_updated, ts(20));
        assert!(all[1].id > all[0].id);
    }

    #[tokio::test]
    async fn test_db_to_sheet_converges() {
        let records = MemoryRecordStore::with_rows(&[ab(), cd(), ef()], ts(10));
        let sheet = MemorySheetStore::new(vec![cd(), cd()], ts(20));

        let report = Reconciler::new(&records, &sheet)
            .reconcile(Direction::DbToSheet, &observation())
            .await
            .unwrap();

        assert_eq!(sheet.rows(), vec![ab(), cd(), ef()]);
        assert_eq!(report.writes, 2);
        assert_eq!(records.commits(), 0);
    }

    #[tokio::test]
    async fn test_db_to_sheet_deletes_tail() {
        let records = MemoryRecordStore::with_rows(&[ab()], ts(10));
        let sheet = MemorySheetStore::new(vec![ab(), cd(), ef()], ts(20));

        Reconciler::new(&records, &sheet)
            .reconcile(Direction::DbToSheet, &observation())
            .await
            .unwrap();

        assert_eq!(sheet.rows(), vec![ab()]);
        assert_eq!(sheet.write_count(), 1);
    }

    #[tokio::test]
    async fn test_db_failure_rolls_back_everything() {
        let records = MemoryRecordStore::with_rows(&[ab(), ab()], ts(10));
        let sheet = MemorySheetStore::new(vec![cd(), cd(), ef()], ts(20));
        records.fail_writes_after(1);

        let err = Reconciler::new(&records, &sheet)
            .reconcile(Direction::SheetToDb, &observation())
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(records.live_fields(), vec![ab(), ab()]);
        assert_eq!(records.commits(), 0);
        assert_eq!(records.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_sheet_partial_failure() {
        let records = MemoryRecordStore::with_rows(&[ab(), cd(), ef()], ts(10));
        let sheet = MemorySheetStore::new(vec![cd()], ts(20));
        sheet.fail_writes_after(1);

        let err = Reconciler::new(&records, &sheet)
            .reconcile(Direction::DbToSheet, &observation())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::PartialApply {
                applied: 1,
                total: 2,
                ..
            }
        ));
        assert_eq!(sheet.rows(), vec![ab()]);

        // 重新计算差异只剩下尾部插入
        sheet.fail_writes_after(usize::MAX);
        let report = Reconciler::new(&records, &sheet)
            .reconcile(Direction::DbToSheet, &observation())
            .await
            .unwrap();
        assert_eq!(report.summary.update_count, 0);
        assert_eq!(report.summary.insert_count, 2);
        assert_eq!(sheet.rows(), vec![ab(), cd(), ef()]);
    }

    #[tokio::test]
    async fn test_rejected_second_sheet_call_is_partial() {
        let records = MemoryRecordStore::with_rows(&[ab(), cd()], ts(10));
        let sheet = MemorySheetStore::new(vec![ef()], ts(20));
        // 插入被服务端拒绝（如 HTTP 400），此时更新已经生效
        sheet.fail_writes_after_with(1, Fault::Fatal);

        let err = Reconciler::new(&records, &sheet)
            .reconcile(Direction::DbToSheet, &observation())
            .await
            .unwrap_err();

        match err {
            SyncError::PartialApply {
                applied,
                total,
                reason,
            } => {
                assert_eq!((applied, total), (1, 2));
                assert!(reason.contains("sheet broken"));
            }
            other => panic!("expected PartialApply, got {:?}", other),
        }
        assert_eq!(sheet.rows(), vec![ab()]);
    }

    #[tokio::test]
    async fn test_blank_db_tail_is_not_written_or_deleted() {
        let records = MemoryRecordStore::with_rows(&[ab(), RowFields::default()], ts(10));
        let sheet = MemorySheetStore::new(vec![ab()], ts(20));
        sheet.trim_blank_tail(true);
        let reconciler = Reconciler::new(&records, &sheet);

        let report = reconciler
            .reconcile(Direction::DbToSheet, &observation())
            .await
            .unwrap();
        assert_eq!(report.writes, 0);

        let report = reconciler
            .reconcile(Direction::SheetToDb, &observation())
            .await
            .unwrap();
        assert_eq!(report.summary.delete_count, 0);
        assert_eq!(records.live_fields(), vec![ab(), RowFields::default()]);
    }

    #[tokio::test]
    async fn test_first_sheet_write_failure_is_not_partial() {
        let records = MemoryRecordStore::with_rows(&[ab()], ts(10));
        let sheet = MemorySheetStore::new(vec![cd()], ts(20));
        sheet.fail_writes_after(0);

        let err = Reconciler::new(&records, &sheet)
            .reconcile(Direction::DbToSheet, &observation())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_identical_sides_write_nothing() {
        let records = MemoryRecordStore::with_rows(&[ab(), cd()], ts(10));
        let sheet = MemorySheetStore::new(vec![ab(), cd()], ts(20));
        let reconciler = Reconciler::new(&records, &sheet);

        for direction in [Direction::SheetToDb, Direction::DbToSheet] {
            let report = reconciler.reconcile(direction, &observation()).await.unwrap();
            assert_eq!(report.writes, 0);
        }
        assert_eq!(sheet.write_count(), 0);
        assert_eq!(records.write_count(), 0);
        assert_eq!(records.commits(), 0);
    }

    #[test]
    fn test_sheet_plan_covers_update_span() {
        let source = vec![cd(), ab(), ef()];
        let target = vec![ab(), ab(), ab()];
        let plan = SheetPlan::from_script(&diff(&source, &target), &source);

        assert_eq!(plan.update, Some((1, vec![cd(), ab(), ef()])));
        assert_eq!(plan.insert, None);
        assert_eq!(plan.delete, None);
        assert_eq!(plan.calls(), 1);
    }
}
