//! 测试用的内存存储，带写入计数与故障注入

use crate::db::{CandidateRecord, RowFields, Timestamp};
use crate::error::{SyncError, SyncResult};
use crate::storage::{RecordStore, RecordUnitOfWork, SheetStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration};
use std::sync::{Arc, Mutex};

pub fn ts(secs: i64) -> Timestamp {
    DateTime::from_timestamp(secs, 0).unwrap()
}

/// 注入的故障类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transient,
    Fatal,
}

impl Fault {
    fn error(self, what: &str) -> SyncError {
        match self {
            Fault::Transient => SyncError::Connectivity(format!("{} unreachable", what)),
            Fault::Fatal => SyncError::Fatal(format!("{} broken", what)),
        }
    }
}

/// 剩余允许的写入次数，None 表示不限；用完后按 fault 失败
fn take_write_budget(budget: &mut Option<usize>, fault: Fault, what: &str) -> SyncResult<()> {
    match budget {
        Some(0) => Err(fault.error(what)),
        Some(n) => {
            *n -= 1;
            Ok(())
        }
        None => Ok(()),
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    record: CandidateRecord,
    deleted: bool,
}

#[derive(Debug, Default)]
struct RecordInner {
    rows: Vec<StoredRecord>,
    next_id: i64,
    writes: usize,
    commits: usize,
    rollbacks: usize,
    write_budget: Option<usize>,
    read_fault: Option<Fault>,
}

#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<Mutex<RecordInner>>,
}

impl MemoryRecordStore {
    pub fn with_rows(rows: &[RowFields], last_updated: Timestamp) -> Self {
        let store = Self::default();
        {
            let mut inner = store.inner.lock().unwrap();
            inner.next_id = 1;
            for fields in rows {
                let id = inner.next_id;
                inner.next_id += 1;
                inner.rows.push(StoredRecord {
                    record: CandidateRecord {
                        id,
                        fields: fields.clone(),
                        last_updated,
                    },
                    deleted: false,
                });
            }
        }
        store
    }

    /// 未删除的记录
    pub fn snapshot(&self) -> Vec<CandidateRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .rows
            .iter()
            .filter(|r| !r.deleted)
            .map(|r| r.record.clone())
            .collect()
    }

    pub fn live_fields(&self) -> Vec<RowFields> {
        self.snapshot().into_iter().map(|r| r.fields).collect()
    }

    /// 模拟用户在数据库侧编辑第 position 条记录
    pub fn edit(&self, position: usize, fields: RowFields, at: Timestamp) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(stored) = inner.rows.iter_mut().filter(|r| !r.deleted).nth(position - 1) {
            stored.record.fields = fields;
            stored.record.last_updated = at;
        }
    }

    /// 模拟用户软删除最后一条记录
    pub fn soft_delete_last(&self, at: Timestamp) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(stored) = inner.rows.iter_mut().rev().find(|r| !r.deleted) {
            stored.deleted = true;
            stored.record.last_updated = at;
        }
    }

    pub fn fail_writes_after(&self, writes: usize) {
        self.inner.lock().unwrap().write_budget = (writes != usize::MAX).then_some(writes);
    }

    pub fn set_read_fault(&self, fault: Option<Fault>) {
        self.inner.lock().unwrap().read_fault = fault;
    }

    pub fn write_count(&self) -> usize {
        self.inner.lock().unwrap().writes
    }

    pub fn commits(&self) -> usize {
        self.inner.lock().unwrap().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.inner.lock().unwrap().rollbacks
    }

    fn check_read(&self) -> SyncResult<()> {
        match self.inner.lock().unwrap().read_fault {
            Some(fault) => Err(fault.error("database")),
            None => Ok(()),
        }
    }

    fn max_updated(&self, deleted: bool) -> Option<Timestamp> {
        let inner = self.inner.lock().unwrap();
        inner
            .rows
            .iter()
            .filter(|r| r.deleted == deleted)
            .map(|r| r.record.last_updated)
            .max()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn max_updated_among_live(&self) -> SyncResult<Option<Timestamp>> {
        self.check_read()?;
        Ok(self.max_updated(false))
    }

    async fn max_updated_among_deleted(&self) -> SyncResult<Option<Timestamp>> {
        self.check_read()?;
        Ok(self.max_updated(true))
    }

    async fn list_all(&self) -> SyncResult<Vec<CandidateRecord>> {
        self.check_read()?;
        Ok(self.snapshot())
    }

    async fn begin(&self) -> SyncResult<Box<dyn RecordUnitOfWork>> {
        self.check_read()?;
        let inner = self.inner.lock().unwrap();
        Ok(Box::new(MemoryUnitOfWork {
            store: self.inner.clone(),
            staged: inner.rows.clone(),
            next_id: inner.next_id,
            writes: 0,
        }))
    }

    fn name(&self) -> &str {
        "memory-db"
    }
}

/// 写入先暂存，提交时整体替换
struct MemoryUnitOfWork {
    store: Arc<Mutex<RecordInner>>,
    staged: Vec<StoredRecord>,
    next_id: i64,
    writes: usize,
}

impl MemoryUnitOfWork {
    fn charge(&mut self) -> SyncResult<()> {
        take_write_budget(
            &mut self.store.lock().unwrap().write_budget,
            Fault::Transient,
            "database",
        )?;
        self.writes += 1;
        Ok(())
    }

    fn push(&mut self, fields: &RowFields, ts: Timestamp) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.staged.push(StoredRecord {
            record: CandidateRecord {
                id,
                fields: fields.clone(),
                last_updated: ts,
            },
            deleted: false,
        });
        id
    }
}

#[async_trait]
impl RecordUnitOfWork for MemoryUnitOfWork {
    async fn upsert_at(
        &mut self,
        position: usize,
        fields: &RowFields,
        ts: Timestamp,
    ) -> SyncResult<()> {
        self.charge()?;
        match self.staged.iter_mut().filter(|r| !r.deleted).nth(position - 1) {
            Some(stored) => {
                stored.record.fields = fields.clone();
                stored.record.last_updated = ts;
            }
            None => {
                self.push(fields, ts);
            }
        }
        Ok(())
    }

    async fn insert(&mut self, fields: &RowFields, ts: Timestamp) -> SyncResult<i64> {
        self.charge()?;
        Ok(self.push(fields, ts))
    }

    async fn delete_by_id(&mut self, id: i64) -> SyncResult<()> {
        self.charge()?;
        let bump = self
            .staged
            .iter()
            .map(|r| r.record.last_updated)
            .max()
            .map(|t| t + Duration::seconds(1))
            .unwrap_or_else(|| ts(1));
        if let Some(stored) = self.staged.iter_mut().find(|r| r.record.id == id) {
            stored.deleted = true;
            stored.record.last_updated = bump;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> SyncResult<()> {
        let this = *self;
        let mut inner = this.store.lock().unwrap();
        inner.rows = this.staged;
        inner.next_id = this.next_id;
        inner.writes += this.writes;
        inner.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> SyncResult<()> {
        self.store.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

#[derive(Debug)]
struct SheetInner {
    rows: Vec<RowFields>,
    modified: Timestamp,
    writes: usize,
    write_budget: Option<usize>,
    write_fault: Fault,
    read_fault: Option<Fault>,
    /// 读取时丢弃尾部空行，与 Sheets values API 一致
    trim_blank_tail: bool,
}

/// 内存表格，每次写入把修改时间推进一秒
#[derive(Clone)]
pub struct MemorySheetStore {
    inner: Arc<Mutex<SheetInner>>,
}

impl MemorySheetStore {
    pub fn new(rows: Vec<RowFields>, modified: Timestamp) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SheetInner {
                rows,
                modified,
                writes: 0,
                write_budget: None,
                write_fault: Fault::Transient,
                read_fault: None,
                trim_blank_tail: false,
            })),
        }
    }

    pub fn rows(&self) -> Vec<RowFields> {
        self.inner.lock().unwrap().rows.clone()
    }

    /// 模拟用户编辑表格
    pub fn user_edit(&self, rows: Vec<RowFields>, at: Timestamp) {
        let mut inner = self.inner.lock().unwrap();
        inner.rows = rows;
        inner.modified = at;
    }

    pub fn write_count(&self) -> usize {
        self.inner.lock().unwrap().writes
    }

    pub fn fail_writes_after(&self, writes: usize) {
        self.fail_writes_after_with(writes, Fault::Transient);
    }

    pub fn fail_writes_after_with(&self, writes: usize, fault: Fault) {
        let mut inner = self.inner.lock().unwrap();
        inner.write_budget = (writes != usize::MAX).then_some(writes);
        inner.write_fault = fault;
    }

    pub fn trim_blank_tail(&self, trim: bool) {
        self.inner.lock().unwrap().trim_blank_tail = trim;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.set_read_fault(fail.then_some(Fault::Transient));
    }

    pub fn set_read_fault(&self, fault: Option<Fault>) {
        self.inner.lock().unwrap().read_fault = fault;
    }

    fn check_read(&self) -> SyncResult<()> {
        match self.inner.lock().unwrap().read_fault {
            Some(fault) => Err(fault.error("sheet")),
            None => Ok(()),
        }
    }

    fn write<F>(&self, mutate: F) -> SyncResult<()>
    where
        F: FnOnce(&mut Vec<RowFields>),
    {
        let mut inner = self.inner.lock().unwrap();
        let fault = inner.write_fault;
        take_write_budget(&mut inner.write_budget, fault, "sheet")?;
        mutate(&mut inner.rows);
        inner.writes += 1;
        inner.modified = inner.modified + Duration::seconds(1);
        Ok(())
    }
}

#[async_trait]
impl SheetStore for MemorySheetStore {
    async fn last_modified(&self) -> SyncResult<Timestamp> {
        self.check_read()?;
        Ok(self.inner.lock().unwrap().modified)
    }

    async fn read_data_rows(&self) -> SyncResult<Vec<RowFields>> {
        self.check_read()?;
        let inner = self.inner.lock().unwrap();
        let mut rows = inner.rows.clone();
        if inner.trim_blank_tail {
            while rows.last().is_some_and(RowFields::is_blank) {
                rows.pop();
            }
        }
        Ok(rows)
    }

    async fn bulk_update_range(&self, start_row: usize, rows: &[RowFields]) -> SyncResult<()> {
        self.write(|sheet| {
            for (offset, row) in rows.iter().enumerate() {
                let index = start_row - 1 + offset;
                if index < sheet.len() {
                    sheet[index] = row.clone();
                } else {
                    sheet.push(row.clone());
                }
            }
        })
    }

    async fn insert_rows_at(&self, position: usize, rows: &[RowFields]) -> SyncResult<()> {
        self.write(|sheet| {
            let at = (position - 1).min(sheet.len());
            sheet.splice(at..at, rows.iter().cloned());
        })
    }

    async fn delete_rows_at(&self, position: usize, count: usize) -> SyncResult<()> {
        self.write(|sheet| {
            let start = (position - 1).min(sheet.len());
            let end = (start + count).min(sheet.len());
            sheet.drain(start..end);
        })
    }

    fn name(&self) -> &str {
        "memory-sheet"
    }
}
