use crate::core::conflict::ConflictPolicy;
use crate::core::detector::{ChangeDetector, ChangeKind};
use crate::core::reconciler::{ApplyReport, Reconciler};
use crate::core::state::SyncState;
use crate::error::{SyncError, SyncResult};
use crate::storage::{RecordStore, SheetStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 两个周期之间的间隔
    pub poll_interval: Duration,
    /// 冲突策略，运行期间不变
    pub conflict_policy: ConflictPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            conflict_policy: ConflictPolicy::DatabaseWins,
        }
    }
}

/// 循环所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Detecting,
    Classified(ChangeKind),
    Applying,
    Stopped,
    Fatal,
}

/// 单个周期的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub kind: ChangeKind,
    /// NoChange 时为 None
    pub applied: Option<ApplyReport>,
}

/// 循环的退出方式
#[derive(Debug)]
pub enum LoopExit {
    Stopped,
    Fatal(SyncError),
}

impl LoopExit {
    /// 进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            LoopExit::Stopped => 0,
            LoopExit::Fatal(_) => 1,
        }
    }
}

/// 执行一个完整周期：检测 -> 计算差异 -> 应用
///
/// 只有完整成功（包括无变化）时才推进水位；部分写入失败时保留水位并记下方向。
pub async fn run_cycle(
    records: &dyn RecordStore,
    sheet: &dyn SheetStore,
    policy: ConflictPolicy,
    state: SyncState,
    on_phase: &mut (dyn FnMut(LoopState) + Send),
) -> (SyncState, SyncResult<CycleReport>) {
    on_phase(LoopState::Detecting);
    let observation = match ChangeDetector::observe(records, sheet).await {
        Ok(o) => o,
        Err(e) => return (state, Err(e)),
    };

    let kind = ChangeDetector::classify(&observation, &state);
    info!(
        kind = %kind,
        last_sheet = %state.last_sheet_update,
        last_db = %state.last_db_update,
        resume = ?state.resume,
        "cycle classified"
    );
    on_phase(LoopState::Classified(kind));

    let Some(direction) = policy.resolve(kind, state.resume) else {
        return (
            SyncState::advanced(&observation),
            Ok(CycleReport {
                kind,
                applied: None,
            }),
        );
    };

    if kind == ChangeKind::BothChanged && state.resume.is_none() {
        warn!(
            policy = %policy,
            direction = %direction,
            "两侧同时修改，按冲突策略覆盖另一侧"
        );
    }

    on_phase(LoopState::Applying);
    match Reconciler::new(records, sheet)
        .reconcile(direction, &observation)
        .await
    {
        Ok(report) => (
            SyncState::advanced(&observation),
            Ok(CycleReport {
                kind,
                applied: Some(report),
            }),
        ),
        Err(e @ SyncError::PartialApply { .. }) => (state.with_resume(direction), Err(e)),
        Err(e) => (state, Err(e)),
    }
}

/// 同步循环
pub struct SyncEngine {
    records: Arc<dyn RecordStore>,
    sheet: Arc<dyn SheetStore>,
    config: SyncConfig,
    state: SyncState,
    phase: LoopState,
    cycles: u64,
}

impl SyncEngine {
    pub fn new(records: Arc<dyn RecordStore>, sheet: Arc<dyn SheetStore>) -> Self {
        Self::with_config(records, sheet, SyncConfig::default())
    }

    pub fn with_config(
        records: Arc<dyn RecordStore>,
        sheet: Arc<dyn SheetStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            records,
            sheet,
            config,
            state: SyncState::never_synced(),
            phase: LoopState::Idle,
            cycles: 0,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn phase(&self) -> LoopState {
        self.phase
    }

    /// 执行一个周期并维护阶段和状态
    pub async fn run_once(&mut self) -> SyncResult<CycleReport> {
        self.cycles += 1;
        debug!("开始第 {} 个周期: {} <-> {}", self.cycles, self.sheet.name(), self.records.name());

        let phase = &mut self.phase;
        let (state, result) = run_cycle(
            self.records.as_ref(),
            self.sheet.as_ref(),
            self.config.conflict_policy,
            self.state,
            &mut |next: LoopState| {
                debug!(phase = ?next, "阶段切换");
                *phase = next;
            },
        )
        .await;
        self.state = state;

        self.phase = match &result {
            Err(e) if !e.is_transient() => LoopState::Fatal,
            _ => LoopState::Idle,
        };
        result
    }

    /// 运行直到收到取消信号或遇到致命错误
    pub async fn run(mut self, cancel: CancellationToken) -> LoopExit {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            policy = %self.config.conflict_policy,
            "starting synchronisation"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_once().await {
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "cycle failed: {}", e);
                }
                Err(e) => {
                    error!(error = %e, "cycle failed: {}", e);
                    return LoopExit::Fatal(e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.phase = LoopState::Stopped;
        info!("stopping synchronisation");
        LoopExit::Stopped
    }
}
