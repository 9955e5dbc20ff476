pub mod conflict;
pub mod detector;
pub mod differ;
pub mod engine;
pub mod reconciler;
pub mod state;

pub use conflict::ConflictPolicy;
pub use detector::{ChangeDetector, ChangeKind};
pub use differ::{diff, EditOp, EditScript, EditSummary};
pub use engine::{run_cycle, CycleReport, LoopExit, LoopState, SyncConfig, SyncEngine};
pub use reconciler::{ApplyReport, Reconciler};
pub use state::{Direction, Observation, SyncState, Watermark};
