use async_trait::async_trait;

use crate::protocol::Student;

pub mod cadence;
pub mod coordinator;
pub mod priority;
pub mod reconciler;

pub use cadence::{CadenceController, CadenceStats, RefreshReason};
pub use coordinator::MonitorSync;
pub use priority::{RankedView, RankingStats, TeamPriority, rank_teams};
pub use reconciler::{ReconcileOutcome, RosterReconciler};

/// The full-refresh collaborator: fetches the canonical roster snapshot
/// (typically an HTTP GET against the backend). Injected, never owned here.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<Vec<Student>>;
}
