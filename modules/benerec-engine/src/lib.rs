pub mod jobs;
pub mod orchestrator;
pub mod scorer;
pub mod snapshot;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use jobs::{BatchStats, RecommendationJobs, RefreshJob, RefreshOutcome, RefreshQueue};
pub use orchestrator::{GenerationOrchestrator, Resolution};
pub use snapshot::{EngineSnapshot, InteractionMatrix, SnapshotStore};
