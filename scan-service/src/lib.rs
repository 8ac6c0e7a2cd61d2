//! Full-scan orchestration: discover authors per geographic partition, record
//! them, and harvest each author's timeline exactly once.

pub mod orchestrator;
pub mod plan;
pub mod state;

pub use orchestrator::{ScanOrchestrator, ScanReport};
pub use plan::ScanPlan;
pub use state::ScanState;
