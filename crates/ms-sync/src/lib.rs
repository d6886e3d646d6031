//! Reconciliation engine mirroring issues, comments and attachments from a
//! primary tracker onto a secondary one (and comments/attachments back).
//!
//! Every mirrored creation is recorded in the correspondence store in both
//! directions, so re-running a pass never creates a second counterpart.

mod children;
pub mod engine;
pub mod error;
pub mod report;

pub use engine::{SyncEngine, SyncOutcome};
pub use error::{Result, SyncError};
pub use report::SyncReport;
