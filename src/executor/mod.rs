pub mod engine;
pub mod message;
pub mod reporter;

pub use engine::{settled_state, ApplyOutcome, Executor, LiveResults};
pub use message::{Message, OpResult};
pub use reporter::{ProgressReporter, ReportSummary};
