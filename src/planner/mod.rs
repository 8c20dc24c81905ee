pub mod diff;
pub mod order;
pub mod preview;

pub use order::{ActionType, ChangeOrder, ChangeStep, ChangeSummary};
pub use preview::Previewer;
