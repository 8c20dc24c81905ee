pub mod builder;
pub mod walker;

pub use builder::{build_change_dag, topological_order, ChangeGraph};
pub use walker::{DagWalker, NodeResult, NodeStatus};
