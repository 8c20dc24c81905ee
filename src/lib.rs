pub mod config;
pub mod dag;
pub mod error;
pub mod executor;
pub mod graph;
pub mod models;
pub mod operation;
pub mod output;
pub mod planner;
pub mod release;
pub mod runtime;
pub mod storage;
pub mod watch;

pub use error::{EngineError, Result};
