pub mod cancel;
pub mod engine;

pub use cancel::{run_cleanup, spawn_signal_listener, PortForwarder};
pub use engine::{ApplyReport, Engine};
