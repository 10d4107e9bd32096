//! Pipeline wiring: capture supervisor, segment dispatcher and record
//! processor, plus process signal handling.

pub mod controller_handler;
pub mod shutdown;

pub use controller_handler::{Controller, RunSummary};
pub use shutdown::shutdown_signal;
