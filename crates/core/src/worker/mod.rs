//! External tracker worker: invocation, execution, and output discovery.

pub mod artifacts;
pub mod command;
pub mod subprocess;

pub use command::WorkerCommand;
pub use subprocess::{run_streaming, RunOptions, RunOutput, SubprocessError};
