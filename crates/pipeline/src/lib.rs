//! Single-GPU job pipeline: registry, admission control and the worker
//! orchestrator.

pub mod admission;
pub mod logs;
pub mod orchestrator;
pub mod outputs;
pub mod registry;
pub mod retention;
pub mod runner;

pub use admission::{AdmissionController, AdmissionError, PoolStatus, Submission};
pub use logs::JobLogs;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use outputs::JobOutputs;
pub use registry::{JobRegistry, StatusCounts, Transition};
pub use retention::RetentionPolicy;
pub use runner::{JobRunner, RunRequest};
