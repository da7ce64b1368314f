pub mod assigner;
pub mod dispatch;
pub mod engine;
pub mod job;
pub mod policy;
pub mod queue;
pub mod recovery;
pub mod registry;

pub use engine::Scheduler;
pub use job::{Job, JobResult, JobStatus, ResourceRequirements, WireJob};
pub use queue::ReadyQueue;
pub use registry::JobRegistry;
