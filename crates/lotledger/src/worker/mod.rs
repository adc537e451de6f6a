pub mod job;
pub mod pool;
pub mod queue;
pub mod scanner;

pub use job::{
    FailureKind, ImportJob, JobFailure, JobOptions, JobResult, JobStatus, JobStatusReport,
    Priority, SourceRef,
};
pub use pool::{WorkerPool, WorkerResult};
pub use queue::{JobQueue, MemoryQueue};
pub use scanner::InvoiceScanner;
