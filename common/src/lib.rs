pub mod engine;
pub mod error;
pub mod job;
pub mod record;
pub mod results;
pub mod task;

pub use error::{JobError, TaskError};
pub use job::{JobConfig, JobId, PartitionerKind, SplitPolicy, DEFAULT_NUM_REDUCERS};
pub use results::JobSummary;
pub use task::{Stage, TaskReport, TaskSpec};
