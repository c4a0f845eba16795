pub mod classify;
pub mod jobs;
pub mod scheduler;

pub use jobs::{build_jobs, ImageGenerationJob, JobStatus};
pub use scheduler::RenderScheduler;
