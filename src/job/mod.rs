//! Job data model.
//!
//! - [`JobEnvelope`]: loosely typed message body as it comes off the queue
//! - [`Job`]: a job that passed [`validate`]
//! - [`ExecutionOutcome`]: classified result of one sandbox run
//! - [`JobRecord`]: the durable item shared with the submission and status paths

pub mod model;
pub mod outcome;
pub mod record;
pub mod validation;

pub use model::{Job, JobEnvelope, Language};
pub use outcome::{ExecutionOutcome, ExecutionStatus};
pub use record::{JobMetadata, JobRecord, JobStatus};
pub use validation::{validate, ValidationError};
