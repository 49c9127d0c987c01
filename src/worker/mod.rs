//! Message processing for the job queue worker.
//!
//! # Components
//!
//! - [`QueueConsumer`]: per-message state machine (parse, validate, execute, store, acknowledge)
//! - [`ResultWriter`]: terminal record writes with bounded retry
//! - [`CircuitBreaker`]: consecutive infrastructure-error counter
//! - [`Heartbeat`]: liveness file written on its own timer
//!
//! # Delivery
//!
//! A message is acknowledged only once its outcome is durable, or once it is
//! known that no retry could ever succeed (malformed or invalid). Anything
//! else is left for the queue to redeliver, so a job may run more than once;
//! the result write is a full replace keyed by `job_id`, which makes that safe.

pub mod circuit_breaker;
pub mod consumer;
pub mod heartbeat;
pub mod result_writer;

pub use circuit_breaker::CircuitBreaker;
pub use consumer::{MessageDisposition, QueueConsumer};
pub use heartbeat::Heartbeat;
pub use result_writer::ResultWriter;
