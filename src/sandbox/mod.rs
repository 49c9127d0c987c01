//! Sandboxed execution of untrusted code.
//!
//! # Components
//!
//! - [`Sandbox`]: the execution seam the queue consumer depends on
//! - [`DockerSandbox`]: runs one job per throwaway container
//! - [`supervisor`]: wall-clock enforcement, output capture and reaping
//!
//! The supervisor, not the sandboxed code, owns the deadline. When it
//! passes, the runtime client is killed and the container force-removed.

pub mod docker;
pub mod supervisor;

use std::time::Duration;

use async_trait::async_trait;

use crate::job::{ExecutionOutcome, Language};

pub use docker::DockerSandbox;

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run `code` to completion or `timeout`.
    ///
    /// Never fails: launch and supervision problems come back as an
    /// `ERROR` outcome with an internal-error message.
    async fn execute(&self, language: Language, code: &str, timeout: Duration) -> ExecutionOutcome;
}
