use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::error::ConfigError;
use crate::job::{ExecutionOutcome, Language};
use crate::sandbox::supervisor::{supervise, RunResult};
use crate::sandbox::Sandbox;

/// `docker run` exits with 125 when the daemon could not create or start
/// the container at all.
const DOCKER_LAUNCH_FAILURE: i32 = 125;

/// How a runtime receives the program text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeDelivery {
    /// Appended as the final argument of the evaluator command.
    Argument,
    /// Streamed on standard input; nothing touches disk.
    Stdin,
}

/// Non-interactive evaluator command for each language.
pub fn evaluator(language: Language) -> (&'static [&'static str], CodeDelivery) {
    match language {
        Language::Python => (&["python", "-c"], CodeDelivery::Argument),
        Language::JavaScript => (&["node", "-e"], CodeDelivery::Argument),
        Language::Ruby => (&["ruby", "-e"], CodeDelivery::Argument),
        Language::Go => (&["go", "run", "/dev/stdin"], CodeDelivery::Stdin),
    }
}

/// Executes code in throwaway Docker containers.
///
/// Every container runs with:
/// - No network
/// - Capped CPU, memory (swap included) and process count
/// - Read-only root filesystem
/// - All capabilities dropped and no-new-privileges
///
/// None of these can be turned off; limits above the ceilings are refused
/// at construction.
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    config: SandboxConfig,
}

impl DockerSandbox {
    pub fn new(config: SandboxConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Full `docker` argument list plus the bytes to stream on stdin, if any.
    pub fn run_args(
        &self,
        language: Language,
        image: &str,
        container_name: &str,
        code: &str,
    ) -> (Vec<String>, Option<Vec<u8>>) {
        let (evaluator, delivery) = evaluator(language);

        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            format!("--name={}", container_name),
        ];
        if delivery == CodeDelivery::Stdin {
            args.push("--interactive".to_string());
        }

        args.push("--network=none".to_string());
        args.push(format!("--cpus={}", self.config.cpus));
        args.push(format!("--memory={}m", self.config.memory_mb));
        args.push(format!("--memory-swap={}m", self.config.memory_mb));
        args.push(format!("--pids-limit={}", self.config.pids_limit));
        args.push("--read-only".to_string());
        args.push("--cap-drop=ALL".to_string());
        args.push("--security-opt=no-new-privileges".to_string());

        args.push(image.to_string());
        args.extend(evaluator.iter().map(|s| s.to_string()));

        match delivery {
            CodeDelivery::Argument => {
                args.push(code.to_string());
                (args, None)
            }
            CodeDelivery::Stdin => (args, Some(code.as_bytes().to_vec())),
        }
    }

    /// Force-remove a container that outlived its deadline.
    async fn remove_container(&self, name: &str) {
        let mut cmd = Command::new(&self.config.docker_bin);
        cmd.args(["rm", "--force", name]).kill_on_drop(true);

        match tokio::time::timeout(self.config.cleanup_timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                tracing::debug!(container = name, "Removed timed out container");
            }
            Ok(Ok(output)) => {
                tracing::warn!(
                    container = name,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Container removal reported failure"
                );
            }
            Ok(Err(e)) => {
                tracing::error!(container = name, error = %e, "Failed to run container removal");
            }
            Err(_) => {
                tracing::error!(container = name, "Container removal timed out");
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn execute(&self, language: Language, code: &str, timeout: Duration) -> ExecutionOutcome {
        let started = Instant::now();

        let Some(image) = self.config.image_for(language) else {
            tracing::error!(language = %language, "No runtime image configured");
            return ExecutionOutcome::internal_error(
                format_args!("no runtime configured for {}", language),
                0,
            );
        };

        let container = format!("codeexec-{}", Uuid::new_v4());
        let (args, stdin) = self.run_args(language, image, &container, code);

        tracing::info!(
            language = %language,
            image,
            container = %container,
            timeout_secs = timeout.as_secs_f64(),
            "Executing job in sandbox"
        );

        let mut cmd = Command::new(&self.config.docker_bin);
        cmd.args(&args);

        let result = supervise(cmd, stdin, timeout, self.config.output_limit_bytes).await;
        let execution_time_ms = elapsed_ms(started);

        match result {
            Ok(RunResult::Exited {
                status,
                stdout,
                stderr,
            }) => match status.code() {
                Some(DOCKER_LAUNCH_FAILURE) => {
                    tracing::error!(
                        container = %container,
                        stderr = %stderr.trim(),
                        "Container runtime could not start the sandbox"
                    );
                    ExecutionOutcome::internal_error(
                        "sandbox runtime failed to start the container",
                        execution_time_ms,
                    )
                }
                Some(exit_code) => {
                    let outcome =
                        ExecutionOutcome::exited(exit_code, stdout, stderr, execution_time_ms);
                    tracing::info!(
                        container = %container,
                        status = %outcome.status,
                        exit_code,
                        execution_time_ms,
                        "Sandbox finished"
                    );
                    outcome
                }
                None => {
                    tracing::error!(container = %container, "Sandbox client terminated by signal");
                    self.remove_container(&container).await;
                    ExecutionOutcome::internal_error(
                        "sandbox terminated unexpectedly",
                        execution_time_ms,
                    )
                }
            },
            Ok(RunResult::TimedOut { stdout, .. }) => {
                tracing::warn!(
                    container = %container,
                    timeout_secs = timeout.as_secs_f64(),
                    "Execution timed out, reclaiming container"
                );
                self.remove_container(&container).await;
                ExecutionOutcome::timed_out(timeout.as_secs_f64(), stdout, execution_time_ms)
            }
            Err(e) => {
                tracing::error!(container = %container, error = %e, "Failed to supervise sandbox");
                self.remove_container(&container).await;
                ExecutionOutcome::internal_error(
                    format_args!("could not launch sandbox ({})", e.kind()),
                    execution_time_ms,
                )
            }
        }
    }
}
