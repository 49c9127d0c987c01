use clap::{Parser, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use codeexec_worker::config::{
    default_worker_id, parse_image_overrides, JobLimits, WorkerConfig, DEFAULT_TABLE_NAME,
};
use codeexec_worker::error::ConfigError;
use codeexec_worker::job::{validate, JobEnvelope, JobRecord};
use codeexec_worker::node::{load_aws_config, WorkerNode};
use codeexec_worker::queue::{JobQueue, SqsQueue};
use codeexec_worker::shutdown::install_shutdown_handler;
use codeexec_worker::store::{DynamoStore, ResultStore};

#[derive(Parser, Debug)]
#[command(name = "codeexec")]
#[command(version)]
#[command(about = "Queue worker that runs untrusted code in locked-down containers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Consume jobs from the queue until SIGTERM/SIGINT
    Worker(WorkerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },
}

// =============================================================================
// Worker Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Queue to consume from
    #[arg(long, env = "SQS_QUEUE_URL")]
    queue_url: Option<String>,

    /// Table holding job records
    #[arg(long, env = "DYNAMODB_TABLE", default_value = DEFAULT_TABLE_NAME)]
    table: String,

    /// Overrides the region from the AWS default chain
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Identity stamped on every record (defaults to the host name)
    #[arg(long, env = "WORKER_ID")]
    worker_id: Option<String>,

    /// Long-poll wait per receive, at most 20
    #[arg(long, env = "POLL_WAIT_SECONDS", default_value = "20")]
    poll_wait_seconds: i32,

    #[arg(long, env = "VISIBILITY_TIMEOUT_SECONDS", default_value = "30")]
    visibility_timeout_seconds: i32,

    /// Messages per receive, 1 to 10
    #[arg(long, env = "MAX_MESSAGES", default_value = "1")]
    max_messages: i32,

    #[arg(long, env = "HEARTBEAT_PATH", default_value = "/tmp/worker-heartbeat")]
    heartbeat_path: PathBuf,

    #[arg(long, env = "HEARTBEAT_INTERVAL_SECONDS", default_value = "30")]
    heartbeat_interval_seconds: u64,

    /// Container memory cap, at most 256
    #[arg(long, env = "SANDBOX_MEMORY_MB", default_value = "256")]
    sandbox_memory_mb: u32,

    /// Container CPU quota, at most 0.5
    #[arg(long, env = "SANDBOX_CPUS", default_value = "0.5")]
    sandbox_cpus: f64,

    /// Container process cap, at most 50
    #[arg(long, env = "SANDBOX_PIDS_LIMIT", default_value = "50")]
    sandbox_pids_limit: u32,

    /// Longest timeout a job may ask for, at most 10
    #[arg(long, env = "MAX_EXECUTION_SECONDS", default_value = "10")]
    max_execution_seconds: f64,

    #[arg(long, env = "MAX_CODE_BYTES", default_value = "10240")]
    max_code_bytes: usize,

    /// Per-language image overrides, e.g. "python=python:3.12-alpine,go=golang:1.22-alpine"
    #[arg(long, env = "SANDBOX_IMAGES", default_value = "")]
    sandbox_images: String,

    #[arg(long, env = "DOCKER_BIN", default_value = "docker")]
    docker_bin: String,
}

impl WorkerArgs {
    fn into_config(self) -> Result<WorkerConfig, ConfigError> {
        let mut config = WorkerConfig::default();
        config.worker_id = self
            .worker_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(default_worker_id);
        config.region = self.region;

        config.queue.queue_url = self.queue_url;
        config.queue.wait_time_secs = self.poll_wait_seconds;
        config.queue.visibility_timeout_secs = self.visibility_timeout_seconds;
        config.queue.max_messages = self.max_messages;
        config.store.table_name = self.table;

        config.lifecycle.heartbeat_path = self.heartbeat_path;
        config.lifecycle.heartbeat_interval =
            Duration::from_secs(self.heartbeat_interval_seconds.max(1));

        config.sandbox.docker_bin = self.docker_bin;
        config.sandbox.memory_mb = self.sandbox_memory_mb;
        config.sandbox.cpus = self.sandbox_cpus;
        config.sandbox.pids_limit = self.sandbox_pids_limit;
        for (language, image) in parse_image_overrides(&self.sandbox_images)? {
            config.sandbox = config.sandbox.with_image(language, image);
        }

        config.limits = JobLimits {
            max_code_bytes: self.max_code_bytes,
            max_timeout_secs: self.max_execution_seconds,
        };

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Queue jobs are submitted to
    #[arg(long, env = "SQS_QUEUE_URL")]
    queue_url: Option<String>,

    #[arg(long, env = "DYNAMODB_TABLE", default_value = DEFAULT_TABLE_NAME)]
    table: String,

    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Record a job as PENDING and enqueue it
    Submit {
        /// One of python, javascript, ruby, go
        #[arg(long, short = 'l')]
        language: String,

        /// Program text
        #[arg(long, short = 'c', conflicts_with = "file", required_unless_present = "file")]
        code: Option<String>,

        /// Read the program from a file
        #[arg(long, short = 'f')]
        file: Option<PathBuf>,

        /// Wall-clock limit in seconds (defaults to the maximum)
        #[arg(long, short = 't')]
        timeout: Option<f64>,
    },
    /// Show the record for a job
    Status {
        job_id: String,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobSubmitOutput {
    job_id: String,
    status: String,
    message_id: String,
}

#[derive(Serialize)]
struct JobStatusOutput {
    job_id: String,
    status: String,
    language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    submitted_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<String>,
}

impl From<JobRecord> for JobStatusOutput {
    fn from(record: JobRecord) -> Self {
        // Result fields mean nothing until a worker has finished the job.
        let terminal = record.status.is_terminal();
        Self {
            job_id: record.job_id,
            status: record.status.to_string(),
            language: record.language,
            submitted_at: record.submitted_at,
            output: terminal.then_some(record.output),
            error: terminal.then_some(record.error),
            exit_code: if terminal { record.exit_code } else { None },
            execution_time_ms: terminal.then_some(record.execution_time_ms),
            worker_id: record.worker_id,
            completed_at: record.timestamp,
        }
    }
}

// =============================================================================
// Worker Implementation
// =============================================================================

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid worker configuration");
            return Err(e.into());
        }
    };

    tracing::info!(
        worker_id = %config.worker_id,
        table = %config.store.table_name,
        memory_mb = config.sandbox.memory_mb,
        cpus = config.sandbox.cpus,
        pids_limit = config.sandbox.pids_limit,
        max_timeout_secs = config.limits.max_timeout_secs,
        "Starting codeexec worker"
    );

    let shutdown = install_shutdown_handler()?;
    let node = WorkerNode::from_config(config).await?;
    node.run(shutdown).await?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_submit(
    client: &ClientArgs,
    language: String,
    code: String,
    timeout: Option<f64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let queue_url = client
        .queue_url
        .clone()
        .ok_or(ConfigError::MissingQueueUrl)?;

    let envelope = JobEnvelope {
        job_id: Some(Value::String(Uuid::new_v4().to_string())),
        language: Some(Value::String(language)),
        code: Some(Value::String(code)),
        timeout: timeout.map(Value::from),
        timeout_seconds: None,
        submitted_at: Some(Value::String(chrono::Utc::now().to_rfc3339())),
    };
    let job = validate(&envelope, &JobLimits::default())?;

    let aws = load_aws_config(client.region.as_deref()).await;
    let store = DynamoStore::new(aws_sdk_dynamodb::Client::new(&aws), client.table.clone());
    let queue = SqsQueue::new(
        aws_sdk_sqs::Client::new(&aws),
        queue_url,
        &Default::default(),
    );

    // The record must exist before any worker can see the message.
    store.put_record(&JobRecord::pending(&job)).await?;
    let message_id = queue.enqueue(&job).await?;

    match client.output {
        OutputFormat::Json => {
            let output = JobSubmitOutput {
                job_id: job.job_id,
                status: "PENDING".to_string(),
                message_id,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job submitted successfully!");
            println!("Job ID: {}", job.job_id);
        }
    }
    Ok(())
}

async fn handle_job_status(
    client: &ClientArgs,
    job_id: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let aws = load_aws_config(client.region.as_deref()).await;
    let store = DynamoStore::new(aws_sdk_dynamodb::Client::new(&aws), client.table.clone());

    let record = store
        .get_record(&job_id)
        .await?
        .ok_or_else(|| format!("Job not found: {}", job_id))?;
    let output = JobStatusOutput::from(record);

    match client.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job ID:          {}", output.job_id);
            println!("Status:          {}", output.status);
            println!("Language:        {}", output.language);
            if let Some(submitted_at) = &output.submitted_at {
                println!("Submitted At:    {}", submitted_at);
            }
            if let Some(exit_code) = output.exit_code {
                println!("Exit Code:       {}", exit_code);
            }
            if let Some(ms) = output.execution_time_ms {
                println!("Execution Time:  {} ms", ms);
            }
            if let Some(worker_id) = &output.worker_id {
                println!("Executed By:     {}", worker_id);
            }
            if let Some(text) = output.output.as_deref().filter(|s| !s.is_empty()) {
                println!("Output:");
                for line in text.lines() {
                    println!("  {}", line);
                }
            }
            if let Some(text) = output.error.as_deref().filter(|s| !s.is_empty()) {
                println!("Error:");
                for line in text.lines() {
                    println!("  {}", line);
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Worker(worker_args) => {
            run_worker(worker_args).await?;
        }
        Commands::Job { client, command } => match command {
            JobCommands::Submit {
                language,
                code,
                file,
                timeout,
            } => {
                let code = match (code, file) {
                    (Some(code), _) => code,
                    (None, Some(path)) => tokio::fs::read_to_string(path).await?,
                    (None, None) => return Err("either --code or --file is required".into()),
                };
                handle_job_submit(&client, language, code, timeout).await?;
            }
            JobCommands::Status { job_id } => {
                handle_job_status(&client, job_id).await?;
            }
        },
    }

    Ok(())
}
