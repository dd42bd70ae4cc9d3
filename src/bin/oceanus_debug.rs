//! Oceanus debug tool: seed test exceptions and inspect diagnosis results.
//!
//! ```text
//! oceanus-debug insert --type checkpoint
//! oceanus-debug insert --msg "Custom error message" --error-type oom
//! oceanus-debug status --job-id test-job-1a2b3c4d
//! oceanus-debug list --limit 5
//! oceanus-debug pending
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use oceanus_agent::{
    config::Config,
    queue::{ExceptionQueue, NewException, SqliteExceptionQueue},
    util::truncate_chars,
};

#[derive(Parser)]
#[command(name = "oceanus-debug", about = "Insert test Flink exceptions and check diagnosis status")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Insert a pending exception record
    Insert {
        /// Predefined error template
        #[arg(long = "type", value_enum, default_value_t = Template::Checkpoint, conflicts_with = "msg")]
        template: Template,
        /// Custom error message instead of a template
        #[arg(long)]
        msg: Option<String>,
        /// Job id (default: test-job-<random>)
        #[arg(long)]
        job_id: Option<String>,
        /// Error type stored with a custom message
        #[arg(long)]
        error_type: Option<String>,
    },
    /// Show the latest record for a job
    Status {
        #[arg(long)]
        job_id: String,
    },
    /// List recent records
    List {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Count pending records
    Pending,
}

#[derive(Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
enum Template {
    Checkpoint,
    Timeout,
    OomMeta,
    OomHeap,
    Network,
}

impl Template {
    /// (message, error type, job name)
    fn fields(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Template::Checkpoint => (
                "Checkpoint expired before completing. If you see this error consistently, consider increasing the checkpoint interval or timeout.",
                "checkpoint_failure",
                "Checkpoint Job",
            ),
            Template::Timeout => (
                "java.util.concurrent.TimeoutException: Heartbeat of TaskManager with id container_123 timed out.",
                "task_manager_timeout",
                "Timeout Job",
            ),
            Template::OomMeta => (
                "java.lang.OutOfMemoryError: Metaspace. The Metaspace memory pool is full.",
                "oom_metaspace",
                "Metaspace OOM Job",
            ),
            Template::OomHeap => (
                "java.lang.OutOfMemoryError: Java heap space. Dumping heap to /tmp/heapdump.hprof",
                "oom_heap",
                "Heap OOM Job",
            ),
            Template::Network => (
                "org.apache.flink.runtime.io.network.partition.PartitionNotFoundException: Partition xx not found.",
                "network_partition_error",
                "Network Job",
            ),
        }
    }
}

fn new_exception(
    template: Template,
    msg: Option<String>,
    job_id: Option<String>,
    error_type: Option<String>,
) -> NewException {
    let job_id = job_id.unwrap_or_else(|| {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("test-job-{}", &id[..8])
    });

    let (error_message, error_type, job_name) = match msg {
        Some(msg) => (
            msg,
            error_type.unwrap_or_else(|| "unknown".to_string()),
            "Custom Debug Job".to_string(),
        ),
        None => {
            let (msg, kind, name) = template.fields();
            (msg.to_string(), kind.to_string(), name.to_string())
        }
    };

    NewException {
        job_id,
        job_name: Some(job_name),
        job_type: Some("streaming".to_string()),
        job_config: None,
        error_message,
        error_type: Some(error_type),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env_without_llm()?;
    let queue =
        SqliteExceptionQueue::open(config.database.path.clone(), config.database.busy_timeout)
            .await?;

    match cli.command {
        Command::Insert {
            template,
            msg,
            job_id,
            error_type,
        } => {
            let new = new_exception(template, msg, job_id, error_type);
            println!("Inserting job: {}", new.job_id);
            println!("Error Type: {}", new.error_type.as_deref().unwrap_or(""));
            println!("Message: {}...", truncate_chars(&new.error_message, 100));

            let id = queue.insert_exception(&new).await?;
            println!("\nInserted test record {} for job {}", id, new.job_id);
        }
        Command::Status { job_id } => match queue.find_by_job_id(&job_id).await? {
            Some(record) => {
                println!("\nJob Details: {}", record.job_id);
                println!("Status:     {}", record.status);
                println!(
                    "Confidence: {}",
                    record
                        .diagnosis_confidence
                        .map(|c| format!("{:.2}", c))
                        .unwrap_or_else(|| "-".to_string())
                );
                println!("Created:    {}", record.created_at);
                println!("Diagnosed:  {}", record.diagnosed_at.as_deref().unwrap_or("-"));
                if let Some(fix) = record.suggested_fix {
                    println!("\nSuggested Fix:");
                    println!("{}", serde_json::to_string_pretty(&fix)?);
                }
            }
            None => println!("\nNo record found for Job ID: {}", job_id),
        },
        Command::List { limit } => {
            let records = queue.list_recent(limit).await?;
            println!(
                "\n{:<28} {:<26} {:<12} {}",
                "JOB ID", "ERROR TYPE", "STATUS", "CREATED"
            );
            for record in records {
                println!(
                    "{:<28} {:<26} {:<12} {}",
                    record.job_id,
                    record.error_type.as_deref().unwrap_or("-"),
                    record.status.as_str(),
                    record.created_at
                );
            }
        }
        Command::Pending => {
            println!("Pending exceptions: {}", queue.count_pending().await?);
        }
    }

    Ok(())
}
