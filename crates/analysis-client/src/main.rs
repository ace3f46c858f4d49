//! Command-line client for the media analysis service
//!
//! ```bash
//! # Upload a recording, follow the analysis and save a CSV report
//! analysis-client run --device inhaler-a --file session.mp4 --csv ./reports
//!
//! # Analyse an already uploaded file against another server
//! analysis-client --api-url http://gpu-01:8000 run --device inhaler-a --media 5f0c...
//!
//! # One-shot queries
//! analysis-client health
//! analysis-client status <JOB_ID>
//! analysis-client download <JOB_ID> --output ./results
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use analysis_client::{render_summary, telemetry, write_csv, ClientConfig, HttpJobClient};
use analysis_lifecycle::{JobApi, JobLifecycleController, LifecycleEvent};
use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn, Instrument};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the analysis service (overrides ANALYSIS_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Request timeout in seconds (overrides ANALYSIS_REQUEST_TIMEOUT_SECS)
    #[arg(long, global = true)]
    request_timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start an analysis and follow it to completion
    Run(RunArgs),
    /// Check whether the service is up
    Health,
    /// Print the current status of a job as JSON
    Status { job_id: String },
    /// Print the result of a completed job as JSON
    Result { job_id: String },
    /// Save the stored result file of a completed job
    Download {
        job_id: String,
        /// Result format understood by the server
        #[arg(long, default_value = "json")]
        format: String,
        /// Target file or directory (default: analysis_result_<JOB_ID>.<FORMAT>)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the server configuration as JSON
    Config,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("source").required(true).args(["media", "file"])))]
struct RunArgs {
    /// Device the recording was made with
    #[arg(long)]
    device: String,

    /// Handle of an already uploaded media file
    #[arg(long)]
    media: Option<String>,

    /// Local media file to upload first
    #[arg(long)]
    file: Option<PathBuf>,

    /// Write a CSV report to this file or directory
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Do not ask the server for per-step HTML reports
    #[arg(long, default_value_t = false)]
    no_individual_report: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init("info");
    let cli = Cli::parse();

    let mut config = ClientConfig::default();
    if let Some(url) = &cli.api_url {
        config = config.with_api_url(url);
    }
    if let Some(secs) = cli.request_timeout_secs {
        config = config.with_request_timeout(Duration::from_secs(secs));
    }
    let client = Arc::new(HttpJobClient::new(config).context("building HTTP client")?);

    match cli.command {
        Command::Run(args) => {
            let span = telemetry::run_span(&client.config().api_url);
            run(client, args).instrument(span).await
        }
        Command::Health => {
            client
                .check_health()
                .await
                .with_context(|| format!("{} is not healthy", client.config().api_url))?;
            println!("{} is up", client.config().api_url);
            Ok(())
        }
        Command::Status { job_id } => print_json(&client.fetch_status(&job_id).await?),
        Command::Result { job_id } => print_json(&client.fetch_result(&job_id).await?),
        Command::Download {
            job_id,
            format,
            output,
        } => download(&client, &job_id, &format, output).await,
        Command::Config => print_json(&client.fetch_server_config().await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn download(
    client: &HttpJobClient,
    job_id: &str,
    format: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let data = client
        .download_result(job_id, format)
        .await
        .with_context(|| format!("downloading result of {}", job_id))?;
    let default_name = format!("analysis_result_{}.{}", job_id, format);
    let target = match output {
        Some(path) if path.is_dir() => path.join(default_name),
        Some(path) => path,
        None => PathBuf::from(default_name),
    };
    tokio::fs::write(&target, &data)
        .await
        .with_context(|| format!("writing {}", target.display()))?;
    info!(path = %target.display(), bytes = data.len(), "Result downloaded");
    Ok(())
}

async fn run(client: Arc<HttpJobClient>, args: RunArgs) -> Result<()> {
    let (media_handle, local_name) = match (&args.media, &args.file) {
        (Some(handle), _) => (handle.clone(), None),
        (None, Some(path)) => {
            let span = telemetry::upload_span(&path.display().to_string());
            let uploaded = client
                .upload_media(path, Some(args.device.as_str()))
                .instrument(span)
                .await
                .with_context(|| format!("uploading {}", path.display()))?;
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            (uploaded.media_handle, name)
        }
        (None, None) => bail!("either --media or --file is required"),
    };

    let controller = JobLifecycleController::new(client.clone(), client.clone())
        .with_individual_report(!args.no_individual_report);
    controller.select(Some(args.device.as_str()), Some(media_handle.as_str()));

    let span = telemetry::session_span(&args.device, &media_handle);
    let receiver = controller.subscribe();
    let began = Instant::now();
    let job_id = controller
        .start_selected()
        .instrument(span.clone())
        .await
        .context("starting analysis")?;
    telemetry::record_job_id(&span, &job_id);
    let mut events = controller.session_events(receiver);

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                controller.reset();
                telemetry::record_outcome(&span, "interrupted");
                bail!("interrupted, session for job {} discarded", job_id);
            }
            event = events.recv() => event,
        };
        let Some(event) = event else {
            bail!("event stream closed before job {} finished", job_id);
        };

        match event {
            LifecycleEvent::SessionStarted { estimated_time, .. } => {
                info!(job_id = %job_id, estimated_time, "Analysis started");
            }
            LifecycleEvent::ProgressUpdated { progress, stage, .. } => {
                info!(progress, stage = %stage, "Progress");
            }
            LifecycleEvent::LogAppended { line, .. } => info!("{}", line),
            LifecycleEvent::NetworkAdvisory { active: true, .. } => {
                warn!("Network is unstable, retrying automatically");
            }
            LifecycleEvent::NetworkAdvisory { active: false, .. } => {
                info!("Network recovered");
            }
            LifecycleEvent::HealthChecked {
                alive,
                health_fail_count,
                ..
            } => {
                if alive {
                    info!("Server is alive, polling slowly");
                } else {
                    warn!(health_fail_count, "Server health check failed");
                }
            }
            LifecycleEvent::Completed { result, .. } => {
                telemetry::record_outcome(&span, "completed");
                println!("{}", render_summary(&result, Some(began.elapsed())));
                if let Some(path) = &args.csv {
                    let written = write_csv(path, &result, &args.device, local_name.as_deref())
                        .await
                        .context("writing CSV report")?;
                    info!(path = %written.display(), "CSV report written");
                }
                return Ok(());
            }
            LifecycleEvent::Failed { code, reason, .. } => {
                telemetry::record_outcome(&span, "failed");
                bail!("{} ({})", reason, code);
            }
            LifecycleEvent::TimedOut { reason, .. } => {
                telemetry::record_outcome(&span, "timed_out");
                bail!("{}", reason);
            }
            LifecycleEvent::Reset { .. } => bail!("session was reset"),
        }
    }
}
