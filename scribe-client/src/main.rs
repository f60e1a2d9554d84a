//! scribe - command-line client for scribe-pipeline
//!
//! Uploads audio, follows jobs to completion and prints the
//! speaker-attributed transcript.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use scribe_common::api::{JobResults, JobStatusResponse};
use scribe_common::config::{load_toml_config, resolve_config_path};
use scribe_common::logging::init_tracing;
use scribe_common::JobId;
use tracing::{info, warn};

use scribe_client::config::{ClientConfig, MODULE_NAME};
use scribe_client::{HttpJobClient, JobPoller, PollEvent, PollOutcome, StatusSource};

#[derive(Parser, Debug)]
#[command(name = "scribe")]
#[command(about = "Upload audio to scribe-pipeline and follow transcription jobs")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, global = true, env = "SCRIBE_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    /// scribe-pipeline base URL
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload an audio file and wait for the transcript
    Upload {
        file: PathBuf,

        /// Expected number of speakers
        #[arg(long)]
        speakers: Option<u32>,

        /// Return right after the upload is accepted
        #[arg(long)]
        no_wait: bool,

        /// Cancel the job on the service if interrupted
        #[arg(long)]
        cancel_remote: bool,
    },
    /// Follow an existing job until it finishes
    Watch {
        job_id: String,

        #[arg(long)]
        cancel_remote: bool,
    },
    /// Show the current status of a job
    Status { job_id: String },
    /// Print the transcript of a processed job
    Results { job_id: String },
    /// Ask the service to cancel a job
    Cancel { job_id: String },
    /// List all jobs
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), "SCRIBE_CLIENT_CONFIG", MODULE_NAME);
    let mut config: ClientConfig =
        load_toml_config(config_path.as_deref()).context("Failed to load configuration")?;
    config.apply_env_overrides();
    if let Some(server) = args.server {
        config.server_url = server;
    }

    init_tracing(&config.logging, "scribe_client").context("Failed to initialize logging")?;

    let client = HttpJobClient::new(&config.server_url, config.request_timeout())
        .context("Failed to build HTTP client")?;
    let json = args.json;

    match args.command {
        Command::Upload {
            file,
            speakers,
            no_wait,
            cancel_remote,
        } => {
            let response = client
                .upload(&file, speakers)
                .await
                .with_context(|| format!("Upload of {} failed", file.display()))?;
            info!(job_id = %response.job_id, "Upload accepted");

            if no_wait {
                print_value(json, &response, || response.job_id.to_string())?;
                return Ok(());
            }

            config.cancel_remote |= cancel_remote;
            watch(client, &config, response.job_id, json).await
        }
        Command::Watch {
            job_id,
            cancel_remote,
        } => {
            config.cancel_remote |= cancel_remote;
            watch(client, &config, JobId::from(job_id), json).await
        }
        Command::Status { job_id } => {
            let status = client
                .fetch_status(&JobId::from(job_id))
                .await
                .context("Status request failed")?;
            print_value(json, &status, || status_line(&status))
        }
        Command::Results { job_id } => {
            let results = client
                .fetch_results(&JobId::from(job_id))
                .await
                .context("Results request failed")?;
            print_value(json, &results, || transcript_text(&results))
        }
        Command::Cancel { job_id } => {
            let response = client
                .cancel_job(&JobId::from(job_id))
                .await
                .context("Cancel request failed")?;
            print_value(json, &response, || {
                if response.cancel_requested {
                    format!("{}: cancel requested", response.job_id)
                } else {
                    format!("{}: already finished", response.job_id)
                }
            })
        }
        Command::List => {
            let jobs = client.list_jobs().await.context("List request failed")?;
            print_value(json, &jobs, || {
                jobs.iter().map(status_line).collect::<Vec<_>>().join("\n")
            })
        }
    }
}

/// Poll a job to its end, printing progress; Ctrl+C stops polling
async fn watch(client: HttpJobClient, config: &ClientConfig, job_id: JobId, json: bool) -> Result<()> {
    let poller = JobPoller::new(Arc::new(client), config.poller_config());
    let mut handle = poller.spawn(job_id.clone())?;

    let token = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping");
            token.cancel();
        }
    });

    while let Some(event) = handle.events().recv().await {
        if let PollEvent::Status(status) = event {
            if !json {
                eprintln!("{}", status_line(&status));
            }
        }
    }

    match handle.join().await.context("Polling failed")? {
        PollOutcome::Processed(results) => print_value(json, &results, || transcript_text(&results)),
        PollOutcome::Failed { error_message } => bail!("Job {} failed: {}", job_id, error_message),
        PollOutcome::Cancelled => {
            eprintln!("Stopped following job {}", job_id);
            Ok(())
        }
    }
}

fn print_value<T: serde::Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

fn status_line(status: &JobStatusResponse) -> String {
    match &status.error {
        Some(error) => format!("{} [{:>3}%] {}: {}", status.job_id, status.progress, status.step, error),
        None => format!("{} [{:>3}%] {}", status.job_id, status.progress, status.step),
    }
}

fn transcript_text(results: &JobResults) -> String {
    let mut lines: Vec<String> = results
        .transcript
        .iter()
        .map(|s| format!("[{:>7.2} - {:>7.2}] {}: {}", s.start, s.end, s.speaker, s.text))
        .collect();
    let m = &results.metrics;
    lines.push(format!(
        "-- {} segments, {} speakers, {:.1}s audio in {:.1}s (RTF {:.2})",
        m.num_segments, m.num_speakers, m.audio_duration, m.total_time, m.rtf
    ));
    lines.join("\n")
}
