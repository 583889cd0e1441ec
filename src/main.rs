//! CLI entry point for firmament-net.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use firmament_net::network::{
    ClientSettings, ErrorDetails, HealthTracker, NetworkClient, NetworkError, ProgressCallbacks,
    ProgressEvent, RequestDescriptor, RetryPolicy, StreamError,
};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;
mod config;

use cli::{Args, Command, split_header};
use config::FileConfig;

/// Base URL used when neither the CLI nor the config file sets one.
const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let file_config = config::load(args.config.as_deref())?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config file > info
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => file_config.verbosity.map_or("info", |v| v.level()),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let base_url = args
        .base_url
        .clone()
        .or_else(|| file_config.base_url.clone())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    match args.command {
        Command::Probe { json } => run_probe(&file_config, &base_url, json).await,
        Command::Request {
            endpoint,
            method,
            headers,
            data,
            max_retries,
        } => {
            let request = RequestArgs {
                endpoint,
                method,
                headers,
                data,
                max_retries,
            };
            run_request(&file_config, &base_url, request).await
        }
        Command::Watch {
            job_id,
            lifetime_secs,
        } => run_watch(&file_config, &base_url, &job_id, lifetime_secs).await,
    }
}

fn build_client(base_url: &str, settings: &ClientSettings) -> Result<NetworkClient> {
    NetworkClient::new(base_url, settings, Arc::new(HealthTracker::new()))
        .with_context(|| format!("Failed to set up client for '{base_url}'"))
}

/// Resolves on Ctrl-C. Never resolves if the signal handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn run_probe(file_config: &FileConfig, base_url: &str, json: bool) -> Result<ExitCode> {
    let client = build_client(base_url, &file_config.client_settings())?;
    let report = client.check().await;

    if json {
        let output = serde_json::json!({
            "target": client.target().as_str(),
            "status": report.status,
            "error": report.error.as_ref().map(ErrorDetails::for_error),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if report.status.online {
        let latency = report
            .status
            .latency
            .map_or_else(|| "-".to_string(), |l| format!("{}ms", l.as_millis()));
        println!("{} is online (latency {latency})", client.target());
    } else {
        println!("{} is offline", client.target());
        if let Some(error) = &report.error {
            print_error(error);
        }
    }

    Ok(if report.status.online {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

struct RequestArgs {
    endpoint: String,
    method: String,
    headers: Vec<String>,
    data: Option<String>,
    max_retries: Option<u32>,
}

async fn run_request(
    file_config: &FileConfig,
    base_url: &str,
    args: RequestArgs,
) -> Result<ExitCode> {
    let client = build_client(base_url, &file_config.client_settings())?;

    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{}'", args.method))?;
    let mut request = RequestDescriptor::new(method, client.url_for(&args.endpoint));
    for raw in &args.headers {
        let (name, value) = split_header(raw)
            .with_context(|| format!("Invalid header '{raw}', expected 'Name: value'"))?;
        request = request.try_header(name, value)?;
    }
    if let Some(data) = &args.data {
        let body: serde_json::Value =
            serde_json::from_str(data).context("Request body is not valid JSON")?;
        request = request.json(&body)?;
    }

    let mut policy = file_config.retry_policy()?;
    if let Some(max_retries) = args.max_retries {
        policy = RetryPolicy::new(
            max_retries,
            policy.base_delay(),
            policy.max_delay(),
            policy.backoff_multiplier(),
        )?;
    }

    match client.execute(&request, &policy).await {
        Ok(response) => {
            info!(status = response.status().as_u16(), "request succeeded");
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;
            println!("{body}");
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            print_error(&error);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_watch(
    file_config: &FileConfig,
    base_url: &str,
    job_id: &str,
    lifetime_secs: Option<u64>,
) -> Result<ExitCode> {
    let mut settings = file_config.client_settings();
    if let Some(secs) = lifetime_secs {
        settings = settings.with_stream_lifetime(Duration::from_secs(secs));
    }
    let client = build_client(base_url, &settings)?;

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{bar:30}] {pos}/{len}")
            .context("Invalid progress bar template")?,
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let done = CancellationToken::new();
    let failed = Arc::new(AtomicBool::new(false));

    let callbacks = ProgressCallbacks::new({
        let bar = bar.clone();
        let done = done.clone();
        let failed = Arc::clone(&failed);
        move |event: ProgressEvent| {
            if let Some(total) = event.total {
                bar.set_length(total);
            }
            if let Some(current) = event.current {
                bar.set_position(current);
            }
            bar.set_message(event.stage.clone());
            if let Ok(line) = serde_json::to_string(&event) {
                bar.suspend(|| println!("{line}"));
            }

            if let Some(error) = &event.error {
                bar.suspend(|| eprintln!("job failed: {error}"));
                failed.store(true, Ordering::SeqCst);
            }
            if event.is_final() {
                done.cancel();
            }
        }
    })
    .on_error({
        let bar = bar.clone();
        let done = done.clone();
        let failed = Arc::clone(&failed);
        move |error: StreamError| {
            // The job already finished; the stream is only winding down.
            if done.is_cancelled() {
                return;
            }
            bar.suspend(|| eprintln!("stream error: {error}"));
            if let StreamError::Connection(network_error) = &error {
                let details = ErrorDetails::for_error(network_error);
                bar.suspend(|| eprintln!("{}: {}", details.title, details.suggested_action));
                failed.store(true, Ordering::SeqCst);
            }
        }
    })
    .on_close({
        let done = done.clone();
        move || done.cancel()
    });

    let handle = client.subscribe_progress(job_id, callbacks);
    tokio::select! {
        () = done.cancelled() => {}
        () = interrupted() => info!("interrupted, closing stream"),
    }
    handle.close();
    bar.finish_and_clear();

    Ok(if failed.load(Ordering::SeqCst) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_error(error: &NetworkError) {
    let details = ErrorDetails::for_error(error);
    eprintln!("error [{}]: {}", details.code, details.title);
    eprintln!("  {}", details.details);
    eprintln!("  {error}");
    if let Some(detail) = error.detail() {
        eprintln!("  server said: {detail}");
    }
    eprintln!("  {}", details.suggested_action);
}
