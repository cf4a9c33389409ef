// src/main.rs

use anyhow::{bail, Context, Result};
use clap::Parser;
use hubpull::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;

/// Download model repositories from a Hugging Face style hub.
#[derive(Debug, Parser)]
#[command(name = "hubpull", version)]
struct Args {
    /// Repository id, e.g. "org/model-part1"
    model_id: String,

    /// Directory to save the files into
    #[arg(long)]
    save_path: Option<PathBuf>,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not send a token even if one is configured
    #[arg(long)]
    no_auth: bool,

    /// Access token (falls back to HF_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Branch or commit to download from
    #[arg(long)]
    revision: Option<String>,

    /// Comma-separated list of files to download
    #[arg(long, value_delimiter = ',')]
    files: Option<Vec<String>>,

    /// Re-download files that already exist
    #[arg(long)]
    no_resume: bool,

    /// Don't automatically continue with the next part
    #[arg(long)]
    no_auto_next: bool,

    /// Global speed limit in KB/s, 0 for unlimited
    #[arg(long)]
    rate_limit: Option<u64>,

    /// Files downloaded at once, 0 for all of them
    #[arg(long)]
    parallel: Option<usize>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<DownloaderConfig> {
    let mut config = match &args.config {
        Some(path) => DownloaderConfig::from_file(path)?,
        None => DownloaderConfig::default(),
    };
    if let Some(token) = &args.token {
        config.token = Some(token.clone());
    }
    config = config.with_env();
    if args.no_auth {
        config.token = None;
    }
    if let Some(dir) = &args.save_path {
        config.output_dir = dir.clone();
    }
    if let Some(rate) = args.rate_limit {
        config.rate_limit_kib = rate;
    }
    if let Some(parallel) = args.parallel {
        config.max_concurrent_files = parallel;
    }
    if args.no_resume {
        config.resume = false;
    }
    if args.no_auto_next {
        config.auto_continue = false;
    }
    Ok(config)
}

fn summarize(outcome: &BatchOutcome) -> usize {
    let Some(report) = outcome.report() else {
        println!("Skipped: already downloading.");
        return 0;
    };
    println!(
        "{}: {} downloaded, {} failed{}",
        report.repo_id,
        report.succeeded.len(),
        report.failed.len(),
        if report.cancelled { ", cancelled" } else { "" }
    );
    for failure in &report.failed {
        println!("  ✗ {} ({:?}): {}", failure.filename, failure.kind, failure.message);
    }

    let mut failures = report.failed.len();
    match &report.continuation {
        Some(Continuation::Started(next)) => failures += summarize(next),
        Some(Continuation::AlreadyActive(next)) => println!("Next part {} already active.", next),
        Some(Continuation::Failed { repo_id, error }) => println!("Next part {}: {}", repo_id, error),
        None => {}
    }
    failures
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    let config = load_config(&args)?;
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating {}", config.output_dir.display()))?;

    let hub = Arc::new(HubClient::from_config(&config)?);
    let mut options = BatchOptions::from_config(&config);
    options.revision = args.revision.clone();
    options.file_filter = args.files.clone().map(|files| files.into_iter().collect());

    let session = Arc::new(DownloadSession::new(
        config,
        hub.clone(),
        hub,
        Arc::new(TracingObserver),
    ));

    {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                session.cancel();
            }
        });
    }

    let outcome = session.start_batch(&args.model_id, options).await?;
    let failures = summarize(&outcome);
    println!("Files are in {}", session.output_dir().display());
    if failures > 0 {
        bail!("{} file(s) failed to download", failures);
    }
    Ok(())
}
