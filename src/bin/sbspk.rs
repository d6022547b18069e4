//! `sbspk` command line: fetch kernels for a list of objects

use clap::{ArgGroup, Parser};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

use sbspk::{Config, Event, SpkRetriever, cancel_on_signal, parse_object_list};

#[derive(Parser, Debug)]
#[command(name = "sbspk", version)]
#[command(about = "Retrieve small-body SPICE SPK kernels from the JPL Horizons system")]
#[command(group(ArgGroup::new("input").required(true).args(["objects", "targets", "file"])))]
struct Cli {
    /// Object identifiers (SPK ID, number, designation or name)
    #[arg(value_name = "TARGET")]
    objects: Vec<String>,

    /// One or many object identifiers
    #[arg(short = 't', value_name = "TARGET", num_args = 1..)]
    targets: Vec<String>,

    /// File with one object identifier per line
    #[arg(short = 'f', value_name = "FILE")]
    file: Option<PathBuf>,

    /// Verbose (debug) logging
    #[arg(short = 'v')]
    verbose: bool,

    /// Contact e-mail registered with Horizons
    #[arg(long)]
    email: Option<String>,

    /// Kernel start date (yyyy-mm-dd)
    #[arg(long, value_name = "DATE")]
    start: Option<String>,

    /// Kernel stop date (yyyy-mm-dd)
    #[arg(long, value_name = "DATE")]
    stop: Option<String>,

    /// File name template with <OBJID> and <TARGET>
    #[arg(long, value_name = "TEMPLATE")]
    format: Option<String>,

    /// Output directory (default: current directory)
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Seconds to wait for each prompt
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Show download progress
    #[arg(long)]
    progress: bool,

    /// Record number to pick when the object is ambiguous
    #[arg(long, value_name = "RECORD")]
    select: Option<String>,

    /// Horizons host
    #[arg(long)]
    host: Option<String>,

    /// Horizons telnet port
    #[arg(long)]
    port: Option<u16>,

    /// Restarts of a negotiation after a connection failure or timeout
    #[arg(long, value_name = "N")]
    retries: Option<u32>,

    /// Negotiations to run at once
    #[arg(long, value_name = "N")]
    jobs: Option<usize>,

    /// JSON configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error[{}]: {e}", e.kind());
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,sbspk={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> sbspk::Result<ExitCode> {
    let objects = match &cli.file {
        Some(path) => parse_object_list(&std::fs::read_to_string(path)?),
        None => cli
            .objects
            .iter()
            .chain(&cli.targets)
            .map(|object| object.trim().to_string())
            .filter(|object| !object.is_empty())
            .collect(),
    };
    if objects.is_empty() {
        return Err(sbspk::Error::config("no object identifiers given", "objects"));
    }

    let config = build_config(&cli)?;
    let retriever = SpkRetriever::new(config)?;
    tokio::spawn(cancel_on_signal(retriever.clone()));

    let printer = cli
        .progress
        .then(|| tokio::spawn(print_progress(retriever.subscribe())));

    let results = retriever.retrieve_each(&objects).await;

    if let Some(printer) = printer {
        printer.abort();
    }

    let mut failed = false;
    for (object, result) in results {
        match result {
            Ok(kernel) => println!("{}\t{}", kernel.path.display(), kernel.object_id),
            Err(e) => {
                failed = true;
                eprintln!("error[{}]: {object}: {e}", e.kind());
            }
        }
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn build_config(cli: &Cli) -> sbspk::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };

    if let Some(email) = &cli.email {
        config.session.email = email.clone();
    }
    if let Some(start) = &cli.start {
        config.session.start_date = start.clone();
    }
    if let Some(stop) = &cli.stop {
        config.session.stop_date = stop.clone();
    }
    if let Some(format) = &cli.format {
        config.session.file_format = format.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.session.timeout = Duration::from_secs(timeout);
    }
    if cli.progress {
        config.session.progress = true;
    }
    if let Some(select) = &cli.select {
        config.session.selection = Some(select.clone());
    }
    if let Some(dir) = &cli.dir {
        config.output_dir = dir.clone();
    }
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(retries) = cli.retries {
        config.retry.max_attempts = retries;
    }
    if let Some(jobs) = cli.jobs {
        config.max_concurrent = jobs;
    }

    Ok(config)
}

/// Render transfer progress on stderr until the channel closes
async fn print_progress(mut events: broadcast::Receiver<Event>) {
    let mut in_line = false;
    loop {
        match events.recv().await {
            Ok(Event::TransferProgress {
                object,
                received,
                percent,
                ..
            }) => {
                match percent {
                    Some(percent) => eprint!("\r{object}: Downloading kernel... {percent:3}%"),
                    None => eprint!("\r{object}: Downloading kernel... {received} bytes"),
                }
                std::io::stderr().flush().ok();
                in_line = true;
            }
            Ok(Event::Completed { .. }) if in_line => {
                eprintln!("  Done.");
                in_line = false;
            }
            Ok(Event::Failed { .. }) if in_line => {
                eprintln!();
                in_line = false;
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
}
