use anyhow::{bail, Context, Result};
use chunkdrop::common::{FileError, Manifest, TransferConfig};
use chunkdrop::credentials::{LinkMode, TransferCredentials};
use chunkdrop::qr::print_qr;
use chunkdrop::transfer::{
    Downloader, FileSink, FileStatus, ProgressTracker, TransferProgress, Uploader,
};
use chunkdrop::transport::HttpTransport;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Url;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(name = "chunkdrop")]
#[command(about = "End-to-end encrypted chunked file transfer through a relay")]
struct Cli {
    /// Config file, instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files or directories to a receive link
    Send {
        #[arg(required = true, help = "Files or directories to send")]
        paths: Vec<PathBuf>,

        #[arg(long, help = "Receive link including its #key fragment")]
        url: String,

        #[arg(long, help = "Send a single file as one framed stream")]
        stream: bool,
    },

    /// Download everything behind a send link
    Receive {
        #[arg(help = "Send link including its #key fragment")]
        url: String,

        #[arg(long, default_value = ".")]
        dest: PathBuf,

        #[arg(long, help = "Read the payload as one framed stream")]
        stream: bool,

        #[arg(long, default_value = "stream.bin", help = "Output name in stream mode")]
        name: String,

        #[arg(long, help = "Keep a stream the sender sent without a digest")]
        allow_unverified: bool,
    },

    /// Print a fresh share link with a random key and nonce
    Link {
        base_url: String,

        #[arg(help = "Relay token, random when omitted")]
        token: Option<String>,

        #[arg(long, help = "Link for the uploading side instead of the downloading side")]
        receive: bool,

        #[arg(long)]
        qr: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// `Ok(false)` when the run finished but some files failed
async fn run(cli: Cli) -> Result<bool> {
    let config = TransferConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Send { paths, url, stream } => send(paths, &url, stream, config).await,
        Commands::Receive {
            url,
            dest,
            stream,
            name,
            allow_unverified,
        } => receive(&url, &dest, stream, &name, allow_unverified, config).await,
        Commands::Link {
            base_url,
            token,
            receive,
            qr,
        } => {
            let origin = Url::parse(&base_url).context("invalid base url")?;
            let mode = if receive {
                LinkMode::Receive
            } else {
                LinkMode::Send
            };
            let token = token.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let link = TransferCredentials::generate(origin, mode, token).share_link();
            if qr {
                print_qr(&link)?;
            } else {
                println!("{link}");
            }
            Ok(true)
        }
        Commands::Config => {
            let rendered = toml::to_string_pretty(&config).context("rendering config")?;
            print!("{rendered}");
            Ok(true)
        }
    }
}

fn parse_link(url: &str, expected: LinkMode) -> Result<TransferCredentials> {
    let creds = TransferCredentials::parse(url)?;
    if creds.mode != expected {
        bail!(
            "expected a /{}/ link, got /{}/",
            expected.as_path(),
            creds.mode.as_path()
        );
    }
    Ok(creds)
}

async fn send(
    paths: Vec<PathBuf>,
    url: &str,
    stream: bool,
    config: TransferConfig,
) -> Result<bool> {
    for path in &paths {
        if !path.exists() {
            bail!("file not found: {}", path.display());
        }
    }

    let creds = parse_link(url, LinkMode::Receive)?;
    let transport = HttpTransport::from_credentials(&creds, &config)?;
    let uploader = Uploader::new(transport, &creds.key, config);
    let (bar, render) = spawn_progress(uploader.progress())?;

    if stream {
        let [path] = paths.as_slice() else {
            bail!("--stream sends exactly one file");
        };
        if !path.is_file() {
            bail!("--stream needs a regular file: {}", path.display());
        }
        let nonce = creds.require_nonce()?;
        let result = uploader.upload_stream(path, &nonce).await;
        finish_progress(bar, render);
        result.with_context(|| format!("streaming {}", path.display()))?;
        println!("Sent {}", path.display());
        return Ok(true);
    }

    let manifest = Manifest::from_paths(&paths)
        .await
        .context("building manifest")?;
    let report = uploader.upload_all(&manifest).await;
    finish_progress(bar, render);
    let report = report?;

    println!(
        "Sent {}/{} files",
        report.succeeded(),
        report.outcomes.len()
    );
    Ok(print_failures(report.failures()))
}

async fn receive(
    url: &str,
    dest: &Path,
    stream: bool,
    name: &str,
    allow_unverified: bool,
    config: TransferConfig,
) -> Result<bool> {
    let creds = parse_link(url, LinkMode::Send)?;
    let transport = HttpTransport::from_credentials(&creds, &config)?;
    let downloader =
        Downloader::new(transport, &creds.key, config).allow_unverified(allow_unverified);

    if stream {
        let nonce = creds.require_nonce()?;
        let target = dest.join(name);
        let sink = FileSink::create(&target).await?;

        let (bar, render) = spawn_progress(downloader.progress())?;
        let result = downloader.download_stream(&nonce, sink, None).await;
        finish_progress(bar, render);

        let done = result.context("receiving stream")?;
        if done.is_verified() {
            println!(
                "Received {} ({} bytes, sha256 {})",
                done.output.display(),
                done.size,
                hex::encode(done.digest)
            );
        } else {
            eprintln!(
                "WARNING: {} is UNVERIFIED: the sender supplied no digest, so a \
                 truncated stream cannot be told apart from a complete one",
                done.output.display()
            );
            println!(
                "Received {} ({} bytes, sha256 {}, unverified)",
                done.output.display(),
                done.size,
                hex::encode(done.digest)
            );
        }
        return Ok(true);
    }

    let manifest = downloader
        .fetch_manifest()
        .await
        .context("fetching manifest")?;
    let (bar, render) = spawn_progress(downloader.progress())?;
    let report = downloader.download_all(&manifest, dest).await;
    finish_progress(bar, render);
    let report = report?;

    for done in report.outcomes.iter().flatten() {
        println!("Received {}", done.output.display());
    }
    Ok(print_failures(report.failures()))
}

/// True when there was nothing to print
fn print_failures<'a>(failures: impl Iterator<Item = &'a FileError>) -> bool {
    let mut clean = true;
    for failure in failures {
        eprintln!("  failed: {failure}");
        clean = false;
    }
    clean
}

/// Render tracker snapshots on an indicatif bar until the transfer returns
fn spawn_progress(tracker: &ProgressTracker) -> Result<(ProgressBar, JoinHandle<()>)> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("#>-"),
    );

    let mut updates = tracker.subscribe();
    let task_bar = bar.clone();
    let render = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            task_bar.set_position(snapshot.percent as u64);
            task_bar.set_message(status_line(&snapshot));
        }
    });
    Ok((bar, render))
}

fn finish_progress(bar: ProgressBar, render: JoinHandle<()>) {
    render.abort();
    bar.finish_and_clear();
}

fn status_line(progress: &TransferProgress) -> String {
    let active = progress.files.iter().find_map(|file| match file.status {
        FileStatus::InProgress { completed, total } => Some((file, completed, total)),
        _ => None,
    });

    match active {
        Some((file, completed, 0)) => format!("{} ({completed} frames)", file.filename),
        Some((file, completed, total)) => {
            format!("{} ({completed}/{total} chunks)", file.filename)
        }
        None => format!(
            "{}/{} files",
            progress.completed_files,
            progress.files.len()
        ),
    }
}
