//! `scatterd`: the Scatter daemon.
//!
//! Runs the local HTTP gateway, or performs a single transfer from the
//! command line against the configured backend.
//!
//! # Usage
//!
//! ```text
//! scatterd serve                          # start the gateway
//! scatterd -c scatter.toml serve          # with a config file
//! scatterd serve -l 0.0.0.0:4719 --memory # override address, in-memory blobs
//! scatterd upload ./movie.mkv             # print a share code
//! scatterd download <code> -o out.mkv     # fetch a file
//! scatterd download <code> --range 0-1023 # fetch the first KiB
//! scatterd info <code>                    # show what a code points to
//! ```

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use scatter_codec::encode_share;
use scatter_engine::{TaskKind, TransferEngine, TransferSettings, TransferTask, resolve};
use scatter_gateway::{GatewayConfig, GatewayServer, History};
use scatter_types::ByteRange;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "scatterd",
    version,
    about = "Scatter chunked file transfer daemon"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway.
    Serve {
        /// Override the listen address (e.g. "127.0.0.1:4719").
        #[arg(short = 'l', long)]
        listen_addr: Option<String>,

        /// Keep blobs in memory, whatever the config says.
        #[arg(short, long)]
        memory: bool,

        /// Require `?accessKey=<key>` on every API request.
        #[arg(long, env = "SCATTER_ACCESS_KEY")]
        access_key: Option<String>,
    },

    /// Upload a file and print its share code.
    Upload {
        /// File to upload.
        file: PathBuf,

        /// Name recorded in the share code (defaults to the file name).
        #[arg(short, long)]
        name: Option<String>,

        /// Print the long `scatter://` form instead of the compact code.
        #[arg(long)]
        verbose_code: bool,
    },

    /// Download the file behind a share code.
    Download {
        /// Share code, or text containing one.
        code: String,

        /// Output path. `-` writes to stdout. Defaults to the shared file name.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Inclusive byte range, `start-end` or `start-`.
        #[arg(long)]
        range: Option<String>,
    },

    /// Show what a share code points to.
    Info {
        /// Share code, or text containing one.
        code: String,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Serve {
            listen_addr,
            memory,
            access_key,
        } => {
            // CLI args override config file values.
            if let Some(addr) = listen_addr {
                config.server.listen_addr = addr;
            }
            if let Some(key) = access_key {
                config.server.access_key = key;
            }
            if memory {
                config.uploader.kind = "memory".to_string();
            }
            cmd_serve(config).await
        }
        Commands::Upload {
            file,
            name,
            verbose_code,
        } => cmd_upload(&config, &file, name, verbose_code).await,
        Commands::Download {
            code,
            output,
            range,
        } => cmd_download(&config, &code, output, range.as_deref()).await,
        Commands::Info { code } => cmd_info(&code),
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
/// Logs go to stderr so share codes and downloads on stdout stay clean.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_engine(config: &CliConfig) -> Result<Arc<TransferEngine>> {
    let uploader = config.build_uploader()?;
    let settings = Arc::new(TransferSettings::from_snapshot(config.transfer.snapshot()));
    info!(
        backend = uploader.name(),
        chunk_size = uploader.chunk_size(),
        upload_task_count = settings.upload_task_count(),
        download_task_count = settings.download_task_count(),
        request_retry_count = settings.request_retry_count(),
        "engine configuration"
    );
    Ok(Arc::new(TransferEngine::new(uploader, settings)))
}

// -----------------------------------------------------------------------
// scatterd serve
// -----------------------------------------------------------------------

async fn cmd_serve(config: CliConfig) -> Result<()> {
    info!("starting scatterd");
    let engine = build_engine(&config)?;
    if config.is_ephemeral() {
        warn!("memory backend: shared files disappear when scatterd exits");
    }

    let history = match config.history_path() {
        Some(path) => History::open(path)
            .await
            .with_context(|| format!("failed to load history from {}", path.display()))?,
        None => History::in_memory(),
    };

    let access_key = config.server.access_key.clone();
    if !access_key.is_empty() {
        info!("access key required on API requests");
    }

    let server = GatewayServer::new(GatewayConfig {
        engine: engine.clone(),
        history: Arc::new(history),
        access_key: Some(access_key),
        compact_codes: config.share.compact,
    });

    let shutdown = {
        let engine = engine.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested, cancelling transfers");
            engine.tasks().cancel_all();
        }
    };

    server
        .serve_with_shutdown(&config.server.listen_addr, shutdown)
        .await
        .context("gateway failed")?;

    let totals = engine.traffic();
    info!(
        uploaded = totals.uploaded,
        downloaded = totals.downloaded,
        "traffic totals"
    );
    Ok(())
}

// -----------------------------------------------------------------------
// scatterd upload
// -----------------------------------------------------------------------

async fn cmd_upload(
    config: &CliConfig,
    file: &Path,
    name: Option<String>,
    verbose_code: bool,
) -> Result<()> {
    let engine = build_engine(config)?;
    if config.is_ephemeral() {
        warn!("memory backend: this upload is gone once the command exits");
    }

    let source = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;
    let size = source.metadata().await?.len();
    let name = match name {
        Some(n) => n,
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("cannot derive a file name, pass --name")?,
    };

    let task = TransferTask::detached(TaskKind::Upload, &name, size);
    let progress = spawn_progress_logger(task.clone());
    let result = engine.uploads().upload(source, &name, size, &task).await;
    progress.abort();
    let descriptor = result.context("upload failed")?;

    let code = encode_share(&descriptor, config.share.compact && !verbose_code);
    task.complete(Some(code.clone()));
    info!(file = %name, size, "upload complete");
    println!("{code}");
    Ok(())
}

// -----------------------------------------------------------------------
// scatterd download
// -----------------------------------------------------------------------

async fn cmd_download(
    config: &CliConfig,
    code: &str,
    output: Option<PathBuf>,
    range: Option<&str>,
) -> Result<()> {
    let descriptor = resolve(code).context("invalid share code")?;
    let range = range
        .map(|r| parse_cli_range(r, descriptor.file_size))
        .transpose()?;
    let len = range.map_or(descriptor.file_size, |r| r.len());
    let engine = build_engine(config)?;

    let task = TransferTask::detached(TaskKind::Download, &descriptor.file_name, len);
    let progress = spawn_progress_logger(task.clone());

    let output = output.unwrap_or_else(|| default_output(&descriptor.file_name));
    let result = if output == Path::new("-") {
        let mut stdout = tokio::io::stdout();
        engine
            .downloads()
            .download_to(&descriptor, range, &mut stdout, task)
            .await
    } else {
        let mut file = tokio::fs::File::create(&output)
            .await
            .with_context(|| format!("failed to create {}", output.display()))?;
        engine
            .downloads()
            .download_to(&descriptor, range, &mut file, task)
            .await
    };
    progress.abort();
    let written = result.context("download failed")?;

    info!(
        file = %descriptor.file_name,
        bytes = written,
        output = %output.display(),
        "download complete"
    );
    Ok(())
}

/// Only the final path component of a shared name is used, so a crafted
/// name cannot write outside the working directory.
fn default_output(file_name: &str) -> PathBuf {
    Path::new(file_name)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("download.bin"))
}

/// Parse an inclusive `start-end` or open `start-` range.
fn parse_cli_range(s: &str, size: u64) -> Result<ByteRange> {
    let (start, end) = s
        .split_once('-')
        .with_context(|| format!("range must look like start-end: {s}"))?;
    let start: u64 = start
        .trim()
        .parse()
        .with_context(|| format!("bad range start: {s}"))?;
    let end = match end.trim() {
        "" => size,
        last => {
            let last: u64 = last.parse().with_context(|| format!("bad range end: {s}"))?;
            last.saturating_add(1)
        }
    };
    if start > end || end > size {
        bail!("range {s} does not fit a file of {size} bytes");
    }
    Ok(ByteRange { start, end })
}

/// Log progress at every tenth of the transfer.
fn spawn_progress_logger(task: Arc<TransferTask>) -> JoinHandle<()> {
    let mut rx = task.subscribe();
    tokio::spawn(async move {
        let mut last_step = 0u64;
        while rx.changed().await.is_ok() {
            let progress = *rx.borrow_and_update();
            let step = (progress.ratio() * 10.0) as u64;
            if step > last_step {
                last_step = step;
                info!(
                    file = task.file_name(),
                    done = progress.done,
                    total = progress.total,
                    "{}%",
                    step * 10
                );
            }
        }
    })
}

// -----------------------------------------------------------------------
// scatterd info
// -----------------------------------------------------------------------

fn cmd_info(code: &str) -> Result<()> {
    let descriptor = resolve(code).context("invalid share code")?;

    println!("Scatter share");
    println!("  name:      {}", descriptor.file_name);
    println!("  size:      {} bytes", descriptor.file_size);
    println!("  head size: {} bytes", descriptor.head_size);
    println!("  manifest:  {}", descriptor.url);
    if !descriptor.referer.is_empty() {
        println!("  referer:   {}", descriptor.referer);
    }
    Ok(())
}
