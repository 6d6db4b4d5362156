use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use iolink_client::download::SinkStrategy;
use iolink_client::{
    ClientConfig, ReceiveFlow, RelayClient, SendFlow, ShareCommands, StatusCallback,
    StatusUpdate, Token, TransferOutcome, TransferReport, UploadMode, UploadSource,
};
use log::{debug, info};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// iolink - send and receive files through a token relay
#[derive(Parser)]
#[command(name = "iolink")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send and receive files through a token relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Relay base URL
    #[arg(long, global = true, env = "IOLINK_RELAY_URL", value_name = "URL")]
    relay: Option<String>,

    /// Print the final report as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Request a token and send a file once a receiver connects
    Send {
        /// File to send
        file: PathBuf,

        /// Content type of the upload (default application/octet-stream)
        #[arg(long, value_name = "TYPE")]
        content_type: Option<String>,

        /// Body binding: auto, streaming or multipart
        #[arg(long)]
        mode: Option<UploadMode>,
    },

    /// Download the file behind a token or share URL
    Receive {
        /// Token or full http(s) URL
        source: String,

        /// Directory to save into
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Sink: auto, disk or buffered
        #[arg(long)]
        sink: Option<SinkStrategy>,
    },

    /// Print the curl commands for an existing token
    Share {
        token: String,
    },
}

fn print_separator() {
    println!("\n{}\n", "-".repeat(80));
}

/// Observer that prints each new status line to stderr, plus the share
/// commands once the sending side has its token
fn status_printer(share_base: Option<String>) -> StatusCallback {
    let last_message = Mutex::new(String::new());
    let shared = AtomicBool::new(false);

    Arc::new(move |update: &StatusUpdate| {
        if let (Some(base), Some(token)) = (&share_base, &update.token) {
            if !shared.swap(true, Ordering::SeqCst) {
                print_separator();
                println!("{}", ShareCommands::new(base, token.clone()));
                print_separator();
            }
        }

        let mut last = last_message.lock().unwrap_or_else(|e| e.into_inner());
        if !update.message.is_empty() && *last != update.message {
            eprintln!("{}", update.message);
            *last = update.message.clone();
        }
    })
}

fn report_json(report: &TransferReport) -> serde_json::Value {
    json!({
        "session_id": report.session_id,
        "direction": format!("{:?}", report.direction).to_lowercase(),
        "token": report.token.as_ref().map(|t| t.to_string()),
        "resource_name": report.resource_name,
        "path": report.path.as_ref().map(|p| p.display().to_string()),
        "bytes": report.stats.bytes,
        "total_bytes": report.stats.total_bytes,
        "sha256": report.stats.sha256,
        "elapsed_ms": report.stats.elapsed.as_millis() as u64,
        "throughput_mbps": report.throughput_mbps(),
        "sink": report.sink.map(|s| s.to_string()),
        "binding": report.binding,
    })
}

fn finish(outcome: TransferOutcome, as_json: bool) -> Result<()> {
    match outcome {
        TransferOutcome::Completed(report) => {
            if as_json {
                println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
                return Ok(());
            }
            if let Some(path) = &report.path {
                println!("Saved: {}", path.display());
            }
            println!(
                "{} bytes in {:.2}s ({:.2} MB/s)",
                report.stats.bytes,
                report.stats.elapsed.as_secs_f64(),
                report.throughput_mbps()
            );
            println!("SHA-256: {}", report.stats.sha256);
            Ok(())
        }
        TransferOutcome::Failed {
            category,
            message,
            detail,
        } => {
            if as_json {
                let failure = json!({
                    "category": category.to_string(),
                    "message": message,
                    "detail": detail,
                });
                println!("{}", serde_json::to_string_pretty(&failure)?);
            }
            debug!("Failure detail: {}", detail);
            Err(anyhow!("{} ({})", message, category))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenv().ok();

    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env().context("Invalid configuration")?;
    if let Some(relay) = cli.relay {
        config.relay_url = relay;
    }
    config.validate()?;
    info!("Using relay at: {}", config.relay_url);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || {
        on_signal.cancel();
    })?;

    match cli.command {
        Commands::Send {
            file,
            content_type,
            mode,
        } => {
            if let Some(mode) = mode {
                config.upload_mode = mode;
            }
            let source = UploadSource::open(&file, config.chunk_size, content_type)
                .await
                .with_context(|| format!("Failed to open {}", file.display()))?;

            let printer = status_printer(Some(config.relay_url.clone()));
            let mut flow = SendFlow::new(&config, Some(printer))?;
            let outcome = flow.run(source, &cancel).await;
            finish(outcome, cli.json)
        }
        Commands::Receive { source, out, sink } => {
            if let Some(dir) = out {
                config.download_dir = dir;
            }
            if let Some(sink) = sink {
                config.sink = sink;
            }

            let mut flow = ReceiveFlow::new(&config, Some(status_printer(None)))?;
            let outcome = flow.run(&source, &cancel).await;
            finish(outcome, cli.json)
        }
        Commands::Share { token } => {
            let relay = RelayClient::new(&config)?;
            let token = Token::new(&token)?;
            let share = relay.share_commands(&token);

            if cli.json {
                let commands = json!({
                    "token": share.token().to_string(),
                    "url": share.share_url(),
                    "fetch_token": share.fetch_token(),
                    "upload": share.upload("FILE"),
                    "download": share.download(),
                });
                println!("{}", serde_json::to_string_pretty(&commands)?);
            } else {
                println!("{}", share);
            }
            Ok(())
        }
    }
}
