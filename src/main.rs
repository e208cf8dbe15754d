//! droidlink - attach browser debuggers to Android web views
//!
//! Main entry point: parses the command line, loads configuration and
//! runs one command against a debug session.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use droidlink::commands::{
    AttachCommand, DevicesCommand, ForwardCommand, OutputFormat, PagesCommand, WebViewsCommand,
};
use droidlink::core::{APP_NAME, VERSION};
use droidlink::session::{load_config, DebugSession};

#[derive(Parser)]
#[command(name = "droidlink")]
#[command(author, version, about = "Find and forward Android web views for debugging")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected devices
    #[command(alias = "ls")]
    Devices,

    /// List debuggable web views
    Webviews {
        /// Only search this device
        #[arg(short, long)]
        serial: Option<String>,

        /// Only show web views of this package
        #[arg(short, long)]
        package: Option<String>,
    },

    /// Forward a local port to a device socket until interrupted
    Forward {
        /// Device serial
        #[arg(short, long)]
        serial: String,

        /// Abstract socket name, e.g. chrome_devtools_remote
        #[arg(long)]
        socket: String,

        /// Local port; adb picks a free one when omitted
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Resolve an android-webview attach configuration
    Attach {
        /// JSON attach configuration
        file: Option<PathBuf>,

        /// Application whose web view to attach to
        #[arg(short, long)]
        package: Option<String>,

        /// Milliseconds to wait for the web view
        #[arg(short, long, value_name = "MS")]
        timeout: Option<u64>,

        /// Local port to forward to
        #[arg(long)]
        port: Option<u16>,
    },

    /// List the pages behind a forwarded port
    Pages {
        /// Forwarded local port
        #[arg(short, long)]
        port: u16,
    },
}

fn init_logging(verbose: bool) {
    // RUST_LOG wins over --verbose
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Load configuration and build a session rooted at the working directory
async fn open_session(config_path: Option<&PathBuf>) -> Result<DebugSession> {
    let config = load_config(config_path.map(PathBuf::as_path)).await?;
    let workspace_root = std::env::current_dir().context("Cannot determine working directory")?;
    Ok(DebugSession::from_config(&config, &workspace_root))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    debug!("{} v{} starting", APP_NAME, VERSION);

    let format = OutputFormat::from_json_flag(cli.json);
    let config = cli.config.as_ref();

    match cli.command {
        Commands::Devices => {
            let session = open_session(config).await?;
            DevicesCommand.execute(&session, format).await
        }
        Commands::Webviews { serial, package } => {
            let session = open_session(config).await?;
            WebViewsCommand { serial, package }
                .execute(&session, format)
                .await
        }
        Commands::Forward {
            serial,
            socket,
            port,
        } => {
            let session = open_session(config).await?;
            ForwardCommand {
                serial,
                socket,
                port,
            }
            .execute(&session, format)
            .await
        }
        Commands::Attach {
            file,
            package,
            timeout,
            port,
        } => {
            let session = open_session(config).await?;
            AttachCommand {
                file,
                package,
                timeout,
                port,
            }
            .execute(&session, format)
            .await
        }
        // talks to the forwarded port directly, no adb needed
        Commands::Pages { port } => PagesCommand { port }.execute(format).await,
    }
}
