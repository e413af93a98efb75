//! SFTP server binary: drives [`sftp_core::Session`] over stdio (the
//! normal `sshd` subsystem invocation) or, with `--listen`, a bare TCP
//! accept loop for local testing.

use std::path::PathBuf;

use clap::Parser;
use sftp_core::handlers::fs::FsHandler;
use sftp_core::{Config, LogFormat, Session};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (TOML). Overrides built-in defaults;
    /// individual flags below still override the file.
    #[arg(short, long)]
    config: Option<String>,

    /// Accept TCP connections on this address instead of speaking the
    /// protocol over stdio. Intended for local testing, not production
    /// use — the engine does no authentication of its own.
    #[arg(long)]
    listen: Option<String>,

    /// Root directory for SFTP operations.
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Reject all write-intent operations.
    #[arg(long)]
    readonly: bool,

    /// Debug-level logging (shorthand for `--log-level debug`).
    #[arg(long)]
    debug: bool,

    /// Log format.
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Log file path (logs to stderr if not specified).
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Some(root) = args.root.clone() {
        config.root_dir = root;
    }
    if args.readonly {
        config.readonly = true;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    if let Some(file) = args.log_file.clone() {
        config.logging.file = Some(file);
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    let _log_guard = init_logging(&config);

    if let Err(e) = config.validate() {
        error!(error = %e, "configuration validation failed");
        std::process::exit(1);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        root_dir = ?config.root_dir,
        readonly = config.readonly,
        pool_size = config.pool_size,
        "starting sftp-core"
    );

    let result = match &args.listen {
        Some(addr) => run_listener(addr, config).await,
        None => run_stdio(config).await,
    };

    if let Err(e) = result {
        error!(error = %e, "server encountered an error");
        std::process::exit(1);
    }
}

async fn run_stdio(config: Config) -> sftp_core::Result<()> {
    let handler = FsHandler::new(&config);
    let session = Session::new(tokio::io::stdin(), tokio::io::stdout(), handler, config);
    session.run().await
}

async fn run_listener(addr: &str, config: Config) -> sftp_core::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = addr, "listening for connections");

    loop {
        let (socket, peer) = listener.accept().await?;
        info!(%peer, "accepted connection");
        let config = config.clone();

        tokio::spawn(async move {
            let (reader, writer) = socket.into_split();
            let handler = FsHandler::new(&config);
            let session = Session::new(reader, writer, handler, config);
            if let Err(e) = session.run().await {
                warn!(%peer, error = %e, "connection ended with an error");
            }
        });
    }
}

fn init_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::new(config.logging.level.clone());

    if let Some(log_file) = &config.logging.file {
        if let Some(parent) = log_file.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    eprintln!("warning: failed to create log directory: {e}");
                    return init_stderr_logging(config, filter);
                }
            }
        }

        let file_name = log_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sftp-core.log".to_string());
        let dir = log_file.parent().filter(|p| !p.as_os_str().is_empty());
        let appender = match dir {
            Some(dir) => tracing_appender::rolling::daily(dir, file_name),
            None => tracing_appender::rolling::daily(".", file_name),
        };
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        match config.logging.format {
            LogFormat::Json => {
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(non_blocking)
                    .init();
            }
            LogFormat::Text => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(non_blocking)
                    .init();
            }
        }

        return Some(guard);
    }

    init_stderr_logging(config, filter)
}

fn init_stderr_logging(
    config: &Config,
    filter: EnvFilter,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    None
}
