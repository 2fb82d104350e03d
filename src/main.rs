//! fusion-mcp-bridge: MCP server bridging AI assistants to Fusion 360
//!
//! `serve` (the default) runs the protocol endpoint. `relay` runs the
//! command relay against a simulated host, for trying the bridge without
//! Fusion 360.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use fusion_mcp_bridge::config::{self, Config, TransportMode};
use fusion_mcp_bridge::endpoint::Bridge;
use fusion_mcp_bridge::exchange::{CommDir, StatusReport};
use fusion_mcp_bridge::mcp;
use fusion_mcp_bridge::relay::{Relay, SimulatedHost};

/// MCP server bridging AI assistants to Fusion 360.
///
/// Tool calls are written as command files into a shared directory and
/// answered by the add-in running inside Fusion 360.
#[derive(Parser, Debug)]
#[command(name = "fusion-mcp-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Shared command/response directory (overrides the config file)
    #[arg(long, value_name = "DIR", global = true)]
    comm_dir: Option<PathBuf>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run the MCP server (default)
    Serve(ServeArgs),
    /// Run the command relay against a simulated Fusion 360 host
    Relay,
}

#[derive(clap::Args, Debug, Default)]
struct ServeArgs {
    /// Transport to listen on
    #[arg(long, value_enum)]
    transport: Option<TransportMode>,

    /// Shorthand for --transport stdio
    #[arg(long, conflicts_with = "transport")]
    stdio: bool,

    /// TCP bind address
    #[arg(long)]
    host: Option<String>,

    /// TCP port
    #[arg(long)]
    port: Option<u16>,
}

impl ServeArgs {
    fn apply(&self, cfg: &mut Config) {
        if self.stdio {
            cfg.transport.mode = TransportMode::Stdio;
        } else if let Some(mode) = self.transport {
            cfg.transport.mode = mode;
        }
        if let Some(host) = &self.host {
            cfg.transport.host.clone_from(host);
        }
        if let Some(port) = self.port {
            cfg.transport.port = port;
        }
    }
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber. Logs go to stderr so stdout stays
/// free for the stdio transport.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config_path = args.config.as_deref();
    let mut cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = &args.comm_dir {
        cfg.comm_dir = Some(dir.clone());
    }
    let mode = args.mode.unwrap_or_else(|| Mode::Serve(ServeArgs::default()));
    if let Mode::Serve(serve) = &mode {
        serve.apply(&mut cfg);
    }
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {e}");
        return ExitCode::FAILURE;
    }

    init_tracing(get_log_level(args.verbose, args.quiet, &cfg.logging.level));

    // GPL license notice (GPLv3 Section 5d)
    eprintln!(
        "fusion-mcp-bridge {}  Copyright (C) 2026  The Fusion MCP Bridge Contributors",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("This program comes with ABSOLUTELY NO WARRANTY.");
    eprintln!("This is free software, licensed under GPL-3.0-or-later.");
    eprintln!();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let comm_dir = CommDir::new(cfg.resolved_comm_dir());
    let result = match mode {
        Mode::Serve(_) => runtime.block_on(serve(&cfg, comm_dir)),
        Mode::Relay => runtime.block_on(relay(&cfg, comm_dir)),
    };

    match result {
        Ok(()) => {
            info!("Shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn serve(cfg: &Config, comm_dir: CommDir) -> std::io::Result<()> {
    comm_dir
        .ensure()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        comm_dir = %comm_dir.path().display(),
        "Starting fusion-mcp-bridge server"
    );

    let bridge = Arc::new(Bridge::new(comm_dir, cfg.endpoint_settings()));
    match bridge.relay_status() {
        StatusReport::Running { host_version } => {
            info!(%host_version, "Fusion 360 add-in is running");
        }
        _ => warn!(
            "Fusion 360 add-in does not appear to be running. The server will start, \
             but tool calls will fail until the MCPserve add-in is started"
        ),
    }

    match cfg.transport.mode {
        TransportMode::Stdio => {
            info!("MCP server ready on stdio");
            mcp::serve_stdio(bridge, mcp::shutdown_signal()).await
        }
        TransportMode::Tcp => {
            let listener =
                tokio::net::TcpListener::bind((cfg.transport.host.as_str(), cfg.transport.port))
                    .await?;
            let addr: SocketAddr = listener.local_addr()?;
            info!(%addr, "MCP server listening");
            mcp::serve_tcp(listener, bridge, mcp::shutdown_signal()).await
        }
    }
}

async fn relay(cfg: &Config, comm_dir: CommDir) -> std::io::Result<()> {
    info!(comm_dir = %comm_dir.path().display(), "Starting simulated command relay");

    let relay = Relay::new(
        comm_dir,
        SimulatedHost::with_design("Demo Design"),
        cfg.relay_settings(),
    );
    let handle = relay.spawn()?;

    mcp::shutdown_signal().await;

    match handle.stop() {
        Ok(relay) => {
            info!(
                messages = relay.host().messages().len(),
                scripts = relay.host().scripts().len(),
                "Relay stopped"
            );
            Ok(())
        }
        Err(_) => Err(std::io::Error::other("relay thread panicked")),
    }
}
