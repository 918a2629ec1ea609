//! camlink entry point.
//!
//! ```text
//! camlink serve                      Stream the camera to consumers
//! camlink connect -i <ip> -p <port>  Receive and render a stream
//! camlink local                      Capture and render without a network
//! camlink --config <path>            Load a custom config TOML
//! camlink --gen-config               Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use camlink::config::{CamlinkConfig, Overrides};
use camlink::service;
use camlink_core::PixelFormat;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "camlink", version, about = "Stream raw camera frames over TCP")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "camlink.toml", global = true)]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Frame width in pixels.
    #[arg(short = 'x', long, global = true)]
    width: Option<u32>,

    /// Frame height in pixels.
    #[arg(short = 'y', long, global = true)]
    height: Option<u32>,

    /// Pixel format FourCC (YUYV, UYVY, RGB3, BGR3, GREY).
    #[arg(short = 'f', long, global = true)]
    format: Option<PixelFormat>,

    /// Producer address to connect to.
    #[arg(short = 'i', long = "ip", global = true)]
    ip: Option<String>,

    /// TCP port.
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Capture device path, or "synthetic" for a test pattern.
    #[arg(long, global = true)]
    device: Option<String>,

    /// Write raw frames to this file ("-" for stdout).
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Stop after this many frames.
    #[arg(short = 'n', long, global = true)]
    frames: Option<u64>,

    /// Debug logging.
    #[arg(short = 'd', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Own the camera and stream it to consumers.
    Serve,
    /// Receive a stream from a producer.
    Connect,
    /// Capture and render in this process.
    Local,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            width: self.width,
            height: self.height,
            pixel_format: self.format,
            address: self.ip.clone(),
            port: self.port,
            device: self.device.clone(),
            output: self.output.clone(),
            frames: self.frames,
            verbose: self.verbose,
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&CamlinkConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let Some(command) = cli.command else {
        Cli::command()
            .error(
                ErrorKind::MissingSubcommand,
                "choose a role: serve, connect or local",
            )
            .exit();
    };

    // Load config. The outcome is logged once tracing is up.
    let (mut config, source) = CamlinkConfig::load(&cli.config);
    config.apply(&cli.overrides());

    // Init tracing. Logs go to stderr so raw frames can use stdout.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("camlink v{}", env!("CARGO_PKG_VERSION"));
    source.log();
    config.validate()?;
    info!("stream: {}", config.stream_config());
    info!("port: {}", config.network.port);

    // Ctrl-C handler.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        on_signal.cancel();
    });

    match command {
        Command::Serve => {
            let served = service::serve(&config, cancel).await?;
            info!("served {served} sessions");
        }
        Command::Connect => {
            let stats = service::watch(&config, &cancel).await?;
            info!("received {} frames at {:.1} fps", stats.frames, stats.fps());
        }
        Command::Local => {
            let stats = service::local(&config, &cancel).await?;
            info!("captured {} frames at {:.1} fps", stats.frames, stats.fps());
        }
    }

    Ok(())
}
