//! Sora client binary entry point
//!
//! Connects to a Sora SFU channel and keeps the media session alive,
//! reconnecting until Ctrl+C or a server-initiated disconnect.
//!
//! # Usage
//!
//! ```bash
//! # Publish to a channel
//! cargo run -p sora-client -- \
//!   --signaling-url wss://sora.example.com/signaling \
//!   --channel-id room-1
//!
//! # Receive a multistream channel with a config file
//! cargo run -p sora-client -- \
//!   --config ./sora.yaml \
//!   --role recvonly \
//!   --multistream
//! ```

use clap::Parser;
use sora_signaling::{ClientEvent, Phase, Role, SessionConfig, SoraClient};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sora SFU client
///
/// Keeps one WebRTC session connected to a Sora channel.
/// Command-line options override values loaded from `--config`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Session config file (YAML or JSON)
    #[arg(short, long, env = "SORA_CONFIG")]
    config: Option<PathBuf>,

    /// Signaling URL (ws:// or wss://)
    #[arg(long, env = "SORA_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// Channel id
    #[arg(long, env = "SORA_CHANNEL_ID")]
    channel_id: Option<String>,

    /// Media direction
    #[arg(long, value_enum, env = "SORA_ROLE")]
    role: Option<RoleArg>,

    /// Request multistream
    #[arg(long, env = "SORA_MULTISTREAM")]
    multistream: bool,

    /// Request simulcast
    #[arg(long, env = "SORA_SIMULCAST")]
    simulcast: bool,

    /// Request spotlight with this many spotlighted streams
    #[arg(long, env = "SORA_SPOTLIGHT_NUMBER")]
    spotlight_number: Option<u32>,

    /// Disable audio
    #[arg(long)]
    no_audio: bool,

    /// Disable video
    #[arg(long)]
    no_video: bool,

    /// Video codec (VP8, VP9, AV1, H264)
    #[arg(long, env = "SORA_VIDEO_CODEC")]
    video_codec: Option<String>,

    /// Video bitrate in kbps
    #[arg(long, env = "SORA_VIDEO_BIT_RATE")]
    video_bit_rate: Option<u32>,

    /// Audio codec (OPUS)
    #[arg(long, env = "SORA_AUDIO_CODEC")]
    audio_codec: Option<String>,

    /// Audio bitrate in kbps
    #[arg(long, env = "SORA_AUDIO_BIT_RATE")]
    audio_bit_rate: Option<u32>,

    /// Metadata for the auth webhook, as JSON
    #[arg(long, env = "SORA_METADATA")]
    metadata: Option<String>,

    /// Fixed local UDP port for media
    #[arg(long, env = "SORA_PORT")]
    port: Option<u16>,

    /// Skip TLS certificate verification
    #[arg(long, env = "SORA_INSECURE")]
    insecure: bool,

    /// Give up after this many reconnect attempts
    #[arg(long, env = "SORA_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Watchdog interval in milliseconds
    #[arg(long, env = "SORA_WATCHDOG_TIMEOUT_MS")]
    watchdog_timeout_ms: Option<u64>,

    /// Emit logs as JSON
    #[arg(long, env = "SORA_LOG_JSON")]
    log_json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum RoleArg {
    /// Publish only
    Sendonly,
    /// Subscribe only
    Recvonly,
    /// Publish and subscribe
    Sendrecv,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Sendonly => Role::SendOnly,
            RoleArg::Recvonly => Role::RecvOnly,
            RoleArg::Sendrecv => Role::SendRecv,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\n[SIGNAL] Ctrl+C received, closing session...");

        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("[SIGNAL] Shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }

        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(5));
            eprintln!("[WATCHDOG] Graceful shutdown timeout (5s), forcing exit");
            std::process::exit(0);
        });
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("sora-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(args.log_json);

    info!(version = env!("CARGO_PKG_VERSION"), "Sora client starting");

    let config = build_config(&args)?;
    config.validate()?;

    info!(
        signaling_url = %config.signaling_url,
        channel_id = %config.channel_id,
        role = %config.role,
        multistream = config.multistream,
        watchdog_timeout_ms = config.watchdog_timeout_ms,
        max_retries = ?config.reconnect.max_retries,
        "Configuration loaded"
    );

    let client = SoraClient::with_defaults(config);
    let events = client.subscribe();
    let logger = tokio::spawn(log_events(events));

    client.connect().await?;
    info!("Client running. Press Ctrl+C to shutdown.");

    while !shutdown_flag.load(Ordering::SeqCst) && client.phase() != Phase::Closed {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    if client.phase() == Phase::Closed {
        info!("Session closed");
    } else {
        info!("Shutdown signal received, cleaning up...");
    }

    client.close().await;
    logger.abort();
    info!("Sora client shut down gracefully");

    Ok(())
}

fn build_config(args: &Args) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            let config = SessionConfig::from_file(path)?;
            info!("Loaded session config: {:?}", path);
            config
        }
        None => SessionConfig::default(),
    };

    if let Some(url) = &args.signaling_url {
        config.signaling_url = url.clone();
    }
    if let Some(channel_id) = &args.channel_id {
        config.channel_id = channel_id.clone();
    }
    if let Some(role) = args.role {
        config.role = role.into();
    }
    if args.multistream {
        config.multistream = true;
    }
    if args.simulcast {
        config.simulcast = true;
    }
    if let Some(number) = args.spotlight_number {
        config.spotlight = true;
        config.spotlight_number = Some(number);
    }
    if args.no_audio {
        config.audio = false;
    }
    if args.no_video {
        config.video = false;
    }
    if args.video_codec.is_some() {
        config.video_codec_type = args.video_codec.clone();
    }
    if args.video_bit_rate.is_some() {
        config.video_bit_rate = args.video_bit_rate;
    }
    if args.audio_codec.is_some() {
        config.audio_codec_type = args.audio_codec.clone();
    }
    if args.audio_bit_rate.is_some() {
        config.audio_bit_rate = args.audio_bit_rate;
    }
    if let Some(metadata) = &args.metadata {
        config.metadata = Some(serde_json::from_str(metadata)?);
    }
    if args.port.is_some() {
        config.port = args.port;
    }
    if args.insecure {
        config.insecure = true;
    }
    if args.max_retries.is_some() {
        config.reconnect.max_retries = args.max_retries;
    }
    if let Some(ms) = args.watchdog_timeout_ms {
        config.watchdog_timeout_ms = ms;
    }

    Ok(config)
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<ClientEvent>) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::PhaseChanged { from, to }) => {
                info!(%from, %to, "Session phase changed")
            }
            Ok(ClientEvent::Reconnecting { retry, delay }) => {
                warn!(retry, ?delay, "Reconnecting")
            }
            Ok(ClientEvent::Notify(body)) => info!(event = %body, "notify"),
            Ok(ClientEvent::Push(body)) => info!(event = %body, "push"),
            Ok(ClientEvent::Switched(body)) => info!(event = %body, "switched"),
            Ok(ClientEvent::ProtocolError(message)) => warn!("Protocol error: {}", message),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
