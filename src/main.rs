use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use wrist_config::AppConfig;
use wrist_link::PeerSession;
use wrist_motion::SimulatedMotion;
use wrist_relay::{Relay, RelaySettings, UdpTransport};
use wrist_sampler::{Sampler, SamplerSettings};

#[derive(Parser)]
#[command(version, about = "Wrist motion sampler and companion UDP relay")]
struct Cli {
    /// Config file (defaults to the per-user config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture motion and stream it to the companion.
    Sampler {
        /// Companion address to dial.
        #[arg(long)]
        peer: Option<String>,
        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Accept motion from the wearable and forward it to the collector.
    Relay {
        /// Address to listen on for the wearable.
        #[arg(long)]
        peer: Option<String>,
        #[arg(long)]
        collector_host: Option<String>,
        #[arg(long)]
        collector_port: Option<u16>,
    },
    /// Write a config file populated with defaults.
    InitConfig,
}

/// A missing file yields defaults; an unreadable or malformed one is fatal.
fn load(path: Option<&PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => wrist_config::load_config_from(path),
        None => wrist_config::load_config(),
    }
    .context("Failed to load config")?;
    info!(source = %config.source_tag, collector = %config.collector.endpoint(), "Config loaded");
    Ok(config)
}

async fn run_sampler(config: AppConfig, duration: Option<f64>) -> Result<()> {
    info!(
        peer = %config.peer.addr,
        interval_ms = config.sampler.interval_ms,
        "Starting wearable sampler"
    );

    let (session, peer_events) =
        PeerSession::wearable(config.peer.addr.clone(), config.peer.reconnect_interval());
    let sampler = Sampler::spawn(
        SamplerSettings {
            source_tag: config.source_tag.clone(),
            interval: config.sampler.interval(),
        },
        SimulatedMotion::new(),
        session,
        peer_events,
    );
    sampler.start_recording();

    let stop = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(?e, "Failed to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            }
        }
    };
    tokio::pin!(stop);

    let mut heartbeat = tokio::time::interval(config.status_interval());
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = heartbeat.tick() => {
                let status = sampler.status();
                info!(
                    recording = status.is_recording,
                    peer_reachable = status.peer_reachable,
                    samples = status.sample_count,
                    "Sampler heartbeat"
                );
            }
        }
    }

    let status = sampler.shutdown().await;
    info!(samples = status.sample_count, "Sampler stopped");
    Ok(())
}

async fn run_relay(config: AppConfig) -> Result<()> {
    let endpoint = config.collector.endpoint();
    info!(peer = %config.peer.addr, collector = %endpoint, "Starting companion relay");

    let (session, peer_events) = PeerSession::companion(&config.peer.addr)
        .await
        .context("Failed to start peer session")?;
    let (transport, transport_events) =
        UdpTransport::start(endpoint, config.collector.retry_interval());
    let relay = Relay::spawn(
        RelaySettings {
            default_source: config.source_tag.clone(),
            rate_window: Duration::from_secs_f64(config.rate.window_secs.max(0.001)),
            rate_min_samples: config.rate.min_samples,
            ..RelaySettings::default()
        },
        session,
        peer_events,
        transport,
        transport_events,
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut heartbeat = tokio::time::interval(config.status_interval());
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!(?e, "Failed to listen for Ctrl-C");
                }
                break;
            }
            _ = heartbeat.tick() => {
                let status = relay.status();
                info!(
                    peer_reachable = status.peer_reachable,
                    collector_reachable = status.collector_reachable,
                    packets = status.packets_forwarded,
                    rate = %format!("{:.1} Hz", status.data_rate),
                    "Relay heartbeat"
                );
            }
        }
    }

    let status = relay.shutdown().await;
    info!(packets = status.packets_forwarded, "Relay shut down");
    Ok(())
}

fn init_config(path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::default();
    match path {
        Some(path) => wrist_config::save_config_to(&config, &path),
        None => wrist_config::save_config(&config),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "wrist_app=info,wrist_relay=info,wrist_sampler=info,wrist_link=info,wrist_motion=info"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Sampler { peer, duration } => {
            let mut config = load(cli.config.as_ref())?;
            if let Some(peer) = peer {
                config.peer.addr = peer;
            }
            run_sampler(config, duration).await
        }
        Command::Relay {
            peer,
            collector_host,
            collector_port,
        } => {
            let mut config = load(cli.config.as_ref())?;
            if let Some(peer) = peer {
                config.peer.addr = peer;
            }
            if let Some(host) = collector_host {
                config.collector.host = host;
            }
            if let Some(port) = collector_port {
                config.collector.port = port;
            }
            run_relay(config).await
        }
        Command::InitConfig => init_config(cli.config),
    }
}
