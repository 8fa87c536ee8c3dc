use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::StreamExt;
use lanevision::{ClientConfig, Endpoint, ImagePayload, LaneVision, SessionState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Stream a video through a lane-detection service, one frame at a time
#[derive(Parser, Debug)]
#[command(name = "lanevision", version)]
#[command(about = "Stream a video to a lane-detection service and save the processed frames")]
struct Args {
    /// Animated GIF, still image, or directory of PNG/JPEG frames
    media: PathBuf,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Processing service, e.g. localhost:5001 or http://lanes.local:5001
    #[arg(short, long)]
    endpoint: Option<Endpoint>,

    /// Where the latest processed frame is written
    #[arg(short, long, default_value = "processed.jpg")]
    output: PathBuf,

    /// Capture rate cap in Hz (defaults to 60)
    #[arg(long)]
    refresh_hz: Option<u32>,

    /// JPEG quality of outgoing frames, 1-100
    #[arg(short, long)]
    quality: Option<u8>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    let client = LaneVision::connect(config).await?;
    client
        .upload(&args.media)
        .await
        .with_context(|| format!("cannot open {}", args.media.display()))?;
    client.start().await.context("cannot start streaming")?;

    let mut display = client.display_updates();
    let mut sessions = client.session_updates();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut written = 0u64;
    let mut shown_error: Option<String> = None;

    loop {
        tokio::select! {
            biased;

            _ = &mut ctrl_c => {
                info!("Interrupted, stopping");
                client.stop().await?;
                break;
            }

            Some(state) = display.next() => {
                if let Some(frame) = &state.frame {
                    write_frame(&args.output, frame)?;
                    written += 1;
                }
                if state.error != shown_error {
                    if let Some(error) = &state.error {
                        warn!("{}", error);
                    }
                    shown_error = state.error;
                }
            }

            Some(snapshot) = sessions.next() => match snapshot.state {
                SessionState::Ended => {
                    info!(
                        sent = snapshot.stats.frames_sent,
                        processed = snapshot.stats.results_received,
                        errors = snapshot.stats.processing_errors,
                        "Video ended"
                    );
                    break;
                }
                SessionState::Error => {
                    let reason = snapshot
                        .last_error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "unknown error".to_string());
                    bail!("streaming failed: {}", reason);
                }
                _ => {}
            },

            else => break,
        }
    }

    client.shutdown();
    info!(written, output = %args.output.display(), "Done");
    Ok(())
}

fn build_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("cannot load configuration from {}", path.display()))?,
        None => ClientConfig::default(),
    };

    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    if args.refresh_hz.is_some() {
        config.refresh_hz = args.refresh_hz;
    }
    if let Some(quality) = args.quality {
        config.jpeg_quality = quality;
    }

    config.validate()?;
    Ok(config)
}

fn write_frame(path: &Path, frame: &ImagePayload) -> Result<()> {
    std::fs::write(path, &frame.data[..])
        .with_context(|| format!("cannot write {}", path.display()))
}
