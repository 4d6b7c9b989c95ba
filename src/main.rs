//! Virtucam service: publishes one virtual camera and runs until terminated

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use virtucam::device::PropertySource;
use virtucam::host::{ChannelSink, ClientInfo, LocalRegistry};
use virtucam::{Config, Discontinuity, Provider};

/// Samples buffered between the device and the local consumer
const SINK_DEPTH: usize = 4;

struct Args {
    config: Option<PathBuf>,
    preview: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: std::env::var_os("VIRTUCAM_CONFIG").map(PathBuf::from),
        preview: false,
    };
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--preview" => args.preview = true,
            flag if flag.starts_with("--") => return Err(eyre!("unknown flag {}", flag)),
            path => args.config = Some(PathBuf::from(path)),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "virtucam=info".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Virtucam launching...");
    let clock = virtucam::pipeline::host_clock();
    debug!("Host clock anchored, now {:.3}s", clock.now().as_secs_f64());

    let args = parse_args()?;
    let config = Config::load(args.config.as_deref())?;
    virtucam::CONFIG.store(Arc::new(config.clone()));

    // Local consumer standing in for the host's sample queue
    let (sink, samples) = ChannelSink::bounded(SINK_DEPTH);
    let _consumer = tokio::spawn(async move {
        let mut window = Instant::now();
        let mut frames = 0u32;
        while let Ok(delivery) = samples.recv_async().await {
            frames += 1;
            if delivery.discontinuity.contains(Discontinuity::SAMPLE_DROPPED) {
                warn!("frames dropped before sample {}", delivery.sample.sequence);
            }
            if window.elapsed() >= Duration::from_secs(1) {
                info!(
                    "{} frames/s, last pts {:.3}s",
                    frames,
                    delivery.sample.presentation_time.as_secs_f64()
                );
                frames = 0;
                window = Instant::now();
            }
        }
    });

    let registry = LocalRegistry::new();
    let provider = match Provider::new(&config, &registry, Arc::new(sink), Handle::current()) {
        Ok(provider) => provider,
        Err(e) => {
            error!("Service startup failed: {}", e);
            return Err(e.into());
        }
    };

    let properties = provider.query_properties(provider.available_properties());
    info!("Provider up: {}", properties.manufacturer().unwrap_or("unknown"));

    if args.preview {
        if let Some(stream) = provider.devices().first().and_then(|d| d.streams().first()) {
            provider.start_stream(stream.id(), &ClientInfo::new("virtucam-preview"))?;
        }
    }

    tokio::signal::ctrl_c().await?;

    info!("Virtucam shutting down");
    provider.shutdown_all_devices();
    for device in provider.devices() {
        let stats = device.stats();
        info!(
            "{}: {} frames emitted, {} dropped",
            device.name(),
            stats.frames_emitted,
            stats.frames_dropped
        );
    }
    Ok(())
}
