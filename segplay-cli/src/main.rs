mod cli;
mod error;
mod utils;

use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use clap::Parser;
use segplay_engine::error::SinkError;
use segplay_engine::hls::{
    AbrConfig, BufferConfig, FetcherConfig, HlsConfig, HlsPipeline, PlayerEvent, PlaylistConfig,
    RecoveryConfig, SegmentRef,
};
use segplay_engine::{
    HeadlessProbe, HttpConfig, HttpTransport, MediaSink, MediaSource, Player, ProgressiveSource,
    ProxyAuth, ProxyConfig, Transport,
};
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use url::Url;

use crate::cli::CliArgs;
use crate::error::{AppError, Result};
use crate::utils::{parse_headers, parse_params};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: CliArgs) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    let url = Url::parse(&args.url)
        .map_err(|e| AppError::InvalidInput(format!("invalid URL `{}`: {e}", args.url)))?;
    let config = Arc::new(build_config(&args)?);
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.http)?);
    let sink = Arc::new(StatsSink::default());

    if args.progressive {
        let duration = args.duration.ok_or_else(|| {
            AppError::InvalidInput("--duration is required with --progressive".to_string())
        })?;
        let source = Arc::new(ProgressiveSource::new(
            url,
            duration,
            transport,
            config,
            sink.clone(),
        ));
        let result = drive(source.clone(), &args).await;
        source.cancel();
        sink.log_summary();
        return result;
    }

    let (pipeline, events) = HlsPipeline::new(url, config, transport, sink.clone());
    let pipeline = Arc::new(pipeline);
    if let Some(level) = args.level {
        pipeline.pin_variant(level)?;
        info!(level, "Variant pinned");
    }

    let events_task = tokio::spawn(log_events(events));
    let runner = pipeline.clone();
    let run_task = tokio::spawn(async move { runner.run().await });

    let result = drive(pipeline.clone(), &args).await;
    pipeline.shutdown();
    let run_result = run_task.await?;
    events_task.abort();

    pipeline.metrics().log_summary();
    sink.log_summary();

    result?;
    run_result.map_err(AppError::from)
}

fn build_config(args: &CliArgs) -> Result<HlsConfig> {
    if !(args.safety_margin > 0.0 && args.safety_margin < 1.0) {
        return Err(AppError::InvalidInput(format!(
            "safety margin {} must be between 0 and 1",
            args.safety_margin
        )));
    }

    let mut http = HttpConfig::default().with_headers(parse_headers(&args.headers)?);
    http.params = parse_params(&args.params)?;
    http.connect_timeout = Duration::from_secs(args.connect_timeout);
    http.use_system_proxy = !args.no_system_proxy;
    http.danger_accept_invalid_certs = args.insecure;
    if let Some(proxy_url) = &args.proxy {
        let auth = match (&args.proxy_username, &args.proxy_password) {
            (Some(username), Some(password)) => Some(ProxyAuth {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        http.proxy = Some(ProxyConfig {
            url: proxy_url.clone(),
            proxy_type: args.proxy_type,
            auth,
        });
    }

    Ok(HlsConfig {
        http,
        playlist_config: PlaylistConfig {
            playlist_fetch_timeout: Duration::from_secs(args.playlist_timeout),
            ..Default::default()
        },
        fetcher_config: FetcherConfig {
            fetch_timeout: Duration::from_secs(args.timeout),
            max_retries: args.max_retries,
            retry_base_delay: Duration::from_millis(args.retry_delay_ms),
            max_concurrent_fetches: args.concurrency.max(1),
            ..Default::default()
        },
        buffer_config: BufferConfig {
            max_buffer_length: args.max_buffer,
            back_buffer_length: args.back_buffer,
        },
        abr_config: AbrConfig {
            safety_margin: args.safety_margin,
            initial_bandwidth_bps: args.initial_bandwidth,
            ..Default::default()
        },
        recovery_config: RecoveryConfig {
            max_recovery_attempts: args.max_recovery_attempts,
        },
    })
}

/// Drives the playback clock over `source` until the requested amount of
/// media has played, the presentation ends, or Ctrl-C is pressed.
async fn drive(source: Arc<dyn MediaSource>, args: &CliArgs) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut player = Player::new(source.clone(), &HeadlessProbe);
    player.set_playback_rate(args.rate)?;

    // The adaptive source knows its duration once the manifest is in.
    while source.duration().is_none() {
        if let Some(err) = source.terminal_error() {
            return Err(err.into());
        }
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted before the source loaded");
                return Ok(());
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
    }

    let start = args
        .seek
        .or_else(|| source.start_position())
        .unwrap_or(0.0);
    player.seek(start).await?;
    player.play()?;
    info!(
        position = player.current_time(),
        duration = ?player.duration(),
        "Playback started"
    );

    let tick = Duration::from_millis(args.tick_ms.max(10));
    let mut interval = tokio::time::interval(tick);
    let mut played = 0.0;
    let mut last_report = Instant::now();
    let mut was_stalled = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            _ = interval.tick() => {}
        }

        let before = player.current_time();
        player.tick(tick)?;
        played += player.current_time() - before;

        let stalled = player.stalled();
        if stalled != was_stalled {
            if stalled {
                warn!(position = player.current_time(), "Playback stalled");
            } else {
                info!(position = player.current_time(), "Playback resumed");
            }
            was_stalled = stalled;
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            info!(
                position = player.current_time(),
                buffered = player.buffered_ahead_of(player.current_time()),
                "Playing"
            );
        }

        if player.ended() {
            info!(position = player.current_time(), "Playback finished");
            break;
        }
        if args.play_for > 0.0 && played >= args.play_for {
            info!(played, "Played requested duration");
            break;
        }
    }
    Ok(())
}

async fn log_events(mut events: mpsc::UnboundedReceiver<PlayerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            PlayerEvent::ManifestLoaded {
                variants,
                is_live,
                duration,
            } => info!(variants, is_live, ?duration, "Manifest loaded"),
            PlayerEvent::VariantSwitched {
                from,
                to,
                bandwidth,
                reason,
            } => info!(?from, to, bandwidth, ?reason, "Variant switched"),
            PlayerEvent::FaultRaised {
                kind,
                stage,
                fatal: true,
                message,
            } => warn!(?kind, %stage, %message, "Fatal fault"),
            PlayerEvent::RecoveryStateChanged { from, to } => {
                info!(?from, ?to, "Recovery state changed")
            }
            PlayerEvent::Terminated { reason } => error!(%reason, "Playback terminated"),
            other => debug!(event = ?other, "Player event"),
        }
    }
}

/// Counts what would be handed to a decoder.
#[derive(Default)]
struct StatsSink {
    init_bytes: AtomicU64,
    segment_bytes: AtomicU64,
    segments: AtomicU64,
    resets: AtomicU64,
}

impl StatsSink {
    fn log_summary(&self) {
        info!(
            segments = self.segments.load(Ordering::Relaxed),
            segment_bytes = self.segment_bytes.load(Ordering::Relaxed),
            init_bytes = self.init_bytes.load(Ordering::Relaxed),
            resets = self.resets.load(Ordering::Relaxed),
            "Media delivered"
        );
    }
}

impl MediaSink for StatsSink {
    fn append_init(&self, _variant: usize, data: &Bytes) -> std::result::Result<(), SinkError> {
        self.init_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn append_segment(
        &self,
        _variant: usize,
        _segment: &SegmentRef,
        data: &Bytes,
    ) -> std::result::Result<(), SinkError> {
        self.segments.fetch_add(1, Ordering::Relaxed);
        self.segment_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_level(verbose))
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}
