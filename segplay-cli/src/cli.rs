use clap::Parser;
use segplay_engine::ProxyType;

#[derive(Parser, Debug)]
#[command(
    name = "segplay",
    author,
    version,
    about = "Headless adaptive HLS player",
    long_about = "Plays an HLS stream (or a single progressive file) without decoding it: \
                  playlists are loaded, segments are fetched with adaptive bitrate \
                  selection and fault recovery, and playback progress is reported."
)]
pub struct CliArgs {
    /// Playlist URL, or media file URL with --progressive
    pub url: String,

    /// Treat the URL as a single progressive media file
    #[arg(long)]
    pub progressive: bool,

    /// Duration in seconds of the progressive file
    #[arg(long, required_if_eq("progressive", "true"))]
    pub duration: Option<f64>,

    /// Pin a variant by index (0 = lowest bandwidth) instead of adaptive selection
    #[arg(short, long)]
    pub level: Option<usize>,

    /// Seconds of media to play before exiting (0 = until the end)
    #[arg(long, default_value_t = 30.0)]
    pub play_for: f64,

    /// Seek to this position before playing
    #[arg(long)]
    pub seek: Option<f64>,

    /// Playback rate
    #[arg(long, default_value_t = 1.0)]
    pub rate: f64,

    /// Playback clock resolution in milliseconds
    #[arg(long, default_value_t = 250)]
    pub tick_ms: u64,

    /// Maximum retries per request
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Base retry delay in milliseconds
    #[arg(long, default_value_t = 500)]
    pub retry_delay_ms: u64,

    /// Per-attempt segment timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// Per-attempt playlist timeout in seconds
    #[arg(long, default_value_t = 15)]
    pub playlist_timeout: u64,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Segment requests in flight at once
    #[arg(long, default_value_t = 2)]
    pub concurrency: usize,

    /// Forward buffer target in seconds
    #[arg(long, default_value_t = 30.0)]
    pub max_buffer: f64,

    /// Seconds kept behind the playhead
    #[arg(long, default_value_t = 30.0)]
    pub back_buffer: f64,

    /// Fraction of the estimated throughput a variant may use
    #[arg(long, default_value_t = 0.8)]
    pub safety_margin: f64,

    /// Bandwidth estimate in bits per second before any segment was measured
    #[arg(long, default_value_t = 1_000_000)]
    pub initial_bandwidth: u64,

    /// Recovery attempts before playback is terminated
    #[arg(long, default_value_t = 3)]
    pub max_recovery_attempts: u32,

    /// Extra request header, `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Extra query parameter, `key=value` (repeatable)
    #[arg(long = "param")]
    pub params: Vec<String>,

    /// Proxy server URL
    #[arg(long)]
    pub proxy: Option<String>,

    #[arg(long, value_enum, default_value = "http")]
    pub proxy_type: ProxyType,

    #[arg(long, requires = "proxy")]
    pub proxy_username: Option<String>,

    #[arg(long, requires = "proxy")]
    pub proxy_password: Option<String>,

    /// Ignore system proxy settings
    #[arg(long)]
    pub no_system_proxy: bool,

    /// Accept invalid TLS certificates
    #[arg(long)]
    pub insecure: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}
