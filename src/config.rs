use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Transport limits applied by the websocket reader and writer.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub max_frame_size: Option<usize>,
    pub max_message_size: Option<usize>,
    /// How long a frame payload may take to arrive once its header was read.
    pub read_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
            read_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub web_socket_config: WebSocketConfig,
}

/// Number of per-second success samples kept to detect a stalled round.
pub const STALL_WINDOW: usize = 20;

/// Keeps every tick at least a millisecond apart.
pub const MAX_TICKS_PER_SECOND: u32 = 1000;

/// Shortest period any engine timer runs with, tokio intervals can't tick every 0ns.
pub const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

/// Pacing and termination settings for one round of a single engine.
#[derive(Debug, Clone)]
pub struct RoundConfig {
    /// Requests per second, per client.
    pub rate: u32,
    /// Requests each client sends per round.
    pub request_interval: u32,
    /// Number of evenly spaced ticks the rate is split into, every second.
    pub ticks_per_second: u32,
    /// How often the completion heuristic is evaluated once everything was sent.
    pub poll_interval: Duration,
    /// Success ratio above which a stalled round is considered done.
    pub success_threshold: f64,
    /// Polls after which a stalled round is given up regardless of its success ratio.
    pub max_polls: u32,
    /// Hard deadline for the completion phase.
    pub round_timeout: Duration,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            rate: 1000,
            request_interval: 1000,
            ticks_per_second: 20,
            poll_interval: Duration::from_secs(1),
            success_threshold: 0.9,
            max_polls: 100,
            round_timeout: Duration::from_secs(300),
        }
    }
}

impl RoundConfig {
    /// Requests sent on every tick. Rates lower than the tick count still send one
    /// request per tick.
    pub fn batch_size(&self) -> u32 {
        self.rate.div_ceil(self.ticks()).max(1)
    }

    /// ceil(request_interval * ticks_per_second / rate)
    pub fn total_ticks(&self) -> u32 {
        if self.request_interval == 0 {
            return 0;
        }
        let wanted = self.request_interval as u64 * self.ticks() as u64;
        wanted.div_ceil(self.rate.max(1) as u64) as u32
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.ticks()
    }

    pub fn poll_period(&self) -> Duration {
        self.poll_interval.max(MIN_TIMER_PERIOD)
    }

    fn ticks(&self) -> u32 {
        self.ticks_per_second.clamp(1, MAX_TICKS_PER_SECOND)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub round: RoundConfig,
}

impl EngineConfig {
    pub fn heartbeat_period(&self) -> Duration {
        self.heartbeat_interval.max(MIN_TIMER_PERIOD)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            reconnect_delay: Duration::from_millis(100),
            round: RoundConfig::default(),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "socket-flow-bench")]
#[command(about = "Drives concurrent websocket clients at a fixed rate and records round-trip latencies")]
pub struct BenchConfig {
    /// Address of the websocket server
    #[arg(long, env = "WEBSOCKET_ADDRESS", default_value = "127.0.0.1")]
    pub address: String,

    /// Port of the websocket server
    #[arg(long, env = "WEBSOCKET_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Requests per second sent by every client
    #[arg(long, env = "RATE", default_value_t = 1000, value_parser = clap::value_parser!(u32).range(1..))]
    pub rate: u32,

    /// Requests sent by every client in each round
    #[arg(long, env = "REQUEST_INTERVAL", default_value_t = 1000)]
    pub request_interval: u32,

    /// Clients added at the start of every round
    #[arg(long, env = "CONNECTION_INTERVAL", default_value_t = 10)]
    pub connection_interval: usize,

    /// Number of rounds to run
    #[arg(long, env = "ROUNDS", default_value_t = 1)]
    pub rounds: usize,

    /// Seconds to wait for connections, and for the responses of a round, before giving up
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    pub request_timeout: u64,

    /// Ticks the per-second rate is split into
    #[arg(long, env = "TICKS_PER_SECOND", default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=MAX_TICKS_PER_SECOND as i64))]
    pub ticks_per_second: u32,

    #[arg(long, env = "HEARTBEAT_INTERVAL_MS", default_value_t = 5000, value_parser = clap::value_parser!(u64).range(1..))]
    pub heartbeat_interval_ms: u64,

    #[arg(long, env = "RECONNECT_DELAY_MS", default_value_t = 100)]
    pub reconnect_delay_ms: u64,

    /// JSON array file every round result is appended to
    #[arg(long, env = "OUTPUT_FILE", default_value = "ws_output.json")]
    pub output_file: PathBuf,

    /// StatsD daemon receiving the request timings, e.g. 127.0.0.1:8125
    #[arg(long, env = "STATSD_ADDRESS")]
    pub statsd_address: Option<String>,

    #[arg(long, env = "STATSD_PREFIX", default_value = "ws_bench")]
    pub statsd_prefix: String,

    /// Append log output to this file instead of stderr
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl BenchConfig {
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.address, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            round: RoundConfig {
                rate: self.rate,
                request_interval: self.request_interval,
                ticks_per_second: self.ticks_per_second,
                round_timeout: self.request_timeout(),
                ..RoundConfig::default()
            },
        }
    }
}
