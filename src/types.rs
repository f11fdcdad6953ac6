use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "alivehunter",
    version,
    about = "Bulk liveness prober with parked-domain false-positive filtering"
)]
pub struct Cli {
    #[arg(short = 'l', long = "list", value_name = "FILE", help = "Candidate list, one host/URL per line (- for stdin)")]
    pub list: String,

    #[arg(short, long, value_name = "FILE")]
    pub output: Option<String>,

    #[arg(long, value_enum, default_value_t = FileFormatArg::Text)]
    pub format: FileFormatArg,

    #[arg(short = 'p', long = "proxies", value_name = "FILE")]
    pub proxies: Option<String>,

    #[arg(long, value_name = "RPS", default_value_t = 10.0)]
    pub rate: f64,

    #[arg(short, long, value_name = "N", default_value_t = 10)]
    pub workers: usize,

    #[arg(long, value_name = "SECS", default_value_t = 15)]
    pub timeout: u64,

    #[arg(long, value_enum, default_value_t = ModeArg::Default)]
    pub mode: ModeArg,

    #[arg(long = "match-codes", value_name = "CODES", help = "Comma-separated status allow-list; replaces the built-in alive set")]
    pub match_codes: Option<String>,

    #[arg(long, default_value_t = false)]
    pub title: bool,

    #[arg(long, value_enum, default_value_t = TitleStrategyArg::Fast)]
    pub title_strategy: TitleStrategyArg,

    #[arg(long, default_value_t = false)]
    pub follow_redirects: bool,

    #[arg(long, default_value_t = false)]
    pub show_failed: bool,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum ModeArg {
    Fast,
    Default,
    Verify,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum TitleStrategyArg {
    Fast,
    Robust,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum FileFormatArg {
    Text,
    Jsonl,
    Csv,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataFormat {
    Text,
    Jsonl,
    Csv,
}

impl From<FileFormatArg> for DataFormat {
    fn from(value: FileFormatArg) -> Self {
        match value {
            FileFormatArg::Text => DataFormat::Text,
            FileFormatArg::Jsonl => DataFormat::Jsonl,
            FileFormatArg::Csv => DataFormat::Csv,
        }
    }
}

/// Terminal verdict for one candidate. Never mutated after it is put on the
/// event channel.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub url: String,
    pub status_code: u16,
    pub content_length: u64,
    pub response_time_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub alive: bool,
    pub verified: bool,
    pub checked_at: String,
}

impl ProbeResult {
    pub fn dead(url: String, error: String) -> Self {
        ProbeResult {
            url,
            status_code: 0,
            content_length: 0,
            response_time_ms: 0,
            title: None,
            server: None,
            redirect: None,
            error: Some(error),
            alive: false,
            verified: false,
            checked_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug)]
pub enum ScanEvent {
    Result(ProbeResult),
    Status(String),
    Error(String),
    Finished,
}

#[derive(Default)]
pub struct Stats {
    checked: AtomicU64,
    alive: AtomicU64,
    verified: AtomicU64,
    errored: AtomicU64,
}

impl Stats {
    pub fn record(&self, result: &ProbeResult) {
        self.checked.fetch_add(1, Ordering::Relaxed);
        if result.alive {
            self.alive.fetch_add(1, Ordering::Relaxed);
        }
        if result.verified {
            self.verified.fetch_add(1, Ordering::Relaxed);
        }
        if result.error.is_some() {
            self.errored.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            checked: self.checked.load(Ordering::Relaxed),
            alive: self.alive.load(Ordering::Relaxed),
            verified: self.verified.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub checked: u64,
    pub alive: u64,
    pub verified: u64,
    pub errored: u64,
}

impl StatsSnapshot {
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.checked as f64 / secs
        }
    }
}
