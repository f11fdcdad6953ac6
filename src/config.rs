use std::thread;
use std::time::Duration;

use crate::title::TitleStrategy;
use crate::types::{Cli, ModeArg, TitleStrategyArg};

pub const MAX_REDIRECT_HOPS: usize = 3;
pub const BODY_FETCH_CAP: usize = 10 * 1024;
pub const VERIFY_SCAN_PREFIX: usize = 2 * 1024;
pub const TITLE_SCAN_PREFIX: usize = 8 * 1024;

const RETRY_BACKOFF: Duration = Duration::from_millis(50);
const FAST_TIMEOUT_CEILING: Duration = Duration::from_secs(5);
const FALLBACK_WORKER_CEILING: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Fast,
    Default,
    Verify,
}

impl From<ModeArg> for Mode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Fast => Mode::Fast,
            ModeArg::Default => Mode::Default,
            ModeArg::Verify => Mode::Verify,
        }
    }
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Fast => "fast",
            Mode::Default => "default",
            Mode::Verify => "verify",
        }
    }
}

/// Bounded retry for a single protocol attempt. One object so the probe
/// client never hand-rolls sleep loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub const fn single(backoff: Duration) -> Self {
        RetryPolicy {
            max_attempts: 2,
            backoff,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub mode: Mode,
    pub workers: usize,
    pub rate: f64,
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    pub min_tls_version: reqwest::tls::Version,
    pub retry: RetryPolicy,
    pub match_codes: Option<Vec<u16>>,
    pub extract_title: bool,
    pub title_strategy: TitleStrategy,
    pub body_fetch_cap: usize,
    pub verify_scan_prefix: usize,
    pub title_scan_prefix: usize,
}

/// Resolves CLI input plus mode into the one immutable config the pool runs
/// on. Computed once at startup; the workers never look at the mode again
/// except through the fields derived here.
pub fn derive_effective_config(cli: &Cli) -> ProbeConfig {
    let mode = Mode::from(cli.mode);
    let base_timeout = Duration::from_secs(cli.timeout.max(1));

    let (workers, timeout, retry) = match mode {
        Mode::Fast => (
            clamp_workers(cli.workers.saturating_mul(2)),
            base_timeout.min(FAST_TIMEOUT_CEILING),
            RetryPolicy::none(),
        ),
        Mode::Default => (
            clamp_workers(cli.workers),
            base_timeout,
            RetryPolicy::single(RETRY_BACKOFF),
        ),
        Mode::Verify => (
            clamp_workers(cli.workers),
            base_timeout,
            RetryPolicy::single(RETRY_BACKOFF),
        ),
    };

    ProbeConfig {
        mode,
        workers,
        rate: cli.rate,
        timeout,
        follow_redirects: cli.follow_redirects,
        max_redirects: MAX_REDIRECT_HOPS,
        min_tls_version: reqwest::tls::Version::TLS_1_0,
        retry,
        match_codes: cli.match_codes.as_deref().map(parse_status_codes),
        extract_title: cli.title,
        title_strategy: match cli.title_strategy {
            TitleStrategyArg::Fast => TitleStrategy::Fast,
            TitleStrategyArg::Robust => TitleStrategy::Robust,
        },
        body_fetch_cap: BODY_FETCH_CAP,
        verify_scan_prefix: VERIFY_SCAN_PREFIX,
        title_scan_prefix: TITLE_SCAN_PREFIX,
    }
}

fn clamp_workers(value: usize) -> usize {
    let ceiling = thread::available_parallelism()
        .map(|n| n.get().saturating_mul(16))
        .unwrap_or(FALLBACK_WORKER_CEILING);
    value.clamp(1, ceiling.max(1))
}

/// Comma-separated status codes; tokens that do not parse are skipped.
pub fn parse_status_codes(raw: &str) -> Vec<u16> {
    raw.split(',')
        .filter_map(|token| token.trim().parse::<u16>().ok())
        .collect()
}
