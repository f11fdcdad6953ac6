use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::{Mode, derive_effective_config};
use crate::data_io::{OutputSink, default_output_path, detect_data_format, load_candidates, load_proxies};
use crate::rate::{CancelToken, RateLimiter};
use crate::scan::run_scan;
use crate::transport::TransportPool;
use crate::types::{Cli, DataFormat, ScanEvent, Stats};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run() -> io::Result<()> {
    let cli = Cli::parse();
    let started = Instant::now();

    let config = Arc::new(derive_effective_config(&cli));

    let candidates = load_candidates(&cli.list)?;
    if candidates.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no candidates found in {}", cli.list),
        ));
    }
    let total = candidates.len();

    let proxies = match cli.proxies.as_deref() {
        Some(path) => load_proxies(path)?,
        None => Vec::new(),
    };
    let (transports, skipped_proxies) = TransportPool::build(&config, &proxies)
        .map_err(|err| io::Error::other(err))?;
    let transports = Arc::new(transports);

    let configured_format: DataFormat = cli.format.into();
    let output_format = cli
        .output
        .as_deref()
        .map(|path| detect_data_format(path, configured_format))
        .unwrap_or(configured_format);
    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.list, output_format));
    let mut sink = OutputSink::new(&output_path, output_format, cli.show_failed)?;

    eprintln!(
        "probing {total} candidates: mode={} workers={} rate={}/s transports={} output={output_path}",
        config.mode.label(),
        config.workers,
        config.rate,
        transports.len()
    );
    if skipped_proxies > 0 {
        eprintln!("skipped {skipped_proxies} unusable proxy entries");
    }

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupt received, stopping dispatch");
                cancel.cancel();
            }
        });
    }

    // Fast mode runs unthrottled; otherwise one shared bucket gates all
    // workers.
    let limiter = match config.mode {
        Mode::Fast => None,
        _ => Some(Arc::new(RateLimiter::new(config.rate))),
    };

    let stats = Arc::new(Stats::default());
    // Bounded to the worker count; a slow sink backpressures the pool
    // instead of buffering the whole run in memory.
    let (tx, mut rx) = mpsc::channel::<ScanEvent>(config.workers);
    let scan_handle = tokio::spawn(run_scan(
        candidates,
        config.clone(),
        transports,
        limiter,
        stats.clone(),
        cancel.clone(),
        tx,
    ));

    let mut progress = tokio::time::interval(PROGRESS_INTERVAL);
    progress.set_missed_tick_behavior(MissedTickBehavior::Skip);
    progress.tick().await; // the first tick fires immediately

    let mut done = false;
    while !done {
        tokio::select! {
            event = rx.recv() => match event {
                Some(ScanEvent::Result(result)) => sink.write_result(&result)?,
                Some(ScanEvent::Status(message)) => eprintln!("{message}"),
                Some(ScanEvent::Error(error)) => eprintln!("{error}"),
                Some(ScanEvent::Finished) | None => done = true,
            },
            _ = progress.tick() => {
                let snap = stats.snapshot();
                eprintln!(
                    "checked {}/{} alive={} verified={} errors={} ({:.1}/s)",
                    snap.checked,
                    total,
                    snap.alive,
                    snap.verified,
                    snap.errored,
                    snap.throughput(started.elapsed())
                );
            }
        }
    }

    // Finished can land before buffered results are drained.
    while let Ok(event) = rx.try_recv() {
        if let ScanEvent::Result(result) = event {
            sink.write_result(&result)?;
        }
    }
    sink.finalize()?;

    if let Err(err) = scan_handle.await {
        eprintln!("scan task join error: {err}");
    }

    let snap = stats.snapshot();
    if cancel.is_cancelled() {
        eprintln!("run interrupted; partial results written");
    }
    eprintln!(
        "processed {} of {total} candidates: alive={} verified={} errors={} in {:.1}s",
        snap.checked,
        snap.alive,
        snap.verified,
        snap.errored,
        started.elapsed().as_secs_f64()
    );
    eprintln!("results saved to {output_path}");

    Ok(())
}
