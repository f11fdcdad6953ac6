use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc::Sender;
use tokio::task::{Id, JoinError, JoinSet};

use crate::config::ProbeConfig;
use crate::probe::probe;
use crate::rate::{CancelToken, RateLimiter};
use crate::transport::TransportPool;
use crate::types::{ProbeResult, ScanEvent, Stats};

const ERR_INTERNAL: &str = "internal_error";

/// Drains the candidate queue through a bounded set of probe tasks. Each
/// candidate is dispatched exactly once and yields at most one Result on
/// the bounded event channel; a full channel suspends the pool until the
/// sink catches up. Cancellation stops dispatch, aborts in-flight probes
/// and drops any result still waiting for channel space.
pub async fn run_scan(
    candidates: Vec<String>,
    config: Arc<ProbeConfig>,
    transports: Arc<TransportPool>,
    limiter: Option<Arc<RateLimiter>>,
    stats: Arc<Stats>,
    cancel: CancelToken,
    tx: Sender<ScanEvent>,
) {
    let mut queue: VecDeque<String> = candidates.into();
    let mut set: JoinSet<Option<ProbeResult>> = JoinSet::new();
    let mut inflight: HashMap<Id, String> = HashMap::new();

    loop {
        if cancel.is_cancelled() {
            queue.clear();
            set.abort_all();
            while let Some(joined) = set.join_next_with_id().await {
                handle_joined(joined, &mut inflight, &stats, &tx, &cancel).await;
            }
            break;
        }

        while set.len() < config.workers && !cancel.is_cancelled() {
            let Some(candidate) = queue.pop_front() else {
                break;
            };
            let task_candidate = candidate.clone();
            let config = config.clone();
            let transports = transports.clone();
            let limiter = limiter.clone();
            let stats = stats.clone();
            let cancel = cancel.clone();

            let handle = set.spawn(async move {
                if let Some(limiter) = &limiter {
                    if !limiter.acquire(&cancel).await {
                        // Cancelled while waiting for a permit; the
                        // candidate is dropped, not failed.
                        return None;
                    }
                }
                let client = transports.next();
                let result = probe(&task_candidate, &client, &config).await;
                stats.record(&result);
                Some(result)
            });
            inflight.insert(handle.id(), candidate);
        }

        if set.is_empty() {
            break;
        }

        tokio::select! {
            joined = set.join_next_with_id() => {
                if let Some(joined) = joined {
                    handle_joined(joined, &mut inflight, &stats, &tx, &cancel).await;
                }
            }
            _ = cancel.cancelled() => {}
        }
    }

    // The receiver keeps draining until it sees Finished, so this send
    // cannot wedge even when the channel is at capacity.
    let _ = tx.send(ScanEvent::Finished).await;
}

async fn handle_joined(
    joined: Result<(Id, Option<ProbeResult>), JoinError>,
    inflight: &mut HashMap<Id, String>,
    stats: &Stats,
    tx: &Sender<ScanEvent>,
    cancel: &CancelToken,
) {
    match joined {
        Ok((id, Some(result))) => {
            inflight.remove(&id);
            send_event(tx, cancel, ScanEvent::Result(result)).await;
        }
        Ok((id, None)) => {
            inflight.remove(&id);
        }
        Err(err) => {
            let candidate = inflight.remove(&err.id()).unwrap_or_default();
            if err.is_panic() {
                // One candidate's crash must not take the pool down; it
                // becomes a dead Result and the run continues.
                let result = ProbeResult::dead(candidate, ERR_INTERNAL.to_string());
                stats.record(&result);
                send_event(tx, cancel, ScanEvent::Result(result)).await;
                send_event(
                    tx,
                    cancel,
                    ScanEvent::Error(format!("probe task panicked: {err}")),
                )
                .await;
            }
        }
    }
}

/// Pushes one event, waiting for channel space. The wait is a cancellation
/// point; an event still queued when the run is cancelled is dropped.
async fn send_event(tx: &Sender<ScanEvent>, cancel: &CancelToken, event: ScanEvent) {
    tokio::select! {
        _ = tx.send(event) => {}
        _ = cancel.cancelled() => {}
    }
}
