use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::ProbeConfig;

// Same UA the original recon runs shipped with; some parking pages answer
// differently to obvious bot agents.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// One client per configured proxy, or a single direct client. Workers take
/// transports round-robin; connections are single-shot because consecutive
/// probes almost never share a host.
pub struct TransportPool {
    clients: Vec<reqwest::Client>,
    cursor: AtomicUsize,
}

impl TransportPool {
    /// Builds the pool. Proxy entries that fail to parse or to produce a
    /// client are skipped; the skipped count is reported back so the caller
    /// can surface it. With no usable proxy the pool holds one direct client.
    pub fn build(config: &ProbeConfig, proxies: &[String]) -> Result<(Self, usize), String> {
        let mut clients = Vec::new();
        let mut skipped = 0usize;

        for proxy_url in proxies {
            match reqwest::Proxy::all(proxy_url) {
                Ok(proxy) => match base_builder(config).proxy(proxy).build() {
                    Ok(client) => clients.push(client),
                    Err(_) => skipped += 1,
                },
                Err(_) => skipped += 1,
            }
        }

        if clients.is_empty() {
            let direct = base_builder(config)
                .build()
                .map_err(|err| format!("failed to build http client: {err}"))?;
            clients.push(direct);
        }

        Ok((
            TransportPool {
                clients,
                cursor: AtomicUsize::new(0),
            },
            skipped,
        ))
    }

    pub fn next(&self) -> reqwest::Client {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        self.clients[index].clone()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }
}

fn base_builder(config: &ProbeConfig) -> reqwest::ClientBuilder {
    let redirect_policy = if config.follow_redirects {
        reqwest::redirect::Policy::limited(config.max_redirects)
    } else {
        reqwest::redirect::Policy::none()
    };

    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.timeout)
        .connect_timeout(config.timeout)
        .redirect(redirect_policy)
        .min_tls_version(config.min_tls_version)
        // Recon trade-off: invalid certs are a liveness signal, not a fault.
        .danger_accept_invalid_certs(true)
        // No keep-alive; each probe targets a fresh host and stale pooled
        // connections would skew latencies.
        .pool_max_idle_per_host(0)
        .tcp_nodelay(true)
}
