use std::time::Instant;

use reqwest::{Client, Method, Response};
use url::Url;

use crate::config::{Mode, ProbeConfig};
use crate::title::extract_title;
use crate::types::ProbeResult;
use crate::verify::{find_parked_signature, should_verify};

pub const ERR_INVALID_URL: &str = "invalid_url";
pub const ERR_NO_RESPONSE: &str = "no_response";
pub const ERR_FALSE_POSITIVE: &str = "false_positive_detected";

const MAX_CANDIDATE_LEN: usize = 200;
const FORBIDDEN_CHARS: &[char] = &[' ', '"', '\'', '<', '>', '{', '}', '|', '\\', '^', '`'];

// HTTPS first; most of the web answers there and the HTTP fallback catches
// the rest.
const PROTOCOLS: [&str; 2] = ["https://", "http://"];

pub fn validate_candidate(raw: &str) -> bool {
    if raw.is_empty() {
        return false;
    }
    // Length is in characters, not bytes; multibyte hostnames are fine.
    let mut chars = 0usize;
    for ch in raw.chars() {
        chars += 1;
        if chars > MAX_CANDIDATE_LEN || ch.is_control() || FORBIDDEN_CHARS.contains(&ch) {
            return false;
        }
    }
    true
}

/// Status classification. An explicit allow-list replaces the built-in
/// alive set entirely; otherwise a status counts as alive when a real
/// service plausibly produced it, not only on 200.
pub fn is_alive(status: u16, match_codes: Option<&[u16]>) -> bool {
    if let Some(codes) = match_codes {
        return codes.contains(&status);
    }
    matches!(
        status,
        200..=299 | 300..=399 | 401 | 403 | 405 | 406 | 409 | 410 | 429 | 500..=599
    )
}

#[derive(Debug)]
struct ProtocolOutcome {
    url: String,
    final_url: String,
    status: u16,
    content_length: u64,
    response_time_ms: u128,
    server: Option<String>,
    content_type: Option<String>,
    location: Option<String>,
    body: Option<Vec<u8>>,
}

/// Runs one candidate end to end: validation, protocol fallback, status
/// classification, verification and title extraction. Always returns a
/// Result; failures are data, never propagated errors.
pub async fn probe(candidate: &str, client: &Client, config: &ProbeConfig) -> ProbeResult {
    if !validate_candidate(candidate) {
        return ProbeResult::dead(candidate.to_string(), ERR_INVALID_URL.to_string());
    }

    // HEAD keeps the byte cost down across thousands of hosts; a body is
    // only pulled up front when title extraction or verify mode needs one.
    let needs_body = config.extract_title || config.mode == Mode::Verify;
    let method = if needs_body { Method::GET } else { Method::HEAD };

    let mut last_transport_error: Option<String> = None;
    let mut dead_response: Option<ProbeResult> = None;
    let mut last_url = String::new();

    for protocol in PROTOCOLS {
        let full_url = format!("{protocol}{candidate}");
        last_url.clone_from(&full_url);
        match attempt_protocol(&full_url, method.clone(), client, config).await {
            Ok(outcome) => {
                if is_alive(outcome.status, config.match_codes.as_deref()) {
                    return finish_alive(outcome, client, config).await;
                }
                dead_response = Some(dead_from_outcome(outcome));
            }
            Err(detail) => last_transport_error = Some(detail),
        }
    }

    // A dead status from a real response beats a transport error summary.
    if let Some(result) = dead_response {
        return result;
    }

    let error = match last_transport_error {
        Some(detail) => format!("connection_failed:{detail}"),
        None => ERR_NO_RESPONSE.to_string(),
    };
    ProbeResult::dead(last_url, error)
}

async fn attempt_protocol(
    full_url: &str,
    method: Method,
    client: &Client,
    config: &ProbeConfig,
) -> Result<ProtocolOutcome, String> {
    let mut last_error = String::new();
    let max_attempts = config.retry.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let started = Instant::now();
        match client.request(method.clone(), full_url).send().await {
            Ok(response) => {
                let want_body = method == Method::GET;
                return Ok(read_outcome(full_url, response, started, want_body, config).await);
            }
            Err(err) => {
                last_error = err.to_string();
                if attempt < max_attempts {
                    tokio::time::sleep(config.retry.backoff).await;
                }
            }
        }
    }

    Err(last_error)
}

async fn read_outcome(
    requested: &str,
    response: Response,
    started: Instant,
    want_body: bool,
    config: &ProbeConfig,
) -> ProtocolOutcome {
    let status = response.status().as_u16();
    let response_time_ms = started.elapsed().as_millis();
    let final_url = response.url().to_string();
    let server = header_string(&response, reqwest::header::SERVER);
    let content_type = header_string(&response, reqwest::header::CONTENT_TYPE);
    let location = header_string(&response, reqwest::header::LOCATION)
        .map(|raw| resolve_location(requested, &raw));
    let header_length = response.content_length();

    let body = if want_body {
        Some(read_capped(response, config.body_fetch_cap).await)
    } else {
        None
    };

    let content_length = header_length
        .or_else(|| body.as_ref().map(|b| b.len() as u64))
        .unwrap_or(0);

    ProtocolOutcome {
        url: requested.to_string(),
        final_url,
        status,
        content_length,
        response_time_ms,
        server,
        content_type,
        location,
        body,
    }
}

fn header_string(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_location(base: &str, location: &str) -> String {
    Url::parse(base)
        .ok()
        .and_then(|base| base.join(location).ok())
        .map(|url| url.to_string())
        .unwrap_or_else(|| location.to_string())
}

async fn read_capped(mut response: Response, cap: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    // A read error mid-body leaves a shorter prefix; downstream consumers
    // only ever look at bounded prefixes anyway.
    while let Ok(Some(chunk)) = response.chunk().await {
        buf.extend_from_slice(&chunk);
        if buf.len() >= cap {
            buf.truncate(cap);
            break;
        }
    }
    buf
}

fn dead_from_outcome(outcome: ProtocolOutcome) -> ProbeResult {
    ProbeResult {
        url: outcome.url,
        status_code: outcome.status,
        content_length: outcome.content_length,
        response_time_ms: outcome.response_time_ms,
        title: None,
        server: outcome.server,
        redirect: outcome.location,
        error: None,
        alive: false,
        verified: false,
        checked_at: chrono::Utc::now().to_rfc3339(),
    }
}

async fn finish_alive(
    outcome: ProtocolOutcome,
    client: &Client,
    config: &ProbeConfig,
) -> ProbeResult {
    // The requested form lacks the path normalization reqwest applies, so
    // parse it before deciding whether the response actually moved.
    let requested = Url::parse(&outcome.url)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| outcome.url.clone());
    let redirect = if outcome.final_url != requested {
        Some(outcome.final_url.clone())
    } else {
        outcome.location.clone()
    };

    let mut result = ProbeResult {
        url: outcome.url.clone(),
        status_code: outcome.status,
        content_length: outcome.content_length,
        response_time_ms: outcome.response_time_ms,
        title: None,
        server: outcome.server.clone(),
        redirect,
        error: None,
        alive: true,
        verified: false,
        checked_at: chrono::Utc::now().to_rfc3339(),
    };

    if should_verify(
        config.mode,
        outcome.status,
        outcome.content_type.as_deref(),
        outcome.server.as_deref(),
    ) {
        match verification_body(&outcome, client, config).await {
            Ok(body) => {
                if find_parked_signature(&body, config.verify_scan_prefix).is_some() {
                    // Verification is authoritative over the raw status.
                    result.alive = false;
                    result.error = Some(ERR_FALSE_POSITIVE.to_string());
                    return result;
                }
                result.verified = true;
            }
            Err(detail) => {
                // Could not disprove liveness; stays alive, flagged.
                result.error = Some(format!("verification_failed:{detail}"));
            }
        }
    }

    if config.extract_title {
        let body = outcome.body.as_deref().unwrap_or(&[]);
        let prefix = &body[..body.len().min(config.title_scan_prefix)];
        let title = extract_title(prefix, config.title_strategy);
        if !title.is_empty() {
            result.title = Some(title);
        }
    }

    result
}

/// Reuses the probe body when one was fetched, otherwise pulls a bounded
/// prefix with a single extra GET (the HEAD path has nothing to inspect).
async fn verification_body(
    outcome: &ProtocolOutcome,
    client: &Client,
    config: &ProbeConfig,
) -> Result<Vec<u8>, String> {
    if let Some(body) = &outcome.body {
        return Ok(body.clone());
    }
    let response = client
        .get(&outcome.url)
        .send()
        .await
        .map_err(|err| err.to_string())?;
    Ok(read_capped(response, config.body_fetch_cap).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryPolicy, derive_effective_config};
    use crate::types::Cli;
    use clap::Parser;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Duration;

    fn test_config(args: &[&str]) -> ProbeConfig {
        let mut full = vec!["alivehunter", "-l", "domains.txt", "--timeout", "5"];
        full.extend_from_slice(args);
        let mut config = derive_effective_config(&Cli::parse_from(full));
        // Keep tests quick: a failed protocol attempt is not retried.
        config.retry = RetryPolicy::none();
        config
    }

    fn test_client(config: &ProbeConfig) -> Client {
        let (pool, _) = crate::transport::TransportPool::build(config, &[]).unwrap();
        pool.next()
    }

    /// Tiny canned-response server; answers every connection with the same
    /// bytes, which also politely breaks the TLS attempt on the HTTPS pass.
    fn serve(response: String) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));
                let mut scratch = [0u8; 2048];
                let _ = stream.read(&mut scratch);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        port
    }

    fn http_response(status_line: &str, headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\n{headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[test]
    fn candidate_validation_rejects_junk() {
        assert!(validate_candidate("example.com"));
        assert!(validate_candidate("sub.example.com:8443/path"));
        assert!(!validate_candidate(""));
        assert!(!validate_candidate(&"a".repeat(201)));
        assert!(!validate_candidate("bad host.com"));
        assert!(!validate_candidate("bad\thost.com"));
        assert!(!validate_candidate("host.com/<script>"));
        assert!(validate_candidate(&"a".repeat(200)));
        // Multibyte hostnames count characters, not bytes.
        assert!(validate_candidate(&"ü".repeat(150)));
        assert!(!validate_candidate(&"ü".repeat(201)));
    }

    #[test]
    fn default_alive_set_classification() {
        for status in [200, 204, 301, 308, 401, 403, 405, 406, 409, 410, 429, 500, 503] {
            assert!(is_alive(status, None), "{status} should be alive");
        }
        for status in [100, 404, 400, 402, 407, 408, 418, 451] {
            assert!(!is_alive(status, None), "{status} should be dead");
        }
    }

    #[test]
    fn allow_list_is_exclusive_not_additive() {
        let codes = vec![200u16, 301];
        assert!(is_alive(200, Some(&codes)));
        assert!(is_alive(301, Some(&codes)));
        // 403 is in the default alive set but not in the allow-list.
        assert!(!is_alive(403, Some(&codes)));
        assert!(!is_alive(500, Some(&codes)));
    }

    #[tokio::test]
    async fn malformed_candidates_short_circuit_without_io() {
        let config = test_config(&[]);
        let client = test_client(&config);

        let too_long = "a".repeat(201);
        for candidate in ["", "bad host.com", too_long.as_str()] {
            let result = probe(candidate, &client, &config).await;
            assert!(!result.alive);
            assert_eq!(result.error.as_deref(), Some(ERR_INVALID_URL));
            assert_eq!(result.status_code, 0);
        }
    }

    #[tokio::test]
    async fn refused_connections_report_connection_failed() {
        // Bind then drop to find a port with nothing listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = test_config(&[]);
        let client = test_client(&config);

        let result = probe(&format!("127.0.0.1:{port}"), &client, &config).await;
        assert!(!result.alive);
        let error = result.error.unwrap();
        assert!(
            error.starts_with("connection_failed:") || error == ERR_NO_RESPONSE,
            "unexpected error {error}"
        );
    }

    #[tokio::test]
    async fn falls_back_to_http_and_extracts_title() {
        let port = serve(http_response(
            "200 OK",
            "Content-Type: text/html\r\nServer: ESF\r\n",
            "<html><head><title>  Example   Domain </title></head><body>hi</body></html>",
        ));
        let config = test_config(&["--title"]);
        let client = test_client(&config);

        let result = probe(&format!("127.0.0.1:{port}"), &client, &config).await;
        assert!(result.alive);
        assert_eq!(result.status_code, 200);
        assert_eq!(result.url, format!("http://127.0.0.1:{port}"));
        assert_eq!(result.title.as_deref(), Some("Example Domain"));
        assert_eq!(result.server.as_deref(), Some("ESF"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn parked_body_overrides_a_200_status() {
        let port = serve(http_response(
            "200 OK",
            "Content-Type: text/html\r\nServer: nginx\r\n",
            "<html><body><h1>This Domain For Sale!</h1></body></html>",
        ));
        let config = test_config(&["--mode", "verify"]);
        let client = test_client(&config);

        let result = probe(&format!("127.0.0.1:{port}"), &client, &config).await;
        assert!(!result.alive);
        assert!(!result.verified);
        assert_eq!(result.error.as_deref(), Some(ERR_FALSE_POSITIVE));
    }

    #[tokio::test]
    async fn clean_body_passes_verification() {
        let port = serve(http_response(
            "200 OK",
            "Content-Type: text/html\r\nServer: nginx\r\n",
            "<html><head><title>Acme Portal</title></head><body>login</body></html>",
        ));
        let config = test_config(&["--mode", "verify"]);
        let client = test_client(&config);

        let result = probe(&format!("127.0.0.1:{port}"), &client, &config).await;
        assert!(result.alive);
        assert!(result.verified);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn dead_status_produces_no_error_kind() {
        let port = serve(http_response("404 Not Found", "Content-Type: text/html\r\n", "gone"));
        let config = test_config(&[]);
        let client = test_client(&config);

        let result = probe(&format!("127.0.0.1:{port}"), &client, &config).await;
        assert!(!result.alive);
        assert_eq!(result.status_code, 404);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn allow_list_downgrades_default_alive_statuses() {
        let port = serve(http_response("403 Forbidden", "", "denied"));
        let config = test_config(&["--match-codes", "200,301"]);
        let client = test_client(&config);

        let result = probe(&format!("127.0.0.1:{port}"), &client, &config).await;
        assert!(!result.alive);
        assert_eq!(result.status_code, 403);
    }

    #[tokio::test]
    async fn unfollowed_redirects_surface_the_location() {
        let port = serve(http_response(
            "301 Moved Permanently",
            "Location: /next\r\n",
            "",
        ));
        let config = test_config(&[]);
        let client = test_client(&config);

        let result = probe(&format!("127.0.0.1:{port}"), &client, &config).await;
        assert!(result.alive, "3xx is in the default alive set");
        assert_eq!(result.status_code, 301);
        assert_eq!(
            result.redirect.as_deref(),
            Some(format!("http://127.0.0.1:{port}/next").as_str())
        );
    }
}
