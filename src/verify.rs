use crate::config::Mode;

/// Phrases that mark a page as parked, defaulted or otherwise not a real
/// service. Matched case-insensitively against a bounded body prefix.
/// Extending this catalogue is a data change; keep entries lowercase.
pub const FALSE_POSITIVE_SIGNATURES: &[&str] = &[
    "domain for sale",
    "domain is for sale",
    "buy this domain",
    "purchase this domain",
    "parked domain",
    "domain parking",
    "this domain is parked",
    "coming soon",
    "under construction",
    "website coming soon",
    "welcome to nginx",
    "apache2 default page",
    "apache2 ubuntu default page",
    "iis windows server",
    "default web site page",
    "default plesk page",
    "cpanel, inc.",
    "account suspended",
    "this account has been suspended",
    "site not found",
    "godaddy",
    "sedo domain parking",
    "hugedomains.com",
    "register this domain",
    "future home of something quite cool",
];

/// Front-end signatures that commonly serve default or placeholder pages
/// for unclaimed hosts. A Server header matching one of these is what makes
/// a 2xx worth a verification pass in default mode; bespoke servers skip
/// the cost. Known to both over- and under-trigger, kept as-is.
const GENERIC_SERVER_SIGNATURES: &[&str] = &[
    "nginx",
    "apache",
    "microsoft-iis",
    "litespeed",
    "openresty",
    "cloudflare",
    "awselb",
];

pub fn should_verify(
    mode: Mode,
    status: u16,
    content_type: Option<&str>,
    server: Option<&str>,
) -> bool {
    match mode {
        Mode::Verify => true,
        Mode::Fast => false,
        Mode::Default => {
            if !(200..=299).contains(&status) {
                return false;
            }
            if !content_type.map(is_html_like).unwrap_or(false) {
                return false;
            }
            server
                .map(|value| {
                    let value = value.to_ascii_lowercase();
                    GENERIC_SERVER_SIGNATURES
                        .iter()
                        .any(|sig| value.contains(sig))
                })
                .unwrap_or(false)
        }
    }
}

fn is_html_like(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("text/html") || ct.contains("application/xhtml")
}

/// Scans the first `scan_prefix` bytes for a false-positive phrase and
/// returns the matching signature, if any.
pub fn find_parked_signature(body: &[u8], scan_prefix: usize) -> Option<&'static str> {
    let prefix = &body[..body.len().min(scan_prefix)];
    let text = String::from_utf8_lossy(prefix).to_lowercase();
    FALSE_POSITIVE_SIGNATURES
        .iter()
        .find(|sig| text.contains(**sig))
        .copied()
}
