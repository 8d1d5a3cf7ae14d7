use crate::ProxyError;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Produces the path token for a source URL: unpadded URL-safe base64.
///
/// Clients build `/img/{token}/...` paths with this; the server uses it to
/// canonicalize cache keys so padded and unpadded tokens share one entry.
pub fn encode(url: &str) -> String {
    URL_SAFE_NO_PAD.encode(url.as_bytes())
}

/// Recovers the source URL from a path token.
///
/// The token is treated as URL-safe base64 (`-`/`_` in place of `+`/`/`,
/// padding optional). Anything outside that alphabet is rejected before
/// decoding, so the token can never carry path separators.
pub fn decode(token: &str) -> Result<String, ProxyError> {
    let body = token.trim_end_matches('=');
    if !body.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
        return Err(ProxyError::InvalidArgument("Invalid image URL token".into()));
    }

    let mut standard: String = token
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while standard.len() % 4 != 0 {
        standard.push('=');
    }

    let bytes = STANDARD
        .decode(standard.as_bytes())
        .map_err(|e| ProxyError::InvalidArgument(format!("Invalid image URL token: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|_| ProxyError::InvalidArgument("Image URL is not valid UTF-8".into()))
}

/// Checks that a decoded source is something we are willing to fetch.
///
/// Only absolute `http`/`https` URLs with a host pass. Unless
/// `allow_private_hosts` is set, hosts that name this machine or a private
/// network by literal address (or `localhost`) are refused. Names resolving to
/// private addresses are not caught here.
pub fn validate_source_url(raw: &str, allow_private_hosts: bool) -> Result<Url, ProxyError> {
    let url = Url::parse(raw)
        .map_err(|e| ProxyError::InvalidArgument(format!("Invalid image URL: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProxyError::InvalidArgument(format!(
            "Unsupported URL scheme: {}",
            url.scheme()
        )));
    }

    let host = url
        .host()
        .ok_or_else(|| ProxyError::InvalidArgument("Image URL has no host".into()))?;

    if !allow_private_hosts && is_private_host(&host) {
        return Err(ProxyError::InvalidArgument(
            "Image URL points at a private address".into(),
        ));
    }

    Ok(url)
}

fn is_private_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(name) => {
            let name = name.trim_end_matches('.').to_ascii_lowercase();
            name == "localhost" || name.ends_with(".localhost")
        }
        Host::Ipv4(ip) => is_private_v4(ip),
        Host::Ipv6(ip) => is_private_v6(ip),
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_v4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique local
        || (first & 0xffc0) == 0xfe80 // link local
}
