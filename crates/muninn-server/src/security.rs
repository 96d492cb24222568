// crates/muninn-server/src/security.rs
// Write-auth primitives for the HTTP surface: constant-time token
// comparison and multi-signal localhost detection.

use crate::config::EnvConfig;
use crate::error::{MuninnError, Result};

/// Compare two byte strings in time independent of where they differ.
/// A length mismatch is folded into the accumulator instead of returning
/// early.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = (a.len() ^ b.len()) as u8;
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

/// Host-header forms that mean loopback.
fn host_is_loopback(host: &str) -> bool {
    let without_port = host
        .strip_prefix('[')
        .and_then(|rest| rest.split(']').next())
        .unwrap_or_else(|| host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host));
    matches!(without_port, "localhost" | "127.0.0.1" | "::1")
}

/// Localhost detection needs two signals: a loopback Host header AND no
/// X-Forwarded-For (a proxy in front means the peer is remote), unless the
/// operator declared the proxy trusted.
pub fn is_localhost_request(
    host: &str,
    x_forwarded_for: Option<&str>,
    trusted_proxy: bool,
) -> bool {
    if !host_is_loopback(host) {
        return false;
    }
    match x_forwarded_for {
        None => true,
        Some(_) => trusted_proxy,
    }
}

/// Authorize a write request against the environment's auth policy.
pub fn authorize_write(
    config: &EnvConfig,
    host: &str,
    x_forwarded_for: Option<&str>,
    provided_token: Option<&str>,
) -> Result<()> {
    if let Some(ref expected) = config.api_token {
        if let Some(provided) = provided_token
            && constant_time_eq(expected.as_bytes(), provided.as_bytes())
        {
            return Ok(());
        }
        // A configured token may still be bypassed from localhost when the
        // operator left the bypass on.
        if config.localhost_bypass
            && is_localhost_request(host, x_forwarded_for, config.trusted_proxy)
        {
            return Ok(());
        }
        return Err(MuninnError::InvalidInput(
            "write access denied: invalid or missing token".to_string(),
        ));
    }

    if config.localhost_bypass && is_localhost_request(host, x_forwarded_for, config.trusted_proxy)
    {
        return Ok(());
    }
    Err(MuninnError::InvalidInput(
        "write access denied: no token configured and request is not local".to_string(),
    ))
}
