//! Client address resolution for inbound gateway callbacks.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use axum::http::HeaderMap;

use crate::config::AllowedIps;

pub fn is_allowed(client_ip: Option<IpAddr>, allowed_ips: &AllowedIps) -> bool {
    match allowed_ips {
        AllowedIps::Any => true,
        AllowedIps::Cidrs(cidrs) => client_ip
            .map(|ip| cidrs.iter().any(|cidr| cidr.contains(&ip)))
            .unwrap_or(false),
    }
}

/// `X-Forwarded-For` when the proxy chain is deep enough, else the socket peer.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted_proxy_depth: usize,
) -> Option<IpAddr> {
    if let Some(ip) = extract_from_x_forwarded_for(headers, trusted_proxy_depth) {
        return Some(ip);
    }
    peer
}

fn extract_from_x_forwarded_for(headers: &HeaderMap, trusted_proxy_depth: usize) -> Option<IpAddr> {
    let raw = headers.get("x-forwarded-for")?.to_str().ok()?;

    let chain: Vec<IpAddr> = raw
        .split(',')
        .map(str::trim)
        .filter_map(parse_ip_from_xff_entry)
        .collect();

    if chain.is_empty() || trusted_proxy_depth >= chain.len() {
        return None;
    }

    let index = chain.len().saturating_sub(1 + trusted_proxy_depth);
    chain.get(index).copied()
}

fn parse_ip_from_xff_entry(value: &str) -> Option<IpAddr> {
    if let Ok(ip) = IpAddr::from_str(value) {
        return Some(ip);
    }

    if let Ok(addr) = SocketAddr::from_str(value) {
        return Some(addr.ip());
    }

    None
}
