//! Validasi asal request Click berdasarkan allow-list IP.
//!
//! Best-effort hardening saja, signature tetap diverifikasi terpisah.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

/// Alamat asal request: first hop X-Forwarded-For, fallback ke peer address socket
#[derive(Debug, Clone, Default)]
pub struct ClientAddr(pub Option<String>);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let addr = shared::extract_client_ip(&parts.headers).or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });
        Ok(ClientAddr(addr))
    }
}

#[derive(Debug, Clone)]
pub struct OriginValidator {
    allowed: Vec<IpAddr>,
    enforce: bool,
}

/// Normalisasi IPv4-mapped IPv6 (::ffff:a.b.c.d) ke IPv4
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        other => other,
    }
}

fn parse_addr(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|s| s.ip()))
        .map(canonical)
}

impl OriginValidator {
    /// `enforce` false berarti mode development: semua origin diterima
    pub fn new(allowed: Vec<IpAddr>, enforce: bool) -> Self {
        Self {
            allowed: allowed.into_iter().map(canonical).collect(),
            enforce,
        }
    }

    pub fn is_enforced(&self) -> bool {
        self.enforce
    }

    pub fn is_allowed_origin(&self, source: Option<&str>) -> bool {
        if !self.enforce {
            return true;
        }

        let allowed = source
            .and_then(parse_addr)
            .map(|ip| self.allowed.contains(&ip))
            .unwrap_or(false);

        if !allowed {
            tracing::warn!(
                client_ip = source.unwrap_or("unknown"),
                allowed_ips = ?self.allowed,
                "Click request from unauthorized IP"
            );
        }

        allowed
    }
}
