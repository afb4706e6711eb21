//! Custom Axum extractors.
//!
//! - `ClientKey`: session id or network address used for the per-client hold limit
//! - `AdminAuth`: bearer token guard for admin routes

use crate::server::error::AppError;
use crate::server::state::AppState;
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use std::net::{IpAddr, SocketAddr};

/// Header carrying an opaque client session id.
pub const SESSION_ID_HEADER: &str = "X-Session-ID";

/// Identity used to count a client's active holds.
///
/// # Priority
///
/// 1. `X-Session-ID`
/// 2. `X-Forwarded-For` (first IP in the list)
/// 3. `X-Real-IP`
/// 4. Connection IP, when the server was started with connect info
///
/// `None` when nothing identifies the client; the hold limit is then skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for ClientKey
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let connect_info = parts.extensions.get::<ConnectInfo<SocketAddr>>();
        Ok(Self(client_key(&parts.headers, connect_info)))
    }
}

fn client_key(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(session) = header(SESSION_ID_HEADER) {
        return Some(format!("session:{session}"));
    }

    let forwarded = header("X-Forwarded-For")
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
    let real_ip = header("X-Real-IP").and_then(|ip| ip.parse::<IpAddr>().ok());

    forwarded
        .or(real_ip)
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip()))
        .map(|ip| format!("ip:{ip}"))
}

/// Proof that the request carried the admin bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .unwrap_or_default();

        let matches =
            constant_time_eq::constant_time_eq(provided.as_bytes(), state.admin_token.as_bytes());
        if provided.is_empty() || !matches {
            tracing::warn!(path = %parts.uri.path(), "Admin request with missing or invalid token");
            return Err(AppError::unauthorized("Admin token required"));
        }

        Ok(Self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn session_id_wins() {
        let key = client_key(
            &headers(&[("x-session-id", "abc"), ("x-forwarded-for", "10.0.0.1")]),
            None,
        );
        assert_eq!(key.as_deref(), Some("session:abc"));
    }

    #[test]
    fn forwarded_for_uses_first_address() {
        let key = client_key(
            &headers(&[
                ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
                ("x-real-ip", "10.0.0.2"),
            ]),
            None,
        );
        assert_eq!(key.as_deref(), Some("ip:203.0.113.7"));
    }

    #[test]
    fn falls_back_to_connection_address() {
        let addr: SocketAddr = "192.0.2.1:5000".parse().unwrap();
        let key = client_key(
            &headers(&[("x-forwarded-for", "garbage")]),
            Some(&ConnectInfo(addr)),
        );
        assert_eq!(key.as_deref(), Some("ip:192.0.2.1"));

        assert_eq!(client_key(&HeaderMap::new(), None), None);
    }
}
