use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::connect_info::ConnectInfo,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{error::ApiError, state::AppState};

/// Identity of the caller, resolved by `require_auth` before any handler
/// runs. Handlers never see unauthenticated requests on protected routes.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) => value,
        None => return ApiError::Unauthorized.into_response(),
    };

    let claims = match state.auth.verify_bearer_header(auth_header).await {
        Ok(claims) => claims,
        Err(error) => {
            tracing::warn!(error = %error, "authorization failed");
            return ApiError::Unauthorized.into_response();
        }
    };

    request.extensions_mut().insert(AuthenticatedUser {
        user_id: claims.sub,
    });

    next.run(request).await
}

pub async fn generation_rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = request_identity(&request, state.config.trust_proxy);
    if !state.generation_limiter.check_and_count(&key) {
        return ApiError::Provider {
            kind: crate::error::ProviderErrorKind::RateLimit,
            message: "Too many generation requests. Please try again later.".to_string(),
        }
        .into_response();
    }

    next.run(request).await
}

pub async fn api_rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = request_identity(&request, state.config.trust_proxy);
    if !state.api_limiter.check_and_count(&key) {
        return ApiError::Provider {
            kind: crate::error::ProviderErrorKind::RateLimit,
            message: "Too many requests. Please try again later.".to_string(),
        }
        .into_response();
    }

    next.run(request).await
}

fn request_identity(request: &Request<Body>, trust_proxy: bool) -> String {
    let socket_addr = request
        .extensions()
        .get::<SocketAddr>()
        .copied()
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|value| value.0)
        });
    client_identity(request.headers(), socket_addr, trust_proxy)
}

fn client_identity(
    headers: &HeaderMap,
    socket_addr: Option<SocketAddr>,
    trust_proxy: bool,
) -> String {
    if trust_proxy {
        if let Some(value) = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            if let Some(first) = value.split(',').next() {
                let candidate = first.trim();
                if !candidate.is_empty() {
                    return candidate.to_string();
                }
            }
        }

        if let Some(value) = headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
        {
            let candidate = value.trim();
            if !candidate.is_empty() {
                return candidate.to_string();
            }
        }
    }

    socket_addr
        .map(|address| address.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::client_identity;
    use axum::http::HeaderMap;

    #[test]
    fn forwarded_header_wins_when_proxy_is_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_identity(&headers, None, true), "203.0.113.9");
    }

    #[test]
    fn forwarded_header_is_ignored_without_trust() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        let addr = "192.0.2.4:443".parse().unwrap();
        assert_eq!(client_identity(&headers, Some(addr), false), "192.0.2.4");
    }

    #[test]
    fn falls_back_to_unknown() {
        assert_eq!(client_identity(&HeaderMap::new(), None, true), "unknown");
    }
}
