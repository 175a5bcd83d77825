use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

use crate::models::GateError;
use crate::security::rate_limiter::EndpointClass;
use crate::state::AppState;

/// Client identity extracted once per request and carried through request
/// extensions for every downstream gate and handler
#[derive(Clone, Debug)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Resolve the client IP (first X-Forwarded-For hop when behind the load
/// balancer, else the peer address) and stash it in extensions. Runs before
/// every gate.
pub async fn client_context_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request,
    next: Next,
) -> Response {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let user_agent = req
        .headers()
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .map(|v| v.to_string());

    let ctx = ClientContext {
        ip: forwarded.or_else(|| Some(addr.ip().to_string())),
        user_agent,
    };
    req.extensions_mut().insert(ctx);

    next.run(req).await
}

/// Sliding-window rate limiting keyed by client IP, with the endpoint class
/// chosen from the request path. First gate in the chain; a denial here
/// short-circuits everything downstream.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(ctx) = req.extensions().get::<ClientContext>().cloned() else {
        return next.run(req).await;
    };
    let key = ctx.ip.unwrap_or_else(|| "unknown".to_string());
    let class = EndpointClass::classify(req.uri().path());

    let result = match state.rate_limiter.limit(&key, class).await {
        Ok(result) => result,
        Err(e) => {
            // Store failures are never treated as allow
            return GateError::Internal(e).into_response();
        }
    };

    if !result.allowed {
        metrics::counter!("gate_denials_total", 1, "cause" => "rate_limit");
        let mut response =
            GateError::RateExceeded("Too many requests".to_string()).into_response();
        set_rate_headers(&mut response, result.limit, result.remaining, result.reset_at);
        return response;
    }

    let mut response = next.run(req).await;
    set_rate_headers(&mut response, result.limit, result.remaining, result.reset_at);
    response
}

/// IP blacklist, geography, and per-IP quota gate. Runs after the rate
/// limiter and before the body-reading gates in the handlers.
pub async fn ip_gate_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let ip = req
        .extensions()
        .get::<ClientContext>()
        .and_then(|ctx| ctx.ip.clone());

    let outcome = match state.ip_gate.check(ip.as_deref()).await {
        Ok(outcome) => outcome,
        Err(e) => return e.into_response(),
    };

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&outcome.remaining_quota.to_string()) {
        response.headers_mut().insert("x-ip-requests-remaining", value);
    }
    response
}

fn set_rate_headers(response: &mut Response, limit: i64, remaining: i64, reset_at: u64) {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("x-ratelimit-limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&reset_at.to_string()) {
        headers.insert("x-ratelimit-reset", v);
    }
}
