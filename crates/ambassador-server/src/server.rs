use std::net::SocketAddr;
use std::sync::Arc;

use ambassador_policy::{
    AccessRequest, DecisionEngine, Gatekeeper, MatchCache, PolicyOrigin, PolicySource, Verdict,
    WatcherHandle,
};
use axum::{
    Json, Router,
    extract::State,
    http::{
        HeaderMap, HeaderValue, StatusCode, Uri,
        header::{AUTHORIZATION, HOST, WWW_AUTHENTICATE},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;

/// Stand-in for an `Authorization` header that is not valid UTF-8; it parses
/// as neither scheme, so it fails like any other malformed credential.
const UNREADABLE_CREDENTIAL: &str = "\u{fffd}";

pub struct AmbassadorServer {
    addr: SocketAddr,
    app: Router,
    gatekeeper: Gatekeeper,
}

/// Verdict rendered as the auth service response.
#[derive(Debug, Clone, Copy)]
pub struct AuthResponse(pub Verdict);

#[derive(Serialize)]
struct AuthBody {
    authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

impl IntoResponse for AuthResponse {
    fn into_response(self) -> Response {
        let verdict = self.0;
        let status =
            StatusCode::from_u16(verdict.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = AuthBody {
            authorized: verdict.is_granted(),
            error: verdict.reason(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(challenge) = verdict.www_authenticate() {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
        }
        response
    }
}

pub fn build_app(gatekeeper: Gatekeeper, cfg: &AppConfig) -> Router {
    let mut router = Router::new();
    if let Some(path) = &cfg.server.health_path {
        router = router.route(path, get(healthz));
    }

    router
        .fallback(authorize)
        .with_state(gatekeeper)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.path = %req.uri().path(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: std::time::Duration, span: &tracing::Span| {
                        span.record("http.status_code", tracing::field::display(res.status().as_u16()));
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Decide any request the proxy forwards.
async fn authorize(
    State(gatekeeper): State<Gatekeeper>,
    uri: Uri,
    headers: HeaderMap,
) -> AuthResponse {
    let domain = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or("");
    let authorization = headers
        .get(AUTHORIZATION)
        .map(|v| v.to_str().unwrap_or(UNREADABLE_CREDENTIAL))
        .unwrap_or("");

    let request = AccessRequest::new(domain, uri.path(), authorization);
    AuthResponse(gatekeeper.check(&request))
}

/// Build the gatekeeper described by `cfg`.
pub fn gatekeeper_from_config(cfg: &AppConfig) -> Gatekeeper {
    let source = Arc::new(PolicySource::new(cfg.policy_origin()));
    let cache = Arc::new(MatchCache::new(cfg.policy.cache_capacity));
    Gatekeeper::new(source, DecisionEngine::new(cache))
}

/// Start reloading the policy file on change, when configured to.
pub fn start_policy_watch(cfg: &AppConfig, gatekeeper: &Gatekeeper) -> Option<WatcherHandle> {
    if !cfg.policy.watch {
        return None;
    }
    let source = gatekeeper.source();
    if !matches!(source.origin(), PolicyOrigin::File(_)) {
        return None;
    }

    match source.watch(cfg.watcher_config()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Policy watch failed to start, hot reload disabled");
            None
        }
    }
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    gatekeeper: Option<Gatekeeper>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            gatekeeper: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Use a prebuilt gatekeeper instead of one built from the config.
    pub fn with_gatekeeper(mut self, gatekeeper: Gatekeeper) -> Self {
        self.gatekeeper = Some(gatekeeper);
        self
    }

    pub fn build(self) -> AmbassadorServer {
        let gatekeeper = self
            .gatekeeper
            .unwrap_or_else(|| gatekeeper_from_config(&self.config));
        let app = build_app(gatekeeper.clone(), &self.config);

        AmbassadorServer {
            addr: self.addr,
            app,
            gatekeeper,
        }
    }
}

impl AmbassadorServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn gatekeeper(&self) -> &Gatekeeper {
        &self.gatekeeper
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(verdict: Verdict) -> (StatusCode, Option<String>, serde_json::Value) {
        let response = AuthResponse(verdict).into_response();
        let status = response.status();
        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, challenge, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_granted_response() {
        let (status, challenge, body) = render(Verdict::NoAuthGranted).await;
        assert_eq!(status, StatusCode::OK);
        assert!(challenge.is_none());
        assert_eq!(body, json!({ "authorized": true }));
    }

    #[tokio::test]
    async fn test_denied_responses() {
        let (status, challenge, body) = render(Verdict::DomainDenied).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(challenge.is_none());
        assert_eq!(body, json!({ "authorized": false, "error": "domain not allowed" }));

        let (status, challenge, body) = render(Verdict::BearerTokenUnknown).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            challenge.as_deref(),
            Some(r#"Bearer realm="token_required" error="invalid_token""#)
        );
        assert_eq!(body["error"], "token mismatch");
    }

    #[test]
    fn test_builder_uses_given_addr_and_gatekeeper() {
        let source = Arc::new(PolicySource::from_document(
            ambassador_policy::PolicyDocument::deny_all(),
        ));
        let gatekeeper = Gatekeeper::new(
            source.clone(),
            DecisionEngine::new(Arc::new(MatchCache::disabled())),
        );
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();

        let server = ServerBuilder::new()
            .with_config(AppConfig::default())
            .with_addr(addr)
            .with_gatekeeper(gatekeeper)
            .build();

        assert_eq!(server.addr(), addr);
        assert!(Arc::ptr_eq(server.gatekeeper().source(), &source));
        assert!(!server.gatekeeper().engine().cache().is_enabled());
    }

    #[test]
    fn test_builder_defaults_follow_config() {
        let mut cfg = AppConfig::default();
        cfg.server.port = 8181;
        cfg.policy.cache_capacity = 16;

        let server = ServerBuilder::new().with_config(cfg.clone()).build();

        assert_eq!(server.addr(), cfg.addr());
        assert!(server.gatekeeper().engine().cache().is_enabled());
    }
}
