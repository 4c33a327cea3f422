use crate::pool::WorkerPool;
use crate::relay::HttpRelay;
use crate::shell::ShellRouter;
use crate::ws;
use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, Request, StatusCode};
use portico_core::config::{GatewayConfig, KeyBy};
use portico_core::rules::RuleStore;
use portico_core::GatewayError;
use portico_observability::{Observation, RequestLog};
use portico_store::KvAdapter;
use portico_traffic::limiter::{client_ip, derive_key};
use portico_traffic::{CorsPolicy, RateLimiter};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Operator-provided bucket-key function, overriding `key_by`.
pub type KeyFn = Arc<dyn Fn(&http::request::Parts) -> String + Send + Sync>;

/// The gateway aggregate: one value owns every stateful component, and the
/// pipeline plus the control plane are constructed over it.
pub struct Gateway {
    pub config: GatewayConfig,
    pub rules: RuleStore,
    pub limiter: Option<Arc<RateLimiter>>,
    pub cors: Option<CorsPolicy>,
    pub log: RequestLog,
    pub shell: ShellRouter,
    pub kv: KvAdapter,
    pub pool: Option<Arc<dyn WorkerPool>>,
    relay: HttpRelay,
    key_fn: Option<KeyFn>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        kv: KvAdapter,
        pool: Option<Arc<dyn WorkerPool>>,
    ) -> anyhow::Result<Self> {
        let limiter = match &config.rate_limit {
            Some(cfg) => Some(Arc::new(RateLimiter::new(cfg)?)),
            None => None,
        };
        let cors = config.cors.clone().map(CorsPolicy::new);
        let rules = RuleStore::from_config(config.rules.clone());
        let shell = ShellRouter::new(config.shell.clone(), config.api_base.clone());
        let log = RequestLog::new(config.log.buffer_size);
        Ok(Self {
            config,
            rules,
            limiter,
            cors,
            log,
            shell,
            kv,
            pool,
            relay: HttpRelay::new(),
            key_fn: None,
        })
    }

    /// Install the operator key function used when the rate-limit config
    /// selects `key_by: function`. Without one installed, that mode keys
    /// on the client IP.
    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = Some(key_fn);
        self
    }

    /// Load persisted dynamic rules and the persisted shell excludes.
    pub async fn load_persisted(&self) {
        let rules = self.kv.load_rules().await;
        if !rules.is_empty() {
            info!(count = rules.len(), "Loaded dynamic rules");
        }
        self.rules.load_dynamic(rules);
        self.shell.load_keyval(self.kv.shell_excludes().await);
    }

    /// The request pipeline: shell → CORS preflight → rate limit → rule
    /// dispatch → CORS response decoration.
    pub async fn process(&self, mut req: Request<Body>) -> Response {
        let start = Instant::now();
        let path = req.uri().path().to_string();
        let method = req.method().clone();
        let ip = request_ip(req.headers());
        let origin = header_string(req.headers(), "origin");

        // 1. Shell ownership
        let sec_fetch_dest = header_string(req.headers(), "sec-fetch-dest");
        let cookie = header_string(req.headers(), "cookie");
        if self
            .shell
            .owns(&path, sec_fetch_dest.as_deref(), cookie.as_deref())
        {
            return self.forward_to_shell(req).await;
        }

        // 2. CORS preflight
        if method == Method::OPTIONS
            && req.headers().contains_key("access-control-request-method")
            && let Some(cors) = &self.cors
        {
            return preflight_response(cors, origin.as_deref());
        }

        // 3. Rate limit
        if let Some(limiter) = &self.limiter
            && !limiter.is_excluded(&path)
        {
            let key = self.limit_key(&req);
            let decision = limiter.is_allowed(&key);
            if !decision.allowed {
                self.log.log(Observation {
                    ip,
                    method: method.to_string(),
                    path,
                    status: 429,
                    duration_ms: start.elapsed().as_millis() as u64,
                    rate_limited: true,
                });
                return rate_limited_response(limiter.capacity(), decision.retry_after);
            }
            if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
                req.headers_mut().insert("x-ratelimit-remaining", value);
            }
        }

        // 4. Rule dispatch
        let Some(matched) = self.rules.match_path(&path) else {
            debug!(path = %path, "No rule matched");
            return error_response(&GatewayError::NotFound(format!(
                "No rule matched {path}"
            )));
        };
        let rewritten = matched.rule.rewrite_path(&path);

        let mut response = if is_ws_upgrade(req.headers()) && matched.rule.rule.ws {
            ws::handle_upgrade(req, Arc::clone(&matched.rule), rewritten).await
        } else {
            self.relay.forward(&matched.rule, req, &rewritten).await
        };

        self.log.log(Observation {
            ip,
            method: method.to_string(),
            path,
            status: response.status().as_u16(),
            duration_ms: start.elapsed().as_millis() as u64,
            rate_limited: false,
        });

        // 5. CORS response decoration
        if let Some(cors) = &self.cors {
            let headers = response.headers_mut();
            for (name, value) in cors.response_headers(origin.as_deref()) {
                if let (Ok(name), Ok(value)) = (
                    http::header::HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(&value),
                ) {
                    headers.insert(name, value);
                }
            }
        }
        response
    }

    async fn forward_to_shell(&self, mut req: Request<Body>) -> Response {
        let Some(pool) = &self.pool else {
            return error_response(&GatewayError::Unavailable(
                "Worker pool is not configured".into(),
            ));
        };
        let Some(dir) = self.shell.dir() else {
            return error_response(&GatewayError::Unavailable("Shell is not configured".into()));
        };
        req.headers_mut()
            .insert("x-base", HeaderValue::from_static("/"));
        match pool.forward(dir, self.shell.config(), req).await {
            Ok(response) => response,
            Err(e) => error_response(&e),
        }
    }

    fn limit_key(&self, req: &Request<Body>) -> String {
        let key_by = self
            .config
            .rate_limit
            .as_ref()
            .map(|c| c.key_by)
            .unwrap_or_default();
        if key_by == KeyBy::Function
            && let Some(key_fn) = &self.key_fn
        {
            // The request itself is consumed downstream; hand the key
            // function a parts view instead.
            let (mut parts, _body) = Request::new(()).into_parts();
            parts.method = req.method().clone();
            parts.uri = req.uri().clone();
            parts.headers = req.headers().clone();
            return key_fn(&parts);
        }
        let headers = req.headers();
        derive_key(
            key_by,
            header_str(headers, "x-forwarded-for"),
            header_str(headers, "x-real-ip"),
            header_str(headers, "x-identity"),
        )
    }
}

/// Axum fallback handler over the gateway.
pub async fn handle(State(gateway): State<Arc<Gateway>>, req: Request<Body>) -> Response {
    gateway.process(req).await
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    header_str(headers, name).map(str::to_string)
}

fn request_ip(headers: &HeaderMap) -> String {
    client_ip(
        header_str(headers, "x-forwarded-for"),
        header_str(headers, "x-real-ip"),
    )
}

fn is_ws_upgrade(headers: &HeaderMap) -> bool {
    header_str(headers, "upgrade")
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

fn preflight_response(cors: &CorsPolicy, origin: Option<&str>) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    for (name, value) in cors.preflight_headers(origin) {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
    response
}

fn rate_limited_response(limit: u64, retry_after: u64) -> Response {
    let err = GatewayError::RateLimited;
    let mut response = Response::new(Body::from(err.to_json_body()));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    insert_num(headers, "retry-after", retry_after);
    insert_num(headers, "x-ratelimit-limit", limit);
    headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
    insert_num(
        headers,
        "x-ratelimit-reset",
        (Utc::now().timestamp() as u64).saturating_add(retry_after),
    );
    response
}

fn insert_num(headers: &mut HeaderMap, name: &'static str, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}

/// Single error-to-response mapper: JSON `{error}` envelope with the
/// error's status code.
pub fn error_response(err: &GatewayError) -> Response {
    let mut response = Response::new(Body::from(err.to_json_body()));
    *response.status_mut() =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
