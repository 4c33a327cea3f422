use portico_core::config::CorsConfig;

/// CORS header assembly for the gateway pipeline.
///
/// Preflights (`OPTIONS` + `Access-Control-Request-Method`) get the full
/// allow set; regular responses are decorated with origin, credentials and
/// exposed headers without touching status or body.
pub struct CorsPolicy {
    cfg: CorsConfig,
}

impl CorsPolicy {
    pub fn new(cfg: CorsConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &CorsConfig {
        &self.cfg
    }

    /// Resolve the `Access-Control-Allow-Origin` value for a request:
    /// `*` in wildcard mode, the echoed origin in list mode, `None` when
    /// the origin is not allowed.
    fn allow_origin(&self, request_origin: Option<&str>) -> Option<String> {
        if self.cfg.origin.is_wildcard() {
            return Some("*".to_string());
        }
        request_origin.and_then(|origin| self.cfg.origin.resolve(origin))
    }

    /// Headers for a preflight response (204, empty body).
    pub fn preflight_headers(&self, request_origin: Option<&str>) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if let Some(origin) = self.allow_origin(request_origin) {
            headers.push(("access-control-allow-origin".to_string(), origin));
        }
        if self.cfg.credentials {
            headers.push((
                "access-control-allow-credentials".to_string(),
                "true".to_string(),
            ));
        }
        headers.push((
            "access-control-allow-methods".to_string(),
            self.cfg.methods.join(", "),
        ));
        if !self.cfg.allowed_headers.is_empty() {
            headers.push((
                "access-control-allow-headers".to_string(),
                self.cfg.allowed_headers.join(", "),
            ));
        }
        headers.push((
            "access-control-max-age".to_string(),
            self.cfg.max_age.to_string(),
        ));
        headers
    }

    /// Headers added to every outbound response.
    pub fn response_headers(&self, request_origin: Option<&str>) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if let Some(origin) = self.allow_origin(request_origin) {
            headers.push(("access-control-allow-origin".to_string(), origin));
        }
        if self.cfg.credentials {
            headers.push((
                "access-control-allow-credentials".to_string(),
                "true".to_string(),
            ));
        }
        if !self.cfg.exposed_headers.is_empty() {
            headers.push((
                "access-control-expose-headers".to_string(),
                self.cfg.exposed_headers.join(", "),
            ));
        }
        headers
    }
}
