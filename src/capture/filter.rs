//! Exclusion filter evaluated before any capture state is allocated.
//!
//! A request is excluded when any rule matches. Rules only look at the
//! borrowed request head, so evaluating the filter costs no allocation.

use std::fmt;
use std::sync::Arc;

use crate::config::schema::ExcludeConfig;

/// Borrowed view of an inbound request head.
#[derive(Debug, Clone, Copy)]
pub struct RequestView<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub headers: &'a http::HeaderMap,
}

impl<'a> RequestView<'a> {
    /// View over an `http` request head. The host comes from the URI
    /// authority when present, else the `Host` header.
    pub fn from_parts(parts: &'a http::request::Parts) -> Self {
        let host = parts
            .uri
            .authority()
            .map(|a| a.as_str())
            .or_else(|| {
                parts
                    .headers
                    .get(http::header::HOST)
                    .and_then(|h| h.to_str().ok())
            })
            .unwrap_or("");
        Self {
            method: parts.method.as_str(),
            host,
            path: parts.uri.path(),
            query: parts.uri.query(),
            headers: &parts.headers,
        }
    }
}

type Predicate = dyn Fn(&RequestView<'_>) -> bool + Send + Sync;

/// A single exclusion predicate.
#[derive(Clone)]
pub enum ExclusionRule {
    /// Path ends with the given suffix (e.g. `.js`).
    PathSuffix(String),
    /// Path starts with the given prefix (e.g. `/static/`).
    PathPrefix(String),
    /// Method equals the given value, ignoring ASCII case.
    Method(String),
    /// Arbitrary predicate supplied by the host.
    Custom(Arc<Predicate>),
}

impl ExclusionRule {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RequestView<'_>) -> bool + Send + Sync + 'static,
    {
        ExclusionRule::Custom(Arc::new(f))
    }

    fn matches(&self, request: &RequestView<'_>) -> bool {
        match self {
            ExclusionRule::PathSuffix(suffix) => request.path.ends_with(suffix.as_str()),
            ExclusionRule::PathPrefix(prefix) => request.path.starts_with(prefix.as_str()),
            ExclusionRule::Method(method) => request.method.eq_ignore_ascii_case(method),
            ExclusionRule::Custom(predicate) => predicate(request),
        }
    }
}

impl fmt::Debug for ExclusionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionRule::PathSuffix(s) => f.debug_tuple("PathSuffix").field(s).finish(),
            ExclusionRule::PathPrefix(p) => f.debug_tuple("PathPrefix").field(p).finish(),
            ExclusionRule::Method(m) => f.debug_tuple("Method").field(m).finish(),
            ExclusionRule::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Ordered set of exclusion rules combined with logical OR.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    rules: Vec<ExclusionRule>,
}

impl ExclusionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the rules declared in configuration.
    pub fn from_config(config: &ExcludeConfig) -> Self {
        let rules = config
            .path_suffixes
            .iter()
            .cloned()
            .map(ExclusionRule::PathSuffix)
            .chain(config.path_prefixes.iter().cloned().map(ExclusionRule::PathPrefix))
            .chain(config.methods.iter().cloned().map(ExclusionRule::Method))
            .collect();
        Self { rules }
    }

    pub fn with_rule(mut self, rule: ExclusionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn push(&mut self, rule: ExclusionRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    /// True if any rule matches the request.
    pub fn should_exclude(&self, request: &RequestView<'_>) -> bool {
        self.rules.iter().any(|rule| rule.matches(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view<'a>(method: &'a str, path: &'a str, headers: &'a http::HeaderMap) -> RequestView<'a> {
        RequestView {
            method,
            host: "localhost",
            path,
            query: None,
            headers,
        }
    }

    #[test]
    fn test_empty_filter_excludes_nothing() {
        let headers = http::HeaderMap::new();
        assert!(!ExclusionFilter::new().should_exclude(&view("GET", "/app.js", &headers)));
    }

    #[test]
    fn test_rules_are_or_combined() {
        let headers = http::HeaderMap::new();
        let filter = ExclusionFilter::new()
            .with_rule(ExclusionRule::PathSuffix(".js".into()))
            .with_rule(ExclusionRule::PathPrefix("/health".into()))
            .with_rule(ExclusionRule::Method("options".into()));

        assert!(filter.should_exclude(&view("GET", "/static/app.js", &headers)));
        assert!(filter.should_exclude(&view("GET", "/healthz", &headers)));
        assert!(filter.should_exclude(&view("OPTIONS", "/api", &headers)));
        assert!(!filter.should_exclude(&view("GET", "/api/users", &headers)));
        assert!(!filter.should_exclude(&view("GET", "/app.json", &headers)));
    }

    #[test]
    fn test_custom_rule_sees_headers() {
        let mut headers = http::HeaderMap::new();
        headers.insert("x-skip-recording", http::HeaderValue::from_static("1"));
        let filter = ExclusionFilter::new().with_rule(ExclusionRule::custom(|req| {
            req.headers.contains_key("x-skip-recording")
        }));

        assert!(filter.should_exclude(&view("POST", "/api", &headers)));
        assert!(!filter.should_exclude(&view("POST", "/api", &http::HeaderMap::new())));
    }

    #[test]
    fn test_from_config() {
        let config = ExcludeConfig {
            path_suffixes: vec![".css".into(), ".svg".into()],
            path_prefixes: vec!["/assets/".into()],
            methods: Vec::new(),
        };
        let filter = ExclusionFilter::from_config(&config);
        let headers = http::HeaderMap::new();
        assert_eq!(filter.rules().len(), 3);
        assert!(filter.should_exclude(&view("GET", "/site.css", &headers)));
        assert!(filter.should_exclude(&view("GET", "/assets/logo.png", &headers)));
        assert!(!filter.should_exclude(&view("GET", "/index.html", &headers)));
    }

    #[test]
    fn test_view_from_parts_prefers_authority() {
        let (parts, _) = http::Request::get("http://api.test/users?page=1")
            .header("host", "ignored.test")
            .body(())
            .unwrap()
            .into_parts();
        let view = RequestView::from_parts(&parts);
        assert_eq!(view.host, "api.test");
        assert_eq!(view.path, "/users");
        assert_eq!(view.query, Some("page=1"));

        let (parts, _) = http::Request::get("/users")
            .header("host", "local.test:8080")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(RequestView::from_parts(&parts).host, "local.test:8080");
    }
}
