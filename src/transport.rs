//! HTTP transport with a single authorization retry
//!
//! [`Transport`] sends one [`ApiRequest`] and decodes one typed response. The
//! request flow is:
//!
//! ```text
//! ApiRequest
//!     │
//!     ├─> path resolved against base URL, default headers merged, body encoded
//!     │
//!     ├─> prepare_request hook (e.g. attach bearer token)
//!     │
//!     ├─> HTTP send
//!     │
//!     ├─> 401 and on_unauthorized hook says Retry?
//!     │       └─> prepare_request hook again, send once more
//!     │
//!     └─> classify: 2xx + decodes │ DecodingFailed │ UnacceptableStatus
//! ```
//!
//! There is no retry beyond that single 401 path. Backoff on 5xx or 429
//! belongs to the layers above.

use crate::config::TransportConfig;
use crate::context::TurnContext;
use crate::hooks::{RetryDecision, TransportHooks, UnauthorizedEvent};
use crate::{Error, Result};
use futures::stream::{self, StreamExt};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// A typed request before URL resolution and preparation
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Path relative to the transport's base URL
    pub path: String,
    pub method: Method,
    pub query: Vec<(String, String)>,
    /// Per-request headers; override defaults with the same name
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Attach a JSON body.
    ///
    /// The body goes through `serde_json::Value`, whose object map keeps keys
    /// sorted, so equal bodies always encode to identical bytes.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }
}

/// A fully resolved request as seen by the hooks
#[derive(Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    /// Lowercased header names
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl PreparedRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
    }

    /// Token from an `Authorization: Bearer ...` header, if present
    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
    }
}

impl std::fmt::Debug for PreparedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let headers: BTreeMap<&str, &str> = self
            .headers
            .iter()
            .map(|(name, value)| {
                if name == "authorization" {
                    (name.as_str(), "***")
                } else {
                    (name.as_str(), value.as_str())
                }
            })
            .collect();

        f.debug_struct("PreparedRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &headers)
            .field("body", &self.body.as_ref().map(|b| format!("{} bytes", b.len())))
            .finish()
    }
}

/// Sends typed requests to one base URL.
///
/// Holds no per-request state, so one instance (or its clones, which share
/// the connection pool) can serve many concurrent requests.
#[derive(Clone)]
pub struct Transport {
    config: TransportConfig,
    http_client: reqwest::Client,
    hooks: TransportHooks,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            hooks: TransportHooks::new(),
        })
    }

    pub fn with_hooks(mut self, hooks: TransportHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Install the bearer prepare hook and the refresh-on-401 hook
    pub fn with_bearer_auth(self) -> Self {
        self.with_hooks(TransportHooks::bearer())
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn hooks(&self) -> &TransportHooks {
        &self.hooks
    }

    /// Resolve `path` against the base URL with exactly one `/` between
    /// segments.
    pub fn resolve_url(&self, path: &str) -> Result<Url> {
        join_url(&self.config.base_url, path)
    }

    /// Send a request and decode the response body as `R`.
    ///
    /// An empty 2xx body decodes as JSON `null`, so `R = ()` works for
    /// endpoints that return nothing.
    pub async fn send<R: DeserializeOwned>(
        &self,
        request: ApiRequest,
        ctx: &TurnContext,
    ) -> Result<R> {
        let response = self.dispatch(&request, ctx).await?;
        let status = response.status();
        let body = read_body(response).await?;

        if !status.is_success() {
            return Err(Error::UnacceptableStatus {
                code: status.as_u16(),
                body,
            });
        }

        let raw = if body.trim().is_empty() { "null" } else { body.as_str() };
        serde_json::from_str(raw).map_err(|e| Error::decoding(e, body.clone()))
    }

    /// Send a request and hand back the successful response unread, for
    /// streaming bodies. Preparation and the 401 retry apply as in
    /// [`send`](Self::send).
    pub async fn open_stream(
        &self,
        request: ApiRequest,
        ctx: &TurnContext,
    ) -> Result<reqwest::Response> {
        let response = self.dispatch(&request, ctx).await?;
        let status = response.status();
        if !status.is_success() {
            let body = read_body(response).await?;
            return Err(Error::UnacceptableStatus {
                code: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Best-effort batch: run up to `concurrency` requests at a time and keep
    /// only the ones that succeed.
    ///
    /// Failed items are logged and dropped, not returned. Results arrive in
    /// completion order, so there is no per-input correspondence. Callers
    /// that need every outcome should call [`send`](Self::send) themselves.
    pub async fn fetch_all<R: DeserializeOwned>(
        &self,
        requests: Vec<ApiRequest>,
        ctx: &TurnContext,
        concurrency: usize,
    ) -> Vec<R> {
        stream::iter(requests)
            .map(|request| async move {
                let path = request.path.clone();
                (path, self.send::<R>(request, ctx).await)
            })
            .buffer_unordered(concurrency.max(1))
            .filter_map(|(path, result)| async move {
                match result {
                    Ok(value) => Some(value),
                    Err(e) => {
                        log::debug!("dropping failed batch request {}: {}", path, e);
                        None
                    }
                }
            })
            .collect()
            .await
    }

    /// Resolve, merge headers and encode the body; no hooks yet.
    fn build_request(&self, request: &ApiRequest) -> Result<PreparedRequest> {
        let mut url = self.resolve_url(&request.path)?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(
                request
                    .query
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str())),
            );
        }

        let mut prepared = PreparedRequest::new(request.method.clone(), url);
        for (name, value) in self.config.default_headers.iter().chain(&request.headers) {
            prepared.set_header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            prepared.body = Some(serde_json::to_vec(body)?);
            if prepared.header("content-type").is_none() {
                prepared.set_header("content-type", "application/json");
            }
        }

        Ok(prepared)
    }

    async fn dispatch(&self, request: &ApiRequest, ctx: &TurnContext) -> Result<reqwest::Response> {
        let unprepared = self.build_request(request)?;

        let presented = match ctx.auth() {
            Some(auth) => Some(auth.current_token().await),
            None => None,
        };
        let prepared = self.hooks.prepare(unprepared.clone(), ctx).await?;
        let response = self.execute(prepared.clone()).await?;

        if response.status() != StatusCode::UNAUTHORIZED || self.hooks.on_unauthorized.is_none() {
            return Ok(response);
        }

        let code = response.status().as_u16();
        let body = read_body(response).await?;
        let event = UnauthorizedEvent {
            status: code,
            body: body.clone(),
            request: prepared,
            token: presented,
            context: ctx.clone(),
        };

        match self.hooks.unauthorized(event).await {
            Some(Ok(RetryDecision::Retry)) => {
                log::debug!("{} {} returned 401, retrying once", request.method, request.path);
                let prepared = self.hooks.prepare(unprepared, ctx).await?;
                self.execute(prepared).await
            }
            Some(Err(e)) => Err(e),
            Some(Ok(RetryDecision::DoNotRetry)) | None => {
                log::debug!("{} {} returned 401, not retrying", request.method, request.path);
                Err(Error::UnacceptableStatus { code, body })
            }
        }
    }

    async fn execute(&self, prepared: PreparedRequest) -> Result<reqwest::Response> {
        log::trace!("sending {:?}", prepared);

        let mut builder = self.http_client.request(prepared.method, prepared.url);
        for (name, value) in &prepared.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = prepared.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(Error::RequestFailed)?;
        log::debug!("{} {}", response.status(), response.url());
        Ok(response)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .finish()
    }
}

async fn read_body(response: reqwest::Response) -> Result<String> {
    response
        .text()
        .await
        .map_err(|e| Error::invalid_response(format!("failed to read response body: {}", e)))
}

/// Join a base URL and a relative path into one normalized path.
///
/// Empty segments from either side are dropped, so `a/` + `/b` and `a` + `b`
/// both give `a/b`. The base URL's query string is preserved.
pub(crate) fn join_url(base: &str, path: &str) -> Result<Url> {
    let mut url =
        Url::parse(base).map_err(|e| Error::invalid_url(format!("{}: {}", base, e)))?;
    if url.cannot_be_a_base() {
        return Err(Error::invalid_url(format!("{} cannot be a base URL", base)));
    }

    let joined = url
        .path()
        .split('/')
        .chain(path.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    url.set_path(&format!("/{}", joined));
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport(base_url: &str) -> Transport {
        let config = TransportConfig::builder()
            .base_url(base_url)
            .header("X-Client", "agent-turn")
            .header("Accept", "application/json")
            .build()
            .unwrap();
        Transport::new(config).unwrap()
    }

    #[test]
    fn test_join_url_normalizes_slashes() {
        let cases = [
            ("https://api.example.com/v1", "models", "/v1/models"),
            ("https://api.example.com/v1/", "models", "/v1/models"),
            ("https://api.example.com/v1", "/models", "/v1/models"),
            ("https://api.example.com/v1/", "//models//list", "/v1/models/list"),
            ("https://api.example.com", "models", "/models"),
            ("https://api.example.com/", "", "/"),
        ];
        for (base, path, expected) in cases {
            let url = join_url(base, path).unwrap();
            assert_eq!(url.path(), expected, "{} + {}", base, path);
            assert!(!url.as_str()[8..].contains("//"));
        }
    }

    #[test]
    fn test_join_url_keeps_base_query() {
        let url = join_url("https://api.example.com/v1?key=1", "models").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/models?key=1");
    }

    #[test]
    fn test_join_url_rejects_bad_base() {
        assert!(matches!(
            join_url("not a url", "models"),
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            join_url("mailto:someone@example.com", "models"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_build_request_merges_headers() {
        let transport = transport("https://api.example.com/v1");
        let request = ApiRequest::get("items")
            .header("accept", "text/plain")
            .query("page", "2")
            .query("q", "a b");

        let prepared = transport.build_request(&request).unwrap();
        assert_eq!(
            prepared.url.as_str(),
            "https://api.example.com/v1/items?page=2&q=a+b"
        );
        assert_eq!(prepared.header("Accept"), Some("text/plain"));
        assert_eq!(prepared.header("x-client"), Some("agent-turn"));
        assert_eq!(prepared.header("content-type"), None);
        assert!(prepared.body.is_none());
    }

    #[test]
    fn test_build_request_encodes_sorted_body() {
        #[derive(Serialize)]
        struct Body {
            zebra: u32,
            apple: &'static str,
            path: &'static str,
        }

        let transport = transport("https://api.example.com/v1");
        let request = ApiRequest::post("items")
            .json(&Body {
                zebra: 1,
                apple: "a",
                path: "a/b",
            })
            .unwrap();

        let prepared = transport.build_request(&request).unwrap();
        let body = String::from_utf8(prepared.body.clone().unwrap()).unwrap();
        assert_eq!(body, r#"{"apple":"a","path":"a/b","zebra":1}"#);
        assert_eq!(prepared.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_build_request_respects_explicit_content_type() {
        let transport = transport("https://api.example.com/v1");
        let request = ApiRequest::post("items")
            .header("Content-Type", "application/merge-patch+json")
            .json(&json!({"a": 1}))
            .unwrap();

        let prepared = transport.build_request(&request).unwrap();
        assert_eq!(
            prepared.header("content-type"),
            Some("application/merge-patch+json")
        );
    }

    #[test]
    fn test_build_request_invalid_base() {
        let transport = transport("::::");
        let err = transport.build_request(&ApiRequest::get("x")).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }

    #[test]
    fn test_prepared_request_debug_redacts_authorization() {
        let mut prepared = PreparedRequest::new(
            Method::GET,
            Url::parse("https://api.example.com").unwrap(),
        );
        prepared.set_header("Authorization", "Bearer secret");
        let debug = format!("{:?}", prepared);
        assert!(!debug.contains("secret"));
        assert_eq!(prepared.bearer_token(), Some("secret"));
    }
}
