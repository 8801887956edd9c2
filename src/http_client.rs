//! Bounded-concurrency HTTP gateway
//!
//! Grounded in `examples/original_source/src/otel_api_scraper/http_client.py`:
//! one global semaphore, lazily-created per-source semaphores, TLS
//! enforcement checked before the request is attempted, and `urljoin`-style
//! URL composition.

use std::{collections::HashMap, sync::Arc, time::Duration};

use reqwest::{header::HeaderMap, Client, Method, Response};
use tokio::sync::{Mutex, Semaphore};

use crate::error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) struct HttpGateway {
    client: Client,
    global_semaphore: Arc<Semaphore>,
    source_semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
    enforce_tls: bool,
}

impl HttpGateway {
    pub(crate) fn new(max_global_concurrency: usize, enforce_tls: bool) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client configuration should be valid");

        Self {
            client,
            global_semaphore: Arc::new(Semaphore::new(max_global_concurrency.max(1))),
            source_semaphores: Mutex::new(HashMap::new()),
            enforce_tls,
        }
    }

    /// Lazily create (or reuse) a source's own admission semaphore, sized
    /// `min(max_concurrency, default_source_concurrency)`.
    pub(crate) async fn source_semaphore(
        &self,
        source: &str,
        max_concurrency: Option<usize>,
        default_source_concurrency: usize,
    ) -> Arc<Semaphore> {
        let mut map = self.source_semaphores.lock().await;
        if let Some(existing) = map.get(source) {
            return Arc::clone(existing);
        }
        let effective = max_concurrency
            .map_or(default_source_concurrency, |m| m.min(default_source_concurrency))
            .max(1);
        let semaphore = Arc::new(Semaphore::new(effective));
        map.insert(source.to_owned(), Arc::clone(&semaphore));
        semaphore
    }

    pub(crate) fn global_semaphore(&self) -> Arc<Semaphore> {
        Arc::clone(&self.global_semaphore)
    }

    /// The underlying client, for callers (auth token refresh) that need to
    /// issue requests outside the gateway's own TLS/semaphore envelope.
    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Join a base URL and an endpoint path with exactly one `/` between them.
    pub(crate) fn build_url(base: &str, endpoint: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), endpoint.trim_start_matches('/'))
    }

    pub(crate) async fn request(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        query: Option<&str>,
        json_body: Option<&serde_json::Value>,
    ) -> Result<Response, error::Transport> {
        if self.enforce_tls && url.starts_with("http://") {
            return Err(error::Transport::TlsRequired(url.to_owned()));
        }

        let full_url = match query {
            Some(query) if !query.is_empty() => {
                let separator = if url.contains('?') { '&' } else { '?' };
                format!("{url}{separator}{query}")
            }
            _ => url.to_owned(),
        };

        let mut request = self.client.request(method, full_url).headers(headers);
        if let Some(body) = json_body {
            request = request.json(body);
        }

        let response = request.send().await?;
        Ok(response)
    }

    pub(crate) async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_joins_with_exactly_one_slash() {
        assert_eq!(
            HttpGateway::build_url("https://api.example.com/", "/v1/items"),
            "https://api.example.com/v1/items"
        );
        assert_eq!(
            HttpGateway::build_url("https://api.example.com", "v1/items"),
            "https://api.example.com/v1/items"
        );
    }

    #[tokio::test]
    async fn tls_enforcement_rejects_plaintext_before_request() {
        let gateway = HttpGateway::new(4, true);
        let err = gateway
            .request(Method::GET, "http://example.com", HeaderMap::new(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, error::Transport::TlsRequired(_)));
    }

    #[tokio::test]
    async fn request_reaches_a_mock_upstream_and_carries_query_string() {
        use wiremock::{
            matchers::{method, path, query_param},
            Mock, MockServer, ResponseTemplate,
        };

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/items"))
            .and(query_param("since", "2024-01-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(4, false);
        let url = HttpGateway::build_url(&server.uri(), "/v1/items");
        let response = gateway
            .request(Method::GET, &url, HeaderMap::new(), Some("since=2024-01-01"), None)
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn request_surfaces_upstream_error_status() {
        use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

        let gateway = HttpGateway::new(4, false);
        let response =
            gateway.request(Method::GET, &server.uri(), HeaderMap::new(), None, None).await.unwrap();

        assert_eq!(response.status(), 503);
    }
}
