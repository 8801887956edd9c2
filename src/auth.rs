//! Auth strategies: produce per-request headers, cache bearer tokens
//!
//! Grounded in `examples/original_source/src/otel_api_scraper/config.py`'s
//! auth schema and `SPEC_FULL.md` §4.D. The single-flight refresh guard
//! idiom is generalized from `examples/avdb13-grapevine/src/service/
//! server_backoff.rs`'s per-key guarded state, collapsed to one mutex since
//! a single strategy instance caches exactly one token.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{header::HeaderMap, Client};
use tokio::sync::Mutex;

use crate::{
    config::{AuthConfig, BodyShape, HttpMethod},
    error,
    utils::path::lookup_path,
};

const EXPIRY_BUFFER: Duration = Duration::from_secs(30);

/// Dispatches to the configured auth variant. Not a trait object: the set of
/// variants is closed and chosen entirely by config.
pub(crate) enum AuthStrategy {
    Basic { username: String, password: String },
    ApiKey { header_name: String, value: String },
    Oauth(OauthState),
    AzureAd {
        token_url: String,
        client_id: String,
        client_secret: String,
        scope: String,
        cache: Mutex<Option<CachedToken>>,
    },
}

pub(crate) struct OauthState {
    config: OauthConfig,
    cache: Mutex<Option<CachedToken>>,
}

struct OauthConfig {
    token_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    username: Option<String>,
    password: Option<String>,
    static_token: Option<String>,
    method: HttpMethod,
    body_shape: BodyShape,
    token_path: Option<String>,
    extra_headers: std::collections::HashMap<String, String>,
}

#[derive(Clone)]
pub(crate) struct CachedToken {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AuthStrategy {
    pub(crate) fn from_config(config: &AuthConfig) -> Self {
        match config {
            AuthConfig::Basic { username, password } => Self::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            AuthConfig::ApiKey { header_name, value } => Self::ApiKey {
                header_name: header_name.clone(),
                value: value.clone(),
            },
            AuthConfig::Oauth {
                token_url,
                client_id,
                client_secret,
                username,
                password,
                static_token,
                method,
                body_shape,
                token_path,
                extra_headers,
            } => Self::Oauth(OauthState {
                config: OauthConfig {
                    token_url: token_url.clone(),
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    username: username.clone(),
                    password: password.clone(),
                    static_token: static_token.clone(),
                    method: *method,
                    body_shape: *body_shape,
                    token_path: token_path.clone(),
                    extra_headers: extra_headers.clone(),
                },
                cache: Mutex::new(static_token.as_ref().map(|t| CachedToken {
                    token: t.clone(),
                    expires_at: None,
                })),
            }),
            AuthConfig::AzureAd { token_url, client_id, client_secret, scope } => {
                Self::AzureAd {
                    token_url: token_url.clone(),
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    scope: scope.clone(),
                    cache: Mutex::new(None),
                }
            }
        }
    }

    pub(crate) async fn headers(&self, client: &Client) -> Result<HeaderMap, error::Auth> {
        let mut headers = HeaderMap::new();
        match self {
            Self::Basic { username, password } => {
                use base64::Engine as _;
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    format!("Basic {encoded}").parse().expect("valid header value"),
                );
            }
            Self::ApiKey { header_name, value } => {
                headers.insert(
                    reqwest::header::HeaderName::from_bytes(header_name.as_bytes())
                        .expect("valid header name"),
                    value.parse().expect("valid header value"),
                );
            }
            Self::Oauth(state) => {
                let token = state.token(client).await?;
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    format!("Bearer {token}").parse().expect("valid header value"),
                );
            }
            Self::AzureAd { token_url, client_id, client_secret, scope, cache } => {
                let token =
                    azure_ad_token(client, token_url, client_id, client_secret, scope, cache)
                        .await?;
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    format!("Bearer {token}").parse().expect("valid header value"),
                );
            }
        }
        Ok(headers)
    }
}

impl OauthState {
    async fn token(&self, client: &Client) -> Result<String, error::Auth> {
        let mut guard = self.cache.lock().await;

        if let Some(cached) = guard.as_ref() {
            let still_valid = match cached.expires_at {
                None => true,
                Some(exp) => Utc::now() + EXPIRY_BUFFER < exp,
            };
            if still_valid {
                return Ok(cached.token.clone());
            }
        }

        let Some(token_url) = &self.config.token_url else {
            return Err(error::Auth::NoAccessToken);
        };

        let mut form = std::collections::HashMap::new();
        if let Some(id) = &self.config.client_id {
            form.insert("client_id".to_owned(), serde_json::Value::String(id.clone()));
        }
        if let Some(secret) = &self.config.client_secret {
            form.insert(
                "client_secret".to_owned(),
                serde_json::Value::String(secret.clone()),
            );
        }

        let mut request = match self.config.method {
            HttpMethod::Post => client.post(token_url),
            HttpMethod::Get => client.get(token_url),
        };

        for (name, value) in &self.config.extra_headers {
            request = request.header(name, value);
        }
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            request = request.basic_auth(username, Some(password));
        }

        request = match (self.config.method, self.config.body_shape) {
            (HttpMethod::Get, _) => request.query(&form),
            (HttpMethod::Post, BodyShape::Form) => request.form(&form),
            (HttpMethod::Post, BodyShape::Json) => request.json(&form),
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(error::Auth::TokenRequestFailed(response.status()));
        }

        let body: serde_json::Value = response.json().await?;
        let root = serde_json::Value::Null;
        let token_path = self.config.token_path.as_deref().unwrap_or("access_token");
        let token = lookup_path(&body, &root, token_path)
            .ok()
            .flatten()
            .and_then(|v| v.as_str())
            .or_else(|| body.get("access_token").and_then(|v| v.as_str()))
            .ok_or(error::Auth::NoAccessToken)?
            .to_owned();

        let expires_at = body
            .get("expires_in")
            .and_then(serde_json::Value::as_i64)
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

        *guard = Some(CachedToken { token: token.clone(), expires_at });
        Ok(token)
    }
}

async fn azure_ad_token(
    client: &Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    scope: &str,
    cache: &Mutex<Option<CachedToken>>,
) -> Result<String, error::Auth> {
    let mut guard = cache.lock().await;

    if let Some(cached) = guard.as_ref() {
        let still_valid = match cached.expires_at {
            None => true,
            Some(exp) => Utc::now() + EXPIRY_BUFFER < exp,
        };
        if still_valid {
            return Ok(cached.token.clone());
        }
    }

    let form = [
        ("grant_type", "client_credentials"),
        ("client_id", client_id),
        ("client_secret", client_secret),
        ("scope", scope),
    ];

    let response = client.post(token_url).form(&form).send().await?;
    if !response.status().is_success() {
        return Err(error::Auth::TokenRequestFailed(response.status()));
    }

    let body: serde_json::Value = response.json().await?;
    let token = body
        .get("access_token")
        .and_then(|v| v.as_str())
        .ok_or(error::Auth::NoAccessToken)?
        .to_owned();
    let expires_at = body
        .get("expires_in")
        .and_then(serde_json::Value::as_i64)
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

    *guard = Some(CachedToken { token: token.clone(), expires_at });
    Ok(token)
}
