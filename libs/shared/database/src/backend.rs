use anyhow::{Result, anyhow};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use shared_config::AppConfig;

/// Non-success HTTP status returned by the backend. Callers downcast the
/// `anyhow::Error` to this type to tell rejections apart from outages.
#[derive(Debug, Error)]
#[error("API error ({status}): {body}")]
pub struct ApiStatusError {
    pub status: u16,
    pub body: String,
}

impl ApiStatusError {
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

pub struct BackendClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl BackendClient {
    pub fn new(config: &AppConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client with timeout, using defaults: {}", e);
                Client::new()
            });

        Self {
            client,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            anon_key: config.backend_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();

        match HeaderValue::from_str(&self.anon_key) {
            Ok(value) => {
                headers.insert("apikey", value);
            }
            Err(_) => warn!("Backend anon key is not a valid header value, skipping apikey header"),
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("Auth token is not a valid header value, sending request without it"),
            }
        }

        headers
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(&self, method: Method, path: &str,
                                         auth_token: Option<&str>, body: Option<Value>,
                                         extra_headers: Option<HeaderMap>)
                                         -> Result<T>
    where T: DeserializeOwned {
        let response = self.send(method, path, auth_token, body, extra_headers).await?;
        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// For endpoints answering `204 No Content` (deletes, minimal inserts).
    pub async fn request_no_content(&self, method: Method, path: &str,
                                    auth_token: Option<&str>, body: Option<Value>)
                                    -> Result<()> {
        self.send(method, path, auth_token, body, None).await?;
        Ok(())
    }

    async fn send(&self, method: Method, path: &str, auth_token: Option<&str>,
                  body: Option<Value>, extra_headers: Option<HeaderMap>)
                  -> Result<reqwest::Response> {
        if self.base_url.is_empty() {
            return Err(anyhow!("Backend URL is not configured"));
        }

        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token);
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("API error ({}): {}", status, error_text);

            return Err(ApiStatusError {
                status: status.as_u16(),
                body: error_text,
            }.into());
        }

        Ok(response)
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

/// True when the error chain carries a reqwest timeout.
pub fn is_timeout(err: &anyhow::Error) -> bool {
    err.downcast_ref::<reqwest::Error>()
        .map(|e| e.is_timeout())
        .unwrap_or(false)
}
