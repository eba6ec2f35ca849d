//! Authenticated HTTP client for the chat REST API
//!
//! Wraps reqwest::Client with bearer token injection and uniform status
//! handling.

use serde::de::DeserializeOwned;

use super::ChatError;
use crate::config::Config;

/// Authenticated client for the chat endpoints.
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    token: String,
    page_size: u32,
}

impl ApiClient {
    /// Build a client from config. Fails if no valid token is stored.
    pub fn new(config: &Config) -> Result<Self, ChatError> {
        let token = config.valid_token().ok_or(ChatError::NotAuthenticated)?;
        let mut client = Self::with_token(config.api_url(), token);
        client.page_size = config.chat.page_size.max(1);
        Ok(client)
    }

    pub fn with_token(base: String, token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            token,
            page_size: 20,
        }
    }

    /// Sessions requested per listing page.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// GET and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ChatError> {
        let url = self.url(path);
        let request_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!("GET {} (request {})", url, request_id);

        let resp = self
            .http
            .get(&url)
            .query(query)
            .bearer_auth(&self.token)
            .header("X-Request-Id", &request_id)
            .send()
            .await
            .map_err(|source| ChatError::Http {
                url: url.clone(),
                source,
            })?;

        let resp = check_response(resp, &url).await?;
        decode_body(resp, &url).await
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ChatError> {
        let resp = self.send_json(reqwest::Method::POST, path, body).await?;
        decode_body(resp, &self.url(path)).await
    }

    /// Send a JSON body and ignore the response payload.
    pub async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ChatError> {
        let url = self.url(path);
        let request_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!("{} {} (request {})", method, url, request_id);

        let resp = self
            .http
            .request(method, &url)
            .bearer_auth(&self.token)
            .header("X-Request-Id", &request_id)
            .json(body)
            .send()
            .await
            .map_err(|source| ChatError::Http {
                url: url.clone(),
                source,
            })?;

        check_response(resp, &url).await
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response, ChatError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ChatError::Unauthorized(url.to_string()));
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ChatError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        });
    }
    Ok(resp)
}

async fn decode_body<T: DeserializeOwned>(resp: reqwest::Response, url: &str) -> Result<T, ChatError> {
    let bytes = resp.bytes().await.map_err(|source| ChatError::Http {
        url: url.to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| ChatError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}
