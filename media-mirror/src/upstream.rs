//! HTTP client for the third-party APIs.
//!
//! Fail-fast: one attempt per call, no retries. Callers decide what a
//! failure means for them.

use crate::config::Upstreams;
use crate::metrics_defs::{UPSTREAM_REQUEST_DURATION, UPSTREAM_REQUEST_ERROR};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{counter, histogram};
use std::time::Instant;
use url::Url;

/// Cap on how much of an error body is kept for diagnostics.
const MAX_ERROR_BODY: usize = 512;

#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    #[error("{upstream} responded {status}: {body}")]
    Http {
        upstream: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("{upstream} reported an error: {message}")]
    Api {
        upstream: &'static str,
        message: String,
        /// Status carried inside the payload, if any.
        status: Option<u16>,
    },
    #[error("request to {upstream} failed: {error}")]
    Transport {
        upstream: &'static str,
        error: reqwest::Error,
    },
    #[error("could not decode {upstream} response: {error}")]
    Decode {
        upstream: &'static str,
        error: serde_json::Error,
    },
}

impl UpstreamError {
    /// Whether upstream says the requested subject does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            UpstreamError::Http { status, .. } => *status == StatusCode::NOT_FOUND,
            UpstreamError::Api {
                message, status, ..
            } => *status == Some(404) || message.to_lowercase().contains("not found"),
            UpstreamError::Transport { .. } | UpstreamError::Decode { .. } => false,
        }
    }

    /// A summary without upstream bodies or messages, safe to show to clients.
    pub fn public_message(&self) -> String {
        match self {
            UpstreamError::Http {
                upstream, status, ..
            } => format!("{upstream} API error: {}", status.as_u16()),
            UpstreamError::Api { upstream, .. } => format!("{upstream} API error"),
            UpstreamError::Transport { upstream, .. } => format!("{upstream} API unreachable"),
            UpstreamError::Decode { upstream, .. } => {
                format!("{upstream} API returned an unreadable response")
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Http { .. } => "http",
            UpstreamError::Api { .. } => "api",
            UpstreamError::Transport { .. } => "transport",
            UpstreamError::Decode { .. } => "decode",
        }
    }
}

#[derive(Deserialize, Debug)]
struct GraphQlError {
    message: String,
    status: Option<u16>,
}

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push_str("...");
    }
    body
}

/// GraphQL errors carried by a non-2xx response, if the body is GraphQL.
fn graphql_errors(body: &str) -> Option<Vec<GraphQlError>> {
    serde_json::from_str::<GraphQlResponse<serde_json::Value>>(body)
        .ok()
        .map(|response| response.errors)
        .filter(|errors| !errors.is_empty())
}

fn api_error(upstream: &'static str, errors: Vec<GraphQlError>) -> UpstreamError {
    let status = errors.iter().find_map(|e| e.status);
    let message = errors
        .into_iter()
        .map(|e| e.message)
        .collect::<Vec<_>>()
        .join("; ");
    UpstreamError::Api {
        upstream,
        message,
        status,
    }
}

#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(config: &Upstreams) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(UpstreamClient { client })
    }

    /// Runs a GraphQL operation and returns its `data`.
    ///
    /// A response without `data` yields `T::default()`, so every lookup
    /// field reads as absent.
    pub async fn post_graphql<T>(
        &self,
        upstream: &'static str,
        url: &Url,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, UpstreamError>
    where
        T: DeserializeOwned + Default,
    {
        let request = self
            .client
            .post(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&json!({ "query": query, "variables": variables }));

        let body = match self.send_raw(upstream, request).await {
            Ok(body) => body,
            // Upstream reports GraphQL errors with a matching HTTP status.
            Err(UpstreamError::Http { body, .. }) if graphql_errors(&body).is_some() => {
                let errors = graphql_errors(&body).unwrap_or_default();
                return Err(self.failed(api_error(upstream, errors)));
            }
            Err(e) => return Err(self.failed(e)),
        };

        let response: GraphQlResponse<T> = serde_json::from_str(&body)
            .map_err(|error| self.failed(UpstreamError::Decode { upstream, error }))?;
        if !response.errors.is_empty() {
            return Err(self.failed(api_error(upstream, response.errors)));
        }
        Ok(response.data.unwrap_or_default())
    }

    pub async fn post_json<T, B>(
        &self,
        upstream: &'static str,
        url: Url,
        body: &B,
    ) -> Result<T, UpstreamError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = self.client.post(url).json(body);
        self.send(upstream, request).await
    }

    pub async fn get_json<T>(&self, upstream: &'static str, url: Url) -> Result<T, UpstreamError>
    where
        T: DeserializeOwned,
    {
        let request = self.client.get(url);
        self.send(upstream, request).await
    }

    async fn send<T>(
        &self,
        upstream: &'static str,
        request: RequestBuilder,
    ) -> Result<T, UpstreamError>
    where
        T: DeserializeOwned,
    {
        let body = self
            .send_raw(upstream, request)
            .await
            .map_err(|e| self.failed(e))?;
        serde_json::from_str(&body)
            .map_err(|error| self.failed(UpstreamError::Decode { upstream, error }))
    }

    async fn send_raw(
        &self,
        upstream: &'static str,
        request: RequestBuilder,
    ) -> Result<String, UpstreamError> {
        let start = Instant::now();
        let result = self.execute(upstream, request).await;
        histogram!(UPSTREAM_REQUEST_DURATION, "upstream" => upstream)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute(
        &self,
        upstream: &'static str,
        request: RequestBuilder,
    ) -> Result<String, UpstreamError> {
        // Urls may carry api keys; keep them out of error messages.
        let transport = |error: reqwest::Error| UpstreamError::Transport {
            upstream,
            error: error.without_url(),
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;

        if !status.is_success() {
            return Err(UpstreamError::Http {
                upstream,
                status,
                body: truncate(body),
            });
        }
        Ok(body)
    }

    fn failed(&self, error: UpstreamError) -> UpstreamError {
        counter!(
            UPSTREAM_REQUEST_ERROR,
            "upstream" => error_upstream(&error),
            "kind" => error.kind()
        )
        .increment(1);
        tracing::debug!(error = %error, "upstream request failed");
        error
    }
}

fn error_upstream(error: &UpstreamError) -> &'static str {
    match error {
        UpstreamError::Http { upstream, .. }
        | UpstreamError::Api { upstream, .. }
        | UpstreamError::Transport { upstream, .. }
        | UpstreamError::Decode { upstream, .. } => upstream,
    }
}
