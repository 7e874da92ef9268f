//! Typed Rust client for the DigitalOcean v2 API.
//!
//! Covers the subset needed for managing worker droplets:
//! droplets (create, list by tag, delete by tag), plus a pool that
//! rotates through several API tokens.

mod types;

use std::future::Future;

pub use types::*;

const BASE_URL: &str = "https://api.digitalocean.com/v2";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("digitalocean api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("digitalocean api {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
        /// Unix timestamp from the `ratelimit-reset` header, when present.
        rate_limit_reset: Option<i64>,
    },

    #[error("no digitalocean api tokens configured")]
    NoCredentials,

    #[error("all {} digitalocean api tokens were rejected", .0.len())]
    CredentialsExhausted(Vec<Error>),
}

impl Error {
    /// HTTP status of an API error response.
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Request(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(reqwest::StatusCode::UNAUTHORIZED)
    }

    /// Parsed `{id, message}` error document, if the body held one.
    pub fn error_body(&self) -> Option<ApiErrorBody> {
        match self {
            Self::Api { body, .. } => serde_json::from_str(body).ok(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the DigitalOcean REST API, bound to a single token.
#[derive(Clone)]
pub struct DigitalOceanClient {
    token: String,
    http: reqwest::Client,
}

impl DigitalOceanClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{BASE_URL}{path}")
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn check(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let rate_limit_reset = resp
                .headers()
                .get("ratelimit-reset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok());
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                endpoint,
                status,
                body,
                rate_limit_reset,
            });
        }
        Ok(resp)
    }

    // ── Droplets ─────────────────────────────────────────────────────

    pub async fn create_droplet(&self, req: &CreateDropletRequest) -> Result<Droplet> {
        let resp = self
            .http
            .post(self.url("/droplets"))
            .header("Authorization", self.auth())
            .json(req)
            .send()
            .await?;

        let body: DropletResponse = Self::check(resp, "create droplet").await?.json().await?;
        Ok(body.droplet)
    }

    pub async fn list_droplets_by_tag(&self, tag: &str) -> Result<Vec<Droplet>> {
        let resp = self
            .http
            .get(self.url("/droplets"))
            .header("Authorization", self.auth())
            .query(&[("tag_name", tag)])
            .send()
            .await?;

        let body: DropletsResponse = Self::check(resp, "list droplets").await?.json().await?;
        Ok(body.droplets)
    }

    pub async fn delete_droplets_by_tag(&self, tag: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url("/droplets"))
            .header("Authorization", self.auth())
            .query(&[("tag_name", tag)])
            .send()
            .await?;

        Self::check(resp, "delete droplets").await?;
        Ok(())
    }
}

/// Ordered set of clients, one per API token.
///
/// Operations run against the first token; a `401 Unauthorized` moves on to
/// the next one. Any other outcome is returned as-is.
#[derive(Clone)]
pub struct ClientPool {
    clients: Vec<DigitalOceanClient>,
}

impl ClientPool {
    pub fn new(tokens: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            clients: tokens.into_iter().map(DigitalOceanClient::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub async fn run<'a, T, F, Fut>(&'a self, op: F) -> Result<T>
    where
        F: Fn(&'a DigitalOceanClient) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.clients.is_empty() {
            return Err(Error::NoCredentials);
        }

        let mut rejected = Vec::new();
        for (index, client) in self.clients.iter().enumerate() {
            match op(client).await {
                Err(e) if e.is_unauthorized() => {
                    tracing::warn!(token_index = index, "digitalocean: api token rejected");
                    rejected.push(e);
                }
                other => return other,
            }
        }

        Err(Error::CredentialsExhausted(rejected))
    }
}
