use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};

use super::types::{Headers, Request, Response, ResponseSource};
use super::{FetchError, Network};

/// HTTP network backed by reqwest.
///
/// Timeouts are left to the client defaults.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self::with_client(client))
  }

  /// Wraps an already configured client.
  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await?;

    let mut requested = request.url.clone();
    requested.set_fragment(None);
    let redirected = response.url() != &requested;

    let status = response.status();
    let headers: Headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response.bytes().await?.to_vec();

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or("").to_string(),
      headers,
      body,
      redirected,
      source: ResponseSource::Network,
    })
  }
}
