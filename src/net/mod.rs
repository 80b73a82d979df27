//! Network seam between the offline layer and the outside world.
//!
//! Everything that touches the network goes through the [`Network`] trait so
//! the worker, the sync queue and the page-side service can run against the
//! real HTTP client or a scripted fake.

mod client;
mod types;

pub use client::HttpNetwork;
pub use types::{Destination, Headers, Request, RequestMode, Response, ResponseSource};

use async_trait::async_trait;
use thiserror::Error;

/// Transport-level failure: no HTTP response was obtained at all.
///
/// An HTTP error status is not a `FetchError`; it arrives as a [`Response`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  #[error("Network unreachable: {0}")]
  Offline(String),

  #[error("Request timed out")]
  Timeout,

  #[error("Invalid request: {0}")]
  InvalidRequest(String),

  #[error("Transport error: {0}")]
  Transport(String),
}

impl FetchError {
  /// True unless the request itself was malformed.
  ///
  /// Anything else means the exchange did not complete and may succeed
  /// once the connection is back.
  pub fn is_connectivity(&self) -> bool {
    !matches!(self, FetchError::InvalidRequest(_))
  }
}

impl From<reqwest::Error> for FetchError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      FetchError::Timeout
    } else if e.is_builder() {
      FetchError::InvalidRequest(e.to_string())
    } else if e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
      // Refused, dropped mid-request or cut off mid-body
      FetchError::Offline(e.to_string())
    } else {
      FetchError::Transport(e.to_string())
    }
  }
}

/// Something that can perform a fetch.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}
