use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use url::Url;

use super::FetchError;

/// Header map with lowercased names.
pub type Headers = BTreeMap<String, String>;

/// What the requested resource will be used for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  /// Fetches with no particular destination (XHR/fetch from script)
  #[default]
  Empty,
  Document,
  Style,
  Script,
  Image,
  Font,
  Manifest,
  Other,
}

impl Destination {
  /// Build-time assets served cache-first
  pub fn is_static_asset(self) -> bool {
    matches!(
      self,
      Destination::Style | Destination::Script | Destination::Image
    )
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level document load
  Navigate,
  SameOrigin,
  #[default]
  Cors,
  NoCors,
}

/// An outgoing request as seen by the worker.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub mode: RequestMode,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl Request {
  /// Plain GET with no destination (script-initiated).
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      destination: Destination::Empty,
      mode: RequestMode::Cors,
      headers: Headers::new(),
      body: None,
    }
  }

  /// Document load initiated by navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  /// Subresource load for the given destination.
  pub fn asset(url: Url, destination: Destination) -> Self {
    Self {
      destination,
      mode: RequestMode::NoCors,
      ..Self::get(url)
    }
  }

  /// Request carrying a JSON body.
  pub fn json<T: Serialize + ?Sized>(
    method: Method,
    url: Url,
    payload: &T,
  ) -> Result<Self, FetchError> {
    let body = serde_json::to_vec(payload)
      .map_err(|e| FetchError::InvalidRequest(format!("Failed to serialize body: {}", e)))?;

    let mut headers = Headers::new();
    headers.insert("content-type".to_string(), "application/json".to_string());

    Ok(Self {
      method,
      url,
      destination: Destination::Empty,
      mode: RequestMode::Cors,
      headers,
      body: Some(body),
    })
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Cache,
  /// Built locally (offline placeholder)
  Synthesized,
}

#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  pub body: Vec<u8>,
  /// The final URL differs from the requested one
  pub redirected: bool,
  pub source: ResponseSource,
}

impl Response {
  /// Create a network response with the given status and body.
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
        .to_string(),
      headers: Headers::new(),
      body: body.into(),
      redirected: false,
      source: ResponseSource::Network,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  /// 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only an exact, non-redirected 200 may be stored in a cache partition.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && !self.redirected
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_lowercase()).map(String::as_str)
  }

  pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
    serde_json::from_slice(&self.body)
  }
}
