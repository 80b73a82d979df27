//! Per-request caching policy applied by the worker.

use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheKey, CacheStore, CachedResponse, PartitionNames};
use crate::net::{FetchError, Headers, Network, Request, Response, ResponseSource};

const EXTENSION_SCHEME: &str = "chrome-extension";

pub const OFFLINE_ERROR: &str = "Offline";
pub const OFFLINE_MESSAGE: &str = "This feature requires an internet connection";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassThrough {
  /// Mutations go straight to the network and rely on the sync queue
  NonGet,
  ExtensionScheme,
  /// GET that matches no policy (fonts, cross-origin data, ...)
  Unclassified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  NotIntercepted(PassThrough),
  Navigation,
  StaticAsset,
  Api,
}

/// Decide which policy handles a request.
pub fn classify(request: &Request, api_prefix: &str) -> RequestClass {
  if request.method != Method::GET {
    return RequestClass::NotIntercepted(PassThrough::NonGet);
  }
  if request.url.scheme() == EXTENSION_SCHEME {
    return RequestClass::NotIntercepted(PassThrough::ExtensionScheme);
  }
  if request.is_navigation() {
    return RequestClass::Navigation;
  }
  if request.destination.is_static_asset() {
    return RequestClass::StaticAsset;
  }
  if request.url.path().starts_with(api_prefix) {
    return RequestClass::Api;
  }
  RequestClass::NotIntercepted(PassThrough::Unclassified)
}

#[derive(Debug)]
pub enum RouteOutcome {
  Respond(Response),
  /// Let the platform perform the request itself
  NotIntercepted,
  /// Nothing to answer with; the caller sees a network error
  Failed(FetchError),
}

impl RouteOutcome {
  pub fn response(&self) -> Option<&Response> {
    match self {
      RouteOutcome::Respond(response) => Some(response),
      _ => None,
    }
  }
}

/// Structured stand-in for an API call made while offline.
pub fn offline_response() -> Response {
  let mut headers = Headers::new();
  headers.insert("content-type".to_string(), "application/json".to_string());

  Response {
    status: 503,
    status_text: "Service Unavailable".to_string(),
    headers,
    body: json!({ "error": OFFLINE_ERROR, "message": OFFLINE_MESSAGE })
      .to_string()
      .into_bytes(),
    redirected: false,
    source: ResponseSource::Synthesized,
  }
}

pub struct RequestRouter {
  store: Arc<dyn CacheStore>,
  network: Arc<dyn Network>,
  partitions: PartitionNames,
  api_prefix: String,
  /// Shell served to navigations when both cache and network miss
  offline_document: Url,
}

impl RequestRouter {
  pub fn new(
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    partitions: PartitionNames,
    api_prefix: &str,
    offline_document: Url,
  ) -> Self {
    Self {
      store,
      network,
      partitions,
      api_prefix: api_prefix.to_string(),
      offline_document,
    }
  }

  pub async fn route(&self, request: &Request) -> RouteOutcome {
    match classify(request, &self.api_prefix) {
      RequestClass::NotIntercepted(reason) => {
        debug!(url = %request.url, ?reason, "Not intercepted");
        RouteOutcome::NotIntercepted
      }
      RequestClass::Navigation => self.navigation(request).await,
      RequestClass::StaticAsset => self.static_asset(request).await,
      RequestClass::Api => self.api(request).await,
    }
  }

  /// Navigation: cache, then network, then the offline document.
  ///
  /// 1. Dynamic partition hit - return immediately
  /// 2. Miss - fetch; a 200 is stored in the dynamic partition
  /// 3. Network failure - serve the offline document from the static partition
  async fn navigation(&self, request: &Request) -> RouteOutcome {
    let key = CacheKey::for_request(request);

    if let Some(cached) = self.lookup(&self.partitions.dynamic_name, &key).await {
      debug!(url = %request.url, "Serving from cache");
      return RouteOutcome::Respond(cached.into_response());
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self
          .store_if_cacheable(&self.partitions.dynamic_name, &key, &response)
          .await;
        RouteOutcome::Respond(response)
      }
      Err(e) => {
        info!(url = %request.url, "Network failed, serving offline page");
        let shell = CacheKey::get(&self.offline_document);
        match self.lookup(&self.partitions.static_name, &shell).await {
          Some(cached) => RouteOutcome::Respond(cached.into_response()),
          None => {
            warn!(document = %self.offline_document, "Offline document missing from cache");
            RouteOutcome::Failed(e)
          }
        }
      }
    }
  }

  /// Static asset: cache-first against the static partition.
  ///
  /// A miss while offline fails open: no placeholder asset is produced.
  async fn static_asset(&self, request: &Request) -> RouteOutcome {
    let key = CacheKey::for_request(request);

    if let Some(cached) = self.lookup(&self.partitions.static_name, &key).await {
      debug!(url = %request.url, "Serving asset from cache");
      return RouteOutcome::Respond(cached.into_response());
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self
          .store_if_cacheable(&self.partitions.static_name, &key, &response)
          .await;
        RouteOutcome::Respond(response)
      }
      Err(e) => {
        warn!(url = %request.url, "Failed to fetch asset: {}", e);
        RouteOutcome::Failed(e)
      }
    }
  }

  /// API: network-first.
  ///
  /// 1. Network success - a 200 GET is stored in the dynamic partition
  /// 2. Network failure - serve the dynamic partition's copy
  /// 3. No copy - synthesized 503 offline response
  async fn api(&self, request: &Request) -> RouteOutcome {
    let key = CacheKey::for_request(request);

    match self.network.fetch(request).await {
      Ok(response) => {
        if request.method == Method::GET {
          self
            .store_if_cacheable(&self.partitions.dynamic_name, &key, &response)
            .await;
        }
        RouteOutcome::Respond(response)
      }
      Err(e) => {
        debug!(url = %request.url, "API fetch failed: {}", e);
        match self.lookup(&self.partitions.dynamic_name, &key).await {
          Some(cached) => {
            info!(url = %request.url, "Serving API from cache (offline)");
            RouteOutcome::Respond(cached.into_response())
          }
          None => RouteOutcome::Respond(offline_response()),
        }
      }
    }
  }

  /// Cache read where a storage error counts as a miss.
  async fn lookup(&self, partition: &str, key: &CacheKey) -> Option<CachedResponse> {
    match self.store.get(partition, key).await {
      Ok(entry) => entry,
      Err(e) => {
        warn!(partition, url = key.url(), "Cache read failed: {}", e);
        None
      }
    }
  }

  async fn store_if_cacheable(&self, partition: &str, key: &CacheKey, response: &Response) {
    if !response.is_cacheable() {
      return;
    }
    if let Err(e) = self
      .store
      .put(partition, key, &CachedResponse::from_response(response))
      .await
    {
      warn!(partition, url = key.url(), "Cache write failed: {}", e);
    }
  }
}
