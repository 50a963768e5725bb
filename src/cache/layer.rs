//! Interceptor that applies a caching strategy to every outbound request.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use super::policy::{Classifier, Freshness, RequestClass};
use super::storage::CacheStorage;
use super::traits::{Request, Response};
use crate::net::Fetcher;

/// Body of the 503 returned for an uncached static asset while offline.
pub const ASSET_OFFLINE_BODY: &str = "Offline - Asset not cached";

/// Body of the 503 returned for a navigation with no shell to fall back on.
pub const OFFLINE_BODY: &str = "Offline";

/// Names of the two partitions the current version owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
  pub static_assets: String,
  pub api: String,
}

impl PartitionNames {
  /// `<prefix>-static-<version>` and `<prefix>-api-<version>`.
  pub fn versioned(prefix: &str, version: &str) -> Self {
    Self {
      static_assets: format!("{}-static-{}", prefix, version),
      api: format!("{}-api-{}", prefix, version),
    }
  }

  /// Exact-name membership. Never prefix matching.
  pub fn contains(&self, name: &str) -> bool {
    name == self.static_assets || name == self.api
  }
}

impl Default for PartitionNames {
  fn default() -> Self {
    Self::versioned("mgnrega", "v2")
  }
}

/// Where the interceptor is in its install/activate lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Constructed, nothing pre-cached, not controlling clients
  Parsed,
  /// Seed set cached; activation may follow without waiting
  Installed,
  /// Controlling clients: requests go through the caching strategies
  Activated,
}

/// Offline cache interceptor.
///
/// Sits between the dashboard client and the network. Once activated, every
/// request is classified and served by one of four strategies over a static
/// partition and an API partition.
pub struct Interceptor<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  origin: Url,
  partitions: PartitionNames,
  classifier: Classifier,
  freshness: Freshness,
  seed_urls: Vec<String>,
  lifecycle: Arc<Mutex<Lifecycle>>,
}

impl<S: CacheStorage + 'static, F: Fetcher> Interceptor<S, F> {
  /// Create an interceptor for the dashboard served from `origin`.
  pub fn new(storage: S, fetcher: F, origin: Url) -> Self {
    Self {
      storage: Arc::new(storage),
      fetcher: Arc::new(fetcher),
      origin,
      partitions: PartitionNames::default(),
      classifier: Classifier::default(),
      freshness: Freshness::default(),
      seed_urls: vec!["/".to_string(), "/manifest.json".to_string()],
      lifecycle: Arc::new(Mutex::new(Lifecycle::Parsed)),
    }
  }

  pub fn with_partitions(mut self, partitions: PartitionNames) -> Self {
    self.partitions = partitions;
    self
  }

  pub fn with_classifier(mut self, classifier: Classifier) -> Self {
    self.classifier = classifier;
    self
  }

  /// Set how long timestamped API entries stay fresh.
  pub fn with_freshness_window(mut self, window: Duration) -> Self {
    self.freshness = Freshness::new(window);
    self
  }

  /// Set the documents pre-cached by `install`.
  pub fn with_seed_urls(mut self, seed_urls: Vec<String>) -> Self {
    self.seed_urls = seed_urls;
    self
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn partitions(&self) -> &PartitionNames {
    &self.partitions
  }

  pub fn lifecycle(&self) -> Result<Lifecycle> {
    let state = self
      .lifecycle
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(*state)
  }

  fn set_lifecycle(&self, next: Lifecycle) -> Result<()> {
    let mut state = self
      .lifecycle
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *state = next;
    Ok(())
  }

  /// Build a GET request for a path (or absolute URL) against the origin.
  pub fn request(&self, path_or_url: &str) -> Result<Request> {
    let url = self
      .origin
      .join(path_or_url)
      .map_err(|e| eyre!("Invalid request URL {}: {}", path_or_url, e))?;
    Ok(Request::get(url))
  }

  /// Pre-cache the seed set into the static partition.
  ///
  /// All-or-nothing: a failed or non-2xx seed fetch stores nothing and
  /// fails the install. On success activation may follow immediately.
  pub async fn install(&self) -> Result<usize> {
    let requests = self
      .seed_urls
      .iter()
      .map(|url| self.request(url))
      .collect::<Result<Vec<_>>>()?;

    let responses = futures::future::try_join_all(requests.iter().map(|request| async move {
      let response = self.fetcher.fetch(request).await?;
      if !response.is_success() {
        return Err(eyre!(
          "Seed request {} returned HTTP {}",
          request.url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>(response)
    }))
    .await
    .map_err(|e| eyre!("Install failed: {}", e))?;

    let entries: Vec<(Request, Response)> = requests.into_iter().zip(responses).collect();
    self
      .storage
      .put_all(&self.partitions.static_assets, &entries)?;

    if self.lifecycle()? == Lifecycle::Parsed {
      self.set_lifecycle(Lifecycle::Installed)?;
    }
    info!(
      partition = %self.partitions.static_assets,
      entries = entries.len(),
      "installed seed set; skipping wait"
    );

    Ok(entries.len())
  }

  /// Drop partitions left behind by other versions and start intercepting.
  ///
  /// Returns the names of the deleted partitions.
  pub fn activate(&self) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for name in self.storage.partitions()? {
      if self.partitions.contains(&name) {
        continue;
      }
      if self.storage.delete_partition(&name)? {
        info!(partition = %name, "deleted outdated cache partition");
        removed.push(name);
      }
    }

    self.set_lifecycle(Lifecycle::Activated)?;
    info!("activated; claimed all clients");

    Ok(removed)
  }

  /// Serve a request.
  ///
  /// Before activation requests pass straight through to the network.
  pub async fn handle(&self, request: &Request) -> Result<Response> {
    if self.lifecycle()? != Lifecycle::Activated {
      debug!(url = %request.url, "not controlling; passing through");
      return self.fetcher.fetch(request).await;
    }

    let class = self.classifier.classify(request.path_and_query());
    debug!(url = %request.url, ?class, "intercepted");

    match class {
      RequestClass::CacheableApi => self.stale_while_revalidate(request).await,
      RequestClass::Api => self.network_then_cache(request).await,
      RequestClass::StaticAsset => self.cache_first_with_refresh(request).await,
      RequestClass::Navigation => self.cache_then_network(request).await,
    }
  }

  /// Cacheable API data.
  ///
  /// 1. Fresh entry: return it and revalidate in the background
  /// 2. Missing/stale: fetch, storing 200s with a timestamp
  /// 3. Network failure: serve whatever entry exists, fresh or stale
  async fn stale_while_revalidate(&self, request: &Request) -> Result<Response> {
    let cached = self.storage.get(&self.partitions.api, request)?;

    if let Some(entry) = &cached {
      if self.freshness.is_valid(entry) {
        debug!(url = %request.url, "fresh API entry; revalidating in background");
        self.spawn_refresh(self.partitions.api.clone(), request.clone(), true);
        return Ok(entry.clone());
      }
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.status == 200 {
          store(
            self.storage.as_ref(),
            &self.partitions.api,
            request,
            &response.stamped(Utc::now()),
          );
        }
        Ok(response)
      }
      Err(err) => match cached {
        Some(entry) => {
          debug!(url = %request.url, error = %err, "network failed; serving cached API entry");
          Ok(entry)
        }
        None => Err(err),
      },
    }
  }

  /// API calls off the allow-list: network only, any cached copy when offline.
  async fn network_then_cache(&self, request: &Request) -> Result<Response> {
    match self.fetcher.fetch(request).await {
      Ok(response) => Ok(response),
      Err(err) => match self.storage.get_any(request)? {
        Some(entry) => {
          debug!(url = %request.url, error = %err, "network failed; serving cached copy");
          Ok(entry)
        }
        None => Err(err),
      },
    }
  }

  /// Static assets: cached copy at once, refreshed from the network either way.
  async fn cache_first_with_refresh(&self, request: &Request) -> Result<Response> {
    let static_assets = &self.partitions.static_assets;
    self.storage.open(static_assets)?;

    if let Some(entry) = self.storage.get(static_assets, request)? {
      self.spawn_refresh(static_assets.clone(), request.clone(), false);
      return Ok(entry);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.status == 200 {
          store(self.storage.as_ref(), static_assets, request, &response);
        }
        Ok(response)
      }
      Err(err) => {
        debug!(url = %request.url, error = %err, "asset not cached and network failed");
        Ok(Response::offline(ASSET_OFFLINE_BODY))
      }
    }
  }

  /// Navigations: any cached copy, then network, then the cached shell.
  async fn cache_then_network(&self, request: &Request) -> Result<Response> {
    if let Some(entry) = self.storage.get_any(request)? {
      return Ok(entry);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => Ok(response),
      Err(err) => {
        debug!(url = %request.url, error = %err, "navigation failed; falling back to shell");
        let root = self.request("/")?;
        Ok(
          self
            .storage
            .get_any(&root)?
            .unwrap_or_else(|| Response::offline(OFFLINE_BODY)),
        )
      }
    }
  }

  /// Fetch and store in a detached task. Nothing it does reaches the caller.
  fn spawn_refresh(&self, partition: String, request: Request, stamp: bool) {
    let storage = Arc::clone(&self.storage);
    let fetcher = Arc::clone(&self.fetcher);

    tokio::spawn(async move {
      match fetcher.fetch(&request).await {
        Ok(response) if response.status == 200 => {
          let response = if stamp {
            response.stamped(Utc::now())
          } else {
            response
          };
          store(storage.as_ref(), &partition, &request, &response);
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "background refresh not stored");
        }
        Err(err) => {
          debug!(url = %request.url, error = %err, "background refresh failed");
        }
      }
    });
  }
}

/// Store a response, logging instead of failing. The caller already has a
/// network response to return.
fn store<S: CacheStorage + ?Sized>(
  storage: &S,
  partition: &str,
  request: &Request,
  response: &Response,
) {
  if let Err(err) = storage.put(partition, request, response) {
    warn!(url = %request.url, partition, error = %err, "failed to store response");
  }
}

impl<S: CacheStorage, F: Fetcher> Clone for Interceptor<S, F> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      fetcher: Arc::clone(&self.fetcher),
      origin: self.origin.clone(),
      partitions: self.partitions.clone(),
      classifier: self.classifier.clone(),
      freshness: self.freshness,
      seed_urls: self.seed_urls.clone(),
      lifecycle: Arc::clone(&self.lifecycle),
    }
  }
}
