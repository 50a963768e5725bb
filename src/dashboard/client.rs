//! Typed dashboard client that goes through the offline interceptor.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;

use crate::cache::{CacheStorage, Interceptor};
use crate::net::Fetcher;

use super::endpoints::Endpoint;
use super::types::{Alert, ApiError, ComparisonData, District, MonthlyPerformance};

/// Where a payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Straight from the network
  Network,
  /// From the API partition, stored at `cached_at`
  Cache { cached_at: DateTime<Utc> },
}

/// A decoded payload together with its provenance.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
  pub data: T,
  pub source: CacheSource,
}

/// Dashboard API client with transparent offline caching.
pub struct DashboardClient<S: CacheStorage, F: Fetcher> {
  interceptor: Interceptor<S, F>,
}

impl<S: CacheStorage + 'static, F: Fetcher> DashboardClient<S, F> {
  pub fn new(interceptor: Interceptor<S, F>) -> Self {
    Self { interceptor }
  }

  pub async fn districts(&self) -> Result<Fetched<Vec<District>>> {
    self.get(&Endpoint::Districts).await
  }

  pub async fn district(&self, id: u32) -> Result<Fetched<District>> {
    self.get(&Endpoint::District { id }).await
  }

  pub async fn performance(&self, district_id: u32) -> Result<Fetched<MonthlyPerformance>> {
    self.get(&Endpoint::Performance { district_id }).await
  }

  pub async fn trends(&self, district_id: u32) -> Result<Fetched<Vec<MonthlyPerformance>>> {
    self.get(&Endpoint::Trends { district_id }).await
  }

  pub async fn compare(&self, district_id: u32) -> Result<Fetched<ComparisonData>> {
    self.get(&Endpoint::Compare { district_id }).await
  }

  pub async fn alerts(&self, district_id: u32) -> Result<Fetched<Vec<Alert>>> {
    self.get(&Endpoint::Alerts { district_id }).await
  }

  /// Fetch an endpoint and decode its JSON body.
  ///
  /// Non-200 statuses become errors, using the API's `{"error": ...}` body
  /// when there is one.
  pub async fn get<T: DeserializeOwned>(&self, endpoint: &Endpoint) -> Result<Fetched<T>> {
    let request = self.interceptor.request(&endpoint.path())?;
    let response = self
      .interceptor
      .handle(&request)
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", endpoint.description(), e))?;

    if response.status != 200 {
      let reason = serde_json::from_slice::<ApiError>(&response.body)
        .map(|body| body.error)
        .unwrap_or_else(|_| response.text());
      return Err(eyre!(
        "Failed to fetch {}: HTTP {} {}",
        endpoint.description(),
        response.status,
        reason
      ));
    }

    let data = serde_json::from_slice(&response.body)
      .map_err(|e| eyre!("Failed to parse {}: {}", endpoint.description(), e))?;
    let source = match response.cached_at() {
      Some(cached_at) => CacheSource::Cache { cached_at },
      None => CacheSource::Network,
    };

    Ok(Fetched { data, source })
  }
}
