//! Request classification and the freshness window for API entries.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::traits::{Response, CACHED_AT_HEADER};

/// Which caching strategy applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// API data on the allow-list: stale-while-revalidate
  CacheableApi,
  /// Other API calls: network only, cache as offline fallback
  Api,
  /// Scripts, styles, fonts, images: cache-first with background refresh
  StaticAsset,
  /// Documents and anything unclassified
  Navigation,
}

/// URL pattern rules for classifying requests.
///
/// Matching is plain substring search, evaluated API first, then static
/// assets. Anything unmatched is navigational.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Classifier {
  pub api_root: String,
  pub cacheable_api: Vec<String>,
  pub static_extensions: Vec<String>,
}

impl Default for Classifier {
  fn default() -> Self {
    Self {
      api_root: "/api/".to_string(),
      cacheable_api: ["/api/districts", "/performance", "/trends", "/compare", "/alerts"]
        .into_iter()
        .map(String::from)
        .collect(),
      static_extensions: [".js", ".css", ".woff", ".woff2", ".png", ".jpg", ".svg"]
        .into_iter()
        .map(String::from)
        .collect(),
    }
  }
}

impl Classifier {
  pub fn classify(&self, url: &str) -> RequestClass {
    if url.contains(&self.api_root) {
      if self.cacheable_api.iter().any(|p| url.contains(p.as_str())) {
        RequestClass::CacheableApi
      } else {
        RequestClass::Api
      }
    } else if self
      .static_extensions
      .iter()
      .any(|ext| url.contains(ext.as_str()))
    {
      RequestClass::StaticAsset
    } else {
      RequestClass::Navigation
    }
  }
}

/// Validity period for timestamped cache entries.
#[derive(Debug, Clone, Copy)]
pub struct Freshness {
  window: Duration,
}

impl Default for Freshness {
  fn default() -> Self {
    Self::new(Duration::hours(24))
  }
}

impl Freshness {
  pub fn new(window: Duration) -> Self {
    Self { window }
  }

  /// Whether the entry is still valid at `now`.
  ///
  /// Entries without a timestamp header are always fresh. A header that
  /// does not parse as milliseconds can never prove freshness, so it is stale.
  pub fn is_valid_at(&self, response: &Response, now: DateTime<Utc>) -> bool {
    let Some(raw) = response.header(CACHED_AT_HEADER) else {
      return true;
    };
    match raw.trim().parse::<i64>() {
      Ok(created_ms) => {
        now.timestamp_millis().saturating_sub(created_ms) < self.window.num_milliseconds()
      }
      Err(_) => false,
    }
  }

  pub fn is_valid(&self, response: &Response) -> bool {
    self.is_valid_at(response, Utc::now())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_allow_listed_api_is_cacheable() {
    let classifier = Classifier::default();
    for url in [
      "/api/districts",
      "/api/districts/7",
      "/api/districts/3/performance",
      "/api/districts/3/trends",
      "/api/districts/3/compare",
      "/api/alerts/3",
    ] {
      assert_eq!(classifier.classify(url), RequestClass::CacheableApi, "{url}");
    }
  }

  #[test]
  fn test_other_api_is_not_cached() {
    let classifier = Classifier::default();
    assert_eq!(classifier.classify("/api/health"), RequestClass::Api);
    assert_eq!(classifier.classify("/api/ingestion/logs"), RequestClass::Api);
  }

  #[test]
  fn test_api_takes_precedence_over_extensions() {
    let classifier = Classifier::default();
    assert_eq!(classifier.classify("/api/export.js"), RequestClass::Api);
    assert_eq!(
      classifier.classify("/api/districts/logo.png"),
      RequestClass::CacheableApi
    );
  }

  #[test]
  fn test_static_assets() {
    let classifier = Classifier::default();
    for url in [
      "/app.js",
      "/assets/index-4f2a.css",
      "/fonts/mukta.woff2",
      "/icons/icon-192.png",
      "/hero.jpg",
      "/logo.svg",
    ] {
      assert_eq!(classifier.classify(url), RequestClass::StaticAsset, "{url}");
    }
  }

  #[test]
  fn test_everything_else_is_navigation() {
    let classifier = Classifier::default();
    for url in ["/", "/dashboard", "/compare", "/manifest.json", "", "not a url"] {
      assert_eq!(classifier.classify(url), RequestClass::Navigation, "{url:?}");
    }
  }

  #[test]
  fn test_freshness_boundary() {
    let freshness = Freshness::default();
    let now = Utc::now();
    let stored = |age: Duration| {
      Response::new(200, "{}").with_header(
        CACHED_AT_HEADER,
        &(now - age).timestamp_millis().to_string(),
      )
    };

    assert!(freshness.is_valid_at(&stored(Duration::hours(1)), now));
    assert!(freshness.is_valid_at(&stored(Duration::hours(24) - Duration::milliseconds(1)), now));
    assert!(!freshness.is_valid_at(&stored(Duration::hours(24)), now));
    assert!(!freshness.is_valid_at(&stored(Duration::hours(25)), now));
  }

  #[test]
  fn test_untimestamped_entry_is_always_fresh() {
    let freshness = Freshness::new(Duration::zero());
    assert!(freshness.is_valid(&Response::new(200, "<html>")));
  }

  #[test]
  fn test_garbled_timestamp_is_stale() {
    let freshness = Freshness::default();
    let resp = Response::new(200, "{}").with_header(CACHED_AT_HEADER, "yesterday");
    assert!(!freshness.is_valid(&resp));
  }

  #[test]
  fn test_extreme_timestamps_do_not_overflow() {
    let freshness = Freshness::default();
    let now = Utc::now();

    let ancient = Response::new(200, "{}").with_header(CACHED_AT_HEADER, &i64::MIN.to_string());
    assert!(!freshness.is_valid_at(&ancient, now));

    let future = Response::new(200, "{}").with_header(CACHED_AT_HEADER, &i64::MAX.to_string());
    assert!(freshness.is_valid_at(&future, now));
  }
}
