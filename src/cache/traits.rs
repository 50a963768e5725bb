//! Request and response values shared by the interceptor and storage backends.

use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use url::Url;

/// Synthetic header recording when an API entry was stored (ms since epoch).
pub const CACHED_AT_HEADER: &str = "sw-cached-at";

/// An outbound request as seen by the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  /// Absolute, origin-qualified URL
  pub url: Url,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
    }
  }

  /// Request identity used as the storage key: method plus absolute URL.
  pub fn cache_key(&self) -> String {
    format!("{} {}", self.method.to_uppercase(), self.url)
  }

  /// SHA256 of the cache key, for stable fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.cache_key().as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Path and query, without scheme or host. This is what gets classified.
  pub fn path_and_query(&self) -> &str {
    &self.url[url::Position::BeforePath..]
  }
}

/// A response, either from the network, from a partition, or synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  /// Headers in received order. Names compare case-insensitively.
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  #[cfg(test)]
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: String::new(),
      headers: Vec::new(),
      body: body.into(),
    }
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Synthetic 503 returned when neither network nor cache can answer.
  pub fn offline(body: &str) -> Self {
    Self {
      status: 503,
      status_text: "Service Unavailable".to_string(),
      headers: vec![(
        "content-type".to_string(),
        "text/plain; charset=utf-8".to_string(),
      )],
      body: body.as_bytes().to_vec(),
    }
  }

  /// First header value with the given name.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// True for 2xx statuses.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Copy of this response carrying a `sw-cached-at` header for `now`.
  ///
  /// Any previous timestamp header is replaced so the entry has exactly one.
  pub fn stamped(&self, now: DateTime<Utc>) -> Self {
    let mut stamped = self.clone();
    stamped
      .headers
      .retain(|(n, _)| !n.eq_ignore_ascii_case(CACHED_AT_HEADER));
    stamped.headers.push((
      CACHED_AT_HEADER.to_string(),
      now.timestamp_millis().to_string(),
    ));
    stamped
  }

  /// When this entry was stored, if it carries a parseable timestamp header.
  pub fn cached_at(&self) -> Option<DateTime<Utc>> {
    let millis: i64 = self.header(CACHED_AT_HEADER)?.trim().parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}
