//! Network access for the interceptor.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::time::Duration;

use crate::cache::{Request, Response};

/// Something that can send a request over the network.
///
/// An `Err` means the request never produced a response (connection refused,
/// DNS failure, timeout). HTTP error statuses are `Ok` responses.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// `reqwest`-backed fetcher with a bounded wait per request.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let response = self
      .client
      .request(method, request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();

    // A body cut off mid-stream is as good as no response
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response from {}: {}", request.url, e))?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheStorage, Interceptor, MemoryStorage};
  use chrono::Utc;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;
  use url::Url;

  /// Serve one connection: read the request head, then write `reply` verbatim.
  async fn serve_once(reply: &'static [u8]) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let (mut stream, _) = listener.accept().await.unwrap();
      let mut buf = [0u8; 4096];
      let _ = stream.read(&mut buf).await;
      stream.write_all(reply).await.unwrap();
      stream.shutdown().await.ok();
    });
    Url::parse(&format!("http://{}/", addr)).unwrap()
  }

  /// Accept connections and never answer them.
  async fn serve_silence() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let mut held = Vec::new();
      while let Ok((stream, _)) = listener.accept().await {
        held.push(stream);
      }
    });
    Url::parse(&format!("http://{}/", addr)).unwrap()
  }

  fn fetcher(timeout_ms: u64) -> HttpFetcher {
    HttpFetcher::new(Duration::from_millis(timeout_ms)).unwrap()
  }

  #[tokio::test]
  async fn test_unanswered_request_times_out() {
    let origin = serve_silence().await;
    let request = Request::get(origin.join("/api/districts").unwrap());

    let started = std::time::Instant::now();
    let result = fetcher(100).fetch(&request).await;

    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
  }

  #[tokio::test]
  async fn test_error_status_is_a_response() {
    let origin = serve_once(
      b"HTTP/1.1 404 Not Found\r\n\
        Content-Type: application/json\r\n\
        Content-Length: 30\r\n\
        Connection: close\r\n\r\n\
        {\"error\":\"District not found\"}",
    )
    .await;
    let request = Request::get(origin.join("/api/districts/99").unwrap());

    let response = fetcher(2_000).fetch(&request).await.unwrap();

    assert_eq!(response.status, 404);
    assert_eq!(response.status_text, "Not Found");
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert_eq!(response.text(), r#"{"error":"District not found"}"#);
  }

  #[tokio::test]
  async fn test_non_utf8_header_is_kept() {
    let origin = serve_once(
      b"HTTP/1.1 200 OK\r\n\
        X-District: Ahmedn\xe4gar\r\n\
        Content-Length: 2\r\n\
        Connection: close\r\n\r\n\
        []",
    )
    .await;
    let request = Request::get(origin.join("/api/districts").unwrap());

    let response = fetcher(2_000).fetch(&request).await.unwrap();

    assert_eq!(response.header("x-district"), Some("Ahmedn\u{fffd}gar"));
  }

  #[tokio::test]
  async fn test_timeout_falls_back_to_stale_api_entry() {
    let origin = serve_silence().await;
    let interceptor = Interceptor::new(MemoryStorage::new(), fetcher(100), origin);
    interceptor.activate().unwrap();

    let request = interceptor.request("/api/districts/3/trends").unwrap();
    let stale = Response::new(200, "[]").stamped(Utc::now() - chrono::Duration::hours(48));
    interceptor
      .storage()
      .put(&interceptor.partitions().api, &request, &stale)
      .unwrap();

    let response = interceptor.handle(&request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "[]");
    assert_eq!(response.cached_at(), stale.cached_at());
  }
}
