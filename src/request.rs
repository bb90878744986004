//! Core request and response types shared by the classifier, strategies and stores.

use serde::{Deserialize, Serialize};
use url::Url;

/// Destination hint attached to an intercepted request by the host
/// environment (what kind of resource the requester expects).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  Image,
  Font,
  Style,
  Script,
  Document,
  #[default]
  Other,
}

/// An intercepted request. Identity for caching purposes collapses to the
/// absolute URL since only GET traffic is routed through the cache.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
}

impl Request {
  /// Build a GET request with no destination hint.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      destination: Destination::Other,
    }
  }

  /// Build a GET request carrying a destination hint.
  pub fn get_with_destination(url: Url, destination: Destination) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      destination,
    }
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }
}

/// Point-in-time snapshot of a network response. Once stored it never
/// mutates; a cache update replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl StoredResponse {
  /// Build a successful response with a single content-type header.
  pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status: 200,
      headers: vec![("content-type".to_string(), content_type.to_string())],
      body: body.into(),
    }
  }

  /// Whether the status indicates success (2xx).
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }
}
