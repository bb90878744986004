//! Traffic classification: maps an intercepted request to the caching policy
//! that should handle it.
//!
//! Classification is pure and stateless; it is recomputed per request and
//! never persisted. `None` means the request is not intercepted at all and
//! must be passed through to the network untouched.

use serde::Deserialize;

use crate::request::{Destination, Request};

/// Traffic class determining which caching strategy applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficClass {
  Image,
  FontOrIcon,
  FeedProxy,
  AppShell,
  Default,
}

/// Allow-lists and extension sets driving classification.
///
/// Hostname matching is substring and case-sensitive; extension matching is
/// case-insensitive.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
  pub image_extensions: Vec<String>,
  pub font_hosts: Vec<String>,
  pub proxy_hosts: Vec<String>,
  /// File name of the shell document, matched as a path suffix.
  pub shell_document: String,
}

impl Default for ClassifierConfig {
  fn default() -> Self {
    Self {
      image_extensions: ["jpg", "jpeg", "png", "gif", "webp", "svg", "ico"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
      font_hosts: vec![
        "fonts.googleapis.com".to_string(),
        "fonts.gstatic.com".to_string(),
        "unpkg.com".to_string(),
      ],
      proxy_hosts: vec![
        "allorigins".to_string(),
        "corsproxy".to_string(),
        "codetabs".to_string(),
      ],
      shell_document: "index.html".to_string(),
    }
  }
}

/// Classify a request. Returns `None` for traffic this layer does not
/// intercept (non-GET methods, non-http(s) schemes).
///
/// Rules are evaluated in precedence order; first match wins.
pub fn classify(request: &Request, config: &ClassifierConfig) -> Option<TrafficClass> {
  if !request.is_get() {
    return None;
  }

  let scheme = request.url.scheme();
  if scheme != "http" && scheme != "https" {
    return None;
  }

  let path = request.url.path();

  if request.destination == Destination::Image || has_image_extension(path, config) {
    return Some(TrafficClass::Image);
  }

  let host = request.url.host_str().unwrap_or("");

  if config.font_hosts.iter().any(|h| host.contains(h.as_str())) {
    return Some(TrafficClass::FontOrIcon);
  }

  if config.proxy_hosts.iter().any(|h| host.contains(h.as_str())) {
    return Some(TrafficClass::FeedProxy);
  }

  if path == "/" || path.ends_with(config.shell_document.as_str()) {
    return Some(TrafficClass::AppShell);
  }

  Some(TrafficClass::Default)
}

fn has_image_extension(path: &str, config: &ClassifierConfig) -> bool {
  let ext = match path.rsplit_once('.') {
    Some((_, ext)) => ext.to_ascii_lowercase(),
    None => return false,
  };
  config.image_extensions.iter().any(|e| *e == ext)
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn req(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  fn classify_default(url: &str) -> Option<TrafficClass> {
    classify(&req(url), &ClassifierConfig::default())
  }

  #[test]
  fn test_non_get_not_intercepted() {
    let mut r = req("https://example.com/data.json");
    r.method = "POST".to_string();
    assert_eq!(classify(&r, &ClassifierConfig::default()), None);
  }

  #[test]
  fn test_non_http_scheme_not_intercepted() {
    assert_eq!(classify_default("chrome-extension://abc/page.html"), None);
    assert_eq!(classify_default("ftp://example.com/file.png"), None);
  }

  #[test]
  fn test_image_extensions_any_case() {
    assert_eq!(classify_default("https://x.com/a.png"), Some(TrafficClass::Image));
    assert_eq!(classify_default("https://x.com/a.JPG"), Some(TrafficClass::Image));
    assert_eq!(classify_default("https://x.com/pics/a.SvG"), Some(TrafficClass::Image));
    assert_eq!(classify_default("https://x.com/a.webp"), Some(TrafficClass::Image));
  }

  #[test]
  fn test_image_destination_hint_wins_over_host_rules() {
    let url = Url::parse("https://fonts.gstatic.com/thumb").unwrap();
    let r = Request::get_with_destination(url, Destination::Image);
    assert_eq!(
      classify(&r, &ClassifierConfig::default()),
      Some(TrafficClass::Image)
    );
  }

  #[test]
  fn test_font_hosts() {
    assert_eq!(
      classify_default("https://fonts.googleapis.com/css2?family=IBM+Plex+Sans"),
      Some(TrafficClass::FontOrIcon)
    );
    assert_eq!(
      classify_default("https://unpkg.com/@phosphor-icons/web"),
      Some(TrafficClass::FontOrIcon)
    );
  }

  #[test]
  fn test_proxy_hosts_substring_match() {
    assert_eq!(
      classify_default("https://api.allorigins.win/raw?url=feed"),
      Some(TrafficClass::FeedProxy)
    );
    assert_eq!(
      classify_default("https://corsproxy.io/?https://blog.example/rss"),
      Some(TrafficClass::FeedProxy)
    );
  }

  #[test]
  fn test_app_shell_paths() {
    assert_eq!(classify_default("https://bursst.app/"), Some(TrafficClass::AppShell));
    assert_eq!(
      classify_default("https://bursst.app/index.html"),
      Some(TrafficClass::AppShell)
    );
  }

  #[test]
  fn test_default_class() {
    assert_eq!(
      classify_default("https://bursst.app/api/state"),
      Some(TrafficClass::Default)
    );
  }

  #[test]
  fn test_classification_idempotent() {
    let r = req("https://x.com/a.png");
    let cfg = ClassifierConfig::default();
    assert_eq!(classify(&r, &cfg), classify(&r, &cfg));
  }
}
