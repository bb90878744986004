//! Network client abstraction and the reqwest-backed implementation.

use async_trait::async_trait;
use url::Url;

use crate::request::StoredResponse;

/// Transport-level failure. A non-2xx status is not a transport failure;
/// the response is still delivered and strategies decide what to cache.
#[derive(Debug, thiserror::Error)]
#[error("network request failed: {0}")]
pub struct NetworkError(pub String);

/// Outbound network access. Object-safe so the router can hold a test
/// double behind `Arc<dyn Network>`.
#[async_trait]
pub trait Network: Send + Sync {
  /// Fetch a URL with GET, capturing the response as a snapshot.
  async fn get(&self, url: &Url) -> Result<StoredResponse, NetworkError>;

  /// Replay a deferred write as a JSON POST.
  async fn post_json(&self, url: &Url, body: &serde_json::Value) -> Result<(), NetworkError>;
}

/// Real network client backed by reqwest.
pub struct ReqwestNetwork {
  client: reqwest::Client,
}

impl ReqwestNetwork {
  pub fn new() -> Self {
    Self {
      client: reqwest::Client::new(),
    }
  }
}

impl Default for ReqwestNetwork {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl Network for ReqwestNetwork {
  async fn get(&self, url: &Url) -> Result<StoredResponse, NetworkError> {
    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| NetworkError(e.to_string()))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| {
        v.to_str()
          .ok()
          .map(|v| (k.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| NetworkError(e.to_string()))?
      .to_vec();

    Ok(StoredResponse {
      status,
      headers,
      body,
    })
  }

  async fn post_json(&self, url: &Url, body: &serde_json::Value) -> Result<(), NetworkError> {
    self
      .client
      .post(url.clone())
      .json(body)
      .send()
      .await
      .map_err(|e| NetworkError(e.to_string()))?;
    Ok(())
  }
}

#[cfg(test)]
pub(crate) mod mock {
  //! Scriptable network double for strategy and router tests.

  use super::*;
  use std::collections::HashMap;
  use std::sync::Mutex;

  /// In-memory network: serves scripted responses per URL, records POST
  /// replays, and can be switched offline.
  #[derive(Default)]
  pub struct MockNetwork {
    responses: Mutex<HashMap<String, StoredResponse>>,
    offline: Mutex<bool>,
    /// URLs that fail even while the rest of the network is up.
    failing: Mutex<Vec<String>>,
    pub get_log: Mutex<Vec<String>>,
    pub post_log: Mutex<Vec<(String, serde_json::Value)>>,
  }

  impl MockNetwork {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn respond(&self, url: &str, response: StoredResponse) {
      self
        .responses
        .lock()
        .unwrap()
        .insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
      *self.offline.lock().unwrap() = offline;
    }

    pub fn fail_url(&self, url: &str) {
      self.failing.lock().unwrap().push(url.to_string());
    }

    pub fn get_count(&self) -> usize {
      self.get_log.lock().unwrap().len()
    }
  }

  #[async_trait]
  impl Network for MockNetwork {
    async fn get(&self, url: &Url) -> Result<StoredResponse, NetworkError> {
      self.get_log.lock().unwrap().push(url.to_string());
      if *self.offline.lock().unwrap() {
        return Err(NetworkError("offline".to_string()));
      }
      if self.failing.lock().unwrap().contains(&url.to_string()) {
        return Err(NetworkError(format!("scripted failure for {}", url)));
      }
      self
        .responses
        .lock()
        .unwrap()
        .get(url.as_str())
        .cloned()
        .ok_or_else(|| NetworkError(format!("no scripted response for {}", url)))
    }

    async fn post_json(&self, url: &Url, body: &serde_json::Value) -> Result<(), NetworkError> {
      if *self.offline.lock().unwrap() {
        return Err(NetworkError("offline".to_string()));
      }
      if self.failing.lock().unwrap().contains(&url.to_string()) {
        return Err(NetworkError(format!("scripted failure for {}", url)));
      }
      self
        .post_log
        .lock()
        .unwrap()
        .push((url.to_string(), body.clone()));
      Ok(())
    }
  }
}
