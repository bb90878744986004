//! Event router: dispatch table over the inbound event kinds, owning the
//! injected dependencies (store registry, network client, sync queue,
//! background task capability) so every handler is directly unit-testable.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use crate::classify;
use crate::config::Config;
use crate::lifecycle::LifecycleManager;
use crate::net::Network;
use crate::request::Request;
use crate::store::CacheStoreRegistry;
use crate::strategy::{self, FetchOutcome, StrategyContext};
use crate::sync::{SyncQueue, SyncReconciler};
use crate::tasks::BackgroundTasks;

/// Background-sync tag for draining the deferred-write queue.
pub const SYNC_STATE_TAG: &str = "sync-state";
/// Periodic-sync tag for telling clients to refresh their feeds.
pub const REFRESH_FEEDS_TAG: &str = "refresh-feeds";

/// Inbound events from the host environment.
#[derive(Debug, Clone)]
pub enum Event {
  Install,
  Activate,
  Fetch(Request),
  /// Connectivity-restoration signal, carrying its tag.
  Sync(String),
  /// Periodic signal, carrying its tag.
  PeriodicSync(String),
  Message(ClientMessage),
}

/// Messages posted by connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  SkipWaiting,
  CacheUrls { urls: Vec<String> },
  ClearCache,
}

/// Notifications broadcast to every connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientNotification {
  RefreshFeeds,
}

pub struct Router {
  config: Config,
  registry: CacheStoreRegistry,
  network: Arc<dyn Network>,
  queue: Arc<SyncQueue>,
  lifecycle: LifecycleManager,
  reconciler: SyncReconciler,
  tasks: Arc<BackgroundTasks>,
  clients: broadcast::Sender<ClientNotification>,
}

impl Router {
  pub fn new(
    config: Config,
    registry: CacheStoreRegistry,
    network: Arc<dyn Network>,
    queue: Arc<SyncQueue>,
  ) -> Self {
    let lifecycle = LifecycleManager::new(
      registry.clone(),
      Arc::clone(&network),
      config.cache.precache_store_name(),
      config.cache.runtime_name.clone(),
      config.precache_manifest(),
    );
    let reconciler = SyncReconciler::new(Arc::clone(&queue), Arc::clone(&network));
    let (clients, _) = broadcast::channel(16);

    Self {
      config,
      registry,
      network,
      queue,
      lifecycle,
      reconciler,
      tasks: Arc::new(BackgroundTasks::new()),
      clients,
    }
  }

  /// Route one inbound event. Fetch events produce an outcome; everything
  /// else yields `None`.
  pub async fn dispatch(&self, event: Event) -> Result<Option<FetchOutcome>> {
    match event {
      Event::Install => self.lifecycle.install().await.map(|_| None),
      Event::Activate => self.lifecycle.activate().await.map(|_| None),
      Event::Fetch(request) => self.handle_fetch(&request).await.map(Some),
      Event::Sync(tag) => self.handle_sync(&tag).await.map(|_| None),
      Event::PeriodicSync(tag) => self.handle_periodic_sync(&tag).map(|_| None),
      Event::Message(message) => self.handle_message(message).await.map(|_| None),
    }
  }

  /// Classify and run the matching strategy. Not-intercepted traffic is
  /// passed through without touching any store.
  pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome> {
    let class = match classify::classify(request, &self.config.classifier) {
      Some(class) => class,
      None => return Ok(FetchOutcome::Passthrough),
    };

    let ctx = StrategyContext {
      runtime: self.lifecycle.open_runtime()?,
      precache: self.lifecycle.open_precache()?,
      network: Arc::clone(&self.network),
      tasks: Arc::clone(&self.tasks),
      shell_url: self.config.shell_url.clone(),
    };

    strategy::execute(class, request, &ctx).await
  }

  /// Drain the deferred-write queue on a state-sync trigger. Failures are
  /// logged and swallowed; they never propagate to the triggering signal.
  pub async fn handle_sync(&self, tag: &str) -> Result<()> {
    if tag != SYNC_STATE_TAG {
      debug!("ignoring sync trigger with tag {}", tag);
      return Ok(());
    }

    if let Err(err) = self.reconciler.drain().await {
      warn!("background sync failed: {}", err);
    }
    Ok(())
  }

  /// Periodic feed refresh: no network or cache I/O here, just tell every
  /// connected client to re-run its own feed refresh.
  pub fn handle_periodic_sync(&self, tag: &str) -> Result<()> {
    if tag != REFRESH_FEEDS_TAG {
      debug!("ignoring periodic sync trigger with tag {}", tag);
      return Ok(());
    }

    // Send fails only when no client is subscribed, which is fine.
    let _ = self.clients.send(ClientNotification::RefreshFeeds);
    Ok(())
  }

  pub async fn handle_message(&self, message: ClientMessage) -> Result<()> {
    match message {
      ClientMessage::SkipWaiting => {
        self.lifecycle.skip_waiting();
        Ok(())
      }
      ClientMessage::CacheUrls { urls } => self.cache_urls(&urls).await,
      ClientMessage::ClearCache => {
        self.registry.delete(&self.config.cache.runtime_name)?;
        Ok(())
      }
    }
  }

  /// Fetch a client-supplied URL list into the runtime store. Individual
  /// failures are logged and skipped.
  async fn cache_urls(&self, urls: &[String]) -> Result<()> {
    let runtime = self.lifecycle.open_runtime()?;
    for raw in urls {
      let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(err) => {
          warn!("skipping uncacheable url {}: {}", raw, err);
          continue;
        }
      };
      match self.network.get(&url).await {
        Ok(response) => runtime.put(url.as_str(), &response)?,
        Err(err) => warn!("cache request failed for {}: {}", url, err),
      }
    }
    Ok(())
  }

  /// Subscribe to notifications broadcast to clients.
  pub fn subscribe(&self) -> broadcast::Receiver<ClientNotification> {
    self.clients.subscribe()
  }

  /// Handle to the deferred-write queue, for the application logic that
  /// enqueues writes it could not deliver.
  pub fn sync_queue(&self) -> Arc<SyncQueue> {
    Arc::clone(&self.queue)
  }

  pub fn lifecycle(&self) -> &LifecycleManager {
    &self.lifecycle
  }

  /// Await every detached background task spawned so far (cache
  /// write-throughs and revalidations).
  pub async fn background_settled(&self) -> Result<()> {
    self.tasks.settled().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::mock::MockNetwork;
  use crate::request::StoredResponse;
  use crate::store::MemoryBackend;
  use serde_json::json;

  struct Fixture {
    router: Router,
    registry: CacheStoreRegistry,
    network: Arc<MockNetwork>,
  }

  fn fixture() -> Fixture {
    let registry = CacheStoreRegistry::new(Arc::new(MemoryBackend::new()));
    let network = Arc::new(MockNetwork::new());
    let queue = Arc::new(SyncQueue::open_in_memory().unwrap());
    let router = Router::new(
      Config::default(),
      registry.clone(),
      Arc::clone(&network) as Arc<dyn Network>,
      queue,
    );
    Fixture {
      router,
      registry,
      network,
    }
  }

  fn resp(body: &str) -> StoredResponse {
    StoredResponse::ok("text/plain", body.as_bytes().to_vec())
  }

  #[tokio::test]
  async fn test_non_get_passes_through_without_store_interaction() {
    let f = fixture();
    let mut request = Request::get(Url::parse("https://bursst.app/api/state").unwrap());
    request.method = "POST".to_string();

    let outcome = f.router.handle_fetch(&request).await.unwrap();

    assert_eq!(outcome, FetchOutcome::Passthrough);
    // No store was opened or written
    assert!(f.registry.list_names().unwrap().is_empty());
    assert_eq!(f.network.get_count(), 0);
  }

  #[tokio::test]
  async fn test_fetch_dispatches_to_class_strategy() {
    let f = fixture();
    let url = "https://bursst.app/photo.png";
    f.network.respond(url, resp("pixels"));

    let request = Request::get(Url::parse(url).unwrap());
    let outcome = f.router.handle_fetch(&request).await.unwrap();

    match outcome {
      FetchOutcome::Response(r) => assert_eq!(r.body, b"pixels"),
      other => panic!("expected a response, got {:?}", other),
    }
    f.router.background_settled().await.unwrap();
    let runtime = f.registry.open("bursst-runtime").unwrap();
    assert!(runtime.match_url(url).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_sync_with_state_tag_drains_queue() {
    let f = fixture();
    let queue = f.router.sync_queue();
    queue.enqueue("https://bursst.app/api/state", &json!({"read": true})).unwrap();

    f.router.dispatch(Event::Sync(SYNC_STATE_TAG.to_string())).await.unwrap();

    assert!(queue.is_empty().unwrap());
    assert_eq!(f.network.post_log.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_sync_failure_never_escapes() {
    let f = fixture();
    let queue = f.router.sync_queue();
    queue.enqueue("https://bursst.app/api/state", &json!({"n": 1})).unwrap();
    f.network.set_offline(true);

    // Replay fails but the dispatch still succeeds and the queue is cleared
    f.router.dispatch(Event::Sync(SYNC_STATE_TAG.to_string())).await.unwrap();
    assert!(queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_unknown_sync_tag_ignored() {
    let f = fixture();
    let queue = f.router.sync_queue();
    queue.enqueue("https://bursst.app/api/state", &json!({"n": 1})).unwrap();

    f.router.dispatch(Event::Sync("unrelated".to_string())).await.unwrap();

    // Nothing was drained
    assert_eq!(queue.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_periodic_sync_broadcasts_refresh() {
    let f = fixture();
    let mut rx = f.router.subscribe();

    f.router
      .dispatch(Event::PeriodicSync(REFRESH_FEEDS_TAG.to_string()))
      .await
      .unwrap();

    assert_eq!(rx.try_recv().unwrap(), ClientNotification::RefreshFeeds);
  }

  #[tokio::test]
  async fn test_cache_urls_message_populates_runtime() {
    let f = fixture();
    f.network.respond("https://bursst.app/extra.css", resp("css"));

    f.router
      .dispatch(Event::Message(ClientMessage::CacheUrls {
        urls: vec![
          "https://bursst.app/extra.css".to_string(),
          "not a url".to_string(),
        ],
      }))
      .await
      .unwrap();

    let runtime = f.registry.open("bursst-runtime").unwrap();
    assert!(runtime.match_url("https://bursst.app/extra.css").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_clear_cache_message_deletes_runtime_store() {
    let f = fixture();
    let runtime = f.registry.open("bursst-runtime").unwrap();
    runtime.put("https://x.com/a", &resp("a")).unwrap();

    f.router.dispatch(Event::Message(ClientMessage::ClearCache)).await.unwrap();

    assert!(!f
      .registry
      .list_names()
      .unwrap()
      .contains(&"bursst-runtime".to_string()));
  }

  #[test]
  fn test_client_message_wire_format() {
    let msg: ClientMessage = serde_json::from_str(r#"{"type": "SKIP_WAITING"}"#).unwrap();
    assert_eq!(msg, ClientMessage::SkipWaiting);

    let msg: ClientMessage =
      serde_json::from_str(r#"{"type": "CACHE_URLS", "urls": ["https://x.com/a"]}"#).unwrap();
    assert_eq!(
      msg,
      ClientMessage::CacheUrls {
        urls: vec!["https://x.com/a".to_string()]
      }
    );

    let out = serde_json::to_value(ClientNotification::RefreshFeeds).unwrap();
    assert_eq!(out, json!({"type": "REFRESH_FEEDS"}));
  }
}
