//! Per-class caching strategies.
//!
//! Each traffic class maps to one policy that orchestrates store reads and
//! writes around a live network call. Exactly one of {cached payload, live
//! payload, placeholder, error} is produced per call; store writes and
//! background refreshes are dispatched as detached tasks and never block the
//! returned response.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::classify::TrafficClass;
use crate::net::{Network, NetworkError};
use crate::request::{Request, StoredResponse};
use crate::store::StoreHandle;
use crate::tasks::BackgroundTasks;

/// Synthetic image served when an image can be neither fetched nor found in
/// the cache. The `image/svg+xml` content type is load-bearing; the exact
/// bytes are not.
pub const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100"><rect fill="#1a1a1a" width="100" height="100"/><text x="50" y="55" text-anchor="middle" fill="#666" font-size="12">Image</text></svg>"##;

/// Result of routing one intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// The request is not handled by this layer; pass it through untouched.
  Passthrough,
  /// A response to serve (live, cached, or placeholder).
  Response(StoredResponse),
  /// Network failed and no cached entry exists; the caller sees no response.
  NoResponse,
}

/// Failure conditions a strategy surfaces to its caller. Wrapped into a
/// `color_eyre::Report` so callers can `downcast_ref` when they need to
/// distinguish them.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  #[error(transparent)]
  Network(#[from] NetworkError),
  #[error("no cached response available")]
  NoCachedResponse,
}

/// Dependencies a strategy runs against.
pub struct StrategyContext {
  pub runtime: StoreHandle,
  pub precache: StoreHandle,
  pub network: Arc<dyn Network>,
  pub tasks: Arc<BackgroundTasks>,
  /// Canonical shell document URL, the last-resort offline fallback for
  /// app-shell traffic.
  pub shell_url: Url,
}

/// Run the strategy for a traffic class.
pub async fn execute(
  class: TrafficClass,
  request: &Request,
  ctx: &StrategyContext,
) -> Result<FetchOutcome> {
  match class {
    TrafficClass::Image => image(request, ctx).await,
    TrafficClass::FontOrIcon => font_or_icon(request, ctx).await,
    TrafficClass::FeedProxy => feed_proxy(request, ctx).await,
    TrafficClass::AppShell => app_shell(request, ctx).await,
    TrafficClass::Default => default(request, ctx).await,
  }
}

/// Cache-first with stale-while-revalidate. Never fails: a miss with no
/// network yields the placeholder.
async fn image(request: &Request, ctx: &StrategyContext) -> Result<FetchOutcome> {
  if let Some(cached) = ctx.runtime.match_url(request.url.as_str())? {
    spawn_revalidate(ctx, ctx.runtime.clone(), request.url.clone());
    return Ok(FetchOutcome::Response(cached));
  }

  match ctx.network.get(&request.url).await {
    Ok(response) => {
      if response.is_success() {
        spawn_put(ctx, ctx.runtime.clone(), request.url.clone(), response.clone());
      }
      Ok(FetchOutcome::Response(response))
    }
    Err(err) => {
      debug!("image fetch failed for {}, serving placeholder: {}", request.url, err);
      Ok(FetchOutcome::Response(StoredResponse::ok(
        "image/svg+xml",
        PLACEHOLDER_SVG.as_bytes().to_vec(),
      )))
    }
  }
}

/// Cache-first with no refresh. A miss with no network propagates the
/// network error; there is no placeholder for fonts.
async fn font_or_icon(request: &Request, ctx: &StrategyContext) -> Result<FetchOutcome> {
  if let Some(cached) = ctx.runtime.match_url(request.url.as_str())? {
    return Ok(FetchOutcome::Response(cached));
  }

  let response = ctx
    .network
    .get(&request.url)
    .await
    .map_err(FetchError::Network)?;

  // Stored whatever the fetch resolved to; font CDNs serve long-lived assets.
  spawn_put(ctx, ctx.runtime.clone(), request.url.clone(), response.clone());
  Ok(FetchOutcome::Response(response))
}

/// Network-first for feed proxies. Successful responses are written through;
/// on failure the cached entry is served, and its absence is a
/// distinguishable error condition.
async fn feed_proxy(request: &Request, ctx: &StrategyContext) -> Result<FetchOutcome> {
  match ctx.network.get(&request.url).await {
    Ok(response) => {
      if response.is_success() {
        spawn_put(ctx, ctx.runtime.clone(), request.url.clone(), response.clone());
      }
      Ok(FetchOutcome::Response(response))
    }
    Err(err) => match ctx.runtime.match_url(request.url.as_str())? {
      Some(cached) => {
        info!("network down, serving cached feed: {}", request.url);
        Ok(FetchOutcome::Response(cached))
      }
      None => {
        debug!("feed fetch failed with no cached copy: {}", err);
        Err(FetchError::NoCachedResponse.into())
      }
    },
  }
}

/// Network-first for the shell document, written through to the versioned
/// precache. Offline falls back to the exact cached match, then to the
/// canonical shell entry.
async fn app_shell(request: &Request, ctx: &StrategyContext) -> Result<FetchOutcome> {
  match ctx.network.get(&request.url).await {
    Ok(response) => {
      spawn_put(ctx, ctx.precache.clone(), request.url.clone(), response.clone());
      Ok(FetchOutcome::Response(response))
    }
    Err(err) => {
      debug!("shell fetch failed, falling back to cache: {}", err);
      if let Some(cached) = ctx.precache.match_url(request.url.as_str())? {
        return Ok(FetchOutcome::Response(cached));
      }
      if let Some(cached) = ctx.runtime.match_url(request.url.as_str())? {
        return Ok(FetchOutcome::Response(cached));
      }
      match ctx.precache.match_url(ctx.shell_url.as_str())? {
        Some(shell) => Ok(FetchOutcome::Response(shell)),
        None => Ok(FetchOutcome::NoResponse),
      }
    }
  }
}

/// Network-first write-through. Only 2xx responses are cached; offline falls
/// back to any cached match, absence of which yields no response.
async fn default(request: &Request, ctx: &StrategyContext) -> Result<FetchOutcome> {
  match ctx.network.get(&request.url).await {
    Ok(response) => {
      if response.is_success() {
        spawn_put(ctx, ctx.runtime.clone(), request.url.clone(), response.clone());
      }
      Ok(FetchOutcome::Response(response))
    }
    Err(err) => {
      debug!("fetch failed for {}, trying cache: {}", request.url, err);
      if let Some(cached) = ctx.runtime.match_url(request.url.as_str())? {
        return Ok(FetchOutcome::Response(cached));
      }
      match ctx.precache.match_url(request.url.as_str())? {
        Some(cached) => Ok(FetchOutcome::Response(cached)),
        None => Ok(FetchOutcome::NoResponse),
      }
    }
  }
}

/// Detached store write. Racing writers to the same key overwrite each
/// other; last write wins.
fn spawn_put(ctx: &StrategyContext, store: StoreHandle, url: Url, response: StoredResponse) {
  ctx.tasks.spawn(async move {
    if let Err(err) = store.put(url.as_str(), &response) {
      debug!("background cache write failed for {}: {}", url, err);
    }
  });
}

/// Detached stale-while-revalidate refresh: refetch and overwrite the entry
/// if the network answers with success. Failures are swallowed.
fn spawn_revalidate(ctx: &StrategyContext, store: StoreHandle, url: Url) {
  let network = Arc::clone(&ctx.network);
  ctx.tasks.spawn(async move {
    match network.get(&url).await {
      Ok(response) if response.is_success() => {
        if let Err(err) = store.put(url.as_str(), &response) {
          debug!("background refresh write failed for {}: {}", url, err);
        }
      }
      Ok(_) => {}
      Err(_) => {}
    }
  });
}
