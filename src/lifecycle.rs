//! Install/activate lifecycle: precache population, stale store reaping and
//! version rollover.
//!
//! The precache store name embeds a version token, so a new release never
//! overwrites an old generation; the old one is reaped wholesale at the next
//! activation.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use url::Url;

use crate::net::Network;
use crate::store::{CacheStoreRegistry, StoreHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
  Uninstalled,
  Installing,
  /// Installed and ready to activate (waiting is always skipped: new code
  /// availability outranks draining older traffic).
  Installed,
  Activating,
  Active,
}

pub struct LifecycleManager {
  registry: CacheStoreRegistry,
  network: Arc<dyn Network>,
  phase: Mutex<LifecyclePhase>,
  precache_name: String,
  runtime_name: String,
  manifest: Vec<Url>,
}

impl LifecycleManager {
  pub fn new(
    registry: CacheStoreRegistry,
    network: Arc<dyn Network>,
    precache_name: String,
    runtime_name: String,
    manifest: Vec<Url>,
  ) -> Self {
    Self {
      registry,
      network,
      phase: Mutex::new(LifecyclePhase::Uninstalled),
      precache_name,
      runtime_name,
      manifest,
    }
  }

  pub fn phase(&self) -> LifecyclePhase {
    self.phase.lock().map(|p| *p).unwrap_or(LifecyclePhase::Uninstalled)
  }

  fn set_phase(&self, phase: LifecyclePhase) -> Result<()> {
    let mut guard = self.phase.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *guard = phase;
    Ok(())
  }

  pub fn precache_store_name(&self) -> &str {
    &self.precache_name
  }

  pub fn runtime_store_name(&self) -> &str {
    &self.runtime_name
  }

  pub fn open_precache(&self) -> Result<StoreHandle> {
    self.registry.open(&self.precache_name)
  }

  pub fn open_runtime(&self) -> Result<StoreHandle> {
    self.registry.open(&self.runtime_name)
  }

  /// Populate the versioned precache from the manifest. A manifest entry
  /// that cannot be fetched is logged and skipped; partial precache is
  /// acceptable and installation still succeeds.
  pub async fn install(&self) -> Result<()> {
    self.set_phase(LifecyclePhase::Installing)?;
    info!("installing, precaching {} assets into {}", self.manifest.len(), self.precache_name);

    let precache = self.open_precache()?;
    for url in &self.manifest {
      match self.network.get(url).await {
        Ok(response) => {
          precache.put(url.as_str(), &response)?;
        }
        Err(err) => {
          warn!("precache failed for {}: {}", url, err);
        }
      }
    }

    // Ready to activate immediately; never wait for older instances to drain.
    self.set_phase(LifecyclePhase::Installed)?;
    self.skip_waiting();
    Ok(())
  }

  /// Immediately promote this install past any waiting period.
  pub fn skip_waiting(&self) {
    info!("skip waiting: install is eligible for immediate activation");
  }

  /// Reap every store that is neither the current precache generation nor
  /// the runtime store, then take over all in-scope traffic.
  pub async fn activate(&self) -> Result<()> {
    self.set_phase(LifecyclePhase::Activating)?;

    for name in self.registry.list_names()? {
      if name != self.precache_name && name != self.runtime_name {
        info!("deleting stale cache store: {}", name);
        self.registry.delete(&name)?;
      }
    }

    self.set_phase(LifecyclePhase::Active)?;
    info!("active, claiming clients");
    Ok(())
  }
}
