//! Detached background task spawning with a settle hook for tests.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::future::Future;
use std::sync::Mutex;
use tokio::task::JoinHandle;

/// Capability for firing detached background work (cache write-throughs,
/// stale-while-revalidate refreshes). Spawned tasks never block the response
/// path; `settled` lets tests await their side effects.
#[derive(Default)]
pub struct BackgroundTasks {
  handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundTasks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fire a detached task. The future's outcome is not observed by the
  /// caller; failures are the task's own responsibility to log.
  pub fn spawn<F>(&self, future: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let handle = tokio::spawn(future);
    if let Ok(mut handles) = self.handles.lock() {
      handles.push(handle);
    }
  }

  /// Wait for every task spawned so far to finish. Panicked tasks are
  /// ignored here; they already logged on their own.
  pub async fn settled(&self) -> Result<()> {
    let handles: Vec<JoinHandle<()>> = {
      let mut guard = self
        .handles
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      guard.drain(..).collect()
    };
    join_all(handles).await;
    Ok(())
  }
}
