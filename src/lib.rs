//! Offline-capable request caching layer.
//!
//! Sits between an application's network requests and the network: every
//! intercepted GET is classified into a traffic class, the matching cache
//! strategy decides whether to serve from a versioned store, the network, or
//! a hybrid, and a durable queue replays writes that were deferred while
//! offline.

pub mod classify;
pub mod config;
pub mod lifecycle;
pub mod net;
pub mod request;
pub mod router;
pub mod store;
pub mod strategy;
pub mod sync;
pub mod tasks;

pub use classify::{classify, ClassifierConfig, TrafficClass};
pub use config::Config;
pub use lifecycle::{LifecycleManager, LifecyclePhase};
pub use net::{Network, NetworkError, ReqwestNetwork};
pub use request::{Destination, Request, StoredResponse};
pub use router::{ClientMessage, ClientNotification, Event, Router};
pub use store::{CacheStoreRegistry, MemoryBackend, SqliteBackend, StoreBackend, StoreHandle};
pub use strategy::{FetchError, FetchOutcome};
pub use sync::{PendingSyncItem, SyncQueue, SyncReconciler};
pub use tasks::BackgroundTasks;
