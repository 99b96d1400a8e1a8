//! Offline resilience for a web app: request cache policy, resource buckets,
//! per-endpoint data snapshots, a navigation continuity guard and a cache
//! warmer.

pub mod banner;
pub mod cache;
pub mod clock;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod guard;
pub mod policy;
pub mod request;
pub mod router;
pub mod warmer;

#[cfg(test)]
pub(crate) mod testing;

pub use banner::Banner;
pub use endpoint::{json_fetcher, ClientDataCache, Endpoint, KeyStatus};
pub use error::OfflineError;
pub use guard::{GuardAction, GuardState, NavigationGuard};
pub use policy::{CacheRule, PolicyTable, Strategy};
pub use request::{Request, ResponseSnapshot};
pub use router::{HttpNetwork, Network, RequestRouter, Routed};
pub use warmer::{CacheWarmer, WarmReport};
