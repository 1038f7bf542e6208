//! Client-side mirror of a remote modem manager service.
//!
//! The crate keeps a local, observable copy of the service's state:
//!
//! - **Version negotiation** across the `GetAll` .. `GetAll5` bulk fetches
//! - **Snapshot cache** with derived SIM counters, kept current from
//!   incremental updates
//! - **Retry** of timed-out fetches after a fixed delay
//! - **Write commands** (`SetMmsSim`) as independent cancellable requests
//! - **Notifications** through per-kind handlers or a broadcast receiver
//!
//! # Boundaries
//!
//! - [`ModemManagerBus`] watches the service name and opens channels
//! - [`ModemManagerRpc`] is the channel to one service owner
//! - [`ModemManager`] is the public handle, shared per thread through
//!   [`ModemManager::shared`]
//!
//! [`StubService`] and [`StubBus`] are in-memory implementations for
//! tests and for running without a real bus.

pub mod config;
pub mod error;
pub mod negotiate;
pub mod traits;
pub mod types;

mod cache;
mod manager;
mod registry;
mod requests;
mod retry;
mod signals;
mod stub;

pub use config::ManagerConfig;
pub use error::{ConfigError, ErrorClass, ManagerError, RpcError};
pub use manager::ModemManager;
pub use requests::{MmsRequest, MmsResult};
pub use signals::HandlerId;
pub use stub::{StubBus, StubService};
pub use traits::{ModemManagerBus, ModemManagerRpc};
pub use types::*;
