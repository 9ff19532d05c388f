//! Live synchronization of a single selected run.
//!
//! A snapshot seeds the [`Reconciler`], the SSE stream keeps it current, and the
//! lifecycle manager swaps both out whenever the selection changes or the
//! connection drops.

pub mod api;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod lifecycle;
pub mod reconciler;
pub mod stream;

pub use api::ApiClient;
pub use config::SyncConfig;
pub use error::SyncError;
pub use fetcher::SnapshotFetcher;
pub use lifecycle::{
    spawn, spawn_http, ConnectionStatus, LifecycleManager, SyncCommand, SyncHandle, SyncView,
};
pub use reconciler::{Reconciler, StoreChange, Subscription};
pub use stream::{ByteStream, StreamClient, StreamSignal, StreamTransport};
