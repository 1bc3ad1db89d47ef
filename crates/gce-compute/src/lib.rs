//! Compute Engine side of gce-docker: the REST client, host identity,
//! operation polling and the disk and network reconcilers.

pub mod api;
pub mod auth;
pub mod client;
pub mod device;
pub mod disk;
pub mod metadata;
pub mod network;
pub mod operation;
pub mod rest;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::ComputeApi;
pub use auth::{MetadataTokenSource, StaticToken, TokenSource};
pub use client::ComputeClient;
pub use device::DeviceWaitConfig;
pub use disk::DiskReconciler;
pub use metadata::{HostIdentity, MetadataClient};
pub use network::NetworkReconciler;
pub use operation::{OperationPoller, PollerConfig};
pub use rest::RestCompute;
pub use types::Operation;
