//! Docker volume plugin backed by GCE persistent disks.

pub mod driver;
pub mod filesystem;
pub mod protocol;
pub mod server;

pub use driver::{VolumeDriver, DEFAULT_MOUNT_ROOT};
pub use filesystem::OsFilesystem;
pub use protocol::{Capabilities, Volume, VolumeRequest, VolumeResponse};
pub use server::{router, PluginServer, PluginServerConfig};
