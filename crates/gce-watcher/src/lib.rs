//! Container event watcher: labels in, debounced network reconciliation out.

pub mod runtime;
pub mod scheduler;
pub mod watcher;

pub use runtime::{ContainerDescription, ContainerEvent, ContainerRuntime, DockerRuntime, PublishedPort};
pub use scheduler::{JobId, Scheduler};
pub use watcher::{Watcher, WatcherConfig};
