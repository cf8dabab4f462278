//! Podman integration for a container status menu: runs the engine CLI,
//! parses its output across schema versions, classifies container state and
//! follows lifecycle events so the menu can refresh when something changes.

pub mod app;
pub mod bindings;
pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod notify;
pub mod process;
pub mod registry;
pub mod version;

pub use config::Settings;
pub use container::{Container, ContainerRecord, Ports};
pub use engine::Engine;
pub use error::{EngineError, ErrorKind, Result};
pub use events::{ContainerEvent, EventWatcher, WatchHandle};
pub use lifecycle::{Action, ActionSet, LifecycleState, classify};
pub use registry::ContainerRegistry;
pub use version::{DetectedVersion, EngineVersion, VersionAdapter};
