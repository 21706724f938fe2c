//! Cluster registry access.
//!
//! The registry persists cluster-wide configuration: the variables last
//! applied for each provisioner plan and the phase of any interrupted
//! upgrade procedure.

mod http;
mod local;
mod lock;
mod memory;
mod store;

pub use http::HttpRegistry;
pub use local::LocalRegistry;
pub use lock::{ProvisionerLock, generate_holder_id};
pub use memory::MemoryRegistry;
pub use store::{Registry, delete_config_if_present, read_config, update_config};
