//! Host configuration
//!
//! `tether.toml` has a `[basic]` table for host settings and one
//! `[plugins.<key>]` table per configured unit:
//!
//! ```toml
//! [basic]
//! log_level = "debug"
//! watch = true
//!
//! [plugins.weather]
//! city = "Oslo"
//! "$priority" = 4
//!
//! [plugins."~feeds"]   # disabled, not loaded
//! ```
//!
//! [`ConfigStore`] owns the live copy and broadcasts a [`ConfigReload`] for
//! every key that changes when the file is re-read.

mod store;
mod types;

pub use store::{ConfigReload, ConfigStore};
pub use types::{BasicConfig, ConfigError, DISABLED_PREFIX, HostConfig};
