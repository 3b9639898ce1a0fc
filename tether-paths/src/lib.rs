//! XDG Base Directory paths for tether.
//!
//! The host resolves its configuration the same way on every platform,
//! following XDG conventions rather than platform-native locations.

use std::path::PathBuf;

/// Environment variable that overrides the configuration file location.
pub const CONFIG_ENV: &str = "TETHER_CONFIG";

/// Name of the configuration file inside [`config_dir`].
pub const CONFIG_FILE_NAME: &str = "tether.toml";

/// Get the tether config directory.
///
/// Returns `$XDG_CONFIG_HOME/tether` if set, otherwise `~/.config/tether`.
///
/// # Examples
///
/// ```
/// use tether_paths::config_dir;
///
/// let config = config_dir();
/// assert!(config.ends_with("tether"));
/// ```
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join("tether")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config/tether")
    } else {
        PathBuf::from(".config/tether")
    }
}

/// Get the host configuration file.
///
/// `$TETHER_CONFIG` wins when set; otherwise `tether.toml` inside [`config_dir`].
pub fn config_file() -> PathBuf {
    config_file_from(std::env::var(CONFIG_ENV).ok())
}

fn config_file_from(env_override: Option<String>) -> PathBuf {
    match env_override {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_dir().join(CONFIG_FILE_NAME),
    }
}
