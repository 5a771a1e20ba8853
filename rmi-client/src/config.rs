//! Desktop-side connection settings.
//!
//! The settings UI and its on-disk location belong to the embedding
//! application; this is the shape it feeds into [`RmiClient::connect`]
//! plus a best-effort TOML loader.
//!
//! [`RmiClient::connect`]: crate::RmiClient::connect

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Connection settings for one client slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Device host or forwarded address.
    pub host: String,
    /// Server port.
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Screencap display scale hint for the UI.
    pub scale: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1234,
            username: "l16".into(),
            password: "l16".into(),
            scale: 1.0,
        }
    }
}

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────
