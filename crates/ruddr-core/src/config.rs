//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML and carries the
//! representation map plus server and ingester sections. Sections default
//! sensibly, but a config without representations is useless and
//! [`Config::validate`] will say so.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Representation id → ingest source settings.
    pub representations: HashMap<String, RepresentationConfig>,
    pub server: ServerConfig,
    pub ingester: IngesterConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("config parse error: {e}")))
    }

    /// Load configuration from a TOML file.
    ///
    /// Unlike most services, a missing config is fatal here: without
    /// representations there is nothing to ingest.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&contents)
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.representations.is_empty() {
            warnings.push("no representations configured; nothing will be ingested".into());
        }

        for (id, repr) in &self.representations {
            if repr.pipe.as_os_str().is_empty() {
                warnings.push(format!("representations.{id}.pipe is empty"));
            }
        }

        if self.ingester.horizon == 0 {
            warnings.push("ingester.horizon is 0; no forecast windows will be produced".into());
        }
        if self.ingester.controller_frequency == 0 {
            warnings.push(
                "ingester.controller_frequency is 0; forecast events will never be emitted".into(),
            );
        }
        if self.ingester.heap_size == 0 {
            warnings.push("ingester.heap_size is 0; fragments are evicted immediately".into());
        }

        warnings
    }

    /// Sequence-distance retention bound, derived from the time-based
    /// `heap_size` and the nominal fragment duration.
    pub fn retention_fragments(&self) -> u32 {
        if self.ingester.fragment_duration > 0 {
            (self.ingester.heap_size / self.ingester.fragment_duration).max(1)
        } else {
            self.ingester.heap_size
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Ingest source settings for one representation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepresentationConfig {
    /// Path of the named pipe the encoder writes to.
    pub pipe: PathBuf,
    /// Log every ingested fragment for this representation.
    pub log: bool,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address, `host:port`.
    pub address: String,
    /// Path prefix all routes are served under (e.g. `/live`). Empty = root.
    pub root: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".into(),
            root: String::new(),
        }
    }
}

/// Ingester tuning. Serialized into the manifest `config` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngesterConfig {
    /// Retention bound in seconds; also bounds keyframe-list age.
    #[serde(skip_serializing)]
    pub heap_size: u32,
    /// Nominal duration of one fragment in seconds.
    pub fragment_duration: u32,
    /// Emit one SSE event per this many synchronized windows.
    pub controller_frequency: u32,
    /// Rolling-window capacity in fragments.
    pub horizon: usize,
    /// Optional fixed segment duration hint for downstream controllers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_duration: Option<u32>,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            heap_size: 30,
            fragment_duration: 1,
            controller_frequency: 1,
            horizon: 3,
            segment_duration: None,
        }
    }
}
