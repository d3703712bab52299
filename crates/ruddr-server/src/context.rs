//! Shared application context.
//!
//! [`AppContext`] is the state handed to every route handler and to the
//! sendfile path. It is cheaply cloneable because it only holds `Arc`s.
//! [`LiveStream`] bundles everything the server tracks for one
//! representation: the fragment store, the rolling window, and the
//! init-segment state discovered from the first `moov`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use ruddr_core::Config;
use ruddr_media::MoovInfo;

use crate::broadcast::Broadcaster;
use crate::store::FragmentStore;
use crate::window::RollingWindow;

/// Per-representation runtime state.
pub struct LiveStream {
    /// Representation id (the config map key).
    pub id: String,
    /// Log every ingested fragment.
    pub log_fragments: bool,
    /// Sealed-fragment index and keyframe tracking.
    pub store: FragmentStore,
    /// Rolling forecast window.
    pub window: RollingWindow,

    moov: RwLock<Option<Arc<Vec<u8>>>>,
    info: RwLock<Option<MoovInfo>>,
    started_at: RwLock<Option<DateTime<Utc>>>,
}

impl LiveStream {
    pub fn new(id: impl Into<String>, config: &Config, log_fragments: bool) -> Self {
        let id = id.into();
        Self {
            store: FragmentStore::new(
                id.clone(),
                config.retention_fragments(),
                config.ingester.heap_size,
            ),
            window: RollingWindow::new(config.ingester.horizon),
            id,
            log_fragments,
            moov: RwLock::new(None),
            info: RwLock::new(None),
            started_at: RwLock::new(None),
        }
    }

    /// Record the init segment. The arrival of the first `moov` marks the
    /// stream's start time; a later `moov` (encoder restart) replaces the
    /// bytes but keeps the original start.
    pub fn set_init(&self, moov_bytes: Vec<u8>, info: MoovInfo) {
        *self.moov.write() = Some(Arc::new(moov_bytes));
        *self.info.write() = Some(info);
        let mut started = self.started_at.write();
        if started.is_none() {
            *started = Some(Utc::now());
        }
    }

    /// The raw init-segment bytes, once a `moov` has arrived.
    pub fn moov(&self) -> Option<Arc<Vec<u8>>> {
        self.moov.read().clone()
    }

    /// Discovered video metadata, once a `moov` has arrived.
    pub fn info(&self) -> Option<MoovInfo> {
        *self.info.read()
    }

    /// Video timescale; 0 until the `moov` arrives.
    pub fn timescale(&self) -> u32 {
        self.info().map(|i| i.timescale).unwrap_or(0)
    }

    /// When the first `moov` arrived.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.read()
    }
}

/// Application context shared by all request handlers (via Axum state) and
/// the sendfile path.
#[derive(Clone)]
pub struct AppContext {
    /// Immutable application configuration.
    pub config: Arc<Config>,
    /// Representation id → live ingest state.
    pub streams: Arc<HashMap<String, Arc<LiveStream>>>,
    /// SSE fan-out.
    pub broadcaster: Arc<Broadcaster>,
}

impl AppContext {
    /// Look up a representation by id.
    pub fn stream(&self, id: &str) -> Option<&Arc<LiveStream>> {
        self.streams.get(id)
    }
}
