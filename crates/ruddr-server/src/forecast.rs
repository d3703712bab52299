//! Cross-representation synchronizer.
//!
//! Window snapshots from every representation are grouped by presentation
//! time; a forecast is emitted only when all representations have
//! contributed a window for that instant. Buckets are keyed by integer
//! milliseconds rather than the raw float pts so representations whose
//! arithmetic differs in the last ulp still land in the same bucket.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ruddr_media::Fragment;

use crate::window::WindowSnapshot;

/// Fixed-point bucket key for a float pts.
pub fn pts_millis(pts: f32) -> u64 {
    (pts as f64 * 1000.0).round().max(0.0) as u64
}

/// The serialized forecast event published over SSE.
#[derive(Serialize)]
struct ForecastPayload {
    pts: f32,
    seq: u32,
    window: HashMap<String, Vec<Arc<Fragment>>>,
}

/// Grouping table: pts bucket → representation → window contents.
pub struct ForecastTable {
    buckets: DashMap<u64, DashMap<String, Vec<Arc<Fragment>>>>,
    representation_count: usize,
    /// Buckets older than this behind the last emission are abandoned.
    prune_window_ms: u64,
}

impl ForecastTable {
    pub fn new(representation_count: usize, heap_seconds: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            representation_count: representation_count.max(1),
            prune_window_ms: heap_seconds as u64 * 1000,
        }
    }

    /// Publish one representation's window. When this publish completes the
    /// bucket, the grouped forecast is serialized, the bucket is removed
    /// (each pts is emitted at most once), and the JSON is returned.
    pub fn publish(&self, representation: &str, snapshot: WindowSnapshot) -> Option<String> {
        let key = pts_millis(snapshot.latest.pts);

        let complete = {
            let bucket = self.buckets.entry(key).or_default();
            bucket.insert(representation.to_string(), snapshot.fragments);
            bucket.len() >= self.representation_count
        };
        if !complete {
            return None;
        }

        // Claim the bucket. A concurrent publisher for the same pts may have
        // claimed it first, in which case the event is already on its way.
        let (_, bucket) = self.buckets.remove(&key)?;

        let payload = ForecastPayload {
            pts: snapshot.latest.pts,
            seq: snapshot.latest.sequence,
            window: bucket.into_iter().collect(),
        };
        let json = match serde_json::to_string(&payload) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize forecast");
                return None;
            }
        };

        self.prune(key);
        Some(json)
    }

    /// Drop buckets that have fallen behind the retention window; a
    /// representation that stalls or restarts must not leak its partial
    /// groups forever.
    fn prune(&self, emitted_ms: u64) {
        let cutoff = emitted_ms.saturating_sub(self.prune_window_ms);
        self.buckets.retain(|&pts, _| pts >= cutoff);
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Consume one representation's window updates, publish them into the
/// table, and forward every `controller_frequency`-th completed forecast to
/// the broadcaster. The send is blocking: the controller cadence, not the
/// ingest rate, paces this task.
pub fn spawn_consumer(
    representation: String,
    mut updates: mpsc::Receiver<WindowSnapshot>,
    table: Arc<ForecastTable>,
    events: mpsc::Sender<String>,
    controller_frequency: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut to_send = 0u32;
        while let Some(snapshot) = updates.recv().await {
            let Some(json) = table.publish(&representation, snapshot) else {
                continue;
            };
            if controller_frequency == 0 {
                continue;
            }
            to_send += 1;
            if to_send == controller_frequency {
                to_send = 0;
                if events.send(json).await.is_err() {
                    break;
                }
            }
        }
        tracing::debug!(representation = %representation, "forecast consumer stopped");
    })
}
