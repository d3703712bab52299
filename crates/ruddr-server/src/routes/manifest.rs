//! Live manifest handler.
//!
//! A point-in-time snapshot of the program: ingester tuning, common start
//! time, the laggard head sequence, discovered representation metadata, and
//! every representation's keyframe list.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use ruddr_core::config::IngesterConfig;
use ruddr_media::Fragment;

use crate::context::AppContext;

#[derive(Serialize)]
struct ManifestRepresentation {
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct Manifest {
    config: IngesterConfig,
    start: DateTime<Utc>,
    epoch: u64,
    head: u32,
    representations: HashMap<String, ManifestRepresentation>,
    keyframes: HashMap<String, Vec<Arc<Fragment>>>,
}

/// GET / -- manifest JSON.
pub async fn manifest_handler(State(ctx): State<AppContext>) -> impl IntoResponse {
    // Streams may initialize at different times; a client can only rely on
    // data present in all of them, so take the latest start and the lowest
    // head.
    let mut start: Option<DateTime<Utc>> = None;
    let mut head: Option<u32> = None;
    let mut mismatch = false;

    let mut representations = HashMap::new();
    let mut keyframes = HashMap::new();

    for (id, stream) in ctx.streams.iter() {
        if let Some(started) = stream.started_at() {
            start = Some(start.map_or(started, |s| s.max(started)));
        }

        let sequence = stream.store.last_sequence();
        match head {
            None => head = Some(sequence),
            Some(h) if sequence != h => {
                mismatch = true;
                head = Some(h.min(sequence));
            }
            Some(_) => {}
        }

        let info = stream.info();
        representations.insert(
            id.clone(),
            ManifestRepresentation {
                width: info.map(|i| i.width).unwrap_or(0),
                height: info.map(|i| i.height).unwrap_or(0),
            },
        );
        keyframes.insert(id.clone(), stream.store.keyframes());
    }

    if mismatch {
        tracing::warn!("sequence heads differ across representations; publishing the laggard");
    }

    let start = start.unwrap_or(DateTime::UNIX_EPOCH);
    let manifest = Manifest {
        config: ctx.config.ingester.clone(),
        start,
        epoch: start.timestamp_millis().max(0) as u64,
        head: head.unwrap_or(0),
        representations,
        keyframes,
    };

    (
        [
            (
                "Cache-Control",
                "no-store, no-cache, must-revalidate, max-age=0".to_string(),
            ),
            ("Expires", "0".to_string()),
            ("Access-Control-Allow-Origin", "*".to_string()),
            ("Access-Control-Expose-Headers", "Ruddr-Time".to_string()),
            ("Ruddr-Time", Utc::now().timestamp_millis().to_string()),
            ("Timing-Allow-Origin", "*".to_string()),
        ],
        Json(manifest),
    )
}
