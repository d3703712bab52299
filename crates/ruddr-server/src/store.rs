//! Per-representation fragment store and lifecycle manager.
//!
//! A typed concurrent index of sealed fragments keyed by sequence number,
//! an in-order keyframe list for manifest serving and segment assembly, and
//! retention GC bounded both in sequence distance and in presentation-time
//! age. The parser is the only writer; HTTP handlers and the manifest read
//! concurrently.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use ruddr_media::{Fragment, PendingFragment};

pub struct FragmentStore {
    representation: String,
    fragments: DashMap<u32, Arc<Fragment>>,
    keyframes: RwLock<Vec<Arc<Fragment>>>,
    /// The moof half of the fragment currently in flight.
    pending: Mutex<Option<PendingFragment>>,
    last_sequence: AtomicU32,
    /// Eviction trigger distance in fragments.
    retention_fragments: u32,
    /// Keyframe-list age bound in seconds.
    heap_seconds: u32,
}

impl FragmentStore {
    pub fn new(representation: String, retention_fragments: u32, heap_seconds: u32) -> Self {
        Self {
            representation,
            fragments: DashMap::new(),
            keyframes: RwLock::new(Vec::new()),
            pending: Mutex::new(None),
            last_sequence: AtomicU32::new(0),
            retention_fragments,
            heap_seconds,
        }
    }

    /// Register an arriving `moof`. Replaces any fragment already in flight
    /// and, once sealed, any complete fragment at the same sequence
    /// (encoder resync).
    pub fn register(&self, fragment: PendingFragment) {
        self.last_sequence.store(fragment.sequence, Ordering::Release);
        let replaced = self.pending.lock().replace(fragment);
        if let Some(old) = replaced {
            tracing::warn!(
                representation = %self.representation,
                sequence = old.sequence,
                "moof arrived before the previous fragment's mdat; dropping it"
            );
        }
    }

    /// Seal the in-flight fragment with its `mdat`. Returns the completed
    /// fragment, or `None` when there was nothing pending or the sealed
    /// buffer could not be created (the fragment is skipped either way).
    pub fn seal(&self, mdat: &[u8]) -> Option<Arc<Fragment>> {
        let Some(pending) = self.pending.lock().take() else {
            tracing::warn!(
                representation = %self.representation,
                "mdat arrived with no pending moof; discarding"
            );
            return None;
        };

        let name = format!("{}-{}", self.representation, pending.sequence);
        let fragment = match pending.seal(&name, mdat) {
            Ok(f) => Arc::new(f),
            Err(e) => {
                tracing::warn!(
                    representation = %self.representation,
                    error = %e,
                    "sealed buffer creation failed; skipping fragment"
                );
                return None;
            }
        };

        self.fragments.insert(fragment.sequence, fragment.clone());
        if fragment.keyframe {
            self.add_keyframe(fragment.clone());
        }
        Some(fragment)
    }

    /// Fragment at the given sequence, if sealed and retained.
    pub fn get(&self, sequence: u32) -> Option<Arc<Fragment>> {
        self.fragments.get(&sequence).map(|f| f.clone())
    }

    /// The most recently registered fragment, if already sealed.
    pub fn last(&self) -> Option<Arc<Fragment>> {
        self.get(self.last_sequence.load(Ordering::Acquire))
    }

    pub fn last_sequence(&self) -> u32 {
        self.last_sequence.load(Ordering::Acquire)
    }

    /// Scan backward from `sequence` to the nearest keyframe at or before
    /// it. Returns the keyframe and the sequence it was found at; `None`
    /// when any step of the descent is missing from the store.
    pub fn get_playable(&self, sequence: u32) -> Option<(Arc<Fragment>, u32)> {
        let mut current = sequence;
        loop {
            let fragment = self.get(current)?;
            if fragment.keyframe {
                return Some((fragment, current));
            }
            current = current.checked_sub(1)?;
        }
    }

    /// The segment starting at `keyframe`: the keyframe followed by every
    /// contiguous non-keyframe up to (excluding) the next keyframe. `None`
    /// while the segment is still incomplete (a gap before the next
    /// keyframe).
    pub fn next_fragments(&self, keyframe: &Arc<Fragment>) -> Option<Vec<Arc<Fragment>>> {
        let mut fragments = vec![keyframe.clone()];
        let mut current = keyframe.sequence + 1;
        loop {
            let fragment = self.get(current)?;
            if fragment.keyframe {
                return Some(fragments);
            }
            fragments.push(fragment);
            current += 1;
        }
    }

    /// Snapshot of the keyframe list, oldest first.
    pub fn keyframes(&self) -> Vec<Arc<Fragment>> {
        self.keyframes.read().clone()
    }

    /// Number of retained fragments.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Track a new keyframe and apply retention.
    ///
    /// When the oldest keyframe has fallen more than the retention distance
    /// behind the head, every fragment from it up to (excluding) the next
    /// keyframe is evicted and the head keyframe is dropped. The list head
    /// is additionally trimmed while it is older than `heap_seconds` behind
    /// the newest keyframe.
    fn add_keyframe(&self, fragment: Arc<Fragment>) {
        let newest_pts = fragment.pts;
        let mut keyframes = self.keyframes.write();
        keyframes.push(fragment);

        let last = self.last_sequence();
        if keyframes.len() > 1
            && last > self.retention_fragments
            && keyframes[0].sequence < last - self.retention_fragments
        {
            let from = keyframes[0].sequence;
            let to = keyframes[1].sequence.saturating_sub(1);
            let evicted = keyframes.remove(0);
            drop(keyframes);
            self.evict_range(from, to);
            tracing::debug!(
                representation = %self.representation,
                from,
                to,
                keyframe = evicted.sequence,
                "retention eviction"
            );
            keyframes = self.keyframes.write();
        }

        while keyframes
            .first()
            .is_some_and(|k| k.pts < newest_pts - self.heap_seconds as f32)
        {
            keyframes.remove(0);
        }
    }

    /// Remove every fragment in `[from, to]`. The sealed buffers close when
    /// the last reader drops its reference, so an in-flight sendfile is
    /// never interrupted.
    fn evict_range(&self, from: u32, to: u32) {
        for sequence in from..=to {
            self.fragments.remove(&sequence);
        }
    }
}
