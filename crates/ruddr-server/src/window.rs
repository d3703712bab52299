//! Rolling window of the most recent fragments.
//!
//! A fixed-capacity ring written by the parser. After every add a fresh
//! snapshot is offered on a capacity-1 channel without waiting: if the
//! consumer is busy the update is dropped. Consumers therefore see *some*
//! consistent snapshots, and the newest one eventually arrives whenever the
//! producer idles.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use ruddr_media::Fragment;

/// One coalesced window update.
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    /// The fragment whose arrival produced this snapshot.
    pub latest: Arc<Fragment>,
    /// Window contents in insertion order, oldest first.
    pub fragments: Vec<Arc<Fragment>>,
}

pub struct RollingWindow {
    inner: Mutex<Ring>,
    updates_tx: mpsc::Sender<WindowSnapshot>,
    updates_rx: Mutex<Option<mpsc::Receiver<WindowSnapshot>>>,
}

struct Ring {
    slots: Vec<Option<Arc<Fragment>>>,
    start: usize,
    count: usize,
}

impl RollingWindow {
    /// `capacity` is the horizon in fragments.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (updates_tx, updates_rx) = mpsc::channel(1);
        Self {
            inner: Mutex::new(Ring {
                slots: vec![None; capacity],
                start: 0,
                count: 0,
            }),
            updates_tx,
            updates_rx: Mutex::new(Some(updates_rx)),
        }
    }

    /// Insert at the logical tail, evicting the head when full, then offer a
    /// snapshot to the consumer (dropped if it is not ready).
    pub fn add(&self, fragment: Arc<Fragment>) {
        let snapshot = {
            let mut ring = self.inner.lock();
            let capacity = ring.slots.len();
            if ring.count == capacity {
                let start = ring.start;
                ring.slots[start] = None;
                ring.start = (start + 1) % capacity;
            } else {
                ring.count += 1;
            }
            let tail = (ring.start + ring.count - 1) % capacity;
            ring.slots[tail] = Some(fragment.clone());

            WindowSnapshot {
                latest: fragment,
                fragments: ring.ordered(),
            }
        };

        // Offer, don't wait.
        let _ = self.updates_tx.try_send(snapshot);
    }

    /// Current contents in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<Fragment>> {
        self.inner.lock().ordered()
    }

    /// Take the consumer end of the update channel. There is exactly one
    /// consumer; subsequent calls return `None`.
    pub fn updates(&self) -> Option<mpsc::Receiver<WindowSnapshot>> {
        self.updates_rx.lock().take()
    }
}

impl Ring {
    fn ordered(&self) -> Vec<Arc<Fragment>> {
        (0..self.count)
            .filter_map(|i| self.slots[(self.start + i) % self.slots.len()].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruddr_media::PendingFragment;

    fn frag(sequence: u32) -> Arc<Fragment> {
        let mut mdat = (9u32 + 8).to_be_bytes().to_vec();
        mdat.extend_from_slice(b"mdat");
        mdat.extend_from_slice(&[0u8; 9]);
        Arc::new(
            PendingFragment {
                sequence,
                pts: sequence as f32,
                moof: vec![0; 8],
            }
            .seal("window-test", &mdat)
            .unwrap(),
        )
    }

    #[test]
    fn holds_min_of_adds_and_capacity() {
        let window = RollingWindow::new(3);
        window.add(frag(1));
        window.add(frag(2));
        assert_eq!(window.snapshot().len(), 2);

        for seq in 3..=7 {
            window.add(frag(seq));
        }
        let contents: Vec<u32> = window.snapshot().iter().map(|f| f.sequence).collect();
        assert_eq!(contents, vec![5, 6, 7]);
    }

    #[test]
    fn insertion_order_preserved() {
        let window = RollingWindow::new(4);
        for seq in [10, 11, 12] {
            window.add(frag(seq));
        }
        let contents: Vec<u32> = window.snapshot().iter().map(|f| f.sequence).collect();
        assert_eq!(contents, vec![10, 11, 12]);
    }

    #[tokio::test]
    async fn updates_are_coalesced_not_blocking() {
        let window = RollingWindow::new(2);
        let mut rx = window.updates().unwrap();

        // No consumer ready: each add offers, the channel keeps only one.
        for seq in 1..=5 {
            window.add(frag(seq));
        }

        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.latest.sequence, 1);
        // All later offers were dropped while the slot was occupied.
        assert!(rx.try_recv().is_err());

        // An idle producer's next update always arrives.
        window.add(frag(6));
        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.latest.sequence, 6);
        let contents: Vec<u32> = snapshot.fragments.iter().map(|f| f.sequence).collect();
        assert_eq!(contents, vec![5, 6]);
    }

    #[test]
    fn single_consumer_only() {
        let window = RollingWindow::new(2);
        assert!(window.updates().is_some());
        assert!(window.updates().is_none());
    }
}
