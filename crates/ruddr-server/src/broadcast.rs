//! SSE fan-out with slow-consumer shedding.
//!
//! A single task owns the client set; registration, unregistration and the
//! event feed all arrive on channels, so the set is never locked. Each
//! client has its own bounded buffer: when it is full an event is dropped
//! for that client only, and the client stays connected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Per-client event buffer capacity. A consumer that falls this many events
/// behind starts losing them.
const CLIENT_BUFFER: usize = 10;

struct Client {
    id: u64,
    tx: mpsc::Sender<Arc<str>>,
}

/// Handle to the fan-out task.
pub struct Broadcaster {
    register_tx: mpsc::UnboundedSender<Client>,
    unregister_tx: mpsc::UnboundedSender<u64>,
    next_id: AtomicU64,
    client_count: Arc<AtomicUsize>,
    stop: CancellationToken,
}

/// One client's subscription. Dropping it unregisters the client.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<str>>,
    unregister_tx: mpsc::UnboundedSender<u64>,
}

impl Subscription {
    /// Next event, or `None` once the broadcaster has shut down.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }

    /// Non-blocking variant, for draining in tests.
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.unregister_tx.send(self.id);
    }
}

impl Broadcaster {
    /// Spawn the fan-out task consuming `input`. Closing `input` shuts the
    /// broadcaster down gracefully, as does [`Broadcaster::stop`]; both
    /// close every client buffer so handlers exit.
    pub fn spawn(input: mpsc::Receiver<String>) -> Arc<Self> {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let client_count = Arc::new(AtomicUsize::new(0));
        let stop = CancellationToken::new();

        tokio::spawn(run(
            register_rx,
            unregister_rx,
            input,
            client_count.clone(),
            stop.clone(),
        ));

        Arc::new(Self {
            register_tx,
            unregister_tx,
            next_id: AtomicU64::new(1),
            client_count,
            stop,
        })
    }

    /// Register a new client and hand back its subscription.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        let _ = self.register_tx.send(Client { id, tx });
        Subscription {
            id,
            rx,
            unregister_tx: self.unregister_tx.clone(),
        }
    }

    /// Shut the fan-out down, disconnecting every client.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Number of currently registered clients.
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }
}

async fn run(
    mut register_rx: mpsc::UnboundedReceiver<Client>,
    mut unregister_rx: mpsc::UnboundedReceiver<u64>,
    mut input: mpsc::Receiver<String>,
    client_count: Arc<AtomicUsize>,
    stop: CancellationToken,
) {
    let mut clients: HashMap<u64, mpsc::Sender<Arc<str>>> = HashMap::new();

    loop {
        tokio::select! {
            registered = register_rx.recv() => {
                let Some(client) = registered else { break };
                clients.insert(client.id, client.tx);
                client_count.store(clients.len(), Ordering::Relaxed);
                tracing::debug!(client = client.id, total = clients.len(), "SSE client connected");
            }
            unregistered = unregister_rx.recv() => {
                let Some(id) = unregistered else { break };
                if clients.remove(&id).is_some() {
                    client_count.store(clients.len(), Ordering::Relaxed);
                    tracing::debug!(client = id, total = clients.len(), "SSE client disconnected");
                }
            }
            event = input.recv() => {
                let Some(event) = event else {
                    tracing::debug!("broadcast input closed; shutting down fan-out");
                    break;
                };
                let payload: Arc<str> = event.into();
                let mut gone = Vec::new();
                for (id, tx) in &clients {
                    match tx.try_send(payload.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            // Slow consumer: this event is lost for this
                            // client only; it stays connected.
                            tracing::debug!(client = *id, "dropping event for slow SSE client");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
                    }
                }
                for id in gone {
                    clients.remove(&id);
                }
                client_count.store(clients.len(), Ordering::Relaxed);
            }
            _ = stop.cancelled() => break,
        }
    }

    // Dropping the senders closes every client buffer.
    clients.clear();
    client_count.store(0, Ordering::Relaxed);
}
