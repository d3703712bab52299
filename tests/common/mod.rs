//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which wires a full [`AppContext`] — streams,
//! forecast consumers, broadcaster — exactly the way server startup does,
//! but fed by synthetic fMP4 bytes instead of named pipes. The
//! [`TestHarness::with_server`] constructor additionally runs the real
//! accept loop (peek classification + sendfile path included) on a random
//! port.

use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ruddr_core::Config;
use ruddr_server::broadcast::Broadcaster;
use ruddr_server::context::{AppContext, LiveStream};
use ruddr_server::forecast::{self, ForecastTable};
use ruddr_server::ingest;

/// Timescale used by all synthetic streams: 1000 units/s, so a fragment's
/// pts in seconds equals its decode time in ms / 1000.
pub const TIMESCALE: u32 = 1000;

pub struct TestHarness {
    pub ctx: AppContext,
    /// Extra sender into the broadcaster, for injecting events directly.
    pub events_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl TestHarness {
    /// Build a harness with the given representation ids and the scenario
    /// tuning: heap_size 5, fragment_duration 1, controller_frequency 1,
    /// horizon 3.
    pub fn new(representation_ids: &[&str]) -> Self {
        let mut toml = String::from(
            "[server]\naddress = \"127.0.0.1:0\"\n\n\
             [ingester]\nheap_size = 5\nfragment_duration = 1\ncontroller_frequency = 1\nhorizon = 3\n",
        );
        for id in representation_ids {
            toml.push_str(&format!(
                "\n[representations.{id}]\npipe = \"/tmp/{id}.pipe\"\n"
            ));
        }
        let config = Arc::new(Config::from_toml(&toml).expect("harness config must parse"));

        let streams: HashMap<String, Arc<LiveStream>> = representation_ids
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    Arc::new(LiveStream::new(id.to_string(), &config, false)),
                )
            })
            .collect();

        let (events_tx, events_rx) = mpsc::channel(1);
        let broadcaster = Broadcaster::spawn(events_rx);
        let table = Arc::new(ForecastTable::new(streams.len(), config.ingester.heap_size));
        for (id, stream) in &streams {
            let updates = stream.window.updates().expect("fresh window");
            forecast::spawn_consumer(
                id.clone(),
                updates,
                table.clone(),
                events_tx.clone(),
                config.ingester.controller_frequency,
            );
        }

        let ctx = AppContext {
            config,
            streams: Arc::new(streams),
            broadcaster,
        };

        Self {
            ctx,
            events_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Start the real accept loop (sendfile peek + Axum) on a random port.
    pub async fn with_server(representation_ids: &[&str]) -> (Self, SocketAddr) {
        let harness = Self::new(representation_ids);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        let ctx = harness.ctx.clone();
        let cancel = harness.cancel.clone();
        tokio::spawn(async move {
            ruddr_server::serve(ctx, listener, cancel).await;
        });

        (harness, addr)
    }

    pub fn stream(&self, id: &str) -> &Arc<LiveStream> {
        self.ctx.stream(id).expect("unknown representation")
    }

    /// Run the representation's parser over the given bytes, exactly as the
    /// pipe reader would.
    pub fn feed(&self, id: &str, bytes: Vec<u8>) {
        ingest::run_parser(self.stream(id), Cursor::new(bytes));
    }
}

// ---------------------------------------------------------------------------
// Synthetic fMP4 builders
// ---------------------------------------------------------------------------

/// Build a box: 4-byte BE size (header included) + type + content.
pub fn boxed(kind: &[u8; 4], content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + content.len());
    out.extend_from_slice(&((content.len() as u32 + 8).to_be_bytes()));
    out.extend_from_slice(kind);
    out.extend_from_slice(content);
    out
}

/// A minimal init segment with one video trak.
pub fn moov(width: u32, height: u32) -> Vec<u8> {
    let mut tkhd = vec![0u8; 84];
    tkhd[76..80].copy_from_slice(&(width << 16).to_be_bytes());
    tkhd[80..84].copy_from_slice(&(height << 16).to_be_bytes());

    let mut hdlr = vec![0u8; 20];
    hdlr[8..12].copy_from_slice(b"vide");

    let mut mdhd = vec![0u8; 24];
    mdhd[12..16].copy_from_slice(&TIMESCALE.to_be_bytes());

    let mut mdia = boxed(b"hdlr", &hdlr);
    mdia.extend_from_slice(&boxed(b"mdhd", &mdhd));
    let mut trak = boxed(b"tkhd", &tkhd);
    trak.extend_from_slice(&boxed(b"mdia", &mdia));
    boxed(b"moov", &boxed(b"trak", &trak))
}

/// A `moof` whose pts (in seconds) equals `sequence`.
pub fn moof(sequence: u32) -> Vec<u8> {
    let mut mfhd = vec![0u8; 8];
    mfhd[4..8].copy_from_slice(&sequence.to_be_bytes());

    let mut tfdt = vec![0u8; 8];
    tfdt[4..8].copy_from_slice(&(sequence * TIMESCALE).to_be_bytes());

    let mut content = boxed(b"mfhd", &mfhd);
    content.extend_from_slice(&boxed(b"traf", &boxed(b"tfdt", &tfdt)));
    boxed(b"moof", &content)
}

/// An AVCC `mdat` with one NAL: IDR for keyframes, non-IDR otherwise. The
/// payload is seeded from the sequence so every fragment's bytes differ.
pub fn mdat(sequence: u32, keyframe: bool) -> Vec<u8> {
    let nal_type: u8 = if keyframe { 5 } else { 1 };
    let payload: Vec<u8> = (0..32).map(|i| (sequence as u8).wrapping_add(i)).collect();

    let mut content = Vec::new();
    content.extend_from_slice(&((payload.len() as u32 + 1).to_be_bytes()));
    content.push(nal_type);
    content.extend_from_slice(&payload);
    boxed(b"mdat", &content)
}

/// One complete fragment pair.
pub fn fragment_pair(sequence: u32, keyframe: bool) -> Vec<u8> {
    let mut out = moof(sequence);
    out.extend_from_slice(&mdat(sequence, keyframe));
    out
}

/// The scenario stream: a moov followed by fragments 1..=count with
/// keyframes at the given sequences.
pub fn scenario_stream(count: u32, keyframes: &[u32]) -> Vec<u8> {
    let mut out = moov(1280, 720);
    for seq in 1..=count {
        out.extend_from_slice(&fragment_pair(seq, keyframes.contains(&seq)));
    }
    out
}
