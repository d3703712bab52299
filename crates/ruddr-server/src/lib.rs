//! ruddr-server: live fMP4 ingest, storage, synchronization, and serving.
//!
//! This crate ties the pieces together into a running origin:
//!
//! - One blocking parser task per representation reading its named pipe
//! - A per-representation fragment store with retention GC
//! - Rolling windows feeding the cross-representation synchronizer
//! - A broadcaster fanning synchronized forecasts out over SSE
//! - A custom TCP accept loop serving segments zero-copy via sendfile,
//!   with everything else handled by hyper/Axum

pub mod broadcast;
pub mod context;
pub mod forecast;
pub mod ingest;
pub mod router;
pub mod routes;
pub mod sendfile;
pub mod store;
pub mod window;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ruddr_core::{Config, Error, Result};

use crate::broadcast::Broadcaster;
use crate::context::{AppContext, LiveStream};
use crate::forecast::ForecastTable;

/// Start the ruddr server.
///
/// Opens every representation's pipe (any failure is fatal), spawns the
/// parser, synchronizer, and broadcaster tasks, and serves HTTP until a
/// shutdown signal arrives.
pub async fn start(config: Config) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }
    let config = Arc::new(config);

    // Open every pipe before spawning anything: a missing pipe is a
    // deployment error the operator should see immediately.
    let mut sources = Vec::new();
    for (id, repr) in &config.representations {
        tracing::info!(representation = %id, pipe = %repr.pipe.display(), "opening pipe");
        let file = ingest::open_pipe(&repr.pipe).map_err(|e| {
            Error::Config(format!(
                "failed to open pipe {} for representation {id}: {e}",
                repr.pipe.display()
            ))
        })?;
        sources.push((id.clone(), file));
    }

    let streams: HashMap<String, Arc<LiveStream>> = config
        .representations
        .iter()
        .map(|(id, repr)| {
            (
                id.clone(),
                Arc::new(LiveStream::new(id.clone(), &config, repr.log)),
            )
        })
        .collect();

    // Forecast pipeline: window consumers → synchronizer → broadcaster.
    let (events_tx, events_rx) = mpsc::channel(1);
    let broadcaster = Broadcaster::spawn(events_rx);
    let table = Arc::new(ForecastTable::new(streams.len(), config.ingester.heap_size));
    for (id, stream) in &streams {
        if let Some(updates) = stream.window.updates() {
            forecast::spawn_consumer(
                id.clone(),
                updates,
                table.clone(),
                events_tx.clone(),
                config.ingester.controller_frequency,
            );
        }
    }
    // The consumers hold the only senders now; when they all stop, the
    // broadcaster input closes and the fan-out shuts down.
    drop(events_tx);

    // Parser tasks: blocking reads on the pipes.
    for (id, file) in sources {
        let stream = streams[&id].clone();
        tokio::task::spawn_blocking(move || ingest::run_parser(&stream, file));
    }

    let ctx = AppContext {
        config: config.clone(),
        streams: Arc::new(streams),
        broadcaster: broadcaster.clone(),
    };

    let addr: SocketAddr = config
        .server
        .address
        .parse()
        .map_err(|e| Error::Config(format!("invalid server address {}: {e}", config.server.address)))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind {addr}: {e}")))?;
    tracing::info!("Listening on {addr}");

    let cancel = CancellationToken::new();
    serve(ctx, listener, cancel).await;

    broadcaster.stop();
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Accept loop: peek each connection to route init/segment requests to the
/// sendfile handler; everything else goes through hyper/Axum. Returns when
/// a shutdown signal arrives or the token is cancelled.
pub async fn serve(ctx: AppContext, listener: tokio::net::TcpListener, cancel: CancellationToken) {
    let app = router::build_router(ctx.clone());

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let ctx = ctx.clone();
                        let app = app.clone();
                        tokio::spawn(handle_connection(stream, ctx, app));
                    }
                    Err(e) => {
                        tracing::debug!("Accept error: {e}");
                    }
                }
            }
            _ = shutdown_signal(cancel.clone()) => break,
        }
    }
}

/// Handle a single TCP connection: peek to see if it is a segment request,
/// then either serve it via sendfile or pass it through to hyper/Axum.
async fn handle_connection(stream: tokio::net::TcpStream, ctx: AppContext, app: Router) {
    let mut peek_buf = [0u8; 256];

    if let Ok(n) = stream.peek(&mut peek_buf).await {
        if let Some(route) = sendfile::classify_peek(&ctx, &peek_buf[..n]) {
            let std_stream = match stream.into_std() {
                Ok(s) => s,
                Err(e) => {
                    tracing::debug!("Failed to convert to std TcpStream: {e}");
                    return;
                }
            };
            // tokio sockets are non-blocking; sendfile(2) should wait
            // instead of spinning on EAGAIN.
            let _ = std_stream.set_nonblocking(false);
            let _ = std_stream.set_read_timeout(Some(std::time::Duration::from_secs(5)));
            let _ = std_stream.set_write_timeout(Some(std::time::Duration::from_secs(30)));

            tokio::task::spawn_blocking(move || {
                if let Err(e) = sendfile::handle_sendfile(std_stream, &ctx, route) {
                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        tracing::trace!("Segment client disconnected: {e}");
                    } else {
                        tracing::debug!("Sendfile error: {e}");
                    }
                }
            })
            .await
            .ok();
            return;
        }
    }

    // Normal Axum/hyper path.
    let io = TokioIo::new(stream);
    let hyper_service = TowerToHyperService::new(app.into_service());
    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(io, hyper_service)
        .await
    {
        tracing::debug!("Hyper connection error: {e}");
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM) or token cancellation.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
