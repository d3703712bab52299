//! Server-Sent Events handler.
//!
//! Registers the client with the broadcaster, emits a `connected` preamble,
//! then forwards forecast events as `data:` frames. Dropping the stream
//! (client disconnect) unregisters the client.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};

use crate::context::AppContext;

/// GET /events -- SSE stream of synchronized forecast windows.
pub async fn events_handler(
    State(ctx): State<AppContext>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = ctx.broadcaster.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().data(r#"{"type":"connected"}"#));

        while let Some(payload) = subscription.recv().await {
            yield Ok(Event::default().data(payload.as_ref()));
        }
        // recv() returning None means the broadcaster shut down; ending the
        // stream closes the response.
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
