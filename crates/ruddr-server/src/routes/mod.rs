//! Axum route handlers: manifest and SSE events. Segment and init-segment
//! traffic never reaches these — it is peeled off by the sendfile path.

pub mod events;
pub mod manifest;
