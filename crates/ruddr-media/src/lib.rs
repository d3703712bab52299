//! ruddr-media: ISO-BMFF demultiplexing for live fMP4 ingest.
//!
//! # Modules
//!
//! - [`atoms`] - bounds-checked box navigation over in-memory byte ranges
//! - [`demux`] - streaming top-level atom reader (moov / moof / mdat framing)
//! - [`moov`] - init-segment metadata: resolution and video timescale
//! - [`moof`] - fragment metadata: sequence number and presentation time
//! - [`nal`] - H.264 IDR detection inside `mdat` payloads
//! - [`fragment`] - the Fragment record and its sealed shared-memory buffer

pub mod atoms;
pub mod demux;
#[cfg(test)]
pub(crate) mod testutil;
pub mod fragment;
pub mod moof;
pub mod moov;
pub mod nal;

pub use demux::{AtomKind, AtomReader, TopLevelAtom};
pub use fragment::{Fragment, PendingFragment, SealedBuffer};
pub use moof::MoofInfo;
pub use moov::MoovInfo;
