//! Streaming top-level atom reader.
//!
//! Frames an fMP4 byte stream into complete atoms: 8-byte header (big-endian
//! size including the header, then a 4-byte ASCII type), followed by
//! `size - 8` content bytes. Only `moov`, `moof` and `mdat` are surfaced;
//! everything else is drained and discarded.

use std::io::Read;

use ruddr_core::{Error, Result};

/// The atom kinds the ingester cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomKind {
    Moov,
    Moof,
    Mdat,
}

impl AtomKind {
    fn from_type(kind: &[u8; 4]) -> Option<Self> {
        match kind {
            b"moov" => Some(AtomKind::Moov),
            b"moof" => Some(AtomKind::Moof),
            b"mdat" => Some(AtomKind::Mdat),
            _ => None,
        }
    }
}

/// One surfaced atom: kind plus the full atom bytes (header included).
///
/// Downstream parsers expect the complete atom so that a fragment's stored
/// bytes are exactly what arrived on the wire.
#[derive(Debug)]
pub struct TopLevelAtom {
    pub kind: AtomKind,
    pub payload: Vec<u8>,
}

/// Reads top-level atoms from a byte source.
pub struct AtomReader<R> {
    source: R,
    representation: String,
}

impl<R: Read> AtomReader<R> {
    pub fn new(source: R, representation: impl Into<String>) -> Self {
        Self {
            source,
            representation: representation.into(),
        }
    }

    /// Read the next surfaced atom.
    ///
    /// Returns `Ok(None)` on clean EOF at an atom boundary. A short read in
    /// the middle of an atom, or a declared size below the 8-byte minimum
    /// (which also covers the 64-bit extended-size form, unsupported at top
    /// level), is a stream error.
    pub fn next_atom(&mut self) -> Result<Option<TopLevelAtom>> {
        loop {
            let mut header = [0u8; 8];
            match read_full(&mut self.source, &mut header) {
                ReadOutcome::Full => {}
                ReadOutcome::Eof => return Ok(None),
                ReadOutcome::Short => {
                    return Err(Error::stream(
                        &self.representation,
                        "short read inside atom header",
                    ))
                }
                ReadOutcome::Failed(e) => {
                    return Err(Error::stream(
                        &self.representation,
                        format!("atom header read failed: {e}"),
                    ))
                }
            }

            let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            let kind = [header[4], header[5], header[6], header[7]];
            if size < 8 {
                return Err(Error::stream(
                    &self.representation,
                    format!(
                        "invalid atom size {size} for type {}",
                        String::from_utf8_lossy(&kind)
                    ),
                ));
            }
            let content_len = (size - 8) as u64;

            let Some(kind) = AtomKind::from_type(&kind) else {
                // Uninteresting atom: drain its content without keeping it.
                let drained = std::io::copy(
                    &mut (&mut self.source).take(content_len),
                    &mut std::io::sink(),
                )
                .map_err(|e| {
                    Error::stream(&self.representation, format!("atom skip failed: {e}"))
                })?;
                if drained < content_len {
                    return Err(Error::stream(
                        &self.representation,
                        "short read while skipping atom",
                    ));
                }
                continue;
            };

            let mut payload = Vec::with_capacity(size as usize);
            payload.extend_from_slice(&header);
            payload.resize(size as usize, 0);
            match read_full(&mut self.source, &mut payload[8..]) {
                ReadOutcome::Full => return Ok(Some(TopLevelAtom { kind, payload })),
                ReadOutcome::Eof | ReadOutcome::Short => {
                    return Err(Error::stream(
                        &self.representation,
                        "short read inside atom content",
                    ))
                }
                ReadOutcome::Failed(e) => {
                    return Err(Error::stream(
                        &self.representation,
                        format!("atom content read failed: {e}"),
                    ))
                }
            }
        }
    }
}

enum ReadOutcome {
    Full,
    /// EOF before the first byte.
    Eof,
    /// EOF after at least one byte.
    Short,
    Failed(std::io::Error),
}

fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> ReadOutcome {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => {
                return if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Short
                }
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return ReadOutcome::Failed(e),
        }
    }
    ReadOutcome::Full
}
