//! Fragment-header (`moof`) metadata extraction.

use crate::atoms::{find_atom, fullbox_version, read_u32, read_u64};
use ruddr_core::{Error, Result};

/// Metadata carried by one `moof` atom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoofInfo {
    /// `mfhd` sequence number; monotone per representation.
    pub sequence: u32,
    /// `tfdt` base_media_decode_time in timescale units.
    pub base_media_decode_time: u64,
}

impl MoofInfo {
    /// Presentation time in seconds.
    pub fn pts(&self, timescale: u32) -> f32 {
        if timescale == 0 {
            return 0.0;
        }
        self.base_media_decode_time as f32 / timescale as f32
    }
}

/// Parse a complete `moof` atom (header included).
pub fn parse_moof(data: &[u8]) -> Result<MoofInfo> {
    let malformed = |what: &str| Error::Internal(format!("malformed moof: {what}"));

    let moof = find_atom(data, b"moof").ok_or_else(|| malformed("no moof box"))?;

    let mfhd = find_atom(moof.data, b"mfhd").ok_or_else(|| malformed("no mfhd"))?;
    let sequence = read_u32(mfhd.data, 4).ok_or_else(|| malformed("mfhd too short"))?;

    let traf = find_atom(moof.data, b"traf").ok_or_else(|| malformed("no traf"))?;
    let tfdt = find_atom(traf.data, b"tfdt").ok_or_else(|| malformed("no tfdt"))?;
    let version = fullbox_version(tfdt.data).ok_or_else(|| malformed("empty tfdt"))?;
    let base_media_decode_time = if version == 1 {
        read_u64(tfdt.data, 4).ok_or_else(|| malformed("tfdt too short"))?
    } else {
        read_u32(tfdt.data, 4).ok_or_else(|| malformed("tfdt too short"))? as u64
    };

    Ok(MoofInfo {
        sequence,
        base_media_decode_time,
    })
}
