//! Init-segment (`moov`) metadata extraction.

use crate::atoms::{find_all_atoms, find_atom, fullbox_version, read_u32};
use ruddr_core::{Error, Result};

/// Metadata discovered from the init segment's video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoovInfo {
    pub width: u32,
    pub height: u32,
    pub timescale: u32,
}

/// Byte offset of the 16.16 fixed-point width within the `tkhd` body.
const TKHD_WIDTH_OFFSET: usize = 76;
/// Byte offset of the 16.16 fixed-point height within the `tkhd` body.
const TKHD_HEIGHT_OFFSET: usize = 80;

/// Parse a complete `moov` atom (header included).
///
/// Walks the traks looking for the one whose `mdia/hdlr` handler type is
/// `vide`, then pulls the resolution from its `tkhd` and the timescale from
/// its `mdhd` (offset depends on the mdhd version).
pub fn parse_moov(data: &[u8]) -> Result<MoovInfo> {
    let malformed = |what: &str| Error::Internal(format!("malformed moov: {what}"));

    let moov = find_atom(data, b"moov").ok_or_else(|| malformed("no moov box"))?;

    for trak in find_all_atoms(moov.data, b"trak") {
        let Some(mdia) = find_atom(trak.data, b"mdia") else {
            continue;
        };
        let Some(hdlr) = find_atom(mdia.data, b"hdlr") else {
            continue;
        };
        if hdlr.data.get(8..12) != Some(b"vide") {
            continue;
        }

        let tkhd = find_atom(trak.data, b"tkhd").ok_or_else(|| malformed("video trak without tkhd"))?;
        let width = read_u32(tkhd.data, TKHD_WIDTH_OFFSET)
            .ok_or_else(|| malformed("tkhd too short for width"))?
            >> 16;
        let height = read_u32(tkhd.data, TKHD_HEIGHT_OFFSET)
            .ok_or_else(|| malformed("tkhd too short for height"))?
            >> 16;

        let mdhd = find_atom(mdia.data, b"mdhd").ok_or_else(|| malformed("video trak without mdhd"))?;
        let version = fullbox_version(mdhd.data).ok_or_else(|| malformed("empty mdhd"))?;
        // Version 1 widens creation/modification times to 64 bits,
        // pushing the timescale from offset 12 to 20.
        let timescale_offset = if version == 1 { 20 } else { 12 };
        let timescale = read_u32(mdhd.data, timescale_offset)
            .ok_or_else(|| malformed("mdhd too short for timescale"))?;

        return Ok(MoovInfo {
            width,
            height,
            timescale,
        });
    }

    Err(malformed("no video trak"))
}
