//! ISO BMFF box navigation over in-memory byte ranges.
//!
//! Fragments arrive from the demuxer as complete atoms in memory, so child
//! lookup works on slices rather than readers. Every helper is
//! bounds-checked; truncated or lying size fields yield `None` instead of a
//! panic.

/// A box located inside a parent's content range.
#[derive(Debug, Clone, Copy)]
pub struct Atom<'a> {
    /// 4-byte box type (e.g. `b"trak"`).
    pub kind: [u8; 4],
    /// Box content, header excluded.
    pub data: &'a [u8],
}

/// Iterate the child boxes of `data`, stopping at the first malformed header.
pub fn children(data: &[u8]) -> impl Iterator<Item = Atom<'_>> {
    let mut offset = 0usize;
    std::iter::from_fn(move || {
        let (atom, next) = read_atom(data, offset)?;
        offset = next;
        Some(atom)
    })
}

/// Find the first child box of the given type.
pub fn find_atom<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<Atom<'a>> {
    children(data).find(|a| &a.kind == kind)
}

/// Find every child box of the given type.
pub fn find_all_atoms<'a>(data: &'a [u8], kind: &[u8; 4]) -> Vec<Atom<'a>> {
    children(data).filter(|a| &a.kind == kind).collect()
}

/// Read one box header + content at `offset`. Returns the atom and the
/// offset of the following sibling, or `None` when the remaining bytes
/// cannot hold the box the header declares.
fn read_atom(data: &[u8], offset: usize) -> Option<(Atom<'_>, usize)> {
    let header = data.get(offset..offset + 8)?;
    let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if size < 8 {
        return None;
    }
    let kind = [header[4], header[5], header[6], header[7]];
    let content = data.get(offset + 8..offset + size)?;
    Some((Atom { kind, data: content }, offset + size))
}

/// Read a big-endian u32 at `offset`.
pub fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read a big-endian u64 at `offset`.
pub fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset + 8)?;
    Some(u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

/// Fullbox version byte (first byte of the content).
pub fn fullbox_version(data: &[u8]) -> Option<u8> {
    data.first().copied()
}
