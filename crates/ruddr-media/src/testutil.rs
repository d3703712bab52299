//! Synthetic atom builders shared by the unit tests.

/// Build a box: 4-byte BE size (header included) + type + content.
pub fn boxed(kind: &[u8; 4], content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + content.len());
    out.extend_from_slice(&((content.len() as u32 + 8).to_be_bytes()));
    out.extend_from_slice(kind);
    out.extend_from_slice(content);
    out
}

/// Build a complete `moov` atom with a single video trak.
pub fn build_moov(width: u32, height: u32, timescale: u32) -> Vec<u8> {
    // tkhd v0 body: fixed fields + matrix up to byte 76, then 16.16 width/height.
    let mut tkhd = vec![0u8; 84];
    tkhd[76..80].copy_from_slice(&(width << 16).to_be_bytes());
    tkhd[80..84].copy_from_slice(&(height << 16).to_be_bytes());

    // hdlr body: version/flags + pre_defined, handler_type at bytes 8..12.
    let mut hdlr = vec![0u8; 20];
    hdlr[8..12].copy_from_slice(b"vide");

    // mdhd v0 body: timescale at bytes 12..16.
    let mut mdhd = vec![0u8; 24];
    mdhd[12..16].copy_from_slice(&timescale.to_be_bytes());

    let mut mdia = boxed(b"hdlr", &hdlr);
    mdia.extend_from_slice(&boxed(b"mdhd", &mdhd));

    let mut trak = boxed(b"tkhd", &tkhd);
    trak.extend_from_slice(&boxed(b"mdia", &mdia));

    boxed(b"moov", &boxed(b"trak", &trak))
}

/// Build a complete `moof` atom carrying the given sequence number and
/// version-0 base_media_decode_time.
pub fn build_moof(sequence: u32, base_media_decode_time: u32) -> Vec<u8> {
    let mut mfhd = vec![0u8; 8];
    mfhd[4..8].copy_from_slice(&sequence.to_be_bytes());

    let mut tfdt = vec![0u8; 8];
    tfdt[4..8].copy_from_slice(&base_media_decode_time.to_be_bytes());

    let traf = boxed(b"tfdt", &tfdt);

    let mut moof_content = boxed(b"mfhd", &mfhd);
    moof_content.extend_from_slice(&boxed(b"traf", &traf));

    boxed(b"moof", &moof_content)
}

/// Build a complete `mdat` atom containing AVCC (length-prefixed) NAL units.
/// Each entry is `(nal_type, payload_len)`; payload bytes are zero.
pub fn build_mdat_avcc(nals: &[(u8, usize)]) -> Vec<u8> {
    let mut content = Vec::new();
    for &(nal_type, payload_len) in nals {
        let nal_len = 1 + payload_len; // header byte + payload
        content.extend_from_slice(&(nal_len as u32).to_be_bytes());
        content.push(nal_type & 0x1F);
        content.extend(std::iter::repeat(0u8).take(payload_len));
    }
    boxed(b"mdat", &content)
}
