//! Pipe ingest: one blocking parser per representation.
//!
//! The named pipe is opened read+write so it never delivers EOF while the
//! process lives, even when the encoder restarts. The parser frames atoms
//! off the pipe, seals fragments into the store, and feeds the rolling
//! window. A corrupt stream terminates this representation's parser only.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use ruddr_core::Result;
use ruddr_media::{demux::TopLevelAtom, moof, moov, AtomKind, AtomReader, PendingFragment};

use crate::context::LiveStream;

/// Open a representation's named pipe.
pub fn open_pipe(path: &Path) -> std::io::Result<File> {
    std::fs::OpenOptions::new().read(true).write(true).open(path)
}

/// Parse the byte source until it ends or corrupts. Runs on a blocking task.
pub fn run_parser<R: Read>(stream: &LiveStream, source: R) {
    let mut reader = AtomReader::new(source, stream.id.clone());
    loop {
        match reader.next_atom() {
            Ok(Some(atom)) => {
                if let Err(e) = process_atom(stream, atom) {
                    tracing::error!(representation = %stream.id, error = %e, "parser stopped");
                    return;
                }
            }
            Ok(None) => {
                tracing::info!(representation = %stream.id, "input stream ended");
                return;
            }
            Err(e) => {
                tracing::error!(representation = %stream.id, error = %e, "parser stopped");
                return;
            }
        }
    }
}

/// Dispatch one framed atom.
pub fn process_atom(stream: &LiveStream, atom: TopLevelAtom) -> Result<()> {
    match atom.kind {
        AtomKind::Moov => {
            let info = moov::parse_moov(&atom.payload)?;
            tracing::info!(
                representation = %stream.id,
                width = info.width,
                height = info.height,
                timescale = info.timescale,
                "received moov"
            );
            stream.set_init(atom.payload, info);
        }
        AtomKind::Moof => {
            let info = moof::parse_moof(&atom.payload)?;
            let pts = info.pts(stream.timescale());
            stream.store.register(PendingFragment {
                sequence: info.sequence,
                pts,
                moof: atom.payload,
            });
        }
        AtomKind::Mdat => {
            if let Some(fragment) = stream.store.seal(&atom.payload) {
                if stream.log_fragments {
                    tracing::info!(
                        representation = %stream.id,
                        sequence = fragment.sequence,
                        pts = format_args!("{:02}:{:02}", (fragment.pts / 60.0) as u32, fragment.pts as u32 % 60),
                        size = fragment.byte_length,
                        iframe = fragment.iframe_size,
                        keyframe = fragment.keyframe,
                        "fragment sealed"
                    );
                }
                stream.window.add(fragment);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruddr_core::Config;
    use std::io::Cursor;

    fn boxed(kind: &[u8; 4], content: &[u8]) -> Vec<u8> {
        let mut out = ((content.len() as u32 + 8).to_be_bytes()).to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(content);
        out
    }

    fn test_moov() -> Vec<u8> {
        let mut tkhd = vec![0u8; 84];
        tkhd[76..80].copy_from_slice(&(1280u32 << 16).to_be_bytes());
        tkhd[80..84].copy_from_slice(&(720u32 << 16).to_be_bytes());
        let mut hdlr = vec![0u8; 20];
        hdlr[8..12].copy_from_slice(b"vide");
        let mut mdhd = vec![0u8; 24];
        mdhd[12..16].copy_from_slice(&1000u32.to_be_bytes());

        let mut mdia = boxed(b"hdlr", &hdlr);
        mdia.extend_from_slice(&boxed(b"mdhd", &mdhd));
        let mut trak = boxed(b"tkhd", &tkhd);
        trak.extend_from_slice(&boxed(b"mdia", &mdia));
        boxed(b"moov", &boxed(b"trak", &trak))
    }

    fn test_moof(sequence: u32, decode_time_ms: u32) -> Vec<u8> {
        let mut mfhd = vec![0u8; 8];
        mfhd[4..8].copy_from_slice(&sequence.to_be_bytes());
        let mut tfdt = vec![0u8; 8];
        tfdt[4..8].copy_from_slice(&decode_time_ms.to_be_bytes());
        let mut content = boxed(b"mfhd", &mfhd);
        content.extend_from_slice(&boxed(b"traf", &boxed(b"tfdt", &tfdt)));
        boxed(b"moof", &content)
    }

    fn test_mdat(keyframe: bool) -> Vec<u8> {
        let nal_type: u8 = if keyframe { 5 } else { 1 };
        let mut content = (11u32.to_be_bytes()).to_vec();
        content.push(nal_type);
        content.extend_from_slice(&[0u8; 10]);
        boxed(b"mdat", &content)
    }

    fn live_stream() -> LiveStream {
        let config = Config::from_toml(
            r#"
            [ingester]
            heap_size = 30
            fragment_duration = 1
            horizon = 3
            "#,
        )
        .unwrap();
        LiveStream::new("test", &config, false)
    }

    #[test]
    fn parses_moov_then_fragment_pairs() {
        let stream = live_stream();

        let mut bytes = test_moov();
        bytes.extend_from_slice(&boxed(b"styp", &[0u8; 4])); // ignored
        bytes.extend_from_slice(&test_moof(1, 0));
        bytes.extend_from_slice(&test_mdat(true));
        bytes.extend_from_slice(&test_moof(2, 1000));
        bytes.extend_from_slice(&test_mdat(false));

        run_parser(&stream, Cursor::new(bytes));

        assert!(stream.moov().is_some());
        assert!(stream.started_at().is_some());
        assert_eq!(stream.info().unwrap().width, 1280);
        assert_eq!(stream.timescale(), 1000);

        let first = stream.store.get(1).unwrap();
        assert!(first.keyframe);
        assert_eq!(first.pts, 0.0);
        let second = stream.store.get(2).unwrap();
        assert!(!second.keyframe);
        assert_eq!(second.pts, 1.0);

        assert_eq!(stream.window.snapshot().len(), 2);
    }

    #[test]
    fn moov_bytes_are_preserved_exactly() {
        let stream = live_stream();
        let moov = test_moov();
        run_parser(&stream, Cursor::new(moov.clone()));
        assert_eq!(*stream.moov().unwrap(), moov);
    }

    #[test]
    fn corrupt_stream_stops_parser_after_good_fragments() {
        let stream = live_stream();

        let mut bytes = test_moov();
        bytes.extend_from_slice(&test_moof(1, 0));
        bytes.extend_from_slice(&test_mdat(true));
        // Atom with size < 8: fatal.
        bytes.extend_from_slice(&3u32.to_be_bytes());
        bytes.extend_from_slice(b"mdat");

        run_parser(&stream, Cursor::new(bytes));
        assert!(stream.store.get(1).is_some());
        assert_eq!(stream.store.len(), 1);
    }

    #[test]
    fn later_moov_keeps_original_start_time() {
        let stream = live_stream();
        run_parser(&stream, Cursor::new(test_moov()));
        let first_start = stream.started_at().unwrap();
        run_parser(&stream, Cursor::new(test_moov()));
        assert_eq!(stream.started_at().unwrap(), first_start);
    }
}
