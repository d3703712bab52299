//! Zero-copy segment serving via sendfile(2).
//!
//! Init-segment and segment requests (`GET /{repr}/` and `GET
//! /{repr}/{seq}`) are intercepted before reaching Axum and served directly
//! on the raw TCP socket: response headers are written in-process, then each
//! fragment's sealed memory object is handed to the kernel with sendfile,
//! so fragment bytes never cross userspace on their way out.
//!
//! All other requests fall through to the normal hyper/Axum pipeline.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use ruddr_media::Fragment;

use crate::context::{AppContext, LiveStream};

// ---------------------------------------------------------------------------
// Peek classification
// ---------------------------------------------------------------------------

/// Pre-parsed routing information extracted from a TCP peek buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeekRoute {
    /// Init segment: `/{repr}/` (or a non-numeric trailing segment).
    Init { representation: String },
    /// Keyframe-aligned segment: `/{repr}/{seq}`.
    Segment { representation: String, index: u32 },
}

/// Classify a peeked HTTP request buffer into a sendfile route.
///
/// Returns `Some(route)` only when the first path segment names a configured
/// representation; everything else (manifest, events, unknown paths) goes
/// through the Axum pipeline.
pub fn classify_peek(ctx: &AppContext, peek_buf: &[u8]) -> Option<PeekRoute> {
    let path = extract_get_path(peek_buf)?;
    classify_path(ctx, path)
}

fn classify_path(ctx: &AppContext, path: &str) -> Option<PeekRoute> {
    let (representation, index) = parse_route(&ctx.config.server.root, path)?;
    if !ctx.streams.contains_key(representation) {
        return None;
    }
    let representation = representation.to_string();
    Some(match index {
        Some(index) => PeekRoute::Segment {
            representation,
            index,
        },
        None => PeekRoute::Init { representation },
    })
}

/// Split a request path into `(representation, index)` under the configured
/// root prefix. The last path segment is parsed as a decimal sequence
/// number; empty or non-numeric means the init segment.
fn parse_route<'a>(root: &str, path: &'a str) -> Option<(&'a str, Option<u32>)> {
    let path = path.split('?').next().unwrap_or(path);
    let path = if root.is_empty() {
        path
    } else {
        path.strip_prefix(root)?
    };
    let rest = path.strip_prefix('/')?;
    if rest.is_empty() {
        return None; // manifest
    }

    match rest.split_once('/') {
        None => Some((rest, None)),
        Some((representation, suffix)) => {
            let last = suffix.rsplit('/').next().unwrap_or(suffix);
            Some((representation, last.parse().ok()))
        }
    }
}

/// Extract the GET path from a peeked HTTP request buffer.
fn extract_get_path(peek_buf: &[u8]) -> Option<&str> {
    let line_end = peek_buf
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(peek_buf.len());
    let line = &peek_buf[..line_end];

    if !line.starts_with(b"GET ") {
        return None;
    }

    let after_method = &line[4..];
    let path_end = after_method.iter().position(|&b| b == b' ')?;
    std::str::from_utf8(&after_method[..path_end]).ok()
}

// ---------------------------------------------------------------------------
// Minimal HTTP request reader
// ---------------------------------------------------------------------------

/// Read one request's headers from the stream and return its path.
///
/// Reads until the `\r\n\r\n` delimiter; only the request line matters here.
fn read_request_path(stream: &mut TcpStream) -> io::Result<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut tmp = [0u8; 2048];

    loop {
        let n = match stream.read(&mut tmp) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                ))
            }
            Ok(n) => n,
            Err(e) => return Err(e),
        };
        buf.extend_from_slice(&tmp[..n]);
        if buf.len() >= 4 {
            let scan_start = buf.len().saturating_sub(n + 3);
            if buf[scan_start..].windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        if buf.len() > 8192 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "headers too large"));
        }
    }

    let request_line = buf
        .split(|&b| b == b'\r')
        .next()
        .unwrap_or(&buf);
    let request_line = std::str::from_utf8(request_line)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-UTF-8 request line"))?;

    request_line
        .split_whitespace()
        .nth(1)
        .map(str::to_owned)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing path"))
}

// ---------------------------------------------------------------------------
// Response plumbing
// ---------------------------------------------------------------------------

/// CORS + timing headers carried by every byte response.
const COMMON_HEADERS: &str = "Access-Control-Allow-Origin: *\r\n\
     Access-Control-Expose-Headers: Ruddr-Pts, Ruddr-Segment-Length\r\n\
     Timing-Allow-Origin: *\r\n";

/// Write a bodyless (or short plain-text) status response.
fn write_simple(stream: &mut TcpStream, status: u16, reason: &str, body: &str) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: text/plain\r\n\
         {COMMON_HEADERS}\
         Content-Length: {}\r\n\
         Connection: keep-alive\r\n\
         \r\n{body}",
        body.len(),
    );
    stream.write_all(response.as_bytes())
}

/// Set TCP_CORK (Linux) / TCP_NOPUSH (macOS) so headers and payload leave
/// in full segments.
#[cfg(any(target_os = "linux", target_os = "macos"))]
fn set_tcp_nopush(stream: &TcpStream, enabled: bool) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    #[cfg(target_os = "linux")]
    let optname = libc::TCP_CORK;
    #[cfg(target_os = "macos")]
    let optname = libc::TCP_NOPUSH;

    let val: libc::c_int = if enabled { 1 } else { 0 };
    let ret = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::IPPROTO_TCP,
            optname,
            &val as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn set_tcp_nopush(_stream: &TcpStream, _enabled: bool) -> io::Result<()> {
    Ok(())
}

/// Transfer one fragment's sealed buffer to the socket via sendfile(2),
/// looping on partial sends until the full logical length has moved.
#[cfg(target_os = "linux")]
fn transfer_fragment(stream: &mut TcpStream, fragment: &Fragment) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let sock_fd = stream.as_raw_fd();
    let file_fd = fragment.data.as_raw_fd();
    let mut offset: libc::off64_t = 0;
    let mut remaining = fragment.data.len();

    while remaining > 0 {
        let count = remaining.min(0x7ffff000) as usize;
        let ret = unsafe { libc::sendfile64(sock_fd, file_fd, &mut offset, count) };

        if ret == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            if err.kind() == io::ErrorKind::WouldBlock {
                // Send buffer full: back off briefly and retry.
                std::thread::sleep(std::time::Duration::from_millis(1));
                continue;
            }
            return Err(err);
        }

        let sent = ret as u64;
        if sent == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "sendfile returned 0",
            ));
        }
        remaining -= sent;
    }

    Ok(())
}

/// Chunked copy fallback where sendfile is unavailable.
#[cfg(not(target_os = "linux"))]
fn transfer_fragment(stream: &mut TcpStream, fragment: &Fragment) -> io::Result<()> {
    let mut buf = [0u8; 64 * 1024];
    let mut offset = 0u64;
    while offset < fragment.data.len() {
        let n = fragment.data.read_at(&mut buf, offset)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "sealed buffer shorter than its length",
            ));
        }
        stream.write_all(&buf[..n])?;
        offset += n as u64;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Main sendfile handler
// ---------------------------------------------------------------------------

/// Handle a sendfile-routed connection with HTTP keep-alive support.
///
/// Called from `spawn_blocking` with a std `TcpStream` and the pre-parsed
/// [`PeekRoute`]. Consumes the first request's headers, serves it, then
/// loops serving further segment requests on the same connection. A request
/// this path cannot serve closes the connection.
pub fn handle_sendfile(
    mut stream: TcpStream,
    ctx: &AppContext,
    route: PeekRoute,
) -> io::Result<()> {
    // The route was classified from the peek; consume the actual bytes.
    read_request_path(&mut stream)?;
    dispatch(&mut stream, ctx, &route)?;

    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(15)));

    while let Ok(path) = read_request_path(&mut stream) {
        match classify_path(ctx, &path) {
            Some(route) => dispatch(&mut stream, ctx, &route)?,
            None => break,
        }
    }

    Ok(())
}

fn dispatch(stream: &mut TcpStream, ctx: &AppContext, route: &PeekRoute) -> io::Result<()> {
    tracing::debug!(route = ?route, "sendfile request");
    match route {
        PeekRoute::Init { representation } => {
            let Some(live) = ctx.stream(representation) else {
                return write_simple(stream, 404, "Not Found", "");
            };
            serve_init(stream, live)
        }
        PeekRoute::Segment {
            representation,
            index,
        } => {
            let Some(live) = ctx.stream(representation) else {
                return write_simple(stream, 404, "Not Found", "");
            };
            serve_segment(stream, live, *index)
        }
    }
}

/// Serve the init segment: the stream's `moov` bytes, verbatim.
fn serve_init(stream: &mut TcpStream, live: &LiveStream) -> io::Result<()> {
    let Some(moov) = live.moov() else {
        return write_simple(stream, 406, "Not Acceptable", "");
    };

    let headers = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: application/octet-stream\r\n\
         Cache-Control: no-cache\r\n\
         {COMMON_HEADERS}\
         Content-Length: {}\r\n\
         Connection: keep-alive\r\n\
         \r\n",
        moov.len(),
    );
    stream.write_all(headers.as_bytes())?;
    stream.write_all(&moov)
}

/// Serve a keyframe-aligned segment: 1..N contiguous fragments starting at
/// the requested keyframe, streamed fd-by-fd with sendfile.
fn serve_segment(stream: &mut TcpStream, live: &LiveStream, index: u32) -> io::Result<()> {
    if live.moov().is_none() {
        return write_simple(stream, 406, "Not Acceptable", "");
    }

    let Some((keyframe, found_index)) = live.store.get_playable(index) else {
        return write_simple(stream, 404, "Not Found", &format!("Fragment {index} not found"));
    };
    if found_index != index {
        // The requested fragment exists but is not a keyframe.
        return write_simple(stream, 400, "Bad Request", "");
    }

    let Some(fragments) = live.store.next_fragments(&keyframe) else {
        return write_simple(
            stream,
            404,
            "Not Found",
            &format!("Segment starting from fragment {index} not complete yet"),
        );
    };

    let total: u64 = fragments.iter().map(|f| f.byte_length as u64).sum();
    let headers = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: application/octet-stream\r\n\
         {COMMON_HEADERS}\
         Ruddr-Pts: {:.4}\r\n\
         Ruddr-Segment-Length: {}\r\n\
         Content-Length: {total}\r\n\
         Connection: keep-alive\r\n\
         \r\n",
        keyframe.pts,
        fragments.len(),
    );

    let _ = set_tcp_nopush(stream, true);
    stream.write_all(headers.as_bytes())?;
    let result = stream_fragments(stream, &fragments);
    let _ = set_tcp_nopush(stream, false);
    result
}

fn stream_fragments(stream: &mut TcpStream, fragments: &[Arc<Fragment>]) -> io::Result<()> {
    for fragment in fragments {
        transfer_fragment(stream, fragment)?;
    }
    Ok(())
}
