//! The Fragment record and its sealed shared-memory buffer.
//!
//! A fragment is born when a `moof` arrives ([`PendingFragment`]) and becomes
//! a [`Fragment`] once its `mdat` completes the pair: the two atoms are
//! written into an anonymous memory object which is then sealed so
//! concurrent readers can map or sendfile it without locks or copies.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::FileExt;

use serde::Serialize;

use crate::nal;

// ---------------------------------------------------------------------------
// SealedBuffer
// ---------------------------------------------------------------------------

/// An immutable, fixed-size anonymous memory object addressed by fd.
///
/// On Linux this is a `memfd` with all write/resize seals applied; the fd is
/// valid input to `sendfile(2)`. The fd closes when the last owner drops.
#[derive(Debug)]
pub struct SealedBuffer {
    file: File,
    len: u64,
}

impl SealedBuffer {
    /// Create a sealed buffer holding the concatenation of `parts`.
    pub fn create(name: &str, parts: &[&[u8]]) -> io::Result<Self> {
        let mut file = create_backing(name)?;
        let mut len = 0u64;
        for part in parts {
            file.write_all(part)?;
            len += part.len() as u64;
        }
        seal(&file)?;
        Ok(Self { file, len })
    }

    /// Logical size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The raw fd, for sendfile.
    pub fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Positioned read, for the copy fallback and for tests.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.file.read_at(buf, offset)
    }

    /// Read the entire contents.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut out = vec![0u8; self.len as usize];
        self.file.read_exact_at(&mut out, 0)?;
        Ok(out)
    }
}

#[cfg(target_os = "linux")]
fn create_backing(name: &str) -> io::Result<File> {
    use std::ffi::CString;
    use std::os::fd::FromRawFd;

    let c_name = CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in buffer name"))?;
    let fd = unsafe {
        libc::memfd_create(c_name.as_ptr(), libc::MFD_CLOEXEC | libc::MFD_ALLOW_SEALING)
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// Fallback for platforms without memfd: an unlinked temp file. Still an
/// fd-addressed anonymous object, just not kernel-sealed.
#[cfg(not(target_os = "linux"))]
fn create_backing(_name: &str) -> io::Result<File> {
    tempfile::tempfile()
}

#[cfg(target_os = "linux")]
fn seal(file: &File) -> io::Result<()> {
    let seals =
        libc::F_SEAL_SHRINK | libc::F_SEAL_GROW | libc::F_SEAL_WRITE | libc::F_SEAL_SEAL;
    let ret = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_ADD_SEALS, seals) };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn seal(_file: &File) -> io::Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Fragments
// ---------------------------------------------------------------------------

/// A fragment whose `moof` has arrived but whose `mdat` has not.
///
/// Holds the transient moof bytes; they are released into the sealed buffer
/// when the pair completes. Never served or broadcast.
#[derive(Debug)]
pub struct PendingFragment {
    pub sequence: u32,
    pub pts: f32,
    pub moof: Vec<u8>,
}

impl PendingFragment {
    /// Complete the fragment with its `mdat` atom: build the sealed buffer,
    /// classify the keyframe, and drop the transient moof.
    pub fn seal(self, name: &str, mdat: &[u8]) -> io::Result<Fragment> {
        let data = SealedBuffer::create(name, &[&self.moof, mdat])?;
        let iframe_size = nal::iframe_size(mdat);
        Ok(Fragment {
            byte_length: (self.moof.len() + mdat.len()) as u32,
            sequence: self.sequence,
            pts: self.pts,
            keyframe: iframe_size > 0,
            iframe_size,
            data,
        })
    }
}

/// A complete, immutable fragment: `moof || mdat` pinned in sealed memory.
///
/// Serializes as the wire shape `{size, seq, pts, iframe}` used by both the
/// manifest keyframe lists and forecast windows.
#[derive(Debug, Serialize)]
pub struct Fragment {
    #[serde(rename = "size")]
    pub byte_length: u32,
    #[serde(rename = "seq")]
    pub sequence: u32,
    pub pts: f32,
    #[serde(skip)]
    pub keyframe: bool,
    #[serde(rename = "iframe")]
    pub iframe_size: u32,
    #[serde(skip)]
    pub data: SealedBuffer,
}
