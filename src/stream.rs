//! C1 — Raw stream.
//!
//! A seekable byte buffer abstraction over memory or a file, used as the
//! backing store for a [`crate::DiskImage`] and as the output target of an
//! archive commit. `a2kit` keeps its images entirely as `Vec<u8>` in memory;
//! this crate generalizes that one step so archive transactions (which must
//! truncate a partially-written output on failure, spec.md §4.4 invariant 2)
//! have something concrete to truncate.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Minimal seekable-stream contract shared by in-memory and file-backed
/// byte stores.
pub trait RawStream: Read + Write + Seek {
    /// Total length of the stream in bytes.
    fn stream_len(&mut self) -> io::Result<u64> {
        let cur = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(cur))?;
        Ok(end)
    }
    /// Truncate to zero length and rewind. Used by archive commit failure
    /// handling (spec.md §4.4 invariant 2, §8 "Commit atomicity").
    fn truncate_to_zero(&mut self) -> io::Result<()>;
}

/// An in-memory byte buffer, the common case for a disk image loaded
/// wholesale from a file or constructed fresh by `format`.
pub struct MemoryStream {
    buf: Vec<u8>,
    pos: u64,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self { buf: Vec::new(), pos: 0 }
    }
    pub fn from_vec(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for MemoryStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let pos = self.pos as usize;
        if pos >= self.buf.len() {
            return Ok(0);
        }
        let n = usize::min(out.len(), self.buf.len() - pos);
        out[..n].copy_from_slice(&self.buf[pos..pos + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let pos = self.pos as usize;
        if pos + data.len() > self.buf.len() {
            self.buf.resize(pos + data.len(), 0);
        }
        self.buf[pos..pos + data.len()].copy_from_slice(data);
        self.pos += data.len() as u64;
        Ok(data.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(p) => self.buf.len() as i64 + p,
            SeekFrom::Current(p) => self.pos as i64 + p,
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start"));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}

impl RawStream for MemoryStream {
    fn truncate_to_zero(&mut self) -> io::Result<()> {
        self.buf.clear();
        self.pos = 0;
        Ok(())
    }
}

impl RawStream for File {
    fn truncate_to_zero(&mut self) -> io::Result<()> {
        self.set_len(0)?;
        self.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stream_round_trips() {
        let mut s = MemoryStream::new();
        s.write_all(b"hello world").unwrap();
        s.seek(SeekFrom::Start(0)).unwrap();
        let mut out = [0u8; 5];
        s.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn truncate_to_zero_clears() {
        let mut s = MemoryStream::from_vec(vec![1, 2, 3, 4]);
        s.truncate_to_zero().unwrap();
        assert_eq!(s.stream_len().unwrap(), 0);
    }
}
