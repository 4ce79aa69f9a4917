//! Archive engines (C7).
//!
//! Where [`crate::fs`] imposes a filesystem on a chunk provider, this module
//! imposes a *record store* on a plain byte stream: NuFX, ZIP,
//! AppleSingle/AppleDouble, Binary II, and AppleLink ACU all reduce to the
//! same shape -- a flat list of named records, each carrying zero or more
//! parts (data fork, resource fork, disk image), edited through a single
//! open transaction at a time and serialized whole on commit.
//!
//! The trait split mirrors [`crate::fs::FileSystem`]: engine-specific
//! constructors (`create`/`open`) are inherent functions, operations that
//! make sense across every format are `Archive` trait methods.

pub mod appledouble;
pub mod applelink;
pub mod binary2;
pub mod nufx;
pub mod zip;

use std::collections::HashSet;

use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::notes::Notes;

/// Which archive format backs an [`Archive`] object.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ArchiveKind {
    NuFx,
    Zip,
    AppleSingle,
    AppleDouble,
    Binary2,
    AppleLink,
}

/// A stable index into an archive's record list. Never reused for the
/// lifetime of the owning archive, even across deletes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord)]
pub struct ArchiveEntryId(pub usize);

/// Which fork (or whole-disk-image container) a [`Part`] carries.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum PartKind {
    DataFork,
    RsrcFork,
    DiskImage,
}

/// Compression requested for a part being added. `Default` defers to the
/// engine's own guess; engines reject a variant they cannot produce.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CompressionFormat {
    Default,
    Uncompressed,
    Deflate,
    Lzw1,
    Lzw2,
}

/// What capability an archive format has, replacing the source's
/// per-format polymorphism.
#[derive(Clone, Copy, Debug)]
pub struct ArchiveCapabilities {
    pub can_write: bool,
    pub supports_rsrc_fork: bool,
    pub supports_disk_image: bool,
    pub supports_comment: bool,
}

/// One part stored against a record: its kind, and the lengths a reader
/// needs before deciding whether to fetch the bytes.
#[derive(Clone, Debug)]
pub struct PartMeta {
    pub kind: PartKind,
    pub uncompressed_length: u64,
    pub stored_length: u64,
    pub compression_format: CompressionFormat,
}

/// Attribute set shared by every engine's records (spec.md §3 "Archive
/// record").
#[derive(Clone, Debug)]
pub struct Record {
    pub id: ArchiveEntryId,
    pub filename: String,
    pub dir_sep: char,
    pub comment: Option<String>,
    pub create_when: Option<NaiveDateTime>,
    pub mod_when: Option<NaiveDateTime>,
    pub file_type: u32,
    pub aux_type: u32,
    pub access_flags: u32,
    pub hfs_file_type: Option<[u8; 4]>,
    pub hfs_creator: Option<[u8; 4]>,
    pub parts: Vec<PartMeta>,
}

impl Record {
    pub fn new(id: ArchiveEntryId, filename: &str, dir_sep: char) -> Self {
        Self {
            id,
            filename: filename.to_string(),
            dir_sep,
            comment: None,
            create_when: None,
            mod_when: None,
            file_type: 0,
            aux_type: 0,
            access_flags: 0,
            hfs_file_type: None,
            hfs_creator: None,
            parts: Vec::new(),
        }
    }

    pub fn part(&self, kind: PartKind) -> Option<&PartMeta> {
        self.parts.iter().find(|p| p.kind == kind)
    }

    fn names_match(&self, name: &str) -> bool {
        self.filename.eq_ignore_ascii_case(name)
    }
}

/// Pull interface a caller hands to `add_part`. The engine reads the
/// source once to compute a checksum, rewinds it, then reads it again to
/// stream-compress into the output -- so implementations must be
/// rewindable, and may produce short reads deliberately.
pub trait PartSource {
    fn open(&mut self) -> Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn rewind(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// The common [`PartSource`]: an in-memory byte buffer. Covers every
/// concrete use in this crate (tests, and callers staging a part from
/// another archive or filesystem already materialized in memory).
pub struct MemoryPartSource {
    data: Vec<u8>,
    cursor: usize,
    opened: bool,
}

impl MemoryPartSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, cursor: 0, opened: false }
    }
}

impl PartSource for MemoryPartSource {
    fn open(&mut self) -> Result<()> {
        self.opened = true;
        self.cursor = 0;
        Ok(())
    }
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.opened {
            return Err(Error::io_failure("part source not open"));
        }
        let n = buf.len().min(self.data.len() - self.cursor);
        buf[..n].copy_from_slice(&self.data[self.cursor..self.cursor + n]);
        self.cursor += n;
        Ok(n)
    }
    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }
    fn close(&mut self) -> Result<()> {
        self.opened = false;
        Ok(())
    }
}

/// Drains a [`PartSource`] to a `Vec<u8>`, performing the open/read-loop/
/// rewind-back-to-closed dance every engine needs before it can compute a
/// checksum and then stream-compress the same bytes.
pub(crate) fn drain_source(source: &mut dyn PartSource) -> Result<Vec<u8>> {
    source.open()?;
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = source.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    source.close()?;
    Ok(out)
}

/// An open, still-undisposed read of a part's bytes. Explicit dispose via
/// [`Archive::close_part`] in place of RAII, mirroring
/// [`crate::fs::FileHandle`].
pub struct PartReader {
    pub entry: ArchiveEntryId,
    pub kind: PartKind,
    data: Vec<u8>,
    cursor: usize,
    closed: bool,
}

impl PartReader {
    pub(crate) fn new(entry: ArchiveEntryId, kind: PartKind, data: Vec<u8>) -> Self {
        Self { entry, kind, data, cursor: 0, closed: false }
    }
    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let start = self.cursor;
        if start >= self.data.len() {
            return 0;
        }
        let n = out.len().min(self.data.len() - start);
        out[..n].copy_from_slice(&self.data[start..start + n]);
        self.cursor += n;
        n
    }
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Transaction bookkeeping shared by every engine: a snapshot of the
/// pre-transaction record list plus which ids were minted since
/// `start_transaction`, so `cancel_transaction` can detach them.
pub(crate) struct Transaction {
    pub saved_records: Vec<Option<Record>>,
    pub saved_part_data: std::collections::HashMap<(usize, PartKindKey), Vec<u8>>,
    pub created_since: HashSet<usize>,
}

/// [`PartKind`] is not `Hash`/`Eq` by way of `std::hash::Hash` derive
/// conflicts with its use as a public enum callers match on freely, so
/// part-data maps key on this small mirror instead.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PartKindKey {
    DataFork,
    RsrcFork,
    DiskImage,
}

impl From<PartKind> for PartKindKey {
    fn from(k: PartKind) -> Self {
        match k {
            PartKind::DataFork => PartKindKey::DataFork,
            PartKind::RsrcFork => PartKindKey::RsrcFork,
            PartKind::DiskImage => PartKindKey::DiskImage,
        }
    }
}

/// Shared operation set every archive engine exposes (spec.md §4.4).
pub trait Archive {
    fn kind(&self) -> ArchiveKind;
    fn capabilities(&self) -> ArchiveCapabilities;

    fn start_transaction(&mut self) -> Result<()>;
    fn cancel_transaction(&mut self) -> Result<()>;
    fn commit_transaction(&mut self, output: &mut Vec<u8>) -> Result<()>;

    fn create_record(&mut self, filename: &str, dir_sep: char) -> Result<ArchiveEntryId>;
    fn delete_record(&mut self, entry: ArchiveEntryId) -> Result<()>;
    fn find_file_entry(&self, filename: &str) -> Result<ArchiveEntryId>;

    fn add_part(
        &mut self,
        entry: ArchiveEntryId,
        kind: PartKind,
        source: &mut dyn PartSource,
        compression: CompressionFormat,
    ) -> Result<()>;
    fn delete_part(&mut self, entry: ArchiveEntryId, kind: PartKind) -> Result<()>;
    fn open_part(&mut self, entry: ArchiveEntryId, kind: PartKind) -> Result<PartReader>;
    fn close_part(&mut self, reader: PartReader) -> Result<()>;

    fn record(&self, entry: ArchiveEntryId) -> Option<&Record>;
    fn records(&self) -> Vec<&Record>;
    fn notes(&self) -> &Notes;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn roundtrip_source(data: &[u8]) -> MemoryPartSource {
        MemoryPartSource::new(data.to_vec())
    }
}
