//! C6 — Filesystem engines.
//!
//! Every engine (DOS 3.x, ProDOS, HFS, Pascal, CP/M, and the lighter-depth
//! RDOS/Gutenberg/MFS engines) implements [`FileSystem`] over a
//! [`crate::chunk::ChunkProvider`]. Directory trees are arenas of
//! [`FileEntry`] addressed by stable [`EntryId`] rather than owned pointers
//! (spec.md §9: "smart-pointer graphs -> arenas + indices"), and the
//! `IFileSystem`/`IFileEntry` polymorphism of the source collapses to one
//! shared attribute set plus a per-engine [`Capabilities`] descriptor
//! (spec.md §9: "inheritance -> capability enum").

pub mod cpm;
pub mod dos3x;
pub mod gutenberg;
pub mod hfs;
pub mod mfs;
pub mod pascal;
pub mod prodos;
pub mod rdos;

use chrono::NaiveDateTime;

use crate::error::Result;
use crate::notes::Notes;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum FsKind {
    Dos3x,
    ProDos,
    Hfs,
    Pascal,
    CpM,
    Rdos,
    Gutenberg,
    Mfs,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CreateMode {
    File,
    Directory,
    Extended,
    Unknown,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ForkKind {
    Data,
    Rsrc,
    RawData,
    DiskImage,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// What an engine supports, replacing the source's per-type polymorphism
/// (spec.md §9).
#[derive(Clone, Copy, Debug)]
pub struct Capabilities {
    pub has_resource_forks: bool,
    pub has_disk_images: bool,
    pub case_sensitive_names: bool,
}

/// A stable arena index into a filesystem's directory tree. Never reused
/// for the lifetime of the owning engine, even across deletes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord)]
pub struct EntryId(pub usize);

/// Attribute set shared by every engine's directory entries (spec.md §3
/// "Filesystem entry").
#[derive(Clone, Debug)]
pub struct FileEntry {
    pub id: EntryId,
    pub filename: String,
    pub raw_filename: Vec<u8>,
    pub file_type: u32,
    pub aux_type: u32,
    pub creator_fs: FsKind,
    pub access_flags: u32,
    pub create_when: Option<NaiveDateTime>,
    pub mod_when: Option<NaiveDateTime>,
    pub hfs_file_type: Option<[u8; 4]>,
    pub hfs_creator: Option<[u8; 4]>,
    pub data_length: u64,
    pub rsrc_length: u64,
    pub storage_size: u64,
    pub containing_dir: Option<EntryId>,
    pub has_data_fork: bool,
    pub has_rsrc_fork: bool,
    pub is_directory: bool,
    pub is_dubious: bool,
    pub is_damaged: bool,
}

impl FileEntry {
    pub fn new_file(id: EntryId, parent: EntryId, filename: &str, creator_fs: FsKind) -> Self {
        Self {
            id,
            filename: filename.to_string(),
            raw_filename: filename.as_bytes().to_vec(),
            file_type: 0,
            aux_type: 0,
            creator_fs,
            access_flags: 0,
            create_when: None,
            mod_when: None,
            hfs_file_type: None,
            hfs_creator: None,
            data_length: 0,
            rsrc_length: 0,
            storage_size: 0,
            containing_dir: Some(parent),
            has_data_fork: true,
            has_rsrc_fork: false,
            is_directory: false,
            is_dubious: false,
            is_damaged: false,
        }
    }
}

/// An open fork. Holds an in-memory projection of the fork's bytes;
/// `flush` pushes edits back to the owning engine and `close` releases the
/// lock recorded against `(entry, fork)` at open time -- the explicit
/// dispose spec.md §9 calls for in place of RAII.
pub struct FileHandle {
    pub entry: EntryId,
    pub fork: ForkKind,
    pub mode: AccessMode,
    pub cursor: u64,
    pub(crate) buf: Vec<u8>,
    pub(crate) dirty: bool,
    closed: bool,
    block_size: u64,
    /// `Some(map)` when the owning engine knows which blocks of this fork
    /// are really allocated (`map[i]` true) versus a hole; `None` when the
    /// engine has no sparse concept and the whole fork counts as data.
    allocation: Option<Vec<bool>>,
}

impl FileHandle {
    pub(crate) fn new(entry: EntryId, fork: ForkKind, mode: AccessMode, buf: Vec<u8>) -> Self {
        Self { entry, fork, mode, cursor: 0, buf, dirty: false, closed: false, block_size: 0, allocation: None }
    }

    /// As [`Self::new`], but records a per-block allocation map so
    /// [`Self::seek_data`]/[`Self::seek_hole`] can answer for real instead
    /// of treating the whole fork as one contiguous span of data.
    /// `allocation[i]` true means block `i` (`block_size` bytes, the last
    /// block possibly partial) holds real data; false or past the end of
    /// the map means a hole.
    pub(crate) fn with_sparse_map(
        entry: EntryId,
        fork: ForkKind,
        mode: AccessMode,
        buf: Vec<u8>,
        block_size: u64,
        allocation: Vec<bool>,
    ) -> Self {
        Self { entry, fork, mode, cursor: 0, buf, dirty: false, closed: false, block_size, allocation: Some(allocation) }
    }

    pub fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let start = self.cursor as usize;
        if start >= self.buf.len() {
            return 0;
        }
        let n = out.len().min(self.buf.len() - start);
        out[..n].copy_from_slice(&self.buf[start..start + n]);
        self.cursor += n as u64;
        n
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.mode != AccessMode::ReadWrite {
            return Err(crate::error::Error::io_failure("fork opened read-only"));
        }
        let start = self.cursor as usize;
        let end = start + data.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[start..end].copy_from_slice(data);
        self.cursor += data.len() as u64;
        self.dirty = true;
        Ok(data.len())
    }

    pub fn seek(&mut self, pos: u64) {
        self.cursor = pos;
    }

    /// Jump forward to the next allocated byte at or after `from`. Engines
    /// that built this handle with [`Self::with_sparse_map`] (ProDOS,
    /// CP/M) scan the real per-block allocation map; everything else has
    /// no concept of holes, so every byte counts as data.
    pub fn seek_data(&self, from: u64) -> u64 {
        self.scan(from, true)
    }

    /// Jump forward to the next hole (an unallocated block, or running
    /// off the end of a sparse file's tracked allocation) at or after
    /// `from`. A fork with no allocation map has no holes, so this
    /// behaves like "jump to EOF."
    pub fn seek_hole(&self, from: u64) -> u64 {
        self.scan(from, false)
    }

    fn scan(&self, from: u64, want_data: bool) -> u64 {
        let total = self.len();
        if from >= total {
            return total;
        }
        let Some(allocation) = &self.allocation else {
            return if want_data { from } else { total };
        };
        let block_size = self.block_size.max(1);
        let mut index = from / block_size;
        loop {
            let block_start = index * block_size;
            if block_start >= total {
                return total;
            }
            let allocated = (index as usize) < allocation.len() && allocation[index as usize];
            if allocated == want_data {
                return block_start.max(from);
            }
            index += 1;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
    pub fn mark_closed(&mut self) {
        self.closed = true;
    }
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Per-`(entry, fork)` lock bookkeeping shared by every engine (spec.md
/// §4.3/§5 lock policy, §8 "Handle exclusion"): a read-write open excludes
/// every other open of the same fork; read-only opens stack freely. Also
/// backs the §8 "Mode-gate": `prepare_raw_access` refuses to run while
/// this table holds any lock at all.
#[derive(Default)]
pub(crate) struct HandleTable {
    open: std::collections::HashMap<(EntryId, ForkKind), HandleLock>,
}

#[derive(Default)]
struct HandleLock {
    readers: u32,
    writer: bool,
}

impl HandleTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a new open of `(entry, fork)` under `mode`, or reject it if
    /// it would conflict with a lock already held.
    pub(crate) fn acquire(&mut self, entry: EntryId, fork: ForkKind, mode: AccessMode) -> Result<()> {
        let lock = self.open.entry((entry, fork)).or_default();
        if lock.writer {
            return Err(crate::error::Error::txn_state("fork is already open for read-write access"));
        }
        match mode {
            AccessMode::ReadWrite => {
                if lock.readers > 0 {
                    return Err(crate::error::Error::txn_state("fork is already open for reading"));
                }
                lock.writer = true;
            }
            AccessMode::ReadOnly => lock.readers += 1,
        }
        Ok(())
    }

    /// Release a lock acquired with the same `(entry, fork, mode)`.
    pub(crate) fn release(&mut self, entry: EntryId, fork: ForkKind, mode: AccessMode) {
        use std::collections::hash_map::Entry;
        if let Entry::Occupied(mut o) = self.open.entry((entry, fork)) {
            let lock = o.get_mut();
            match mode {
                AccessMode::ReadWrite => lock.writer = false,
                AccessMode::ReadOnly => lock.readers = lock.readers.saturating_sub(1),
            }
            if !lock.writer && lock.readers == 0 {
                o.remove();
            }
        }
    }

    /// True once every open handle has been closed again; engines check
    /// this before allowing `prepare_raw_access` to proceed.
    pub(crate) fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

/// Shared operation set every engine exposes (spec.md §4.3).
pub trait FileSystem {
    fn kind(&self) -> FsKind;
    fn capabilities(&self) -> Capabilities;

    fn format(&mut self, volume_name: &str, volume_num: u8, make_bootable: bool) -> Result<()>;
    fn prepare_raw_access(&mut self) -> Result<()>;
    fn prepare_file_access(&mut self, deep_scan: bool) -> Result<()>;

    /// The chunk provider backing this engine, for the raw-mode sector/
    /// block access spec.md §2 names as the other half of the mode
    /// toggle (structured access in file-access mode, free access here).
    fn provider(&self) -> &crate::chunk::ChunkProvider;
    fn provider_mut(&mut self) -> &mut crate::chunk::ChunkProvider;

    fn get_vol_dir(&self) -> EntryId;
    fn entry(&self, id: EntryId) -> Option<&FileEntry>;

    fn create_file(&mut self, parent: EntryId, name: &str, mode: CreateMode) -> Result<EntryId>;
    fn delete_file(&mut self, entry: EntryId) -> Result<()>;
    fn move_file(&mut self, entry: EntryId, new_parent: EntryId, new_name: &str) -> Result<()>;
    fn find_file_entry(&self, parent: EntryId, name: &str) -> Result<EntryId>;

    fn open_file(&mut self, entry: EntryId, access: AccessMode, part: ForkKind) -> Result<FileHandle>;
    fn close_file(&mut self, handle: FileHandle) -> Result<()>;
    fn add_rsrc_fork(&mut self, entry: EntryId) -> Result<()>;

    fn free_space(&self) -> u64;
    fn notes(&self) -> &Notes;
}

/// Case-preserving, case-insensitive equality used by every engine's name
/// lookup (spec.md §4.3 shared invariants).
pub fn names_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
