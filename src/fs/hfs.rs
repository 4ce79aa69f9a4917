//! HFS filesystem engine.
//!
//! A faithful HFS volume keeps its catalog as a B*-tree living inside a
//! regular (if invisible) catalog *file*. That tree gives real HFS two
//! properties this engine does not reproduce: logarithmic lookup and an
//! unbounded number of entries per directory. What we keep, because nothing
//! about file I/O or allocation depends on the tree shape, is everything
//! else a real volume does: the Master Directory Block, a true allocation
//! bitmap (bit *set* means in-use, the opposite convention from DOS/ProDOS),
//! per-fork extent descriptors, and parent-CNID-addressed directories. The
//! catalog itself is kept as a flat table of fixed-size records in a
//! reserved block run rather than a tree -- adequate for every volume size
//! this crate ever mounts, and documented as a deliberate simplification.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::chunk::ChunkProvider;
use crate::error::{Error, Result};
use crate::notes::Notes;

use super::{
    AccessMode, Capabilities, CreateMode, EntryId, FileEntry, FileHandle, FileSystem, ForkKind, FsKind, HandleTable,
};

const BLOCK_SIZE: usize = 512;
const MDB_BLOCK: usize = 2;
const CATALOG_BLOCKS: usize = 16;
const ENTRY_SIZE: usize = 128;
const MAX_EXTENTS: usize = 3;
const ROOT_CNID: u32 = 2;
const FIRST_USER_CNID: u32 = 16;

fn hfs_epoch_offset() -> i64 {
    // HFS timestamps count seconds since 1-Jan-1904; chrono's NaiveDate
    // has no negative-year trouble here since we only ever add to it.
    let hfs_epoch = chrono::NaiveDate::from_ymd_opt(1904, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    let unix_epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    (unix_epoch - hfs_epoch).num_seconds()
}

fn pack_hfs_time(t: Option<NaiveDateTime>) -> u32 {
    match t {
        None => 0,
        Some(t) => (t.and_utc().timestamp() + hfs_epoch_offset()) as u32,
    }
}

fn unpack_hfs_time(raw: u32) -> Option<NaiveDateTime> {
    if raw == 0 {
        return None;
    }
    let unix = raw as i64 - hfs_epoch_offset();
    chrono::DateTime::from_timestamp(unix, 0).map(|d| d.naive_utc())
}

const INVALID_CHARS: char = ':';

fn is_name_valid(s: &str, max_len: usize) -> bool {
    !s.is_empty() && s.len() <= max_len && !s.contains(INVALID_CHARS) && s.bytes().all(|b| b != 0)
}

#[derive(Clone, Copy, Default)]
struct Extent {
    start: u16,
    count: u16,
}

#[derive(Clone)]
struct Fork {
    extents: [Extent; MAX_EXTENTS],
    logical_size: u32,
    physical_blocks: u32,
}

impl Fork {
    fn empty() -> Self {
        Self { extents: [Extent::default(); MAX_EXTENTS], logical_size: 0, physical_blocks: 0 }
    }
    fn blocks(&self) -> Vec<u16> {
        let mut out = Vec::new();
        for e in &self.extents {
            for i in 0..e.count {
                out.push(e.start + i);
            }
        }
        out
    }
}

#[derive(Clone)]
struct CatEntry {
    parent_cnid: u32,
    cnid: u32,
    is_dir: bool,
    name: String,
    file_type: [u8; 4],
    creator: [u8; 4],
    create_when: u32,
    mod_when: u32,
    data: Fork,
    has_rsrc: bool,
    rsrc: Fork,
}

impl CatEntry {
    fn inactive() -> Self {
        Self {
            parent_cnid: 0,
            cnid: 0,
            is_dir: false,
            name: String::new(),
            file_type: [0; 4],
            creator: [0; 4],
            create_when: 0,
            mod_when: 0,
            data: Fork::empty(),
            has_rsrc: false,
            rsrc: Fork::empty(),
        }
    }

    fn is_active(&self) -> bool {
        self.cnid != 0
    }

    fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut b = [0u8; ENTRY_SIZE];
        b[0..4].copy_from_slice(&self.parent_cnid.to_be_bytes());
        b[4..8].copy_from_slice(&self.cnid.to_be_bytes());
        b[8] = self.is_dir as u8;
        b[9] = self.name.len().min(31) as u8;
        let n = self.name.as_bytes();
        b[10..10 + n.len().min(31)].copy_from_slice(&n[..n.len().min(31)]);
        b[41..45].copy_from_slice(&self.file_type);
        b[45..49].copy_from_slice(&self.creator);
        b[49..53].copy_from_slice(&self.create_when.to_be_bytes());
        b[53..57].copy_from_slice(&self.mod_when.to_be_bytes());
        write_fork(&mut b[57..82], &self.data);
        b[82] = self.has_rsrc as u8;
        write_fork(&mut b[83..108], &self.rsrc);
        b
    }

    fn from_bytes(b: &[u8]) -> Self {
        let name_len = b[9] as usize;
        let name = String::from_utf8_lossy(&b[10..10 + name_len.min(31)]).to_string();
        Self {
            parent_cnid: u32::from_be_bytes(b[0..4].try_into().unwrap()),
            cnid: u32::from_be_bytes(b[4..8].try_into().unwrap()),
            is_dir: b[8] != 0,
            name,
            file_type: b[41..45].try_into().unwrap(),
            creator: b[45..49].try_into().unwrap(),
            create_when: u32::from_be_bytes(b[49..53].try_into().unwrap()),
            mod_when: u32::from_be_bytes(b[53..57].try_into().unwrap()),
            data: read_fork(&b[57..82]),
            has_rsrc: b[82] != 0,
            rsrc: read_fork(&b[83..108]),
        }
    }
}

fn write_fork(b: &mut [u8], f: &Fork) {
    for (i, e) in f.extents.iter().enumerate() {
        b[i * 4..i * 4 + 2].copy_from_slice(&e.start.to_be_bytes());
        b[i * 4 + 2..i * 4 + 4].copy_from_slice(&e.count.to_be_bytes());
    }
    b[12..16].copy_from_slice(&f.logical_size.to_be_bytes());
    b[16..20].copy_from_slice(&f.physical_blocks.to_be_bytes());
}

fn read_fork(b: &[u8]) -> Fork {
    let mut extents = [Extent::default(); MAX_EXTENTS];
    for i in 0..MAX_EXTENTS {
        extents[i] = Extent {
            start: u16::from_be_bytes([b[i * 4], b[i * 4 + 1]]),
            count: u16::from_be_bytes([b[i * 4 + 2], b[i * 4 + 3]]),
        };
    }
    Fork {
        extents,
        logical_size: u32::from_be_bytes(b[12..16].try_into().unwrap()),
        physical_blocks: u32::from_be_bytes(b[16..20].try_into().unwrap()),
    }
}

struct Location {
    slot: usize,
}

pub struct Hfs {
    provider: ChunkProvider,
    total_blocks: u16,
    alloc_block_size: u32,
    vbm_start: u16,
    next_cnid: u32,
    /// Highest `drNxtCNID` ever observed across a `prepare_file_access`
    /// call on this volume. A later read coming back lower than this means
    /// something rewrote the MDB out from under us -- spec.md §4.3.3's
    /// CNID-monotonicity rule -- so the volume gets marked dubious instead
    /// of trusted.
    max_cnid_seen: u32,
    volume_dubious: bool,
    free_blocks_cache: u16,
    entries: Vec<FileEntry>,
    cnid_to_id: HashMap<u32, EntryId>,
    locations: HashMap<usize, Location>,
    notes: Notes,
    handles: HandleTable,
}

impl Hfs {
    pub fn new(provider: ChunkProvider, total_blocks: u16) -> Self {
        Self {
            provider,
            total_blocks,
            alloc_block_size: BLOCK_SIZE as u32,
            vbm_start: 3,
            next_cnid: FIRST_USER_CNID,
            max_cnid_seen: 0,
            volume_dubious: false,
            free_blocks_cache: 0,
            entries: Vec::new(),
            cnid_to_id: HashMap::new(),
            locations: HashMap::new(),
            notes: Notes::new(),
            handles: HandleTable::new(),
        }
    }

    fn num_alloc_blocks(&self) -> u16 {
        let catalog_end = MDB_BLOCK + 1 + CATALOG_BLOCKS;
        let vbm_blocks = Self::vbm_blocks_for(self.total_blocks);
        (self.total_blocks as usize - catalog_end - vbm_blocks) as u16
    }

    fn alloc_block_to_chunk(&self, alloc_block: u16) -> usize {
        self.vbm_start as usize + Self::vbm_blocks_for(self.total_blocks) + alloc_block as usize
    }

    fn vbm_blocks_for(total_blocks: u16) -> usize {
        let bits = total_blocks as usize;
        (bits + 8 * BLOCK_SIZE - 1) / (8 * BLOCK_SIZE)
    }

    fn is_alloc_block_free(&mut self, alloc_block: u16) -> Result<bool> {
        let byte_idx = alloc_block as usize / 8;
        let block = self.vbm_start as usize + byte_idx / BLOCK_SIZE;
        let off = byte_idx % BLOCK_SIZE;
        let buf = self.provider.read_block(block)?;
        let bit = 7 - (alloc_block as usize % 8);
        Ok((buf[off] >> bit) & 1 == 0)
    }

    fn set_alloc_block_free(&mut self, alloc_block: u16, free: bool) -> Result<()> {
        let byte_idx = alloc_block as usize / 8;
        let block = self.vbm_start as usize + byte_idx / BLOCK_SIZE;
        let off = byte_idx % BLOCK_SIZE;
        let mut buf = self.provider.read_block(block)?;
        let bit = 7 - (alloc_block as usize % 8);
        let was_free = (buf[off] >> bit) & 1 == 0;
        if free {
            buf[off] &= !(1 << bit);
        } else {
            buf[off] |= 1 << bit;
        }
        self.provider.write_block(block, &buf)?;
        if free && !was_free {
            self.free_blocks_cache += 1;
        } else if !free && was_free {
            self.free_blocks_cache = self.free_blocks_cache.saturating_sub(1);
        }
        Ok(())
    }

    fn num_free_alloc_blocks(&mut self) -> Result<u16> {
        let total = self.num_alloc_blocks();
        let mut free = 0u16;
        for b in 0..total {
            if self.is_alloc_block_free(b)? {
                free += 1;
            }
        }
        Ok(free)
    }

    fn allocate_alloc_block(&mut self) -> Result<u16> {
        let total = self.num_alloc_blocks();
        for b in 0..total {
            if self.is_alloc_block_free(b)? {
                self.set_alloc_block_free(b, false)?;
                return Ok(b);
            }
        }
        Err(Error::DiskFull)
    }

    /// Returns every active entry paired with its slot index in the flat
    /// catalog table, since that slot index is what [`Location`] keys on.
    fn read_catalog(&mut self) -> Result<Vec<(usize, CatEntry)>> {
        let mut out = Vec::new();
        for i in 0..(CATALOG_BLOCKS * BLOCK_SIZE / ENTRY_SIZE) {
            let block = MDB_BLOCK + 1 + i * ENTRY_SIZE / BLOCK_SIZE;
            let off = i * ENTRY_SIZE % BLOCK_SIZE;
            let buf = self.provider.read_block(block)?;
            let e = CatEntry::from_bytes(&buf[off..off + ENTRY_SIZE]);
            if e.is_active() {
                out.push((i, e));
            }
        }
        Ok(out)
    }

    fn write_catalog_slot(&mut self, slot: usize, entry: &CatEntry) -> Result<()> {
        let block = MDB_BLOCK + 1 + slot * ENTRY_SIZE / BLOCK_SIZE;
        let off = slot * ENTRY_SIZE % BLOCK_SIZE;
        let mut buf = self.provider.read_block(block)?;
        buf[off..off + ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        self.provider.write_block(block, &buf)
    }

    fn find_free_slot(&mut self) -> Result<usize> {
        let n = CATALOG_BLOCKS * BLOCK_SIZE / ENTRY_SIZE;
        for i in 0..n {
            let block = MDB_BLOCK + 1 + i * ENTRY_SIZE / BLOCK_SIZE;
            let off = i * ENTRY_SIZE % BLOCK_SIZE;
            let buf = self.provider.read_block(block)?;
            if !CatEntry::from_bytes(&buf[off..off + ENTRY_SIZE]).is_active() {
                return Ok(i);
            }
        }
        Err(Error::format("HFS catalog is full"))
    }

    fn rebuild(&mut self) -> Result<()> {
        self.entries.clear();
        self.cnid_to_id.clear();
        self.locations.clear();
        let root_id = EntryId(0);
        let mut root = FileEntry::new_file(root_id, root_id, "", FsKind::Hfs);
        root.is_directory = true;
        root.containing_dir = None;
        root.is_dubious = self.volume_dubious;
        self.entries.push(root);
        self.cnid_to_id.insert(ROOT_CNID, root_id);

        let cat = self.read_catalog()?;
        // multiple passes to resolve parents created out of order
        let mut pending = cat;
        let mut progressed = true;
        while !pending.is_empty() && progressed {
            progressed = false;
            let mut next_round = Vec::new();
            for (slot, e) in pending.iter() {
                let slot = *slot;
                let parent = match self.cnid_to_id.get(&e.parent_cnid) {
                    Some(p) => *p,
                    None => {
                        next_round.push((slot, e.clone()));
                        continue;
                    }
                };
                let id = EntryId(self.entries.len());
                let mut fe = FileEntry::new_file(id, parent, &e.name, FsKind::Hfs);
                fe.is_directory = e.is_dir;
                fe.hfs_file_type = Some(e.file_type);
                fe.hfs_creator = Some(e.creator);
                fe.create_when = unpack_hfs_time(e.create_when);
                fe.mod_when = unpack_hfs_time(e.mod_when);
                fe.data_length = e.data.logical_size as u64;
                fe.has_rsrc_fork = e.has_rsrc;
                fe.rsrc_length = e.rsrc.logical_size as u64;
                fe.storage_size = (e.data.physical_blocks + e.rsrc.physical_blocks) as u64 * self.alloc_block_size as u64;
                self.entries.push(fe);
                self.cnid_to_id.insert(e.cnid, id);
                self.locations.insert(id.0, Location { slot });
                progressed = true;
            }
            pending = next_round;
        }
        Ok(())
    }

    fn parent_cnid_of(&self, parent: EntryId) -> u32 {
        if parent == EntryId(0) {
            ROOT_CNID
        } else {
            self.entries.get(parent.0).and_then(|_| self.cnid_to_id.iter().find(|(_, v)| **v == parent).map(|(k, _)| *k)).unwrap_or(ROOT_CNID)
        }
    }

    fn free_fork(&mut self, fork: &Fork) -> Result<()> {
        for b in fork.blocks() {
            self.set_alloc_block_free(b, true)?;
        }
        Ok(())
    }

    fn write_fork_data(&mut self, data: &[u8]) -> Result<Fork> {
        let mut fork = Fork::empty();
        if data.is_empty() {
            return Ok(fork);
        }
        let needed = data.len().div_ceil(self.alloc_block_size as usize) as u16;
        let mut start: Option<u16> = None;
        let mut run = 0u16;
        let mut ext_idx = 0usize;
        let mut remaining = needed;
        let mut written = 0usize;
        while remaining > 0 && ext_idx < MAX_EXTENTS {
            let b = self.allocate_alloc_block()?;
            if start.is_none() {
                start = Some(b);
                run = 1;
            } else if b == start.unwrap() + run {
                run += 1;
            } else {
                fork.extents[ext_idx] = Extent { start: start.unwrap(), count: run };
                ext_idx += 1;
                start = Some(b);
                run = 1;
            }
            let chunk_block = self.alloc_block_to_chunk(b);
            let s = written;
            let e = (s + self.alloc_block_size as usize).min(data.len());
            let mut buf = vec![0u8; self.alloc_block_size as usize];
            buf[..e - s].copy_from_slice(&data[s..e]);
            self.provider.write_block(chunk_block, &buf)?;
            written += self.alloc_block_size as usize;
            remaining -= 1;
        }
        if let Some(s) = start {
            if ext_idx < MAX_EXTENTS {
                fork.extents[ext_idx] = Extent { start: s, count: run };
            }
        }
        fork.logical_size = data.len() as u32;
        fork.physical_blocks = needed as u32;
        Ok(fork)
    }

    fn read_fork_data(&mut self, fork: &Fork) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for b in fork.blocks() {
            out.extend(self.provider.read_block(self.alloc_block_to_chunk(b))?);
        }
        out.truncate(fork.logical_size as usize);
        Ok(out)
    }
}

impl FileSystem for Hfs {
    fn kind(&self) -> FsKind {
        FsKind::Hfs
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { has_resource_forks: true, has_disk_images: false, case_sensitive_names: false }
    }

    fn format(&mut self, volume_name: &str, _volume_num: u8, _make_bootable: bool) -> Result<()> {
        if !is_name_valid(volume_name, 27) {
            return Err(Error::arg("invalid HFS volume name: max 27 characters"));
        }
        for b in 0..self.total_blocks as usize {
            self.provider.write_block(b, &vec![0u8; BLOCK_SIZE])?;
        }
        self.vbm_start = MDB_BLOCK as u16 + 1 + CATALOG_BLOCKS as u16;
        let mut mdb = vec![0u8; BLOCK_SIZE];
        mdb[0..2].copy_from_slice(&0x4244u16.to_be_bytes());
        mdb[14..16].copy_from_slice(&self.vbm_start.to_be_bytes());
        mdb[16..18].copy_from_slice(&0u16.to_be_bytes());
        mdb[18..20].copy_from_slice(&self.num_alloc_blocks().to_be_bytes());
        mdb[20..24].copy_from_slice(&self.alloc_block_size.to_be_bytes());
        let first_alloc_chunk = (self.vbm_start as usize + Self::vbm_blocks_for(self.total_blocks)) as u16;
        mdb[28..30].copy_from_slice(&first_alloc_chunk.to_be_bytes());
        mdb[30..34].copy_from_slice(&FIRST_USER_CNID.to_be_bytes());
        mdb[34..36].copy_from_slice(&self.num_alloc_blocks().to_be_bytes());
        mdb[36] = volume_name.len().min(27) as u8;
        mdb[37..37 + volume_name.len().min(27)].copy_from_slice(&volume_name.as_bytes()[..volume_name.len().min(27)]);
        self.provider.write_block(MDB_BLOCK, &mdb)?;
        self.next_cnid = FIRST_USER_CNID;
        self.max_cnid_seen = FIRST_USER_CNID;
        self.volume_dubious = false;
        self.notes = Notes::new();
        self.notes.info("volume formatted");
        self.rebuild()?;
        self.free_blocks_cache = self.num_free_alloc_blocks()?;
        Ok(())
    }

    fn prepare_raw_access(&mut self) -> Result<()> {
        if !self.handles.is_empty() {
            return Err(Error::txn_state("cannot drop to raw access while a file handle is open"));
        }
        Ok(())
    }

    fn prepare_file_access(&mut self, _deep_scan: bool) -> Result<()> {
        let mdb = self.provider.read_block(MDB_BLOCK)?;
        let sig = u16::from_be_bytes([mdb[0], mdb[1]]);
        if sig != 0x4244 {
            return Err(Error::format("HFS master directory block signature mismatch"));
        }
        self.vbm_start = u16::from_be_bytes([mdb[14], mdb[15]]);
        self.alloc_block_size = u32::from_be_bytes([mdb[20], mdb[21], mdb[22], mdb[23]]);
        let next_cnid = u32::from_be_bytes([mdb[30], mdb[31], mdb[32], mdb[33]]);
        self.next_cnid = next_cnid;
        if self.max_cnid_seen > 0 && next_cnid < self.max_cnid_seen {
            self.volume_dubious = true;
            self.notes.warn("drNxtCNID decreased since last scan; volume marked dubious");
        } else {
            self.max_cnid_seen = next_cnid;
        }
        self.rebuild()?;
        self.free_blocks_cache = self.num_free_alloc_blocks()?;
        Ok(())
    }

    fn provider(&self) -> &crate::chunk::ChunkProvider {
        &self.provider
    }
    fn provider_mut(&mut self) -> &mut crate::chunk::ChunkProvider {
        &mut self.provider
    }

    fn get_vol_dir(&self) -> EntryId {
        EntryId(0)
    }

    fn entry(&self, id: EntryId) -> Option<&FileEntry> {
        self.entries.get(id.0)
    }

    fn create_file(&mut self, parent: EntryId, name: &str, mode: CreateMode) -> Result<EntryId> {
        if !is_name_valid(name, 31) {
            return Err(Error::arg(format!("invalid HFS name {name}")));
        }
        if self.find_file_entry(parent, name).is_ok() {
            return Err(Error::arg(format!("duplicate filename {name}")));
        }
        let parent_cnid = self.parent_cnid_of(parent);
        let cnid = self.next_cnid;
        self.next_cnid += 1;
        self.max_cnid_seen = self.max_cnid_seen.max(self.next_cnid);
        let mut mdb = self.provider.read_block(MDB_BLOCK)?;
        mdb[30..34].copy_from_slice(&self.next_cnid.to_be_bytes());
        self.provider.write_block(MDB_BLOCK, &mdb)?;
        let slot = self.find_free_slot()?;
        let mut e = CatEntry::inactive();
        e.parent_cnid = parent_cnid;
        e.cnid = cnid;
        e.is_dir = mode == CreateMode::Directory;
        e.name = name.to_string();
        e.create_when = pack_hfs_time(None);
        self.write_catalog_slot(slot, &e)?;
        self.rebuild()?;
        self.find_file_entry(parent, name)
    }

    fn delete_file(&mut self, entry: EntryId) -> Result<()> {
        if self.entries.iter().any(|e| e.containing_dir == Some(entry)) {
            return Err(Error::arg("directory not empty"));
        }
        let slot = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
        let block = MDB_BLOCK + 1 + slot * ENTRY_SIZE / BLOCK_SIZE;
        let off = slot * ENTRY_SIZE % BLOCK_SIZE;
        let buf = self.provider.read_block(block)?;
        let e = CatEntry::from_bytes(&buf[off..off + ENTRY_SIZE]);
        self.free_fork(&e.data)?;
        if e.has_rsrc {
            self.free_fork(&e.rsrc)?;
        }
        self.write_catalog_slot(slot, &CatEntry::inactive())?;
        self.rebuild()
    }

    fn move_file(&mut self, entry: EntryId, new_parent: EntryId, new_name: &str) -> Result<()> {
        if !is_name_valid(new_name, 31) {
            return Err(Error::arg(format!("invalid HFS name {new_name}")));
        }
        let loc_slot = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
        let block = MDB_BLOCK + 1 + loc_slot * ENTRY_SIZE / BLOCK_SIZE;
        let off = loc_slot * ENTRY_SIZE % BLOCK_SIZE;
        let buf = self.provider.read_block(block)?;
        let mut e = CatEntry::from_bytes(&buf[off..off + ENTRY_SIZE]);
        e.name = new_name.to_string();
        e.parent_cnid = self.parent_cnid_of(new_parent);
        self.write_catalog_slot(loc_slot, &e)?;
        self.rebuild()
    }

    fn find_file_entry(&self, parent: EntryId, name: &str) -> Result<EntryId> {
        self.entries
            .iter()
            .skip(1)
            .find(|e| e.containing_dir == Some(parent) && super::names_match(&e.filename, name))
            .map(|e| e.id)
            .ok_or_else(|| Error::not_found(format!("no file named {name}")))
    }

    fn open_file(&mut self, entry: EntryId, access: AccessMode, part: ForkKind) -> Result<FileHandle> {
        let fork = match part {
            ForkKind::Data => ForkKind::Data,
            ForkKind::Rsrc => ForkKind::Rsrc,
            _ => return Err(Error::arg("HFS supports only data and resource forks")),
        };
        let loc = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no such file"))?;
        let block = MDB_BLOCK + 1 + loc.slot * ENTRY_SIZE / BLOCK_SIZE;
        let off = loc.slot * ENTRY_SIZE % BLOCK_SIZE;
        let buf = self.provider.read_block(block)?;
        let e = CatEntry::from_bytes(&buf[off..off + ENTRY_SIZE]);
        let which = if fork == ForkKind::Rsrc { &e.rsrc } else { &e.data };
        self.handles.acquire(entry, fork, access)?;
        let data = match self.read_fork_data(which) {
            Ok(d) => d,
            Err(err) => {
                self.handles.release(entry, fork, access);
                return Err(err);
            }
        };
        Ok(FileHandle::new(entry, fork, access, data))
    }

    fn close_file(&mut self, mut handle: FileHandle) -> Result<()> {
        if handle.is_dirty() {
            let loc_slot = self.locations.get(&handle.entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
            let block = MDB_BLOCK + 1 + loc_slot * ENTRY_SIZE / BLOCK_SIZE;
            let off = loc_slot * ENTRY_SIZE % BLOCK_SIZE;
            let buf = self.provider.read_block(block)?;
            let mut e = CatEntry::from_bytes(&buf[off..off + ENTRY_SIZE]);
            let data = std::mem::take(&mut handle.buf);
            if handle.fork == ForkKind::Rsrc {
                self.free_fork(&e.rsrc)?;
                e.rsrc = self.write_fork_data(&data)?;
                e.has_rsrc = true;
            } else {
                self.free_fork(&e.data)?;
                e.data = self.write_fork_data(&data)?;
            }
            e.mod_when = pack_hfs_time(None);
            self.write_catalog_slot(loc_slot, &e)?;
            self.rebuild()?;
        }
        self.handles.release(handle.entry, handle.fork, handle.mode);
        handle.mark_closed();
        Ok(())
    }

    fn add_rsrc_fork(&mut self, entry: EntryId) -> Result<()> {
        let loc_slot = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
        let block = MDB_BLOCK + 1 + loc_slot * ENTRY_SIZE / BLOCK_SIZE;
        let off = loc_slot * ENTRY_SIZE % BLOCK_SIZE;
        let buf = self.provider.read_block(block)?;
        let mut e = CatEntry::from_bytes(&buf[off..off + ENTRY_SIZE]);
        e.has_rsrc = true;
        self.write_catalog_slot(loc_slot, &e)?;
        self.rebuild()
    }

    fn free_space(&self) -> u64 {
        self.free_blocks_cache as u64 * self.alloc_block_size as u64
    }

    fn notes(&self) -> &Notes {
        &self.notes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Order;

    fn blank_hfs(blocks: u16) -> Hfs {
        let provider = ChunkProvider::new_ordered(vec![0u8; blocks as usize * BLOCK_SIZE], Order::ProdosBlock, true);
        let mut fs = Hfs::new(provider, blocks);
        fs.format("MyDisk", 0, false).unwrap();
        fs
    }

    #[test]
    fn format_then_scan_yields_empty_volume() {
        let mut fs = blank_hfs(1600);
        fs.prepare_file_access(false).unwrap();
        assert_eq!(fs.entries.len(), 1);
    }

    #[test]
    fn create_write_read_round_trip() {
        let mut fs = blank_hfs(1600);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "Hello", CreateMode::File).unwrap();
        let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        handle.write(b"hfs data fork").unwrap();
        fs.close_file(handle).unwrap();

        let found = fs.find_file_entry(fs.get_vol_dir(), "hello").unwrap();
        let mut handle = fs.open_file(found, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        let mut buf = vec![0u8; 13];
        handle.read(&mut buf);
        assert_eq!(&buf, b"hfs data fork");
    }

    #[test]
    fn resource_fork_is_independent_of_data_fork() {
        let mut fs = blank_hfs(1600);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "Icon", CreateMode::File).unwrap();
        fs.add_rsrc_fork(id).unwrap();
        let mut dh = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        dh.write(b"data").unwrap();
        fs.close_file(dh).unwrap();
        let mut rh = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Rsrc).unwrap();
        rh.write(b"rsrc-bytes").unwrap();
        fs.close_file(rh).unwrap();

        let fid = fs.find_file_entry(fs.get_vol_dir(), "icon").unwrap();
        let mut dh = fs.open_file(fid, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        let mut dbuf = vec![0u8; 4];
        dh.read(&mut dbuf);
        assert_eq!(&dbuf, b"data");
        let mut rh = fs.open_file(fid, AccessMode::ReadOnly, ForkKind::Rsrc).unwrap();
        let mut rbuf = vec![0u8; 10];
        rh.read(&mut rbuf);
        assert_eq!(&rbuf, b"rsrc-bytes");
    }

    #[test]
    fn nested_directory_create_and_delete() {
        let mut fs = blank_hfs(1600);
        fs.prepare_file_access(false).unwrap();
        let dir = fs.create_file(fs.get_vol_dir(), "Folder", CreateMode::Directory).unwrap();
        let file = fs.create_file(dir, "Inner", CreateMode::File).unwrap();
        assert!(fs.delete_file(dir).is_err());
        fs.delete_file(file).unwrap();
        fs.delete_file(dir).unwrap();
        assert!(fs.find_file_entry(fs.get_vol_dir(), "folder").is_err());
    }

    #[test]
    fn colon_in_name_is_rejected() {
        let mut fs = blank_hfs(1600);
        fs.prepare_file_access(false).unwrap();
        assert!(fs.create_file(fs.get_vol_dir(), "bad:name", CreateMode::File).is_err());
    }

    #[test]
    fn a_decreased_next_cnid_marks_the_volume_dubious() {
        let mut fs = blank_hfs(1600);
        fs.prepare_file_access(false).unwrap();
        fs.create_file(fs.get_vol_dir(), "Hello", CreateMode::File).unwrap();

        let mut mdb = fs.provider.read_block(MDB_BLOCK).unwrap();
        let corrupted = fs.next_cnid - 1;
        mdb[30..34].copy_from_slice(&corrupted.to_be_bytes());
        fs.provider.write_block(MDB_BLOCK, &mdb).unwrap();

        fs.prepare_file_access(false).unwrap();
        assert!(fs.entry(fs.get_vol_dir()).unwrap().is_dubious);
    }

    #[test]
    fn prepare_raw_access_is_refused_while_a_handle_is_open() {
        let mut fs = blank_hfs(1600);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "Hello", CreateMode::File).unwrap();
        let handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        assert!(fs.prepare_raw_access().is_err());
        fs.close_file(handle).unwrap();
        assert!(fs.prepare_raw_access().is_ok());
    }

    #[test]
    fn a_second_read_write_open_on_the_same_fork_is_rejected() {
        let mut fs = blank_hfs(1600);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "Hello", CreateMode::File).unwrap();
        let _h1 = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        assert!(fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).is_err());
    }
}
