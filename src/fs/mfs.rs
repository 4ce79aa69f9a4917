//! MFS filesystem engine.
//!
//! The original Macintosh File System predates HFS's catalog tree and its
//! nested folders: every file lives in one flat directory, and folders are
//! a Finder-level fiction drawn from a window-position record rather than a
//! real directory entry. What MFS keeps from the later format -- because
//! [`super::hfs`] already models it well -- is a Master Directory Block, a
//! block allocation bitmap (bit set meaning in-use), per-fork extent
//! descriptors, and independent data and resource forks. This engine reuses
//! that shape with the directory flattened to a single level.

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
const DIR_BLOCKS: usize = 12;
const ENTRY_SIZE: usize = 128;
const MAX_EXTENTS: usize = 3;
const FIRST_FILE_ID: u32 = 16;

fn mfs_epoch_offset() -> i64 {
    let mfs_epoch = chrono::NaiveDate::from_ymd_opt(1904, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    let unix_epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    (unix_epoch - mfs_epoch).num_seconds()
}

fn pack_mfs_time(t: Option<NaiveDateTime>) -> u32 {
    match t {
        None => 0,
        Some(t) => (t.and_utc().timestamp() + mfs_epoch_offset()) as u32,
    }
}

fn unpack_mfs_time(raw: u32) -> Option<NaiveDateTime> {
    if raw == 0 {
        return None;
    }
    let unix = raw as i64 - mfs_epoch_offset();
    chrono::DateTime::from_timestamp(unix, 0).map(|d| d.naive_utc())
}

fn is_name_valid(s: &str) -> bool {
    !s.is_empty() && s.len() <= 31 && !s.contains(':') && s.bytes().all(|b| b != 0)
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
}

impl Fork {
    fn empty() -> Self {
        Self { extents: [Extent::default(); MAX_EXTENTS], logical_size: 0 }
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
    fn physical_blocks(&self) -> u32 {
        self.extents.iter().map(|e| e.count as u32).sum()
    }
}

fn write_fork(b: &mut [u8], f: &Fork) {
    for (i, e) in f.extents.iter().enumerate() {
        b[i * 4..i * 4 + 2].copy_from_slice(&e.start.to_be_bytes());
        b[i * 4 + 2..i * 4 + 4].copy_from_slice(&e.count.to_be_bytes());
    }
    b[12..16].copy_from_slice(&f.logical_size.to_be_bytes());
}

fn read_fork(b: &[u8]) -> Fork {
    let mut extents = [Extent::default(); MAX_EXTENTS];
    for (i, ext) in extents.iter_mut().enumerate() {
        *ext = Extent {
            start: u16::from_be_bytes([b[i * 4], b[i * 4 + 1]]),
            count: u16::from_be_bytes([b[i * 4 + 2], b[i * 4 + 3]]),
        };
    }
    Fork { extents, logical_size: u32::from_be_bytes(b[12..16].try_into().unwrap()) }
}

#[derive(Clone)]
struct CatEntry {
    file_id: u32,
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
            file_id: 0,
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
        self.file_id != 0
    }
    fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut b = [0u8; ENTRY_SIZE];
        b[0..4].copy_from_slice(&self.file_id.to_be_bytes());
        b[4] = self.name.len().min(31) as u8;
        let n = self.name.as_bytes();
        b[5..5 + n.len().min(31)].copy_from_slice(&n[..n.len().min(31)]);
        b[37..41].copy_from_slice(&self.file_type);
        b[41..45].copy_from_slice(&self.creator);
        b[45..49].copy_from_slice(&self.create_when.to_be_bytes());
        b[49..53].copy_from_slice(&self.mod_when.to_be_bytes());
        write_fork(&mut b[53..69], &self.data);
        b[69] = self.has_rsrc as u8;
        write_fork(&mut b[70..86], &self.rsrc);
        b
    }
    fn from_bytes(b: &[u8]) -> Self {
        let name_len = b[4] as usize;
        let name = String::from_utf8_lossy(&b[5..5 + name_len.min(31)]).to_string();
        Self {
            file_id: u32::from_be_bytes(b[0..4].try_into().unwrap()),
            name,
            file_type: b[37..41].try_into().unwrap(),
            creator: b[41..45].try_into().unwrap(),
            create_when: u32::from_be_bytes(b[45..49].try_into().unwrap()),
            mod_when: u32::from_be_bytes(b[49..53].try_into().unwrap()),
            data: read_fork(&b[53..69]),
            has_rsrc: b[69] != 0,
            rsrc: read_fork(&b[70..86]),
        }
    }
}

struct Location {
    slot: usize,
}

pub struct Mfs {
    provider: ChunkProvider,
    total_blocks: u16,
    alloc_block_size: u32,
    vbm_start: u16,
    next_file_id: u32,
    free_blocks_cache: u16,
    entries: Vec<FileEntry>,
    locations: HashMap<usize, Location>,
    notes: Notes,
    handles: HandleTable,
}

impl Mfs {
    pub fn new(provider: ChunkProvider, total_blocks: u16) -> Self {
        Self {
            provider,
            total_blocks,
            alloc_block_size: BLOCK_SIZE as u32,
            vbm_start: 3,
            next_file_id: FIRST_FILE_ID,
            free_blocks_cache: 0,
            entries: Vec::new(),
            locations: HashMap::new(),
            notes: Notes::new(),
            handles: HandleTable::new(),
        }
    }

    fn dir_start_block(&self) -> usize {
        MDB_BLOCK + 1
    }

    fn num_alloc_blocks(&self) -> u16 {
        let dir_end = self.dir_start_block() + DIR_BLOCKS;
        let vbm_blocks = Self::vbm_blocks_for(self.total_blocks);
        (self.total_blocks as usize - dir_end - vbm_blocks) as u16
    }

    fn vbm_blocks_for(total_blocks: u16) -> usize {
        let bits = total_blocks as usize;
        (bits + 8 * BLOCK_SIZE - 1) / (8 * BLOCK_SIZE)
    }

    fn alloc_block_to_chunk(&self, alloc_block: u16) -> usize {
        self.vbm_start as usize + Self::vbm_blocks_for(self.total_blocks) + alloc_block as usize
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

    fn num_dir_slots(&self) -> usize {
        DIR_BLOCKS * BLOCK_SIZE / ENTRY_SIZE
    }

    fn read_dir_slot(&mut self, slot: usize) -> Result<CatEntry> {
        let block = self.dir_start_block() + slot * ENTRY_SIZE / BLOCK_SIZE;
        let off = slot * ENTRY_SIZE % BLOCK_SIZE;
        let buf = self.provider.read_block(block)?;
        Ok(CatEntry::from_bytes(&buf[off..off + ENTRY_SIZE]))
    }

    fn write_dir_slot(&mut self, slot: usize, entry: &CatEntry) -> Result<()> {
        let block = self.dir_start_block() + slot * ENTRY_SIZE / BLOCK_SIZE;
        let off = slot * ENTRY_SIZE % BLOCK_SIZE;
        let mut buf = self.provider.read_block(block)?;
        buf[off..off + ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        self.provider.write_block(block, &buf)
    }

    fn find_free_slot(&mut self) -> Result<usize> {
        let n = self.num_dir_slots();
        for i in 0..n {
            if !self.read_dir_slot(i)?.is_active() {
                return Ok(i);
            }
        }
        Err(Error::format("MFS directory is full"))
    }

    fn rebuild(&mut self) -> Result<()> {
        self.entries.clear();
        self.locations.clear();
        let root_id = EntryId(0);
        let mut root = FileEntry::new_file(root_id, root_id, "", FsKind::Mfs);
        root.is_directory = true;
        root.containing_dir = None;
        self.entries.push(root);

        let n = self.num_dir_slots();
        for slot in 0..n {
            let e = self.read_dir_slot(slot)?;
            if !e.is_active() {
                continue;
            }
            let id = EntryId(self.entries.len());
            let mut fe = FileEntry::new_file(id, root_id, &e.name, FsKind::Mfs);
            fe.hfs_file_type = Some(e.file_type);
            fe.hfs_creator = Some(e.creator);
            fe.create_when = unpack_mfs_time(e.create_when);
            fe.mod_when = unpack_mfs_time(e.mod_when);
            fe.data_length = e.data.logical_size as u64;
            fe.has_rsrc_fork = e.has_rsrc;
            fe.rsrc_length = e.rsrc.logical_size as u64;
            fe.storage_size = (e.data.physical_blocks() + e.rsrc.physical_blocks()) as u64 * self.alloc_block_size as u64;
            self.entries.push(fe);
            self.locations.insert(id.0, Location { slot });
        }
        Ok(())
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

impl FileSystem for Mfs {
    fn kind(&self) -> FsKind {
        FsKind::Mfs
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { has_resource_forks: true, has_disk_images: false, case_sensitive_names: false }
    }

    fn format(&mut self, volume_name: &str, _volume_num: u8, _make_bootable: bool) -> Result<()> {
        if !is_name_valid(volume_name) {
            return Err(Error::arg("invalid MFS volume name: max 31 characters"));
        }
        for b in 0..self.total_blocks as usize {
            self.provider.write_block(b, &vec![0u8; BLOCK_SIZE])?;
        }
        self.vbm_start = MDB_BLOCK as u16 + 1 + DIR_BLOCKS as u16;
        let mut mdb = vec![0u8; BLOCK_SIZE];
        mdb[0..2].copy_from_slice(&0xd2d7u16.to_be_bytes());
        mdb[18..20].copy_from_slice(&self.vbm_start.to_be_bytes());
        mdb[20..22].copy_from_slice(&0u16.to_be_bytes());
        mdb[22..24].copy_from_slice(&self.num_alloc_blocks().to_be_bytes());
        mdb[24..28].copy_from_slice(&self.alloc_block_size.to_be_bytes());
        mdb[34..38].copy_from_slice(&FIRST_FILE_ID.to_be_bytes());
        mdb[40] = volume_name.len().min(27) as u8;
        mdb[41..41 + volume_name.len().min(27)].copy_from_slice(&volume_name.as_bytes()[..volume_name.len().min(27)]);
        self.provider.write_block(MDB_BLOCK, &mdb)?;
        self.next_file_id = FIRST_FILE_ID;
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
        if sig != 0xd2d7 {
            return Err(Error::format("MFS master directory block signature mismatch"));
        }
        self.vbm_start = u16::from_be_bytes([mdb[18], mdb[19]]);
        self.alloc_block_size = u32::from_be_bytes([mdb[24], mdb[25], mdb[26], mdb[27]]);
        self.next_file_id = u32::from_be_bytes([mdb[34], mdb[35], mdb[36], mdb[37]]);
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
        if parent != EntryId(0) || mode == CreateMode::Directory {
            return Err(Error::arg("MFS has no subdirectories"));
        }
        if !is_name_valid(name) {
            return Err(Error::arg(format!("invalid MFS name {name}")));
        }
        if self.find_file_entry(parent, name).is_ok() {
            return Err(Error::arg(format!("duplicate filename {name}")));
        }
        let file_id = self.next_file_id;
        self.next_file_id += 1;
        let slot = self.find_free_slot()?;
        let mut e = CatEntry::inactive();
        e.file_id = file_id;
        e.name = name.to_string();
        e.create_when = pack_mfs_time(None);
        self.write_dir_slot(slot, &e)?;
        self.rebuild()?;
        self.find_file_entry(parent, name)
    }

    fn delete_file(&mut self, entry: EntryId) -> Result<()> {
        let slot = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
        let e = self.read_dir_slot(slot)?;
        self.free_fork(&e.data)?;
        if e.has_rsrc {
            self.free_fork(&e.rsrc)?;
        }
        self.write_dir_slot(slot, &CatEntry::inactive())?;
        self.rebuild()
    }

    fn move_file(&mut self, entry: EntryId, new_parent: EntryId, new_name: &str) -> Result<()> {
        if new_parent != EntryId(0) {
            return Err(Error::arg("MFS has no subdirectories"));
        }
        if !is_name_valid(new_name) {
            return Err(Error::arg(format!("invalid MFS name {new_name}")));
        }
        let slot = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
        let mut e = self.read_dir_slot(slot)?;
        e.name = new_name.to_string();
        self.write_dir_slot(slot, &e)?;
        self.rebuild()
    }

    fn find_file_entry(&self, parent: EntryId, name: &str) -> Result<EntryId> {
        if parent != EntryId(0) {
            return Err(Error::not_found("MFS has no subdirectories"));
        }
        self.entries
            .iter()
            .skip(1)
            .find(|e| super::names_match(&e.filename, name))
            .map(|e| e.id)
            .ok_or_else(|| Error::not_found(format!("no file named {name}")))
    }

    fn open_file(&mut self, entry: EntryId, access: AccessMode, part: ForkKind) -> Result<FileHandle> {
        let fork = match part {
            ForkKind::Data => ForkKind::Data,
            ForkKind::Rsrc => ForkKind::Rsrc,
            _ => return Err(Error::arg("MFS supports only data and resource forks")),
        };
        let slot = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
        let e = self.read_dir_slot(slot)?;
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
            let slot = self.locations.get(&handle.entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
            let mut e = self.read_dir_slot(slot)?;
            let data = std::mem::take(&mut handle.buf);
            if handle.fork == ForkKind::Rsrc {
                self.free_fork(&e.rsrc)?;
                e.rsrc = self.write_fork_data(&data)?;
                e.has_rsrc = true;
            } else {
                self.free_fork(&e.data)?;
                e.data = self.write_fork_data(&data)?;
            }
            e.mod_when = pack_mfs_time(None);
            self.write_dir_slot(slot, &e)?;
            self.rebuild()?;
        }
        self.handles.release(handle.entry, handle.fork, handle.mode);
        handle.mark_closed();
        Ok(())
    }

    fn add_rsrc_fork(&mut self, entry: EntryId) -> Result<()> {
        let slot = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
        let mut e = self.read_dir_slot(slot)?;
        e.has_rsrc = true;
        self.write_dir_slot(slot, &e)?;
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

    fn blank_mfs(blocks: u16) -> Mfs {
        let provider = ChunkProvider::new_ordered(vec![0u8; blocks as usize * BLOCK_SIZE], Order::ProdosBlock, true);
        let mut fs = Mfs::new(provider, blocks);
        fs.format("Untitled", 0, false).unwrap();
        fs
    }

    #[test]
    fn format_then_scan_yields_empty_volume() {
        let mut fs = blank_mfs(800);
        fs.prepare_file_access(false).unwrap();
        assert_eq!(fs.entries.len(), 1);
    }

    #[test]
    fn create_write_read_round_trip() {
        let mut fs = blank_mfs(800);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "Letter", CreateMode::File).unwrap();
        let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        handle.write(b"mfs data fork").unwrap();
        fs.close_file(handle).unwrap();

        let found = fs.find_file_entry(fs.get_vol_dir(), "letter").unwrap();
        let mut handle = fs.open_file(found, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        let mut buf = vec![0u8; 13];
        handle.read(&mut buf);
        assert_eq!(&buf, b"mfs data fork");
    }

    #[test]
    fn subdirectories_are_rejected() {
        let mut fs = blank_mfs(800);
        fs.prepare_file_access(false).unwrap();
        assert!(fs.create_file(fs.get_vol_dir(), "Folder", CreateMode::Directory).is_err());
    }

    #[test]
    fn resource_fork_is_independent_of_data_fork() {
        let mut fs = blank_mfs(800);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "App", CreateMode::File).unwrap();
        fs.add_rsrc_fork(id).unwrap();
        let mut rh = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Rsrc).unwrap();
        rh.write(b"icons").unwrap();
        fs.close_file(rh).unwrap();

        let mut dh = fs.open_file(id, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        let mut dbuf = vec![0u8; 0];
        dh.read(&mut dbuf);
        assert_eq!(dh.len(), 0);
    }

    #[test]
    fn colon_in_name_is_rejected() {
        let mut fs = blank_mfs(800);
        fs.prepare_file_access(false).unwrap();
        assert!(fs.create_file(fs.get_vol_dir(), "bad:name", CreateMode::File).is_err());
    }

    #[test]
    fn prepare_raw_access_is_refused_while_a_handle_is_open() {
        let mut fs = blank_mfs(800);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "Letter", CreateMode::File).unwrap();
        let handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        assert!(fs.prepare_raw_access().is_err());
        fs.close_file(handle).unwrap();
        assert!(fs.prepare_raw_access().is_ok());
    }

    #[test]
    fn a_second_read_write_open_on_the_same_fork_is_rejected() {
        let mut fs = blank_mfs(800);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "Letter", CreateMode::File).unwrap();
        let _h1 = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        assert!(fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).is_err());
    }
}
