//! ProDOS filesystem engine.
//!
//! Block 2 is the volume directory key block: a 39-byte header followed
//! by up to 12 directory entries, chained forward/back through sibling
//! entry blocks of 13 entries each. Every file or subdirectory entry
//! names a storage type -- Seedling (one data block), Sapling (one index
//! block of up to 256 data pointers), or Tree (a master index of up to
//! 128 sapling index blocks) -- that determines how its `key_ptr` is
//! interpreted. A block-granularity free-space bitmap starts right after
//! the volume directory.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::chunk::ChunkProvider;
use crate::error::{Error, Result};
use crate::notes::Notes;

use super::{
    AccessMode, Capabilities, CreateMode, EntryId, FileEntry, FileHandle, FileSystem, ForkKind, FsKind, HandleTable,
};

const BLOCK_SIZE: usize = 512;
const VOL_KEY_BLOCK: usize = 2;
const ENTRY_LEN: usize = 0x27;
const ENTRIES_PER_BLOCK: usize = 13;
const STD_ACCESS: u8 = 0b1110_0011; // read, write, rename, destroy, backup

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum StorageType {
    Inactive = 0x00,
    Seedling = 0x01,
    Sapling = 0x02,
    Tree = 0x03,
    Extended = 0x05,
    SubDirEntry = 0x0d,
    SubDirHeader = 0x0e,
    VolDirHeader = 0x0f,
}

impl StorageType {
    fn from_nibble(n: u8) -> Option<Self> {
        match n {
            0x00 => Some(StorageType::Inactive),
            0x01 => Some(StorageType::Seedling),
            0x02 => Some(StorageType::Sapling),
            0x03 => Some(StorageType::Tree),
            0x05 => Some(StorageType::Extended),
            0x0d => Some(StorageType::SubDirEntry),
            0x0e => Some(StorageType::SubDirHeader),
            0x0f => Some(StorageType::VolDirHeader),
            _ => None,
        }
    }
}

/// One half of an extended (forked) file's key block: a miniature entry
/// describing one fork's own Seedling/Sapling/Tree storage, the same
/// shape GS/OS uses so a data fork and a resource fork can each grow
/// independently. The data fork's descriptor lives in the first 16
/// bytes of the extended key block, the resource fork's in the 16 bytes
/// at offset 256.
#[derive(Clone, Copy)]
struct ForkDescriptor {
    storage_type: StorageType,
    key_ptr: u16,
    blocks_used: u16,
    eof: u32,
}

impl ForkDescriptor {
    fn empty() -> Self {
        Self { storage_type: StorageType::Inactive, key_ptr: 0, blocks_used: 0, eof: 0 }
    }

    fn from_bytes(b: &[u8]) -> Self {
        let storage_type = StorageType::from_nibble(b[0] >> 4).unwrap_or(StorageType::Inactive);
        Self {
            storage_type,
            key_ptr: u16::from_le_bytes([b[1], b[2]]),
            blocks_used: u16::from_le_bytes([b[3], b[4]]),
            eof: u32::from_le_bytes([b[5], b[6], b[7], 0]),
        }
    }

    fn to_bytes(&self) -> [u8; 16] {
        let mut b = [0u8; 16];
        b[0] = (self.storage_type as u8) << 4;
        b[1..3].copy_from_slice(&self.key_ptr.to_le_bytes());
        b[3..5].copy_from_slice(&self.blocks_used.to_le_bytes());
        let eof = self.eof.to_le_bytes();
        b[5..8].copy_from_slice(&eof[..3]);
        b
    }
}

const FORK_DESC_RSRC_OFFSET: usize = 256;

const FILE_TYPE_DIRECTORY: u8 = 0x0f;
const FILE_TYPE_BINARY: u8 = 0x06;

fn pack_time(time: Option<NaiveDateTime>) -> [u8; 4] {
    let now = match time {
        Some(t) => t,
        None => return [0, 0, 0, 0],
    };
    let (_, year) = now.year_ce();
    let packed_date = (now.day() as u16) + ((now.month() as u16) << 5) + ((year as u16 % 100) << 9);
    let packed_time = (now.minute() as u16) + ((now.hour() as u16) << 8);
    let d = packed_date.to_le_bytes();
    let t = packed_time.to_le_bytes();
    [d[0], d[1], t[0], t[1]]
}

fn unpack_time(raw: [u8; 4]) -> Option<NaiveDateTime> {
    let date = u16::from_le_bytes([raw[0], raw[1]]);
    let time = u16::from_le_bytes([raw[2], raw[3]]);
    if date == 0 {
        return None;
    }
    let year_mod_100 = date >> 9;
    let year = if year_mod_100 < 79 { 2000 + year_mod_100 as i32 } else { 1900 + year_mod_100 as i32 };
    let month = (date >> 5) & 0x0f;
    let day = date & 0x1f;
    let hour = (time >> 8) & 0xff;
    let minute = time & 0xff;
    chrono::NaiveDate::from_ymd_opt(year, month as u32, day as u32)
        .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, 0))
}

fn is_name_valid(s: &str) -> bool {
    if s.is_empty() || s.len() > 15 {
        return false;
    }
    let upper = s.to_uppercase();
    let mut chars = upper.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_alphabetic() {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '.')
}

fn pack_name(stype: StorageType, s: &str) -> Result<(u8, [u8; 15])> {
    if !is_name_valid(s) {
        return Err(Error::arg("invalid ProDOS name: must start with a letter and contain only letters, digits, or '.'"));
    }
    let upper = s.to_uppercase();
    let nibs = ((stype as u8) << 4) | upper.len() as u8;
    let mut name = [0u8; 15];
    name[..upper.len()].copy_from_slice(upper.as_bytes());
    Ok((nibs, name))
}

fn unpack_name(nibs: u8, raw: &[u8; 15]) -> String {
    let len = (nibs & 0x0f) as usize;
    String::from_utf8_lossy(&raw[..len.min(15)]).to_string()
}

/// One 39-byte catalog slot: either a volume/subdirectory header or a
/// file/subdirectory entry, depending on the high nibble of `stor_len_nibs`.
#[derive(Clone)]
struct RawEntry {
    stor_len_nibs: u8,
    name: [u8; 15],
    file_type: u8,
    key_ptr: u16,
    blocks_used: u16,
    eof: u32,
    create_time: [u8; 4],
    version: u8,
    min_version: u8,
    access: u8,
    aux_type: u16,
    last_mod: [u8; 4],
    header_ptr: u16,
}

impl RawEntry {
    fn inactive() -> Self {
        Self {
            stor_len_nibs: 0,
            name: [0; 15],
            file_type: 0,
            key_ptr: 0,
            blocks_used: 0,
            eof: 0,
            create_time: [0; 4],
            version: 0,
            min_version: 0,
            access: 0,
            aux_type: 0,
            last_mod: [0; 4],
            header_ptr: 0,
        }
    }

    fn from_bytes(b: &[u8]) -> Self {
        Self {
            stor_len_nibs: b[0],
            name: b[1..16].try_into().unwrap(),
            file_type: b[16],
            key_ptr: u16::from_le_bytes([b[17], b[18]]),
            blocks_used: u16::from_le_bytes([b[19], b[20]]),
            eof: u32::from_le_bytes([b[21], b[22], b[23], 0]),
            create_time: b[24..28].try_into().unwrap(),
            version: b[28],
            min_version: b[29],
            access: b[30],
            aux_type: u16::from_le_bytes([b[31], b[32]]),
            last_mod: b[33..37].try_into().unwrap(),
            header_ptr: u16::from_le_bytes([b[37], b[38]]),
        }
    }

    fn to_bytes(&self) -> [u8; ENTRY_LEN] {
        let mut b = [0u8; ENTRY_LEN];
        b[0] = self.stor_len_nibs;
        b[1..16].copy_from_slice(&self.name);
        b[16] = self.file_type;
        b[17..19].copy_from_slice(&self.key_ptr.to_le_bytes());
        b[19..21].copy_from_slice(&self.blocks_used.to_le_bytes());
        let eof = self.eof.to_le_bytes();
        b[21..24].copy_from_slice(&eof[..3]);
        b[24..28].copy_from_slice(&self.create_time);
        b[28] = self.version;
        b[29] = self.min_version;
        b[30] = self.access;
        b[31..33].copy_from_slice(&self.aux_type.to_le_bytes());
        b[33..37].copy_from_slice(&self.last_mod);
        b[37..39].copy_from_slice(&self.header_ptr.to_le_bytes());
        b
    }

    fn storage_type(&self) -> Option<StorageType> {
        StorageType::from_nibble(self.stor_len_nibs >> 4)
    }
    fn is_active(&self) -> bool {
        self.stor_len_nibs != 0
    }
}

/// A directory/entry block: link bytes + up to 13 thirty-nine-byte slots
/// (the key block's slot 0 is its header, not a file entry).
struct DirBlock {
    prev: u16,
    next: u16,
    slots: Vec<RawEntry>,
}

impl DirBlock {
    fn from_bytes(b: &[u8]) -> Self {
        let prev = u16::from_le_bytes([b[0], b[1]]);
        let next = u16::from_le_bytes([b[2], b[3]]);
        let mut slots = Vec::with_capacity(ENTRIES_PER_BLOCK);
        for i in 0..ENTRIES_PER_BLOCK {
            let base = 4 + i * ENTRY_LEN;
            slots.push(RawEntry::from_bytes(&b[base..base + ENTRY_LEN]));
        }
        Self { prev, next, slots }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut b = vec![0u8; BLOCK_SIZE];
        b[0..2].copy_from_slice(&self.prev.to_le_bytes());
        b[2..4].copy_from_slice(&self.next.to_le_bytes());
        for (i, s) in self.slots.iter().enumerate() {
            let base = 4 + i * ENTRY_LEN;
            b[base..base + ENTRY_LEN].copy_from_slice(&s.to_bytes());
        }
        b
    }

    fn empty(prev: u16, next: u16, key_block: bool) -> Self {
        let n = if key_block { ENTRIES_PER_BLOCK - 1 } else { ENTRIES_PER_BLOCK };
        Self { prev, next, slots: vec![RawEntry::inactive(); n] }
    }
}

#[derive(Clone, Copy)]
struct Location {
    block: u16,
    /// Index into the block's physical 13-slot array (key blocks reserve
    /// slot 0 for the header, so file entries there start at slot 1).
    slot: usize,
}

pub struct Prodos {
    provider: ChunkProvider,
    bitmap_ptr: u16,
    total_blocks: u16,
    free_blocks_cache: u16,
    entries: Vec<FileEntry>,
    locations: HashMap<usize, Location>,
    notes: Notes,
    handles: HandleTable,
}

impl Prodos {
    pub fn new(provider: ChunkProvider, total_blocks: u16) -> Self {
        Self {
            provider,
            bitmap_ptr: 6,
            total_blocks,
            free_blocks_cache: 0,
            entries: Vec::new(),
            locations: HashMap::new(),
            notes: Notes::new(),
            handles: HandleTable::new(),
        }
    }

    fn block_count(&self) -> usize {
        self.total_blocks as usize
    }

    fn is_block_free(&mut self, block: usize) -> Result<bool> {
        let boff = block / 4096;
        let byte = (block - 4096 * boff) / 8;
        let bit = 7 - (block - 4096 * boff) % 8;
        let bmap = self.provider.read_block(self.bitmap_ptr as usize + boff)?;
        Ok(bmap[byte] & (1 << bit) != 0)
    }

    fn set_block_free(&mut self, block: usize, free: bool) -> Result<()> {
        let boff = block / 4096;
        let byte = (block - 4096 * boff) / 8;
        let bit = 7 - (block - 4096 * boff) % 8;
        let bptr = self.bitmap_ptr as usize + boff;
        let mut bmap = self.provider.read_block(bptr)?;
        let was_free = bmap[byte] & (1 << bit) != 0;
        if free {
            bmap[byte] |= 1 << bit;
        } else {
            bmap[byte] &= !(1 << bit);
        }
        self.provider.write_block(bptr, &bmap)?;
        if free && !was_free {
            self.free_blocks_cache += 1;
        } else if !free && was_free {
            self.free_blocks_cache = self.free_blocks_cache.saturating_sub(1);
        }
        Ok(())
    }

    fn allocate_any_block(&mut self) -> Result<u16> {
        for b in 0..self.block_count() {
            if self.is_block_free(b)? {
                self.set_block_free(b, false)?;
                return Ok(b as u16);
            }
        }
        Err(Error::DiskFull)
    }

    fn num_free_blocks(&mut self) -> Result<u16> {
        let mut n = 0u16;
        for b in 0..self.block_count() {
            if self.is_block_free(b)? {
                n += 1;
            }
        }
        Ok(n)
    }

    fn read_vol_header_block(&mut self) -> Result<DirBlock> {
        let buf = self.provider.read_block(VOL_KEY_BLOCK)?;
        Ok(DirBlock::from_bytes(&buf))
    }

    /// Walk a directory's entry-block chain, starting at `key_block`,
    /// invoking `f` on every active (slot, block, index) triple. Skips
    /// slot 0 on the key block, which holds the header.
    fn walk_dir<F: FnMut(&mut Self, u16, usize, &RawEntry)>(&mut self, key_block: u16, mut f: F) -> Result<()> {
        let mut block = key_block;
        let mut first = true;
        loop {
            let raw = self.provider.read_block(block as usize)?;
            let dir = DirBlock::from_bytes(&raw);
            let start = if first { 1 } else { 0 };
            for i in start..dir.slots.len() {
                let entry = dir.slots[i].clone();
                if entry.is_active() {
                    f(self, block, i, &entry);
                }
            }
            first = false;
            if dir.next == 0 {
                return Ok(());
            }
            block = dir.next;
        }
    }

    fn find_free_slot(&mut self, key_block: u16) -> Result<(u16, usize)> {
        let mut block = key_block;
        let mut first = true;
        loop {
            let raw = self.provider.read_block(block as usize)?;
            let dir = DirBlock::from_bytes(&raw);
            let start = if first { 1 } else { 0 };
            for i in start..dir.slots.len() {
                if !dir.slots[i].is_active() {
                    return Ok((block, i));
                }
            }
            if dir.next == 0 {
                let new_block = self.allocate_any_block()?;
                let raw = self.provider.read_block(block as usize)?;
                let mut current = DirBlock::from_bytes(&raw);
                current.next = new_block;
                self.provider.write_block(block as usize, &current.to_bytes())?;
                let fresh = DirBlock::empty(block, 0, false);
                self.provider.write_block(new_block as usize, &fresh.to_bytes())?;
                return Ok((new_block, 0));
            }
            block = dir.next;
            first = false;
        }
    }

    fn read_slot(&mut self, block: u16, slot: usize) -> Result<RawEntry> {
        let raw = self.provider.read_block(block as usize)?;
        let dir = DirBlock::from_bytes(&raw);
        Ok(dir.slots[slot].clone())
    }

    fn write_slot(&mut self, block: u16, slot: usize, entry: &RawEntry) -> Result<()> {
        let raw = self.provider.read_block(block as usize)?;
        let mut dir = DirBlock::from_bytes(&raw);
        dir.slots[slot] = entry.clone();
        self.provider.write_block(block as usize, &dir.to_bytes())
    }

    /// Entry's `key_ptr` for a directory entry points at the subdirectory's
    /// own key block; for the volume root it is `VOL_KEY_BLOCK`.
    fn key_block_for(&self, parent: EntryId) -> u16 {
        if parent == EntryId(0) {
            VOL_KEY_BLOCK as u16
        } else {
            self.entries.get(parent.0).map(|e| e.storage_size as u16).unwrap_or(VOL_KEY_BLOCK as u16)
        }
    }

    fn read_fork_descriptors(&mut self, ext_block: u16) -> Result<(ForkDescriptor, ForkDescriptor)> {
        let b = self.provider.read_block(ext_block as usize)?;
        Ok((ForkDescriptor::from_bytes(&b[..16]), ForkDescriptor::from_bytes(&b[FORK_DESC_RSRC_OFFSET..FORK_DESC_RSRC_OFFSET + 16])))
    }

    fn write_fork_descriptor(&mut self, ext_block: u16, fork: ForkKind, desc: &ForkDescriptor) -> Result<()> {
        let mut b = self.provider.read_block(ext_block as usize)?;
        let offset = if fork == ForkKind::Rsrc { FORK_DESC_RSRC_OFFSET } else { 0 };
        b[offset..offset + 16].copy_from_slice(&desc.to_bytes());
        self.provider.write_block(ext_block as usize, &b)
    }

    /// Ensure `entry_idx`'s catalog slot names an extended (forked) file,
    /// converting an ordinary Seedling/Sapling/Tree entry in place if
    /// necessary, and return its extended key block.
    fn ensure_extended(&mut self, entry_idx: usize) -> Result<u16> {
        let location = *self.locations.get(&entry_idx).ok_or_else(|| Error::not_found("no catalog entry"))?;
        let mut raw = self.read_slot(location.block, location.slot)?;
        let storage = raw.storage_type().ok_or_else(|| Error::damaged("unrecognized storage type"))?;
        if storage == StorageType::Extended {
            return Ok(raw.key_ptr);
        }
        if storage == StorageType::SubDirEntry || storage == StorageType::SubDirHeader || storage == StorageType::VolDirHeader {
            return Err(Error::arg("directories have no resource fork"));
        }
        let data_desc = ForkDescriptor { storage_type: storage, key_ptr: raw.key_ptr, blocks_used: raw.blocks_used, eof: raw.eof };
        let ext_block = self.allocate_any_block()?;
        self.provider.write_block(ext_block as usize, &vec![0u8; BLOCK_SIZE])?;
        self.write_fork_descriptor(ext_block, ForkKind::Data, &data_desc)?;
        self.write_fork_descriptor(ext_block, ForkKind::Rsrc, &ForkDescriptor::empty())?;
        raw.stor_len_nibs = (raw.stor_len_nibs & 0x0f) | ((StorageType::Extended as u8) << 4);
        raw.key_ptr = ext_block;
        raw.blocks_used = raw.blocks_used.saturating_add(1);
        self.write_slot(location.block, location.slot, &raw)?;
        Ok(ext_block)
    }

    fn read_data(&mut self, entry_idx: usize) -> Result<Vec<u8>> {
        let location = self.locations.get(&entry_idx).ok_or_else(|| Error::not_found("no catalog entry"))?;
        let raw = self.read_slot(location.block, location.slot)?;
        let storage = raw.storage_type().ok_or_else(|| Error::damaged("unrecognized storage type"))?;
        if storage == StorageType::Extended {
            return Err(Error::format("entry is not a plain file"));
        }
        self.read_blocks(storage, raw.key_ptr, raw.eof)
    }

    /// Read `eof` bytes out of the Seedling/Sapling/Tree chain rooted at
    /// `key_ptr`, the block-addressing scheme shared by both a plain
    /// file's data fork and either half of an extended file.
    fn read_blocks(&mut self, storage: StorageType, key_ptr: u16, eof: u32) -> Result<Vec<u8>> {
        let eof = eof as usize;
        match storage {
            StorageType::Inactive => Ok(Vec::new()),
            StorageType::Seedling => {
                if key_ptr == 0 {
                    return Ok(Vec::new());
                }
                let block = self.provider.read_block(key_ptr as usize)?;
                Ok(block[..eof.min(BLOCK_SIZE)].to_vec())
            }
            StorageType::Sapling => {
                let index = self.provider.read_block(key_ptr as usize)?;
                let mut out = Vec::with_capacity(eof);
                for i in 0..256 {
                    if out.len() >= eof {
                        break;
                    }
                    let ptr = u16::from_le_bytes([index[i], index[i + 256]]);
                    let block = if ptr == 0 { vec![0u8; BLOCK_SIZE] } else { self.provider.read_block(ptr as usize)? };
                    out.extend(block);
                }
                out.truncate(eof);
                Ok(out)
            }
            StorageType::Tree => {
                let master = self.provider.read_block(key_ptr as usize)?;
                let mut out = Vec::with_capacity(eof);
                for m in 0..128 {
                    if out.len() >= eof {
                        break;
                    }
                    let sap_ptr = u16::from_le_bytes([master[m], master[m + 256]]);
                    let index = if sap_ptr == 0 { vec![0u8; BLOCK_SIZE] } else { self.provider.read_block(sap_ptr as usize)? };
                    for i in 0..256 {
                        if out.len() >= eof {
                            break;
                        }
                        let ptr = u16::from_le_bytes([index[i], index[i + 256]]);
                        let block = if ptr == 0 { vec![0u8; BLOCK_SIZE] } else { self.provider.read_block(ptr as usize)? };
                        out.extend(block);
                    }
                }
                out.truncate(eof);
                Ok(out)
            }
            _ => Err(Error::format("entry is not a plain file")),
        }
    }

    /// Per-block allocation map (true = real data, false = hole) for the
    /// chain rooted at `key_ptr`, truncated to `ceil(eof / BLOCK_SIZE)`
    /// entries -- the shape [`FileHandle::with_sparse_map`] wants so
    /// `seek_data`/`seek_hole` can answer for real (spec.md §4.3.2).
    fn block_allocation_map(&mut self, storage: StorageType, key_ptr: u16, eof: u32) -> Result<Vec<bool>> {
        let n_blocks = (eof as usize).div_ceil(BLOCK_SIZE).max(if eof > 0 { 1 } else { 0 });
        match storage {
            StorageType::Inactive => Ok(Vec::new()),
            StorageType::Seedling => Ok(vec![key_ptr != 0; n_blocks.min(1)]),
            StorageType::Sapling => {
                let index = self.provider.read_block(key_ptr as usize)?;
                let mut out = Vec::with_capacity(n_blocks);
                for i in 0..n_blocks.min(256) {
                    let ptr = u16::from_le_bytes([index[i], index[i + 256]]);
                    out.push(ptr != 0);
                }
                Ok(out)
            }
            StorageType::Tree => {
                let master = self.provider.read_block(key_ptr as usize)?;
                let mut out = Vec::with_capacity(n_blocks);
                'outer: for m in 0..128 {
                    let sap_ptr = u16::from_le_bytes([master[m], master[m + 256]]);
                    let index = if sap_ptr == 0 { vec![0u8; BLOCK_SIZE] } else { self.provider.read_block(sap_ptr as usize)? };
                    for i in 0..256 {
                        if out.len() >= n_blocks {
                            break 'outer;
                        }
                        let ptr = u16::from_le_bytes([index[i], index[i + 256]]);
                        out.push(ptr != 0);
                    }
                }
                Ok(out)
            }
            _ => Ok(vec![true; n_blocks]),
        }
    }

    fn free_data(&mut self, raw: &RawEntry) -> Result<()> {
        if raw.storage_type() == Some(StorageType::Extended) {
            if raw.key_ptr != 0 {
                let block = self.provider.read_block(raw.key_ptr as usize)?;
                let data = ForkDescriptor::from_bytes(&block[..16]);
                let rsrc = ForkDescriptor::from_bytes(&block[FORK_DESC_RSRC_OFFSET..FORK_DESC_RSRC_OFFSET + 16]);
                self.free_blocks(data.storage_type, data.key_ptr)?;
                self.free_blocks(rsrc.storage_type, rsrc.key_ptr)?;
                self.set_block_free(raw.key_ptr as usize, true)?;
            }
            return Ok(());
        }
        self.free_blocks(raw.storage_type().unwrap_or(StorageType::Inactive), raw.key_ptr)
    }

    fn free_blocks(&mut self, storage: StorageType, key_ptr: u16) -> Result<()> {
        match storage {
            StorageType::Seedling if key_ptr != 0 => self.set_block_free(key_ptr as usize, true)?,
            StorageType::Sapling if key_ptr != 0 => {
                let index = self.provider.read_block(key_ptr as usize)?;
                for i in 0..256 {
                    let ptr = u16::from_le_bytes([index[i], index[i + 256]]);
                    if ptr != 0 {
                        self.set_block_free(ptr as usize, true)?;
                    }
                }
                self.set_block_free(key_ptr as usize, true)?;
            }
            StorageType::Tree if key_ptr != 0 => {
                let master = self.provider.read_block(key_ptr as usize)?;
                for m in 0..128 {
                    let sap_ptr = u16::from_le_bytes([master[m], master[m + 256]]);
                    if sap_ptr == 0 {
                        continue;
                    }
                    let index = self.provider.read_block(sap_ptr as usize)?;
                    for i in 0..256 {
                        let ptr = u16::from_le_bytes([index[i], index[i + 256]]);
                        if ptr != 0 {
                            self.set_block_free(ptr as usize, true)?;
                        }
                    }
                    self.set_block_free(sap_ptr as usize, true)?;
                }
                self.set_block_free(key_ptr as usize, true)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn write_data(&mut self, entry_idx: usize, data: &[u8]) -> Result<(u16, u16, StorageType)> {
        let n_blocks = data.len().div_ceil(BLOCK_SIZE);
        if n_blocks <= 1 {
            let key = if data.is_empty() { 0 } else { self.allocate_any_block()? };
            if !data.is_empty() {
                let mut block = vec![0u8; BLOCK_SIZE];
                block[..data.len()].copy_from_slice(data);
                self.provider.write_block(key as usize, &block)?;
            }
            return Ok((key, if data.is_empty() { 0 } else { 1 }, StorageType::Seedling));
        }
        if n_blocks <= 256 {
            let index_block = self.allocate_any_block()?;
            let mut index = vec![0u8; BLOCK_SIZE];
            for b in 0..n_blocks {
                let start = b * BLOCK_SIZE;
                let end = (start + BLOCK_SIZE).min(data.len());
                let mut block = vec![0u8; BLOCK_SIZE];
                block[..end - start].copy_from_slice(&data[start..end]);
                let ptr = self.allocate_any_block()?;
                self.provider.write_block(ptr as usize, &block)?;
                index[b] = ptr.to_le_bytes()[0];
                index[b + 256] = ptr.to_le_bytes()[1];
            }
            self.provider.write_block(index_block as usize, &index)?;
            return Ok((index_block, n_blocks as u16 + 1, StorageType::Sapling));
        }
        let master_block = self.allocate_any_block()?;
        let mut master = vec![0u8; BLOCK_SIZE];
        let saplings = n_blocks.div_ceil(256);
        let mut total_blocks = 1u16;
        for m in 0..saplings {
            let index_block = self.allocate_any_block()?;
            total_blocks += 1;
            let mut index = vec![0u8; BLOCK_SIZE];
            for i in 0..256 {
                let b = m * 256 + i;
                if b >= n_blocks {
                    break;
                }
                let start = b * BLOCK_SIZE;
                let end = (start + BLOCK_SIZE).min(data.len());
                let mut block = vec![0u8; BLOCK_SIZE];
                block[..end - start].copy_from_slice(&data[start..end]);
                let ptr = self.allocate_any_block()?;
                total_blocks += 1;
                self.provider.write_block(ptr as usize, &block)?;
                index[i] = ptr.to_le_bytes()[0];
                index[i + 256] = ptr.to_le_bytes()[1];
            }
            self.provider.write_block(index_block as usize, &index)?;
            master[m] = index_block.to_le_bytes()[0];
            master[m + 256] = index_block.to_le_bytes()[1];
        }
        self.provider.write_block(master_block as usize, &master)?;
        Ok((master_block, total_blocks, StorageType::Tree))
    }

    fn scan_dir(&mut self, key_block: u16, parent: EntryId) -> Result<()> {
        let collected = {
            let mut collected = Vec::new();
            self.walk_dir(key_block, |_s, block, slot, raw| {
                collected.push((block, slot, raw.clone()));
            })?;
            collected
        };
        for (block, slot, raw) in collected {
            let name = unpack_name(raw.stor_len_nibs, &raw.name);
            let id = EntryId(self.entries.len());
            let mut entry = FileEntry::new_file(id, parent, &name, FsKind::ProDos);
            entry.file_type = raw.file_type as u32;
            entry.aux_type = raw.aux_type as u32;
            entry.access_flags = raw.access as u32;
            entry.create_when = unpack_time(raw.create_time);
            entry.mod_when = unpack_time(raw.last_mod);
            self.locations.insert(id.0, Location { block, slot });
            let is_dir = raw.storage_type() == Some(StorageType::SubDirEntry);
            entry.is_directory = is_dir;
            if is_dir {
                entry.storage_size = raw.key_ptr as u64;
                self.entries.push(entry);
                self.scan_dir(raw.key_ptr, id)?;
            } else if raw.storage_type() == Some(StorageType::Extended) {
                let (data, rsrc) = self.read_fork_descriptors(raw.key_ptr)?;
                entry.has_rsrc_fork = true;
                entry.data_length = data.eof as u64;
                entry.rsrc_length = rsrc.eof as u64;
                entry.storage_size = raw.blocks_used as u64 * BLOCK_SIZE as u64;
                self.entries.push(entry);
            } else {
                entry.data_length = raw.eof as u64;
                entry.storage_size = raw.blocks_used as u64 * BLOCK_SIZE as u64;
                self.entries.push(entry);
            }
        }
        Ok(())
    }
}

impl FileSystem for Prodos {
    fn kind(&self) -> FsKind {
        FsKind::ProDos
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { has_resource_forks: false, has_disk_images: false, case_sensitive_names: false }
    }

    fn format(&mut self, volume_name: &str, _volume_num: u8, make_bootable: bool) -> Result<()> {
        let (nibs, name) = pack_name(StorageType::VolDirHeader, volume_name)?;
        let total = self.block_count() as u16;
        let bitmap_blocks = 1 + self.block_count() / 4096;
        self.bitmap_ptr = 6;

        for b in 0..self.block_count() {
            self.provider.write_block(b, &vec![0u8; BLOCK_SIZE])?;
        }

        let mut header_entry = RawEntry::inactive();
        header_entry.stor_len_nibs = nibs;
        header_entry.name = name;
        header_entry.create_time = pack_time(None);
        header_entry.access = STD_ACCESS;
        header_entry.aux_type = ENTRY_LEN as u16;
        header_entry.blocks_used = ENTRIES_PER_BLOCK as u16;
        header_entry.eof = total as u32;
        header_entry.header_ptr = self.bitmap_ptr;

        let mut key_block = DirBlock::empty(0, VOL_KEY_BLOCK as u16 + 1, true);
        key_block.slots[0] = header_entry;
        self.provider.write_block(VOL_KEY_BLOCK, &key_block.to_bytes())?;

        for b in VOL_KEY_BLOCK + 1..VOL_KEY_BLOCK + 4 {
            let next = if b == VOL_KEY_BLOCK + 3 { 0 } else { (b + 1) as u16 };
            let block = DirBlock::empty(b as u16 - 1, next, false);
            self.provider.write_block(b, &block.to_bytes())?;
        }

        for b in 0..self.block_count() {
            self.set_block_free(b, true)?;
        }
        self.set_block_free(VOL_KEY_BLOCK, false)?;
        for b in VOL_KEY_BLOCK + 1..VOL_KEY_BLOCK + 4 {
            self.set_block_free(b, false)?;
        }
        for b in self.bitmap_ptr as usize..self.bitmap_ptr as usize + bitmap_blocks {
            self.set_block_free(b, false)?;
        }
        if make_bootable {
            self.set_block_free(0, false)?;
            self.set_block_free(1, false)?;
        }
        self.free_blocks_cache = self.num_free_blocks()?;

        self.entries.clear();
        self.locations.clear();
        self.notes = Notes::new();
        self.notes.info("volume formatted");
        self.total_blocks = total;
        Ok(())
    }

    fn prepare_raw_access(&mut self) -> Result<()> {
        if !self.handles.is_empty() {
            return Err(Error::txn_state("cannot drop to raw access while a file handle is open"));
        }
        Ok(())
    }

    fn prepare_file_access(&mut self, _deep_scan: bool) -> Result<()> {
        let header_block = self.read_vol_header_block()?;
        let header = &header_block.slots[0];
        if header.storage_type() != Some(StorageType::VolDirHeader) {
            return Err(Error::format("block 2 is not a ProDOS volume directory"));
        }
        self.bitmap_ptr = header.header_ptr;
        self.total_blocks = header.eof as u16;
        self.free_blocks_cache = self.num_free_blocks()?;

        self.entries.clear();
        self.locations.clear();
        let id = EntryId(0);
        let mut root = FileEntry::new_file(id, id, &unpack_name(header.stor_len_nibs, &header.name), FsKind::ProDos);
        root.is_directory = true;
        root.containing_dir = None;
        self.entries.push(root);
        self.scan_dir(VOL_KEY_BLOCK as u16, id)?;
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
        if self.find_file_entry(parent, name).is_ok() {
            return Err(Error::arg(format!("duplicate filename {name}")));
        }
        let key_block = self.key_block_for(parent);
        let (block, slot) = self.find_free_slot(key_block)?;

        let id = EntryId(self.entries.len());
        let mut entry = FileEntry::new_file(id, parent, name, FsKind::ProDos);

        if mode == CreateMode::Directory {
            let (nibs, raw_name) = pack_name(StorageType::SubDirEntry, name)?;
            let sub_key = self.allocate_any_block()?;
            let sub_block = DirBlock::empty(0, 0, true);
            self.provider.write_block(sub_key as usize, &sub_block.to_bytes())?;

            let mut sub_header = RawEntry::inactive();
            sub_header.stor_len_nibs = (StorageType::SubDirHeader as u8) << 4 | (name.len() as u8);
            sub_header.name = pack_name(StorageType::SubDirHeader, name)?.1;
            sub_header.access = STD_ACCESS;
            sub_header.aux_type = ENTRY_LEN as u16;
            sub_header.blocks_used = ENTRIES_PER_BLOCK as u16;
            sub_header.header_ptr = block;
            sub_header.create_time = pack_time(None);
            let mut sub_dir = DirBlock::from_bytes(&self.provider.read_block(sub_key as usize)?);
            sub_dir.slots[0] = sub_header;
            self.provider.write_block(sub_key as usize, &sub_dir.to_bytes())?;

            let raw = RawEntry {
                stor_len_nibs: nibs,
                name: raw_name,
                file_type: FILE_TYPE_DIRECTORY,
                key_ptr: sub_key,
                blocks_used: 1,
                eof: 0,
                create_time: pack_time(None),
                version: 0,
                min_version: 0,
                access: STD_ACCESS,
                aux_type: 0,
                last_mod: pack_time(None),
                header_ptr: 0,
            };
            self.write_slot(block, slot, &raw)?;
            entry.is_directory = true;
            entry.storage_size = sub_key as u64;
        } else if mode == CreateMode::Extended {
            let (nibs, raw_name) = pack_name(StorageType::Extended, name)?;
            let ext_block = self.allocate_any_block()?;
            self.provider.write_block(ext_block as usize, &vec![0u8; BLOCK_SIZE])?;
            self.write_fork_descriptor(ext_block, ForkKind::Data, &ForkDescriptor::empty())?;
            self.write_fork_descriptor(ext_block, ForkKind::Rsrc, &ForkDescriptor::empty())?;
            let raw = RawEntry {
                stor_len_nibs: nibs,
                name: raw_name,
                file_type: FILE_TYPE_BINARY,
                key_ptr: ext_block,
                blocks_used: 1,
                eof: 0,
                create_time: pack_time(None),
                version: 0,
                min_version: 0,
                access: STD_ACCESS,
                aux_type: 0,
                last_mod: pack_time(None),
                header_ptr: 0,
            };
            self.write_slot(block, slot, &raw)?;
            entry.file_type = FILE_TYPE_BINARY as u32;
            entry.has_rsrc_fork = true;
        } else {
            let (nibs, raw_name) = pack_name(StorageType::Seedling, name)?;
            let raw = RawEntry {
                stor_len_nibs: nibs,
                name: raw_name,
                file_type: FILE_TYPE_BINARY,
                key_ptr: 0,
                blocks_used: 0,
                eof: 0,
                create_time: pack_time(None),
                version: 0,
                min_version: 0,
                access: STD_ACCESS,
                aux_type: 0,
                last_mod: pack_time(None),
                header_ptr: 0,
            };
            self.write_slot(block, slot, &raw)?;
            entry.file_type = FILE_TYPE_BINARY as u32;
        }
        self.locations.insert(id.0, Location { block, slot });
        self.entries.push(entry);
        Ok(id)
    }

    fn delete_file(&mut self, entry: EntryId) -> Result<()> {
        let location = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no catalog entry"))?;
        let (block, slot) = (location.block, location.slot);
        let raw = self.read_slot(block, slot)?;
        if raw.access & 0x80 == 0 {
            return Err(Error::arg("file lacks destroy permission"));
        }
        if raw.storage_type() == Some(StorageType::SubDirEntry) {
            let has_children = self.entries.iter().any(|e| e.containing_dir == Some(entry));
            if has_children {
                return Err(Error::arg("directory is not empty"));
            }
            self.set_block_free(raw.key_ptr as usize, true)?;
        } else {
            self.free_data(&raw)?;
        }
        self.write_slot(block, slot, &RawEntry::inactive())?;
        self.locations.remove(&entry.0);
        Ok(())
    }

    fn move_file(&mut self, entry: EntryId, new_parent: EntryId, new_name: &str) -> Result<()> {
        if new_parent != self.entries.get(entry.0).and_then(|e| e.containing_dir).unwrap_or(EntryId(0)) {
            return Err(Error::arg("cross-directory moves are not supported"));
        }
        let location = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no catalog entry"))?;
        let (block, slot) = (location.block, location.slot);
        let mut raw = self.read_slot(block, slot)?;
        if raw.access & 0x40 == 0 {
            return Err(Error::arg("file lacks rename permission"));
        }
        let storage = raw.storage_type().ok_or_else(|| Error::damaged("unrecognized storage type"))?;
        let (nibs, name) = pack_name(storage, new_name)?;
        raw.stor_len_nibs = nibs;
        raw.name = name;
        self.write_slot(block, slot, &raw)?;
        if let Some(e) = self.entries.get_mut(entry.0) {
            e.filename = new_name.to_string();
        }
        Ok(())
    }

    fn find_file_entry(&self, parent: EntryId, name: &str) -> Result<EntryId> {
        self.entries
            .iter()
            .find(|e| e.containing_dir == Some(parent) && super::names_match(&e.filename, name))
            .map(|e| e.id)
            .ok_or_else(|| Error::not_found(format!("no file named {name}")))
    }

    fn open_file(&mut self, entry: EntryId, access: AccessMode, part: ForkKind) -> Result<FileHandle> {
        if part != ForkKind::Data && part != ForkKind::Rsrc {
            return Err(Error::arg("ProDOS forks are Data or Rsrc only"));
        }
        let location = *self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no catalog entry"))?;
        let raw = self.read_slot(location.block, location.slot)?;
        if access == AccessMode::ReadWrite && raw.access & 0x02 == 0 {
            return Err(Error::arg("file lacks write permission"));
        }
        let storage = raw.storage_type().ok_or_else(|| Error::damaged("unrecognized storage type"))?;

        self.handles.acquire(entry, part, access)?;
        match self.open_fork(&raw, storage, part) {
            Ok((fork_storage, key_ptr, eof)) => match self.read_blocks(fork_storage, key_ptr, eof) {
                Ok(bytes) => match self.block_allocation_map(fork_storage, key_ptr, eof) {
                    Ok(allocation) => Ok(FileHandle::with_sparse_map(entry, part, access, bytes, BLOCK_SIZE as u64, allocation)),
                    Err(e) => {
                        self.handles.release(entry, part, access);
                        Err(e)
                    }
                },
                Err(e) => {
                    self.handles.release(entry, part, access);
                    Err(e)
                }
            },
            Err(e) => {
                self.handles.release(entry, part, access);
                Err(e)
            }
        }
    }

    /// Resolve which storage chain backs `part` of a directory entry: the
    /// entry's own chain for a plain file, or one half of an extended
    /// file's fork descriptors.
    fn open_fork(&mut self, raw: &RawEntry, storage: StorageType, part: ForkKind) -> Result<(StorageType, u16, u32)> {
        if storage != StorageType::Extended {
            if part == ForkKind::Rsrc {
                return Err(Error::arg("file has no resource fork"));
            }
            return Ok((storage, raw.key_ptr, raw.eof));
        }
        let (data, rsrc) = self.read_fork_descriptors(raw.key_ptr)?;
        let d = if part == ForkKind::Rsrc { rsrc } else { data };
        Ok((d.storage_type, d.key_ptr, d.eof))
    }

    fn close_file(&mut self, mut handle: FileHandle) -> Result<()> {
        if handle.is_dirty() {
            let location = *self.locations.get(&handle.entry.0).ok_or_else(|| Error::not_found("no catalog entry"))?;
            let mut raw = self.read_slot(location.block, location.slot)?;
            let storage = raw.storage_type().ok_or_else(|| Error::damaged("unrecognized storage type"))?;
            let buf = std::mem::take(&mut handle.buf);

            if storage == StorageType::Extended {
                let (data_desc, rsrc_desc) = self.read_fork_descriptors(raw.key_ptr)?;
                let (old_desc, other_desc) = if handle.fork == ForkKind::Rsrc { (rsrc_desc, data_desc) } else { (data_desc, rsrc_desc) };
                self.free_blocks(old_desc.storage_type, old_desc.key_ptr)?;
                let (key_ptr, blocks_used, new_storage) = self.write_data(handle.entry.0, &buf)?;
                let new_desc = ForkDescriptor { storage_type: new_storage, key_ptr, blocks_used, eof: buf.len() as u32 };
                self.write_fork_descriptor(raw.key_ptr, handle.fork, &new_desc)?;
                raw.blocks_used = 1 + new_desc.blocks_used + other_desc.blocks_used;
                raw.last_mod = pack_time(None);
                self.write_slot(location.block, location.slot, &raw)?;
                if let Some(e) = self.entries.get_mut(handle.entry.0) {
                    if handle.fork == ForkKind::Rsrc {
                        e.rsrc_length = buf.len() as u64;
                    } else {
                        e.data_length = buf.len() as u64;
                    }
                    e.storage_size = raw.blocks_used as u64 * BLOCK_SIZE as u64;
                }
            } else {
                self.free_data(&raw)?;
                let (key_ptr, blocks_used, new_storage) = self.write_data(handle.entry.0, &buf)?;
                raw.key_ptr = key_ptr;
                raw.blocks_used = blocks_used;
                raw.eof = buf.len() as u32;
                raw.stor_len_nibs = (raw.stor_len_nibs & 0x0f) | ((new_storage as u8) << 4);
                raw.last_mod = pack_time(None);
                self.write_slot(location.block, location.slot, &raw)?;
                if let Some(e) = self.entries.get_mut(handle.entry.0) {
                    e.data_length = buf.len() as u64;
                    e.storage_size = blocks_used as u64 * BLOCK_SIZE as u64;
                }
            }
        }
        self.handles.release(handle.entry, handle.fork, handle.mode);
        handle.mark_closed();
        Ok(())
    }

    fn add_rsrc_fork(&mut self, entry: EntryId) -> Result<()> {
        self.ensure_extended(entry.0)?;
        if let Some(e) = self.entries.get_mut(entry.0) {
            e.has_rsrc_fork = true;
        }
        Ok(())
    }

    fn free_space(&self) -> u64 {
        self.free_blocks_cache as u64 * BLOCK_SIZE as u64
    }

    fn notes(&self) -> &Notes {
        &self.notes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Order;

    fn blank_prodos(blocks: u16) -> Prodos {
        let provider = ChunkProvider::new_ordered(vec![0u8; blocks as usize * BLOCK_SIZE], Order::ProdosBlock, true);
        let mut fs = Prodos::new(provider, blocks);
        fs.format("MY.DISK", blocks, false).unwrap();
        fs
    }

    #[test]
    fn format_then_scan_yields_empty_volume() {
        let mut fs = blank_prodos(280);
        fs.prepare_file_access(false).unwrap();
        assert_eq!(fs.entries.len(), 1);
        assert!(fs.entries[0].is_directory);
    }

    #[test]
    fn create_write_read_round_trip_seedling() {
        let mut fs = blank_prodos(280);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "HELLO.TXT", CreateMode::File).unwrap();
        let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        handle.write(b"hi there").unwrap();
        fs.close_file(handle).unwrap();

        let found = fs.find_file_entry(fs.get_vol_dir(), "hello.txt").unwrap();
        let mut handle = fs.open_file(found, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        let mut buf = vec![0u8; 8];
        handle.read(&mut buf);
        assert_eq!(&buf, b"hi there");
    }

    #[test]
    fn sapling_file_spans_multiple_blocks() {
        let mut fs = blank_prodos(280);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "BIG", CreateMode::File).unwrap();
        let payload = vec![0x5au8; 3000];
        let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        handle.write(&payload).unwrap();
        fs.close_file(handle).unwrap();

        let mut handle = fs.open_file(id, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        let mut buf = vec![0u8; 3000];
        handle.read(&mut buf);
        assert_eq!(buf, payload);
    }

    #[test]
    fn subdirectory_create_and_nest_file() {
        let mut fs = blank_prodos(280);
        fs.prepare_file_access(false).unwrap();
        let dir = fs.create_file(fs.get_vol_dir(), "SUB", CreateMode::Directory).unwrap();
        assert!(fs.entry(dir).unwrap().is_directory);
        let file = fs.create_file(dir, "INNER", CreateMode::File).unwrap();
        assert_eq!(fs.entry(file).unwrap().containing_dir, Some(dir));
        assert!(fs.delete_file(dir).is_err());
        fs.delete_file(file).unwrap();
        fs.delete_file(dir).unwrap();
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut fs = blank_prodos(280);
        fs.prepare_file_access(false).unwrap();
        assert!(fs.create_file(fs.get_vol_dir(), "1BAD", CreateMode::File).is_err());
        assert!(fs.create_file(fs.get_vol_dir(), "", CreateMode::File).is_err());
    }

    /// Punches a real hole into the middle of a 3-block sapling file by
    /// zeroing its index-block pointer directly, the same shape the
    /// sparse fixture in spec.md §8 describes, then checks `seek_hole`/
    /// `seek_data` answer from the real allocation map rather than
    /// guessing from EOF.
    #[test]
    fn seek_hole_and_seek_data_find_a_punched_hole() {
        let mut fs = blank_prodos(280);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "SPARSE", CreateMode::File).unwrap();
        let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        handle.write(&vec![0x11u8; 3 * BLOCK_SIZE]).unwrap();
        fs.close_file(handle).unwrap();

        let location = *fs.locations.get(&id.0).unwrap();
        let raw = fs.read_slot(location.block, location.slot).unwrap();
        assert_eq!(raw.storage_type(), Some(StorageType::Sapling));
        let mut index = fs.provider.read_block(raw.key_ptr as usize).unwrap();
        let hole_ptr = u16::from_le_bytes([index[1], index[1 + 256]]);
        fs.set_block_free(hole_ptr as usize, true).unwrap();
        index[1] = 0;
        index[1 + 256] = 0;
        fs.provider.write_block(raw.key_ptr as usize, &index).unwrap();

        let handle = fs.open_file(id, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        assert_eq!(handle.seek_hole(0), BLOCK_SIZE as u64);
        assert_eq!(handle.seek_data(BLOCK_SIZE as u64), 2 * BLOCK_SIZE as u64);
        fs.close_file(handle).unwrap();
    }

    #[test]
    fn extended_file_keeps_independent_data_and_resource_forks() {
        let mut fs = blank_prodos(280);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "FORKED", CreateMode::Extended).unwrap();
        assert!(fs.entry(id).unwrap().has_rsrc_fork);

        let mut data = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        data.write(b"data fork bytes").unwrap();
        fs.close_file(data).unwrap();

        let mut rsrc = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Rsrc).unwrap();
        rsrc.write(b"rsrc").unwrap();
        fs.close_file(rsrc).unwrap();

        let mut data = fs.open_file(id, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        let mut buf = vec![0u8; 15];
        data.read(&mut buf);
        fs.close_file(data).unwrap();
        assert_eq!(&buf, b"data fork bytes");

        let mut rsrc = fs.open_file(id, AccessMode::ReadOnly, ForkKind::Rsrc).unwrap();
        let mut buf = vec![0u8; 4];
        rsrc.read(&mut buf);
        fs.close_file(rsrc).unwrap();
        assert_eq!(&buf, b"rsrc");

        assert_eq!(fs.entry(id).unwrap().data_length, 15);
        assert_eq!(fs.entry(id).unwrap().rsrc_length, 4);
    }

    #[test]
    fn add_rsrc_fork_upgrades_a_plain_file_in_place() {
        let mut fs = blank_prodos(280);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "PLAIN", CreateMode::File).unwrap();
        let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        handle.write(b"already here").unwrap();
        fs.close_file(handle).unwrap();

        fs.add_rsrc_fork(id).unwrap();
        assert!(fs.entry(id).unwrap().has_rsrc_fork);

        let mut handle = fs.open_file(id, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        let mut buf = vec![0u8; 12];
        handle.read(&mut buf);
        fs.close_file(handle).unwrap();
        assert_eq!(&buf, b"already here");
    }

    #[test]
    fn prepare_raw_access_is_refused_while_a_handle_is_open() {
        let mut fs = blank_prodos(280);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "HELD", CreateMode::File).unwrap();
        let handle = fs.open_file(id, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        assert!(fs.prepare_raw_access().is_err());
        fs.close_file(handle).unwrap();
        assert!(fs.prepare_raw_access().is_ok());
    }

    #[test]
    fn a_second_read_write_open_on_the_same_fork_is_rejected() {
        let mut fs = blank_prodos(280);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "LOCKED", CreateMode::File).unwrap();
        let _writer = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        assert!(fs.open_file(id, AccessMode::ReadOnly, ForkKind::Data).is_err());
        assert!(fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).is_err());
    }

    #[test]
    fn read_only_opens_on_the_same_fork_stack() {
        let mut fs = blank_prodos(280);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "SHARED", CreateMode::File).unwrap();
        let a = fs.open_file(id, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        let b = fs.open_file(id, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        fs.close_file(a).unwrap();
        fs.close_file(b).unwrap();
    }
}
