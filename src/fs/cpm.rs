//! CP/M filesystem engine.
//!
//! There is no free-space bitmap and no block index separate from the
//! directory: the directory is a flat, unordered sequence of 32-byte
//! "extents", and a file's blocks are simply the block-pointer list
//! carried in each of its extents, chained by an ascending extent index
//! when a file outgrows one extent's capacity. Everything the BDOS knew
//! about allocation it rebuilt from this scan at mount time, and so do
//! we: [`Cpm::prepare_file_access`] walks every extent once to both
//! group files and reconstruct which blocks are in use.

use std::collections::HashMap;

use crate::chunk::ChunkProvider;
use crate::error::{Error, Result};
use crate::notes::Notes;

use super::{
    AccessMode, Capabilities, CreateMode, EntryId, FileEntry, FileHandle, FileSystem, ForkKind, FsKind, HandleTable,
};

/// One CP/M allocation block, built from four 512-byte chunk-provider
/// blocks; real CP/M floppies used 1-2 KB blocks depending on capacity.
const BLOCK_SIZE: usize = 2048;
const SUBBLOCKS_PER_BLOCK: usize = BLOCK_SIZE / 512;
const DIR_ENTRY_SIZE: usize = 32;
const RECORD_SIZE: usize = 128;
const LOGICAL_EXTENT_SIZE: usize = 16384;
const BLOCKS_PER_EXTENT: usize = LOGICAL_EXTENT_SIZE / BLOCK_SIZE;
const DELETED: u8 = 0xe5;
const USER_END: u8 = 0x10;
const INVALID_CHARS: &str = " <>.,;:=?*[]";
const DIR_BLOCKS: usize = 2;

fn pack_name(s: &str) -> Result<([u8; 8], [u8; 3])> {
    let (stem, ext) = match s.split_once('.') {
        Some((a, b)) => (a, b),
        None => (s, ""),
    };
    if stem.is_empty() || stem.len() > 8 || ext.len() > 3 {
        return Err(Error::arg(format!("invalid CP/M filename {s}")));
    }
    for c in s.chars() {
        if !c.is_ascii() || INVALID_CHARS.contains(c) {
            return Err(Error::arg(format!("invalid character in CP/M filename {s}")));
        }
    }
    let mut name = [b' '; 8];
    name[..stem.len()].copy_from_slice(stem.to_uppercase().as_bytes());
    let mut typ = [b' '; 3];
    typ[..ext.len()].copy_from_slice(ext.to_uppercase().as_bytes());
    Ok((name, typ))
}

fn unpack_name(name: &[u8; 8], typ: &[u8; 3]) -> String {
    let stem: String = name.iter().map(|b| (b & 0x7f) as char).collect::<String>().trim_end().to_string();
    let ext: String = typ.iter().map(|b| (b & 0x7f) as char).collect::<String>().trim_end().to_string();
    if ext.is_empty() {
        stem
    } else {
        format!("{stem}.{ext}")
    }
}

#[derive(Clone)]
struct Extent {
    user: u8,
    name: [u8; 8],
    typ: [u8; 3],
    idx_low: u8,
    last_bytes: u8,
    idx_high: u8,
    last_records: u8,
    block_list: [u8; 16],
}

impl Extent {
    fn unused() -> Self {
        Self { user: DELETED, name: [0; 8], typ: [0; 3], idx_low: 0, last_bytes: 0, idx_high: 0, last_records: 0, block_list: [0; 16] }
    }

    fn from_bytes(b: &[u8]) -> Self {
        Self {
            user: b[0],
            name: b[1..9].try_into().unwrap(),
            typ: b[9..12].try_into().unwrap(),
            idx_low: b[12],
            last_bytes: b[13],
            idx_high: b[14],
            last_records: b[15],
            block_list: b[16..32].try_into().unwrap(),
        }
    }

    fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut b = [0u8; DIR_ENTRY_SIZE];
        b[0] = self.user;
        b[1..9].copy_from_slice(&self.name);
        b[9..12].copy_from_slice(&self.typ);
        b[12] = self.idx_low;
        b[13] = self.last_bytes;
        b[14] = self.idx_high;
        b[15] = self.last_records;
        b[16..32].copy_from_slice(&self.block_list);
        b
    }

    fn is_file(&self) -> bool {
        self.user < USER_END
    }

    fn data_ptr(&self) -> usize {
        self.idx_low as usize + ((self.idx_high as usize) << 5)
    }

    fn set_data_ptr(&mut self, idx: usize) {
        self.idx_low = (idx & 0b11111) as u8;
        self.idx_high = ((idx & 0b11111100000) >> 5) as u8;
    }

    fn eof_within(&self) -> usize {
        let bytes = if self.last_bytes == 0 { RECORD_SIZE } else { self.last_bytes as usize };
        let records = if self.last_records == 0 { 0 } else { self.last_records as usize };
        records.saturating_sub(1) * RECORD_SIZE + bytes
    }

    fn set_eof_within(&mut self, bytes_in_extent: usize) {
        let mut records = bytes_in_extent / RECORD_SIZE;
        self.last_bytes = (bytes_in_extent % RECORD_SIZE) as u8;
        if self.last_bytes > 0 {
            records += 1;
        }
        self.last_records = records as u8;
    }

    fn blocks(&self) -> Vec<u8> {
        self.block_list[..BLOCKS_PER_EXTENT].iter().copied().filter(|b| *b != 0).collect()
    }

    /// The raw per-chunk block references in extent order, `0` meaning a
    /// hole rather than "no more blocks" -- unlike [`Self::blocks`], which
    /// drops holes and is only right for freeing/counting allocated space.
    fn block_slots(&self) -> [u8; BLOCKS_PER_EXTENT] {
        self.block_list[..BLOCKS_PER_EXTENT].try_into().unwrap()
    }
}

#[derive(Clone)]
struct Location {
    dir_index: usize,
}

pub struct Cpm {
    provider: ChunkProvider,
    total_blocks: u16,
    entries: Vec<FileEntry>,
    locations: HashMap<usize, Vec<Location>>,
    used_blocks: Vec<bool>,
    notes: Notes,
    handles: HandleTable,
}

impl Cpm {
    pub fn new(provider: ChunkProvider, total_blocks: u16) -> Self {
        Self {
            provider,
            total_blocks,
            entries: Vec::new(),
            locations: HashMap::new(),
            used_blocks: vec![false; total_blocks as usize],
            notes: Notes::new(),
            handles: HandleTable::new(),
        }
    }

    /// Spec.md's §4.3.5 acceptance gate: a genuine CP/M directory block is
    /// either `0xE5`-filled (untouched) or a sequence of extents whose
    /// user byte and 8+3 name bytes are plausible ASCII. All-zero or
    /// otherwise random bytes fail this and the volume is refused rather
    /// than scanned as if it were an empty disk.
    fn validate_directory_signature(&mut self) -> Result<()> {
        let n = self.num_dir_entries();
        for i in 0..n {
            let ext = self.read_dir_entry(i)?;
            if ext.user == DELETED {
                continue;
            }
            if ext.user >= USER_END {
                return Err(Error::format("CP/M directory entry has an invalid user number"));
            }
            for &b in ext.name.iter().chain(ext.typ.iter()) {
                let c = b & 0x7f;
                if !(0x20..=0x7e).contains(&c) {
                    return Err(Error::format("directory does not look like a CP/M volume"));
                }
            }
        }
        Ok(())
    }

    fn num_dir_entries(&self) -> usize {
        DIR_BLOCKS * BLOCK_SIZE / DIR_ENTRY_SIZE
    }

    fn read_cpm_block(&mut self, block: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(BLOCK_SIZE);
        for i in 0..SUBBLOCKS_PER_BLOCK {
            out.extend(self.provider.read_block(block * SUBBLOCKS_PER_BLOCK + i)?);
        }
        Ok(out)
    }

    fn write_cpm_block(&mut self, block: usize, data: &[u8]) -> Result<()> {
        for i in 0..SUBBLOCKS_PER_BLOCK {
            let start = i * 512;
            self.provider.write_block(block * SUBBLOCKS_PER_BLOCK + i, &data[start..start + 512])?;
        }
        Ok(())
    }

    fn read_dir_entry(&mut self, idx: usize) -> Result<Extent> {
        let block = idx * DIR_ENTRY_SIZE / BLOCK_SIZE;
        let off = idx * DIR_ENTRY_SIZE % BLOCK_SIZE;
        let buf = self.read_cpm_block(block)?;
        Ok(Extent::from_bytes(&buf[off..off + DIR_ENTRY_SIZE]))
    }

    fn write_dir_entry(&mut self, idx: usize, ext: &Extent) -> Result<()> {
        let block = idx * DIR_ENTRY_SIZE / BLOCK_SIZE;
        let off = idx * DIR_ENTRY_SIZE % BLOCK_SIZE;
        let mut buf = self.read_cpm_block(block)?;
        buf[off..off + DIR_ENTRY_SIZE].copy_from_slice(&ext.to_bytes());
        self.write_cpm_block(block, &buf)
    }

    fn allocate_block(&mut self) -> Result<u8> {
        for (i, used) in self.used_blocks.iter_mut().enumerate().skip(DIR_BLOCKS) {
            if !*used {
                *used = true;
                return Ok(i as u8);
            }
        }
        Err(Error::DiskFull)
    }

    fn free_block(&mut self, b: u8) {
        if (b as usize) < self.used_blocks.len() {
            self.used_blocks[b as usize] = false;
        }
    }

    fn rebuild(&mut self) -> Result<()> {
        self.entries.clear();
        self.locations.clear();
        self.used_blocks = vec![false; self.total_blocks as usize];
        for b in 0..DIR_BLOCKS {
            self.used_blocks[b] = true;
        }
        let vol_id = EntryId(0);
        let mut vol = FileEntry::new_file(vol_id, vol_id, "", FsKind::CpM);
        vol.is_directory = true;
        vol.containing_dir = None;
        self.entries.push(vol);

        let n = self.num_dir_entries();
        let mut groups: HashMap<(u8, [u8; 8], [u8; 3]), Vec<(usize, Extent)>> = HashMap::new();
        for i in 0..n {
            let ext = self.read_dir_entry(i)?;
            if !ext.is_file() {
                continue;
            }
            for b in ext.blocks() {
                if (b as usize) < self.used_blocks.len() {
                    self.used_blocks[b as usize] = true;
                }
            }
            groups.entry((ext.user, ext.name, ext.typ)).or_default().push((i, ext));
        }
        for ((_user, name, typ), mut exts) in groups {
            exts.sort_by_key(|(_, e)| e.data_ptr());
            let filename = unpack_name(&name, &typ);
            let total_blocks: usize = exts.iter().map(|(_, e)| e.blocks().len()).sum();
            let last = exts.last().unwrap().1.clone();
            let whole_extents_bytes = exts.len().saturating_sub(1) * BLOCKS_PER_EXTENT * BLOCK_SIZE;
            let eof = whole_extents_bytes + last.eof_within();
            let fid = EntryId(self.entries.len());
            let mut fe = FileEntry::new_file(fid, vol_id, &filename, FsKind::CpM);
            fe.data_length = eof as u64;
            fe.storage_size = total_blocks as u64 * BLOCK_SIZE as u64;
            self.entries.push(fe);
            self.locations.insert(fid.0, exts.into_iter().map(|(i, _)| Location { dir_index: i }).collect());
        }
        Ok(())
    }

    fn find_free_dir_slot(&mut self) -> Result<usize> {
        let n = self.num_dir_entries();
        for i in 0..n {
            if !self.read_dir_entry(i)?.is_file() {
                return Ok(i);
            }
        }
        Err(Error::format("CP/M directory is full"))
    }

    /// Reads a file's bytes plus its per-block allocation map: `map[i]`
    /// true means the `i`th [`BLOCK_SIZE`] chunk is a real allocation
    /// block, false means a hole (spec.md §4.3.5 "holes are whole missing
    /// extents and whole zero allocation blocks within an extent").
    fn read_data_with_map(&mut self, entry: EntryId) -> Result<(Vec<u8>, Vec<bool>)> {
        let fe = self.entries.get(entry.0).ok_or_else(|| Error::not_found("no such file"))?;
        let len = fe.data_length as usize;
        let locs = self.locations.get(&entry.0).cloned().ok_or_else(|| Error::not_found("no such file"))?;
        let mut out = Vec::new();
        let mut map = Vec::new();
        for loc in &locs {
            let ext = self.read_dir_entry(loc.dir_index)?;
            for slot in ext.block_slots() {
                if slot == 0 {
                    out.extend(std::iter::repeat(0u8).take(BLOCK_SIZE));
                    map.push(false);
                } else {
                    out.extend(self.read_cpm_block(slot as usize)?);
                    map.push(true);
                }
            }
        }
        out.truncate(len);
        let n_blocks = len.div_ceil(BLOCK_SIZE);
        map.truncate(n_blocks);
        Ok((out, map))
    }

    fn free_data(&mut self, entry: EntryId) -> Result<()> {
        let locs = self.locations.remove(&entry.0).ok_or_else(|| Error::not_found("no such file"))?;
        for loc in locs {
            let mut ext = self.read_dir_entry(loc.dir_index)?;
            for b in ext.blocks() {
                self.free_block(b);
            }
            ext = Extent::unused();
            self.write_dir_entry(loc.dir_index, &ext)?;
        }
        Ok(())
    }

    fn write_data(&mut self, user: u8, name: [u8; 8], typ: [u8; 3], data: &[u8]) -> Result<Vec<Location>> {
        let mut locs = Vec::new();
        let mut idx = 0usize;
        let mut offset = 0usize;
        while offset < data.len() || idx == 0 {
            let chunk_len = (data.len() - offset).min(BLOCKS_PER_EXTENT * BLOCK_SIZE);
            let chunk = &data[offset..offset + chunk_len];
            let slot = self.find_free_dir_slot()?;
            let mut ext = Extent::unused();
            ext.user = user;
            ext.name = name;
            ext.typ = typ;
            ext.set_data_ptr(idx);
            ext.set_eof_within(chunk_len);
            let mut written = 0usize;
            while written < chunk_len {
                let slot_idx = written / BLOCK_SIZE;
                let n = (chunk_len - written).min(BLOCK_SIZE);
                let mut block_buf = vec![0u8; BLOCK_SIZE];
                block_buf[..n].copy_from_slice(&chunk[written..written + n]);
                if block_buf.iter().any(|&b| b != 0) {
                    let b = self.allocate_block()?;
                    ext.block_list[slot_idx] = b;
                    self.write_cpm_block(b as usize, &block_buf)?;
                }
                written += BLOCK_SIZE;
            }
            self.write_dir_entry(slot, &ext)?;
            locs.push(Location { dir_index: slot });
            offset += chunk_len;
            idx += 1;
            if chunk_len == 0 {
                break;
            }
        }
        Ok(locs)
    }
}

impl FileSystem for Cpm {
    fn kind(&self) -> FsKind {
        FsKind::CpM
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { has_resource_forks: false, has_disk_images: false, case_sensitive_names: false }
    }

    fn format(&mut self, _volume_name: &str, _volume_num: u8, _make_bootable: bool) -> Result<()> {
        for b in 0..self.total_blocks as usize {
            self.write_cpm_block(b, &vec![0xe5u8; BLOCK_SIZE])?;
        }
        self.notes = Notes::new();
        self.notes.info("volume formatted");
        self.rebuild()
    }

    fn prepare_raw_access(&mut self) -> Result<()> {
        if !self.handles.is_empty() {
            return Err(Error::txn_state("cannot drop to raw access while a file handle is open"));
        }
        Ok(())
    }

    fn prepare_file_access(&mut self, _deep_scan: bool) -> Result<()> {
        self.validate_directory_signature()?;
        self.rebuild()
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
            return Err(Error::arg("CP/M has no subdirectories"));
        }
        if self.find_file_entry(parent, name).is_ok() {
            return Err(Error::arg(format!("duplicate filename {name}")));
        }
        let (raw_name, typ) = pack_name(name)?;
        let slot = self.find_free_dir_slot()?;
        let mut ext = Extent::unused();
        ext.user = 0;
        ext.name = raw_name;
        ext.typ = typ;
        self.write_dir_entry(slot, &ext)?;
        self.rebuild()?;
        self.find_file_entry(parent, name)
    }

    fn delete_file(&mut self, entry: EntryId) -> Result<()> {
        self.free_data(entry)?;
        self.rebuild()
    }

    fn move_file(&mut self, entry: EntryId, new_parent: EntryId, new_name: &str) -> Result<()> {
        if new_parent != EntryId(0) {
            return Err(Error::arg("CP/M has no subdirectories"));
        }
        let (raw_name, typ) = pack_name(new_name)?;
        let locs = self.locations.get(&entry.0).cloned().ok_or_else(|| Error::not_found("no such file"))?;
        for loc in locs.iter().map(|l| l.dir_index) {
            let mut ext = self.read_dir_entry(loc)?;
            ext.name = raw_name;
            ext.typ = typ;
            self.write_dir_entry(loc, &ext)?;
        }
        self.rebuild()
    }

    fn find_file_entry(&self, parent: EntryId, name: &str) -> Result<EntryId> {
        if parent != EntryId(0) {
            return Err(Error::not_found("CP/M has no subdirectories"));
        }
        self.entries
            .iter()
            .skip(1)
            .find(|e| super::names_match(&e.filename, name))
            .map(|e| e.id)
            .ok_or_else(|| Error::not_found(format!("no file named {name}")))
    }

    fn open_file(&mut self, entry: EntryId, access: AccessMode, part: ForkKind) -> Result<FileHandle> {
        if part != ForkKind::Data {
            return Err(Error::arg("CP/M files have only a data fork"));
        }
        self.handles.acquire(entry, part, access)?;
        let (data, allocation) = match self.read_data_with_map(entry) {
            Ok(r) => r,
            Err(err) => {
                self.handles.release(entry, part, access);
                return Err(err);
            }
        };
        Ok(FileHandle::with_sparse_map(entry, part, access, data, BLOCK_SIZE as u64, allocation))
    }

    fn close_file(&mut self, mut handle: FileHandle) -> Result<()> {
        if handle.is_dirty() {
            let fe = self.entries.get(handle.entry.0).cloned_or_err()?;
            let (raw_name, typ) = pack_name(&fe.filename)?;
            let buf = std::mem::take(&mut handle.buf);
            self.free_data(handle.entry)?;
            let locs = self.write_data(0, raw_name, typ, &buf)?;
            self.locations.insert(handle.entry.0, locs);
            self.rebuild()?;
        }
        self.handles.release(handle.entry, handle.fork, handle.mode);
        handle.mark_closed();
        Ok(())
    }

    fn add_rsrc_fork(&mut self, _entry: EntryId) -> Result<()> {
        Err(Error::arg("CP/M files have no resource fork"))
    }

    fn free_space(&self) -> u64 {
        self.used_blocks.iter().filter(|u| !**u).count() as u64 * BLOCK_SIZE as u64
    }

    fn notes(&self) -> &Notes {
        &self.notes
    }
}

trait OptionFileEntryExt {
    fn cloned_or_err(self) -> Result<FileEntry>;
}
impl OptionFileEntryExt for Option<&FileEntry> {
    fn cloned_or_err(self) -> Result<FileEntry> {
        self.cloned().ok_or_else(|| Error::not_found("no such file"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Order;

    fn blank_cpm(total_blocks: u16) -> Cpm {
        let provider = ChunkProvider::new_ordered(vec![0u8; total_blocks as usize * BLOCK_SIZE], Order::CpmKBlock, true);
        let mut fs = Cpm::new(provider, total_blocks);
        fs.format("", 0, false).unwrap();
        fs
    }

    #[test]
    fn format_then_scan_yields_empty_volume() {
        let mut fs = blank_cpm(200);
        fs.prepare_file_access(false).unwrap();
        assert_eq!(fs.entries.len(), 1);
        assert_eq!(fs.free_space(), (200 - DIR_BLOCKS) as u64 * BLOCK_SIZE as u64);
    }

    #[test]
    fn create_write_read_round_trip() {
        let mut fs = blank_cpm(200);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "HELLO.TXT", CreateMode::File).unwrap();
        let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        handle.write(b"hello cpm").unwrap();
        fs.close_file(handle).unwrap();

        let found = fs.find_file_entry(fs.get_vol_dir(), "hello.txt").unwrap();
        let mut handle = fs.open_file(found, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        let mut buf = vec![0u8; 9];
        handle.read(&mut buf);
        assert_eq!(&buf, b"hello cpm");
    }

    #[test]
    fn large_file_spans_multiple_extents() {
        let mut fs = blank_cpm(200);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "BIG.DAT", CreateMode::File).unwrap();
        let payload = vec![0x42u8; 3 * BLOCKS_PER_EXTENT * BLOCK_SIZE + 500];
        let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        handle.write(&payload).unwrap();
        fs.close_file(handle).unwrap();

        let found = fs.find_file_entry(fs.get_vol_dir(), "big.dat").unwrap();
        assert_eq!(fs.entry(found).unwrap().data_length as usize, payload.len());
        assert!(fs.locations.get(&found.0).unwrap().len() >= 4);
    }

    #[test]
    fn delete_frees_blocks() {
        let mut fs = blank_cpm(200);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "A.TXT", CreateMode::File).unwrap();
        let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        handle.write(&vec![1u8; 5000]).unwrap();
        fs.close_file(handle).unwrap();
        let before_free = fs.free_space();
        fs.delete_file(id).unwrap();
        assert!(fs.free_space() > before_free);
        assert!(fs.find_file_entry(fs.get_vol_dir(), "A.TXT").is_err());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut fs = blank_cpm(200);
        fs.prepare_file_access(false).unwrap();
        assert!(fs.create_file(fs.get_vol_dir(), "WAYTOOLONGNAME.TXT", CreateMode::File).is_err());
        assert!(fs.create_file(fs.get_vol_dir(), "OK.TOOLONG", CreateMode::File).is_err());
    }

    /// A whole-zero block in the middle of an extent is the sparse law's
    /// hole: it never gets an allocation block, so `seek_hole`/`seek_data`
    /// must answer from the block list rather than just scanning bytes.
    #[test]
    fn seek_hole_and_seek_data_find_an_unallocated_zero_block() {
        let mut fs = blank_cpm(200);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "SPARSE.DAT", CreateMode::File).unwrap();
        let mut payload = vec![0x11u8; 3 * BLOCK_SIZE];
        payload[BLOCK_SIZE..2 * BLOCK_SIZE].fill(0);
        let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        handle.write(&payload).unwrap();
        fs.close_file(handle).unwrap();

        let found = fs.find_file_entry(fs.get_vol_dir(), "sparse.dat").unwrap();
        let ext = fs.read_dir_entry(fs.locations.get(&found.0).unwrap()[0].dir_index).unwrap();
        assert_eq!(ext.block_slots()[1], 0);

        let handle = fs.open_file(found, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        assert_eq!(handle.seek_hole(0), BLOCK_SIZE as u64);
        assert_eq!(handle.seek_data(BLOCK_SIZE as u64), 2 * BLOCK_SIZE as u64);
        fs.close_file(handle).unwrap();
    }

    #[test]
    fn prepare_raw_access_is_refused_while_a_handle_is_open() {
        let mut fs = blank_cpm(200);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "A.TXT", CreateMode::File).unwrap();
        let handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        assert!(fs.prepare_raw_access().is_err());
        fs.close_file(handle).unwrap();
        assert!(fs.prepare_raw_access().is_ok());
    }

    #[test]
    fn a_second_read_write_open_on_the_same_file_is_rejected() {
        let mut fs = blank_cpm(200);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "A.TXT", CreateMode::File).unwrap();
        let _h1 = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        assert!(fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).is_err());
    }

    #[test]
    fn an_all_zero_directory_block_is_rejected_as_garbage() {
        let provider = ChunkProvider::new_ordered(vec![0x00u8; 200 * BLOCK_SIZE], Order::CpmKBlock, true);
        let mut fs = Cpm::new(provider, 200);
        assert!(fs.prepare_file_access(false).is_err());
    }
}
