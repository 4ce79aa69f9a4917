//! UCSD Pascal filesystem engine.
//!
//! The whole catalog is one fixed four-block directory starting at block
//! 2: a header (total block count, volume name) followed immediately by
//! up to 77 directory entries, each naming a *contiguous* run of blocks
//! (`begin_block..end_block`). There is no bitmap -- free space is
//! whatever no entry's range covers -- so allocation is a first-fit scan
//! for a long enough gap, and fragmentation is dealt with by an explicit
//! [`Pascal::defragment`] pass that slides every file down to close the
//! gaps, exactly the way the source environment's `Filer` did.

use chrono::NaiveDateTime;

use crate::chunk::ChunkProvider;
use crate::error::{Error, Result};
use crate::notes::Notes;

use super::{
    AccessMode, Capabilities, CreateMode, EntryId, FileEntry, FileHandle, FileSystem, ForkKind, FsKind, HandleTable,
};

const BLOCK_SIZE: usize = 512;
const VOL_HEADER_BLOCK: usize = 2;
const ENTRY_SIZE: usize = 26;
const MAX_ENTRIES_PER_DIR_BLOCK_SET: usize = 77;

fn pack_date(time: Option<NaiveDateTime>) -> [u8; 2] {
    use chrono::Datelike;
    let now = match time {
        Some(t) => t,
        None => return [0, 0],
    };
    let (_, year) = now.year_ce();
    let packed = (now.month() as u16) + ((now.day() as u16) << 4) + ((year as u16 % 100) << 9);
    packed.to_le_bytes()
}

fn unpack_date(raw: [u8; 2]) -> Option<NaiveDateTime> {
    let date = u16::from_le_bytes(raw);
    if date == 0 {
        return None;
    }
    let year = 1900 + (date >> 9) as i32;
    let month = date & 0x0f;
    let day = (date >> 4) & 0x1f;
    chrono::NaiveDate::from_ymd_opt(year, month as u32, day as u32).and_then(|d| d.and_hms_opt(0, 0, 0))
}

const INVALID_CHARS: &str = "$=?,[#:";

fn is_name_valid(s: &str, max_len: usize) -> bool {
    !s.is_empty() && s.len() <= max_len && s.chars().all(|c| c.is_ascii() && !c.is_ascii_control() && !INVALID_CHARS.contains(c))
}

fn pack_file_name(s: &str) -> Result<(u8, [u8; 15])> {
    if !is_name_valid(s, 15) {
        return Err(Error::arg("invalid Pascal filename"));
    }
    let upper = s.to_uppercase();
    let mut name = [0u8; 15];
    name[..upper.len()].copy_from_slice(upper.as_bytes());
    Ok((upper.len() as u8, name))
}

fn unpack_file_name(len: u8, raw: &[u8; 15]) -> String {
    String::from_utf8_lossy(&raw[..(len as usize).min(15)]).to_string()
}

#[derive(Clone)]
struct DirEntry {
    begin_block: u16,
    end_block: u16,
    file_type: u16,
    name_len: u8,
    name: [u8; 15],
    bytes_remaining: u16,
    mod_date: [u8; 2],
}

impl DirEntry {
    fn inactive() -> Self {
        Self { begin_block: 0, end_block: 0, file_type: 0, name_len: 0, name: [0; 15], bytes_remaining: 0, mod_date: [0; 2] }
    }
    fn from_bytes(b: &[u8]) -> Self {
        Self {
            begin_block: u16::from_le_bytes([b[0], b[1]]),
            end_block: u16::from_le_bytes([b[2], b[3]]),
            file_type: u16::from_le_bytes([b[4], b[5]]),
            name_len: b[6],
            name: b[7..22].try_into().unwrap(),
            bytes_remaining: u16::from_le_bytes([b[22], b[23]]),
            mod_date: [b[24], b[25]],
        }
    }
    fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut b = [0u8; ENTRY_SIZE];
        b[0..2].copy_from_slice(&self.begin_block.to_le_bytes());
        b[2..4].copy_from_slice(&self.end_block.to_le_bytes());
        b[4..6].copy_from_slice(&self.file_type.to_le_bytes());
        b[6] = self.name_len;
        b[7..22].copy_from_slice(&self.name);
        b[22..24].copy_from_slice(&self.bytes_remaining.to_le_bytes());
        b[24..26].copy_from_slice(&self.mod_date);
        b
    }
    fn is_active(&self) -> bool {
        self.name_len > 0
    }
    fn eof(&self) -> usize {
        (self.end_block - self.begin_block) as usize * BLOCK_SIZE - self.bytes_remaining as usize
    }
}

pub struct Pascal {
    provider: ChunkProvider,
    total_blocks: u16,
    dir_end_block: u16,
    free_blocks_cache: u16,
    entries: Vec<FileEntry>,
    notes: Notes,
    handles: HandleTable,
}

impl Pascal {
    pub fn new(provider: ChunkProvider, total_blocks: u16) -> Self {
        Self {
            provider,
            total_blocks,
            dir_end_block: 6,
            free_blocks_cache: 0,
            entries: Vec::new(),
            notes: Notes::new(),
            handles: HandleTable::new(),
        }
    }

    fn dir_blocks(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        for b in VOL_HEADER_BLOCK..self.dir_end_block as usize {
            buf.extend(self.provider.read_block(b)?);
        }
        Ok(buf)
    }

    fn read_entries(&mut self) -> Result<Vec<DirEntry>> {
        let buf = self.dir_blocks()?;
        let mut out = Vec::new();
        for i in 0..MAX_ENTRIES_PER_DIR_BLOCK_SET {
            let base = ENTRY_SIZE + i * ENTRY_SIZE;
            if base + ENTRY_SIZE > buf.len() {
                break;
            }
            let e = DirEntry::from_bytes(&buf[base..base + ENTRY_SIZE]);
            if !e.is_active() {
                continue;
            }
            out.push(e);
        }
        Ok(out)
    }

    fn write_entries(&mut self, entries: &[DirEntry]) -> Result<()> {
        let mut buf = self.dir_blocks()?;
        for slot in buf[ENTRY_SIZE..].chunks_mut(ENTRY_SIZE) {
            slot.copy_from_slice(&DirEntry::inactive().to_bytes());
        }
        for (i, e) in entries.iter().enumerate() {
            let base = ENTRY_SIZE + i * ENTRY_SIZE;
            buf[base..base + ENTRY_SIZE].copy_from_slice(&e.to_bytes());
        }
        buf[16..18].copy_from_slice(&(entries.len() as u16).to_le_bytes());
        for (i, b) in (VOL_HEADER_BLOCK..self.dir_end_block as usize).enumerate() {
            let start = i * BLOCK_SIZE;
            self.provider.write_block(b, &buf[start..start + BLOCK_SIZE])?;
        }
        Ok(())
    }

    fn is_block_free(entries: &[DirEntry], block: u16, dir_end: u16) -> bool {
        if block < dir_end {
            return false;
        }
        !entries.iter().any(|e| block >= e.begin_block && block < e.end_block)
    }

    fn num_free_blocks(&mut self) -> Result<(u16, u16)> {
        let entries = self.read_entries()?;
        let mut free = 0u16;
        let mut largest = 0u16;
        let mut run = 0u16;
        for b in 0..self.total_blocks {
            if Self::is_block_free(&entries, b, self.dir_end_block) {
                free += 1;
                run += 1;
                largest = largest.max(run);
            } else {
                run = 0;
            }
        }
        Ok((free, largest))
    }

    fn get_available_blocks(&mut self, num: u16) -> Result<u16> {
        let entries = self.read_entries()?;
        let mut start = 0u16;
        let mut run = 0u16;
        for b in 0..self.total_blocks {
            if Self::is_block_free(&entries, b, self.dir_end_block) {
                if run == 0 {
                    start = b;
                }
                run += 1;
                if run == num {
                    return Ok(start);
                }
            } else {
                run = 0;
            }
        }
        Err(Error::DiskFull)
    }

    fn rebuild_arena(&mut self) -> Result<()> {
        self.entries.clear();
        let id = EntryId(0);
        let mut root = FileEntry::new_file(id, id, "", FsKind::Pascal);
        root.is_directory = true;
        root.containing_dir = None;
        self.entries.push(root);
        let entries = self.read_entries()?;
        for e in entries {
            let name = unpack_file_name(e.name_len, &e.name);
            let fid = EntryId(self.entries.len());
            let mut fe = FileEntry::new_file(fid, id, &name, FsKind::Pascal);
            fe.file_type = e.file_type as u32;
            fe.data_length = e.eof() as u64;
            fe.storage_size = (e.end_block - e.begin_block) as u64 * BLOCK_SIZE as u64;
            fe.mod_when = unpack_date(e.mod_date);
            self.entries.push(fe);
        }
        Ok(())
    }

    /// Slide every file toward the start of the data region to eliminate
    /// gaps between contiguous runs, preserving directory order.
    pub fn defragment(&mut self) -> Result<()> {
        let mut entries = self.read_entries()?;
        entries.sort_by_key(|e| e.begin_block);
        let mut cursor = self.dir_end_block;
        for e in entries.iter_mut() {
            if e.begin_block != cursor {
                let len = e.end_block - e.begin_block;
                let mut data = Vec::new();
                for b in e.begin_block..e.end_block {
                    data.extend(self.provider.read_block(b as usize)?);
                }
                for (i, b) in (cursor..cursor + len).enumerate() {
                    let start = i * BLOCK_SIZE;
                    self.provider.write_block(b as usize, &data[start..start + BLOCK_SIZE])?;
                }
                e.begin_block = cursor;
                e.end_block = cursor + len;
            }
            cursor = e.end_block;
        }
        self.write_entries(&entries)?;
        self.rebuild_arena()
    }
}

impl FileSystem for Pascal {
    fn kind(&self) -> FsKind {
        FsKind::Pascal
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { has_resource_forks: false, has_disk_images: false, case_sensitive_names: false }
    }

    fn format(&mut self, volume_name: &str, _volume_num: u8, _make_bootable: bool) -> Result<()> {
        if !is_name_valid(volume_name, 7) {
            return Err(Error::arg("invalid Pascal volume name: max 7 characters"));
        }
        for b in 0..self.total_blocks as usize {
            self.provider.write_block(b, &vec![0u8; BLOCK_SIZE])?;
        }
        let mut header = vec![0u8; BLOCK_SIZE];
        header[0..2].copy_from_slice(&0u16.to_le_bytes());
        header[2..4].copy_from_slice(&self.dir_end_block.to_le_bytes());
        header[4..6].copy_from_slice(&0u16.to_le_bytes());
        header[6] = volume_name.len() as u8;
        header[7..7 + volume_name.len()].copy_from_slice(volume_name.to_uppercase().as_bytes());
        header[14..16].copy_from_slice(&self.total_blocks.to_le_bytes());
        header[16..18].copy_from_slice(&0u16.to_le_bytes());
        self.provider.write_block(VOL_HEADER_BLOCK, &header)?;
        self.notes = Notes::new();
        self.notes.info("volume formatted");
        self.rebuild_arena()?;
        let (free, _) = self.num_free_blocks()?;
        self.free_blocks_cache = free;
        Ok(())
    }

    fn prepare_raw_access(&mut self) -> Result<()> {
        if !self.handles.is_empty() {
            return Err(Error::txn_state("cannot drop to raw access while a file handle is open"));
        }
        Ok(())
    }

    fn prepare_file_access(&mut self, _deep_scan: bool) -> Result<()> {
        let header = self.provider.read_block(VOL_HEADER_BLOCK)?;
        let begin0 = u16::from_le_bytes([header[0], header[1]]);
        let end = u16::from_le_bytes([header[2], header[3]]);
        self.total_blocks = u16::from_le_bytes([header[14], header[15]]);
        if begin0 != 0 || end <= VOL_HEADER_BLOCK as u16 || end as u32 > self.total_blocks as u32 {
            return Err(Error::format("Pascal volume header is malformed"));
        }
        self.dir_end_block = end;
        self.rebuild_arena()?;
        let (free, _) = self.num_free_blocks()?;
        self.free_blocks_cache = free;
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
        if parent != EntryId(0) {
            return Err(Error::arg("Pascal has no subdirectories"));
        }
        if mode == CreateMode::Directory {
            return Err(Error::arg("Pascal has no subdirectories"));
        }
        if self.find_file_entry(parent, name).is_ok() {
            return Err(Error::arg(format!("duplicate filename {name}")));
        }
        let (name_len, raw_name) = pack_file_name(name)?;
        let mut entries = self.read_entries()?;
        if entries.len() >= MAX_ENTRIES_PER_DIR_BLOCK_SET {
            return Err(Error::format("Pascal directory is full"));
        }
        let start = self.get_available_blocks(1)?;
        entries.push(DirEntry {
            begin_block: start,
            end_block: start + 1,
            file_type: 0x01,
            name_len,
            name: raw_name,
            bytes_remaining: BLOCK_SIZE as u16,
            mod_date: pack_date(None),
        });
        self.write_entries(&entries)?;
        self.rebuild_arena()?;
        let (free, _) = self.num_free_blocks()?;
        self.free_blocks_cache = free;
        self.find_file_entry(parent, name)
    }

    fn delete_file(&mut self, entry: EntryId) -> Result<()> {
        let name = self.entries.get(entry.0).map(|e| e.filename.clone()).ok_or_else(|| Error::not_found("no such file"))?;
        let mut entries = self.read_entries()?;
        let before = entries.len();
        entries.retain(|e| unpack_file_name(e.name_len, &e.name) != name);
        if entries.len() == before {
            return Err(Error::not_found(format!("no file named {name}")));
        }
        self.write_entries(&entries)?;
        self.rebuild_arena()?;
        let (free, _) = self.num_free_blocks()?;
        self.free_blocks_cache = free;
        Ok(())
    }

    fn move_file(&mut self, entry: EntryId, new_parent: EntryId, new_name: &str) -> Result<()> {
        if new_parent != EntryId(0) {
            return Err(Error::arg("Pascal has no subdirectories"));
        }
        let old_name = self.entries.get(entry.0).map(|e| e.filename.clone()).ok_or_else(|| Error::not_found("no such file"))?;
        let (name_len, raw_name) = pack_file_name(new_name)?;
        let mut entries = self.read_entries()?;
        for e in entries.iter_mut() {
            if unpack_file_name(e.name_len, &e.name) == old_name {
                e.name_len = name_len;
                e.name = raw_name;
            }
        }
        self.write_entries(&entries)?;
        self.rebuild_arena()
    }

    fn find_file_entry(&self, parent: EntryId, name: &str) -> Result<EntryId> {
        if parent != EntryId(0) {
            return Err(Error::not_found("Pascal has no subdirectories"));
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
            return Err(Error::arg("Pascal files have only a data fork"));
        }
        let name = self.entries.get(entry.0).map(|e| e.filename.clone()).ok_or_else(|| Error::not_found("no such file"))?;
        let entries = self.read_entries()?;
        let e = entries.iter().find(|e| unpack_file_name(e.name_len, &e.name) == name).ok_or_else(|| Error::not_found("no such file"))?;
        self.handles.acquire(entry, part, access)?;
        let (begin_block, end_block, eof) = (e.begin_block, e.end_block, e.eof());
        let mut out = Vec::new();
        for b in begin_block..end_block {
            match self.provider.read_block(b as usize) {
                Ok(bytes) => out.extend(bytes),
                Err(err) => {
                    self.handles.release(entry, part, access);
                    return Err(err);
                }
            }
        }
        out.truncate(eof);
        Ok(FileHandle::new(entry, part, access, out))
    }

    fn close_file(&mut self, mut handle: FileHandle) -> Result<()> {
        if handle.is_dirty() {
            let name = self.entries.get(handle.entry.0).map(|e| e.filename.clone()).ok_or_else(|| Error::not_found("no such file"))?;
            let buf = std::mem::take(&mut handle.buf);
            let mut entries = self.read_entries()?;
            let idx = entries.iter().position(|e| unpack_file_name(e.name_len, &e.name) == name).ok_or_else(|| Error::not_found("no such file"))?;
            let needed = buf.len().div_ceil(BLOCK_SIZE).max(1) as u16;
            let old_len = entries[idx].end_block - entries[idx].begin_block;
            let begin = if needed <= old_len {
                entries[idx].begin_block
            } else {
                let removed = entries.remove(idx);
                let fresh = self.get_available_blocks(needed);
                entries.insert(idx, removed);
                fresh?
            };
            for i in 0..needed {
                let start = i as usize * BLOCK_SIZE;
                let end = (start + BLOCK_SIZE).min(buf.len());
                let mut block = vec![0u8; BLOCK_SIZE];
                if start < buf.len() {
                    block[..end - start].copy_from_slice(&buf[start..end]);
                }
                self.provider.write_block((begin + i) as usize, &block)?;
            }
            entries[idx].begin_block = begin;
            entries[idx].end_block = begin + needed;
            entries[idx].bytes_remaining = (needed as usize * BLOCK_SIZE - buf.len()) as u16;
            entries[idx].mod_date = pack_date(None);
            self.write_entries(&entries)?;
            self.rebuild_arena()?;
            let (free, _) = self.num_free_blocks()?;
            self.free_blocks_cache = free;
        }
        self.handles.release(handle.entry, handle.fork, handle.mode);
        handle.mark_closed();
        Ok(())
    }

    fn add_rsrc_fork(&mut self, _entry: EntryId) -> Result<()> {
        Err(Error::arg("Pascal files have no resource fork"))
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

    fn blank_pascal(blocks: u16) -> Pascal {
        let provider = ChunkProvider::new_ordered(vec![0u8; blocks as usize * BLOCK_SIZE], Order::ProdosBlock, true);
        let mut fs = Pascal::new(provider, blocks);
        fs.format("MYVOL", 0, false).unwrap();
        fs
    }

    #[test]
    fn format_then_scan_yields_empty_volume() {
        let mut fs = blank_pascal(280);
        fs.prepare_file_access(false).unwrap();
        assert_eq!(fs.entries.len(), 1);
    }

    #[test]
    fn create_write_read_round_trip() {
        let mut fs = blank_pascal(280);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "HELLO.TEXT", CreateMode::File).unwrap();
        let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        handle.write(b"pascal says hi").unwrap();
        fs.close_file(handle).unwrap();

        let found = fs.find_file_entry(fs.get_vol_dir(), "hello.text").unwrap();
        let mut handle = fs.open_file(found, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        let mut buf = vec![0u8; 14];
        handle.read(&mut buf);
        assert_eq!(&buf, b"pascal says hi");
    }

    #[test]
    fn defragment_closes_gaps_after_delete() {
        let mut fs = blank_pascal(280);
        fs.prepare_file_access(false).unwrap();
        let a = fs.create_file(fs.get_vol_dir(), "A", CreateMode::File).unwrap();
        let _b = fs.create_file(fs.get_vol_dir(), "B", CreateMode::File).unwrap();
        let c = fs.create_file(fs.get_vol_dir(), "C", CreateMode::File).unwrap();
        fs.delete_file(a).unwrap();
        let before = fs.entry(c).unwrap().filename.clone();
        fs.defragment().unwrap();
        let entries = fs.read_entries().unwrap();
        assert!(entries.iter().all(|e| e.begin_block >= fs.dir_end_block));
        assert_eq!(fs.find_file_entry(fs.get_vol_dir(), &before).is_ok(), true);
    }

    #[test]
    fn oversized_volume_name_is_rejected() {
        let provider = ChunkProvider::new_ordered(vec![0u8; 280 * BLOCK_SIZE], Order::ProdosBlock, true);
        let mut fs = Pascal::new(provider, 280);
        assert!(fs.format("WAYTOOLONGNAME", 0, false).is_err());
    }

    #[test]
    fn prepare_raw_access_is_refused_while_a_handle_is_open() {
        let mut fs = blank_pascal(280);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "A", CreateMode::File).unwrap();
        let handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        assert!(fs.prepare_raw_access().is_err());
        fs.close_file(handle).unwrap();
        assert!(fs.prepare_raw_access().is_ok());
    }

    #[test]
    fn a_second_read_write_open_on_the_same_file_is_rejected() {
        let mut fs = blank_pascal(280);
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "A", CreateMode::File).unwrap();
        let _h1 = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        assert!(fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).is_err());
    }
}
