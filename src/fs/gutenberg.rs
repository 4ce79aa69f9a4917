//! Gutenberg filesystem engine.
//!
//! The Gutenberg word processor shipped its own minimal single-density
//! DOS: one directory track of fixed-size entries, and files stored as
//! a singly linked chain of sectors -- the first two bytes of every
//! data sector are the next sector's (track, sector), terminated by
//! (0, 0), the same link-list idiom DOS 3.x uses for its track/sector
//! list but applied directly to data instead of through an indirection
//! sector. There is no allocation bitmap; a sector is free if no
//! chain visits it.

use std::collections::HashMap;

use crate::chunk::ChunkProvider;
use crate::error::{Error, Result};
use crate::notes::Notes;

use super::{
    AccessMode, Capabilities, CreateMode, EntryId, FileEntry, FileHandle, FileSystem, ForkKind, FsKind, HandleTable,
};

const SECTOR_SIZE: usize = 256;
const SECTORS_PER_TRACK: usize = 16;
const DIR_TRACK: usize = 17;
const ENTRY_SIZE: usize = 16;
const NAME_LEN: usize = 12;
const ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / ENTRY_SIZE;
const LINK_HEADER: usize = 2;
const PAYLOAD_PER_SECTOR: usize = SECTOR_SIZE - LINK_HEADER;

fn is_name_valid(s: &str) -> bool {
    !s.is_empty() && s.len() <= NAME_LEN && s.chars().all(|c| c.is_ascii_graphic() || c == ' ')
}

#[derive(Clone)]
struct DirEntry {
    name: [u8; NAME_LEN],
    first_track: u8,
    first_sector: u8,
    length: u16,
}

impl DirEntry {
    fn inactive() -> Self {
        Self { name: [0; NAME_LEN], first_track: 0, first_sector: 0, length: 0 }
    }
    fn is_active(&self) -> bool {
        self.name[0] != 0
    }
    fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).trim_end().to_string()
    }
    fn from_bytes(b: &[u8]) -> Self {
        Self { name: b[0..NAME_LEN].try_into().unwrap(), first_track: b[NAME_LEN], first_sector: b[NAME_LEN + 1], length: u16::from_le_bytes([b[NAME_LEN + 2], b[NAME_LEN + 3]]) }
    }
    fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut b = [0u8; ENTRY_SIZE];
        b[0..NAME_LEN].copy_from_slice(&self.name);
        b[NAME_LEN] = self.first_track;
        b[NAME_LEN + 1] = self.first_sector;
        b[NAME_LEN + 2..NAME_LEN + 4].copy_from_slice(&self.length.to_le_bytes());
        b
    }
}

struct Location {
    slot: usize,
}

pub struct Gutenberg {
    provider: ChunkProvider,
    tracks: usize,
    entries: Vec<FileEntry>,
    locations: HashMap<usize, Location>,
    free_sectors_cache: usize,
    notes: Notes,
    handles: HandleTable,
}

impl Gutenberg {
    pub fn new(provider: ChunkProvider, tracks: usize) -> Self {
        Self {
            provider,
            tracks,
            entries: Vec::new(),
            locations: HashMap::new(),
            free_sectors_cache: 0,
            notes: Notes::new(),
            handles: HandleTable::new(),
        }
    }

    /// A directory slot is either untouched (all-zero, `is_active` false)
    /// or names a chain head that actually sits on the volume, off the
    /// directory track, with an ASCII name. Random bytes misread as an
    /// entry almost never satisfy all three, which is what keeps a noisy
    /// buffer from binding as an emptyish Gutenberg volume.
    fn validate_directory_entries(&mut self) -> Result<()> {
        let n = self.num_dir_slots();
        for i in 0..n {
            let e = self.read_dir_entry(i)?;
            if !e.is_active() {
                continue;
            }
            if !e.name.iter().all(|&b| b == 0 || (0x20..=0x7e).contains(&b)) {
                return Err(Error::format("Gutenberg directory entry has a non-ASCII name"));
            }
            if e.first_track as usize >= self.tracks || e.first_sector as usize >= SECTORS_PER_TRACK {
                return Err(Error::format("Gutenberg directory entry names a sector off the volume"));
            }
            if e.first_track as usize == DIR_TRACK {
                return Err(Error::format("Gutenberg directory entry chains into the directory track"));
            }
        }
        Ok(())
    }

    fn num_free_sectors(&mut self) -> Result<usize> {
        let used = self.used_sectors()?;
        Ok(self.tracks * SECTORS_PER_TRACK - used.len())
    }

    fn num_dir_slots(&self) -> usize {
        ENTRIES_PER_SECTOR * SECTORS_PER_TRACK
    }

    fn read_dir_entry(&mut self, slot: usize) -> Result<DirEntry> {
        let sector = slot / ENTRIES_PER_SECTOR;
        let off = slot % ENTRIES_PER_SECTOR * ENTRY_SIZE;
        let buf = self.provider.read_sector(DIR_TRACK, sector)?;
        Ok(DirEntry::from_bytes(&buf[off..off + ENTRY_SIZE]))
    }

    fn write_dir_entry(&mut self, slot: usize, e: &DirEntry) -> Result<()> {
        let sector = slot / ENTRIES_PER_SECTOR;
        let off = slot % ENTRIES_PER_SECTOR * ENTRY_SIZE;
        let mut buf = self.provider.read_sector(DIR_TRACK, sector)?;
        buf[off..off + ENTRY_SIZE].copy_from_slice(&e.to_bytes());
        self.provider.write_sector(DIR_TRACK, sector, &buf)
    }

    fn used_sectors(&mut self) -> Result<Vec<(u8, u8)>> {
        let mut used: Vec<(u8, u8)> = (0..SECTORS_PER_TRACK).map(|s| (DIR_TRACK as u8, s as u8)).collect();
        let n = self.num_dir_slots();
        for i in 0..n {
            let e = self.read_dir_entry(i)?;
            if !e.is_active() {
                continue;
            }
            let mut t = e.first_track;
            let mut s = e.first_sector;
            let mut guard = 0;
            while !(t == 0 && s == 0) && guard < 2000 {
                used.push((t, s));
                let buf = self.provider.read_sector(t as usize, s as usize)?;
                t = buf[0];
                s = buf[1];
                guard += 1;
            }
        }
        Ok(used)
    }

    fn find_free_sector(&mut self) -> Result<(u8, u8)> {
        let used = self.used_sectors()?;
        for t in 0..self.tracks {
            for s in 0..SECTORS_PER_TRACK {
                if !used.contains(&(t as u8, s as u8)) {
                    return Ok((t as u8, s as u8));
                }
            }
        }
        Err(Error::DiskFull)
    }

    fn rebuild(&mut self) -> Result<()> {
        self.entries.clear();
        self.locations.clear();
        let root_id = EntryId(0);
        let mut root = FileEntry::new_file(root_id, root_id, "", FsKind::Gutenberg);
        root.is_directory = true;
        root.containing_dir = None;
        self.entries.push(root);

        let n = self.num_dir_slots();
        for slot in 0..n {
            let e = self.read_dir_entry(slot)?;
            if !e.is_active() {
                continue;
            }
            let id = EntryId(self.entries.len());
            let mut fe = FileEntry::new_file(id, root_id, &e.name_str(), FsKind::Gutenberg);
            fe.data_length = e.length as u64;
            self.entries.push(fe);
            self.locations.insert(id.0, Location { slot });
        }
        self.free_sectors_cache = self.num_free_sectors()?;
        Ok(())
    }

    fn free_chain(&mut self, first_track: u8, first_sector: u8) -> Result<()> {
        let mut t = first_track;
        let mut s = first_sector;
        let mut guard = 0;
        while !(t == 0 && s == 0) && guard < 2000 {
            let buf = self.provider.read_sector(t as usize, s as usize)?;
            let (nt, ns) = (buf[0], buf[1]);
            self.provider.write_sector(t as usize, s as usize, &[0u8; SECTOR_SIZE])?;
            t = nt;
            s = ns;
            guard += 1;
        }
        Ok(())
    }
}

impl FileSystem for Gutenberg {
    fn kind(&self) -> FsKind {
        FsKind::Gutenberg
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { has_resource_forks: false, has_disk_images: false, case_sensitive_names: false }
    }

    fn format(&mut self, _volume_name: &str, _volume_num: u8, _make_bootable: bool) -> Result<()> {
        for t in 0..self.tracks {
            for s in 0..SECTORS_PER_TRACK {
                self.provider.write_sector(t, s, &[0u8; SECTOR_SIZE])?;
            }
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
        self.validate_directory_entries()?;
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
            return Err(Error::arg("Gutenberg has no subdirectories"));
        }
        if !is_name_valid(name) {
            return Err(Error::arg(format!("invalid Gutenberg filename {name}")));
        }
        if self.find_file_entry(parent, name).is_ok() {
            return Err(Error::arg(format!("duplicate filename {name}")));
        }
        let n = self.num_dir_slots();
        let mut slot = None;
        for i in 0..n {
            if !self.read_dir_entry(i)?.is_active() {
                slot = Some(i);
                break;
            }
        }
        let slot = slot.ok_or_else(|| Error::format("Gutenberg directory is full"))?;
        let mut raw_name = [0u8; NAME_LEN];
        raw_name[..name.len()].copy_from_slice(name.as_bytes());
        let e = DirEntry { name: raw_name, first_track: 0, first_sector: 0, length: 0 };
        self.write_dir_entry(slot, &e)?;
        self.rebuild()?;
        self.find_file_entry(parent, name)
    }

    fn delete_file(&mut self, entry: EntryId) -> Result<()> {
        let slot = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
        let e = self.read_dir_entry(slot)?;
        self.free_chain(e.first_track, e.first_sector)?;
        self.write_dir_entry(slot, &DirEntry::inactive())?;
        self.rebuild()
    }

    fn move_file(&mut self, entry: EntryId, new_parent: EntryId, new_name: &str) -> Result<()> {
        if new_parent != EntryId(0) {
            return Err(Error::arg("Gutenberg has no subdirectories"));
        }
        if !is_name_valid(new_name) {
            return Err(Error::arg(format!("invalid Gutenberg filename {new_name}")));
        }
        let slot = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
        let mut e = self.read_dir_entry(slot)?;
        let mut raw_name = [0u8; NAME_LEN];
        raw_name[..new_name.len()].copy_from_slice(new_name.as_bytes());
        e.name = raw_name;
        self.write_dir_entry(slot, &e)?;
        self.rebuild()
    }

    fn find_file_entry(&self, parent: EntryId, name: &str) -> Result<EntryId> {
        if parent != EntryId(0) {
            return Err(Error::not_found("Gutenberg has no subdirectories"));
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
            return Err(Error::arg("Gutenberg files have only a data fork"));
        }
        let slot = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
        let e = self.read_dir_entry(slot)?;
        self.handles.acquire(entry, part, access)?;
        let mut out = Vec::new();
        let mut t = e.first_track;
        let mut s = e.first_sector;
        let mut guard = 0;
        while !(t == 0 && s == 0) && guard < 2000 {
            let buf = match self.provider.read_sector(t as usize, s as usize) {
                Ok(b) => b,
                Err(err) => {
                    self.handles.release(entry, part, access);
                    return Err(err);
                }
            };
            out.extend_from_slice(&buf[LINK_HEADER..]);
            t = buf[0];
            s = buf[1];
            guard += 1;
        }
        out.truncate(e.length as usize);
        Ok(FileHandle::new(entry, part, access, out))
    }

    fn close_file(&mut self, mut handle: FileHandle) -> Result<()> {
        self.handles.release(handle.entry, handle.fork, handle.mode);
        if handle.is_dirty() {
            let slot = self.locations.get(&handle.entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
            let old = self.read_dir_entry(slot)?;
            self.free_chain(old.first_track, old.first_sector)?;
            let buf = std::mem::take(&mut handle.buf);

            let num_sectors = buf.len().div_ceil(PAYLOAD_PER_SECTOR).max(1);
            let mut chain = Vec::with_capacity(num_sectors);
            for _ in 0..num_sectors {
                chain.push(self.find_free_sector_avoiding(&chain)?);
            }
            for (i, (t, s)) in chain.iter().enumerate() {
                let (nt, ns) = chain.get(i + 1).copied().unwrap_or((0, 0));
                let start = i * PAYLOAD_PER_SECTOR;
                let end = (start + PAYLOAD_PER_SECTOR).min(buf.len());
                let mut sec = [0u8; SECTOR_SIZE];
                sec[0] = nt;
                sec[1] = ns;
                if start < buf.len() {
                    sec[LINK_HEADER..LINK_HEADER + (end - start)].copy_from_slice(&buf[start..end]);
                }
                self.provider.write_sector(*t as usize, *s as usize, &sec)?;
            }
            let (first_track, first_sector) = chain.first().copied().unwrap_or((0, 0));
            let e = DirEntry { name: old.name, first_track, first_sector, length: buf.len() as u16 };
            self.write_dir_entry(slot, &e)?;
            self.rebuild()?;
        }
        handle.mark_closed();
        Ok(())
    }

    fn add_rsrc_fork(&mut self, _entry: EntryId) -> Result<()> {
        Err(Error::arg("Gutenberg files have no resource fork"))
    }

    fn free_space(&self) -> u64 {
        self.free_sectors_cache as u64 * PAYLOAD_PER_SECTOR as u64
    }

    fn notes(&self) -> &Notes {
        &self.notes
    }
}

impl Gutenberg {
    fn find_free_sector_avoiding(&mut self, already: &[(u8, u8)]) -> Result<(u8, u8)> {
        let mut used = self.used_sectors()?;
        used.extend_from_slice(already);
        for t in 0..self.tracks {
            for s in 0..SECTORS_PER_TRACK {
                if !used.contains(&(t as u8, s as u8)) {
                    return Ok((t as u8, s as u8));
                }
            }
        }
        Err(Error::DiskFull)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Order;

    fn blank_gutenberg() -> Gutenberg {
        let provider = ChunkProvider::new_ordered(vec![0u8; 35 * SECTORS_PER_TRACK * SECTOR_SIZE], Order::DosSector, true);
        let mut fs = Gutenberg::new(provider, 35);
        fs.format("", 0, false).unwrap();
        fs
    }

    #[test]
    fn format_then_scan_yields_empty_volume() {
        let mut fs = blank_gutenberg();
        fs.prepare_file_access(false).unwrap();
        assert_eq!(fs.entries.len(), 1);
    }

    #[test]
    fn create_write_read_round_trip_spans_sectors() {
        let mut fs = blank_gutenberg();
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "MANUSCRIPT", CreateMode::File).unwrap();
        let payload = vec![b'x'; PAYLOAD_PER_SECTOR * 3 + 10];
        let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        handle.write(&payload).unwrap();
        fs.close_file(handle).unwrap();

        let found = fs.find_file_entry(fs.get_vol_dir(), "MANUSCRIPT").unwrap();
        let mut handle = fs.open_file(found, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        let mut buf = vec![0u8; payload.len()];
        handle.read(&mut buf);
        assert_eq!(buf, payload);
    }

    #[test]
    fn delete_frees_chain() {
        let mut fs = blank_gutenberg();
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "DRAFT", CreateMode::File).unwrap();
        let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        handle.write(&vec![1u8; 1000]).unwrap();
        fs.close_file(handle).unwrap();
        fs.delete_file(id).unwrap();
        assert!(fs.find_file_entry(fs.get_vol_dir(), "DRAFT").is_err());
    }

    #[test]
    fn prepare_raw_access_is_refused_while_a_handle_is_open() {
        let mut fs = blank_gutenberg();
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "DRAFT", CreateMode::File).unwrap();
        let handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        assert!(fs.prepare_raw_access().is_err());
        fs.close_file(handle).unwrap();
        assert!(fs.prepare_raw_access().is_ok());
    }

    #[test]
    fn a_second_read_write_open_on_the_same_file_is_rejected() {
        let mut fs = blank_gutenberg();
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "DRAFT", CreateMode::File).unwrap();
        let _h1 = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        assert!(fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).is_err());
    }

    #[test]
    fn a_directory_entry_chaining_into_the_directory_track_is_rejected() {
        let mut fs = blank_gutenberg();
        fs.prepare_file_access(false).unwrap();
        let mut name = [b' '; NAME_LEN];
        name[..5].copy_from_slice(b"BOGUS");
        let e = DirEntry { name, first_track: DIR_TRACK as u8, first_sector: 0, length: 10 };
        fs.write_dir_entry(0, &e).unwrap();
        assert!(fs.prepare_file_access(false).is_err());
    }
}
