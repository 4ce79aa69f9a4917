//! RDOS filesystem engine.
//!
//! RDOS (the DOS variant Sirius/SSI-era titles such as *Galactic Attack*
//! booted from) keeps a single fixed directory track and allocates every
//! file as one contiguous run of sectors -- there is no VTOC bitmap and
//! no track/sector list, just a start sector and a sector count per
//! entry, the same shape as Pascal's contiguous files but addressed in
//! flat sector numbers instead of blocks. Free space is, as with Pascal,
//! whatever no entry's range covers.

use std::collections::HashMap;

use crate::chunk::ChunkProvider;
use crate::error::{Error, Result};
use crate::notes::Notes;

use super::{
    AccessMode, Capabilities, CreateMode, EntryId, FileEntry, FileHandle, FileSystem, ForkKind, FsKind, HandleTable,
};

const SECTOR_SIZE: usize = 256;
const DIR_TRACK: usize = 1;
/// [`crate::chunk::ChunkProvider`] addresses DOS-ordered sectors assuming
/// 16 per track; RDOS images are laid out the same way.
const SECTORS_PER_TRACK: usize = 16;
const ENTRY_SIZE: usize = 32;
const NAME_LEN: usize = 24;
const ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / ENTRY_SIZE;

fn is_name_valid(s: &str) -> bool {
    !s.is_empty() && s.len() <= NAME_LEN && s.chars().all(|c| c.is_ascii_graphic() || c == ' ')
}

#[derive(Clone)]
struct DirEntry {
    name: [u8; NAME_LEN],
    file_type: u8,
    start_sector: u16,
    sector_count: u16,
}

impl DirEntry {
    fn inactive() -> Self {
        Self { name: [0; NAME_LEN], file_type: 0, start_sector: 0, sector_count: 0 }
    }
    fn is_active(&self) -> bool {
        self.name[0] != 0
    }
    fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).trim_end().to_string()
    }
    fn from_bytes(b: &[u8]) -> Self {
        Self {
            name: b[0..NAME_LEN].try_into().unwrap(),
            file_type: b[NAME_LEN],
            start_sector: u16::from_le_bytes([b[NAME_LEN + 1], b[NAME_LEN + 2]]),
            sector_count: u16::from_le_bytes([b[NAME_LEN + 3], b[NAME_LEN + 4]]),
        }
    }
    fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut b = [0u8; ENTRY_SIZE];
        b[0..NAME_LEN].copy_from_slice(&self.name);
        b[NAME_LEN] = self.file_type;
        b[NAME_LEN + 1..NAME_LEN + 3].copy_from_slice(&self.start_sector.to_le_bytes());
        b[NAME_LEN + 3..NAME_LEN + 5].copy_from_slice(&self.sector_count.to_le_bytes());
        b
    }
}

struct Location {
    slot: usize,
}

pub struct Rdos {
    provider: ChunkProvider,
    tracks: usize,
    entries: Vec<FileEntry>,
    locations: HashMap<usize, Location>,
    free_sectors_cache: u16,
    notes: Notes,
    handles: HandleTable,
}

impl Rdos {
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
    /// or names a run of sectors that actually fits on the volume and
    /// doesn't land on the directory track. Random/garbage bytes misread
    /// as entries almost never satisfy both, so this is what keeps a
    /// buffer of noise from binding as an emptyish RDOS volume.
    fn validate_directory_entries(&mut self) -> Result<()> {
        let n = self.num_dir_slots();
        let total = self.total_sectors();
        for i in 0..n {
            let e = self.read_dir_entry(i)?;
            if !e.is_active() {
                continue;
            }
            if !e.name.iter().all(|&b| b == 0 || (0x20..=0x7e).contains(&b)) {
                return Err(Error::format("RDOS directory entry has a non-ASCII name"));
            }
            if e.sector_count == 0 || e.start_sector >= total || e.start_sector + e.sector_count > total {
                return Err(Error::format("RDOS directory entry names sectors off the volume"));
            }
            let (dir_start, dir_end) = (DIR_TRACK as u16 * SECTORS_PER_TRACK as u16, (DIR_TRACK as u16 + 1) * SECTORS_PER_TRACK as u16);
            if e.start_sector < dir_end && e.start_sector + e.sector_count > dir_start {
                return Err(Error::format("RDOS directory entry overlaps the directory track"));
            }
        }
        Ok(())
    }

    fn num_free_sectors(&mut self) -> Result<u16> {
        let entries = self.read_all_entries()?;
        let mut free = 0u16;
        for s in 0..self.total_sectors() {
            if Self::is_sector_free(&entries, s) {
                free += 1;
            }
        }
        Ok(free)
    }

    fn total_sectors(&self) -> u16 {
        (self.tracks * SECTORS_PER_TRACK) as u16
    }

    fn num_dir_sectors(&self) -> usize {
        SECTORS_PER_TRACK
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

    fn num_dir_slots(&self) -> usize {
        self.num_dir_sectors() * ENTRIES_PER_SECTOR
    }

    fn is_sector_free(entries: &[DirEntry], sector: u16) -> bool {
        let (dir_track_start, dir_track_end) = (DIR_TRACK as u16 * SECTORS_PER_TRACK as u16, (DIR_TRACK as u16 + 1) * SECTORS_PER_TRACK as u16);
        if sector >= dir_track_start && sector < dir_track_end {
            return false;
        }
        !entries.iter().any(|e| sector >= e.start_sector && sector < e.start_sector + e.sector_count)
    }

    fn get_available_sectors(&mut self, num: u16) -> Result<u16> {
        let entries = self.read_all_entries()?;
        let mut start = 0u16;
        let mut run = 0u16;
        for s in 0..self.total_sectors() {
            if Self::is_sector_free(&entries, s) {
                if run == 0 {
                    start = s;
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

    fn read_all_entries(&mut self) -> Result<Vec<DirEntry>> {
        let n = self.num_dir_slots();
        let mut out = Vec::new();
        for i in 0..n {
            let e = self.read_dir_entry(i)?;
            if e.is_active() {
                out.push(e);
            }
        }
        Ok(out)
    }

    fn rebuild(&mut self) -> Result<()> {
        self.entries.clear();
        self.locations.clear();
        let root_id = EntryId(0);
        let mut root = FileEntry::new_file(root_id, root_id, "", FsKind::Rdos);
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
            let mut fe = FileEntry::new_file(id, root_id, &e.name_str(), FsKind::Rdos);
            fe.file_type = e.file_type as u32;
            fe.data_length = e.sector_count as u64 * SECTOR_SIZE as u64;
            fe.storage_size = fe.data_length;
            self.entries.push(fe);
            self.locations.insert(id.0, Location { slot });
        }
        self.free_sectors_cache = self.num_free_sectors()?;
        Ok(())
    }
}

impl FileSystem for Rdos {
    fn kind(&self) -> FsKind {
        FsKind::Rdos
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
            return Err(Error::arg("RDOS has no subdirectories"));
        }
        if !is_name_valid(name) {
            return Err(Error::arg(format!("invalid RDOS filename {name}")));
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
        let slot = slot.ok_or_else(|| Error::format("RDOS directory is full"))?;
        let start = self.get_available_sectors(1)?;
        let mut raw_name = [0u8; NAME_LEN];
        raw_name[..name.len()].copy_from_slice(name.as_bytes());
        let e = DirEntry { name: raw_name, file_type: 0, start_sector: start, sector_count: 1 };
        self.write_dir_entry(slot, &e)?;
        self.rebuild()?;
        self.find_file_entry(parent, name)
    }

    fn delete_file(&mut self, entry: EntryId) -> Result<()> {
        let slot = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
        self.write_dir_entry(slot, &DirEntry::inactive())?;
        self.rebuild()
    }

    fn move_file(&mut self, entry: EntryId, new_parent: EntryId, new_name: &str) -> Result<()> {
        if new_parent != EntryId(0) {
            return Err(Error::arg("RDOS has no subdirectories"));
        }
        if !is_name_valid(new_name) {
            return Err(Error::arg(format!("invalid RDOS filename {new_name}")));
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
            return Err(Error::not_found("RDOS has no subdirectories"));
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
            return Err(Error::arg("RDOS files have only a data fork"));
        }
        let slot = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
        let e = self.read_dir_entry(slot)?;
        self.handles.acquire(entry, part, access)?;
        let mut out = Vec::new();
        for s in e.start_sector..e.start_sector + e.sector_count {
            let track = s as usize / SECTORS_PER_TRACK;
            let sector = s as usize % SECTORS_PER_TRACK;
            match self.provider.read_sector(track, sector) {
                Ok(bytes) => out.extend(bytes),
                Err(err) => {
                    self.handles.release(entry, part, access);
                    return Err(err);
                }
            }
        }
        Ok(FileHandle::new(entry, part, access, out))
    }

    fn close_file(&mut self, mut handle: FileHandle) -> Result<()> {
        self.handles.release(handle.entry, handle.fork, handle.mode);
        if handle.is_dirty() {
            let slot = self.locations.get(&handle.entry.0).ok_or_else(|| Error::not_found("no such file"))?.slot;
            let buf = std::mem::take(&mut handle.buf);
            let mut e = self.read_dir_entry(slot)?;
            let needed = buf.len().div_ceil(SECTOR_SIZE).max(1) as u16;
            if needed > e.sector_count {
                e.start_sector = self.get_available_sectors(needed)?;
            }
            e.sector_count = needed;
            for i in 0..needed {
                let s = (e.start_sector + i) as usize;
                let track = s / SECTORS_PER_TRACK;
                let sector = s % SECTORS_PER_TRACK;
                let start = i as usize * SECTOR_SIZE;
                let end = (start + SECTOR_SIZE).min(buf.len());
                let mut sec_buf = vec![0u8; SECTOR_SIZE];
                if start < buf.len() {
                    sec_buf[..end - start].copy_from_slice(&buf[start..end]);
                }
                self.provider.write_sector(track, sector, &sec_buf)?;
            }
            self.write_dir_entry(slot, &e)?;
            self.rebuild()?;
        }
        handle.mark_closed();
        Ok(())
    }

    fn add_rsrc_fork(&mut self, _entry: EntryId) -> Result<()> {
        Err(Error::arg("RDOS files have no resource fork"))
    }

    fn free_space(&self) -> u64 {
        self.free_sectors_cache as u64 * SECTOR_SIZE as u64
    }

    fn notes(&self) -> &Notes {
        &self.notes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Order;

    fn blank_rdos() -> Rdos {
        let provider = ChunkProvider::new_ordered(vec![0u8; 35 * SECTORS_PER_TRACK * SECTOR_SIZE], Order::DosSector, true);
        let mut fs = Rdos::new(provider, 35);
        fs.format("", 0, false).unwrap();
        fs
    }

    #[test]
    fn format_then_scan_yields_empty_volume() {
        let mut fs = blank_rdos();
        fs.prepare_file_access(false).unwrap();
        assert_eq!(fs.entries.len(), 1);
    }

    #[test]
    fn create_write_read_round_trip() {
        let mut fs = blank_rdos();
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "GAME.BIN", CreateMode::File).unwrap();
        let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        handle.write(b"contiguous run").unwrap();
        fs.close_file(handle).unwrap();

        let found = fs.find_file_entry(fs.get_vol_dir(), "GAME.BIN").unwrap();
        let mut handle = fs.open_file(found, AccessMode::ReadOnly, ForkKind::Data).unwrap();
        let mut buf = vec![0u8; 14];
        handle.read(&mut buf);
        assert_eq!(&buf, b"contiguous run");
    }

    #[test]
    fn delete_frees_sectors_for_reuse() {
        let mut fs = blank_rdos();
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "A", CreateMode::File).unwrap();
        fs.delete_file(id).unwrap();
        assert!(fs.find_file_entry(fs.get_vol_dir(), "A").is_err());
        fs.create_file(fs.get_vol_dir(), "B", CreateMode::File).unwrap();
    }

    #[test]
    fn prepare_raw_access_is_refused_while_a_handle_is_open() {
        let mut fs = blank_rdos();
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "A", CreateMode::File).unwrap();
        let handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        assert!(fs.prepare_raw_access().is_err());
        fs.close_file(handle).unwrap();
        assert!(fs.prepare_raw_access().is_ok());
    }

    #[test]
    fn a_second_read_write_open_on_the_same_file_is_rejected() {
        let mut fs = blank_rdos();
        fs.prepare_file_access(false).unwrap();
        let id = fs.create_file(fs.get_vol_dir(), "A", CreateMode::File).unwrap();
        let _h1 = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
        assert!(fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).is_err());
    }

    #[test]
    fn a_directory_entry_naming_sectors_off_the_volume_is_rejected() {
        let mut fs = blank_rdos();
        fs.prepare_file_access(false).unwrap();
        let mut name = [b' '; NAME_LEN];
        name[..5].copy_from_slice(b"BOGUS");
        let e = DirEntry { name, file_type: 0, start_sector: 9000, sector_count: 5 };
        fs.write_dir_entry(0, &e).unwrap();
        assert!(fs.prepare_file_access(false).is_err());
    }
}
