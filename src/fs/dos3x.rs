//! DOS 3.x (3.2/3.3) filesystem engine.
//!
//! One VTOC sector at track 17 sector 0 anchors a catalog chain of
//! directory sectors (7 thirty-five-byte entries each), each entry
//! pointing at the first sector of a track/sector list that in turn
//! chains to the file's data sectors. There are no subdirectories, no
//! dates, and file identity is a 30-byte high-bit-ASCII name padded with
//! negative spaces (0xA0). Allocation is a per-track 32-bit bitmap
//! stored in the VTOC, one bit per sector, set = free.

use std::collections::HashMap;

use crate::chunk::ChunkProvider;
use crate::error::{Error, Result};
use crate::notes::Notes;

use super::{
    AccessMode, Capabilities, CreateMode, EntryId, FileEntry, FileHandle, FileSystem, ForkKind, FsKind, HandleTable,
};

pub const VTOC_TRACK: usize = 17;
const MAX_DIRECTORY_REPS: usize = 100;
const MAX_TSLIST_REPS: usize = 1000;
const NAME_LEN: usize = 30;
const ENTRY_LEN: usize = 35;
const TSLIST_HEADER_LEN: usize = 0x0c;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FileType {
    Text = 0x00,
    Integer = 0x01,
    Applesoft = 0x02,
    Binary = 0x04,
}

impl FileType {
    fn from_u8(v: u8) -> Option<Self> {
        match v & 0x7f {
            0x00 => Some(FileType::Text),
            0x01 => Some(FileType::Integer),
            0x02 => Some(FileType::Applesoft),
            0x04 => Some(FileType::Binary),
            _ => None,
        }
    }
}

/// Negative-ASCII, space-padded (0xA0) 30-byte catalog name.
fn string_to_name(s: &str) -> Result<[u8; NAME_LEN]> {
    if s.len() > NAME_LEN || s.is_empty() {
        return Err(Error::arg("DOS 3.x filenames are 1-30 characters"));
    }
    if s.contains(',') {
        return Err(Error::arg("DOS 3.x filenames cannot contain a comma"));
    }
    if s.ends_with(' ') {
        return Err(Error::arg("DOS 3.x filenames cannot end with a space"));
    }
    let mut ans = [0xa0u8; NAME_LEN];
    for (i, b) in s.bytes().enumerate() {
        if b >= 0x80 {
            return Err(Error::arg("DOS 3.x filenames are plain ASCII"));
        }
        ans[i] = b | 0x80;
    }
    Ok(ans)
}

fn name_to_string(raw: &[u8; NAME_LEN]) -> String {
    let trimmed: Vec<u8> = raw.iter().map(|b| b & 0x7f).collect();
    String::from_utf8_lossy(&trimmed).trim_end().to_string()
}

struct Vtoc {
    track1: u8,
    sector1: u8,
    release: u8,
    volume: u8,
    max_t_s_pairs: u8,
    last_track: u8,
    last_direction: i8,
    tracks: u8,
    sectors: u8,
    bitmap: Vec<u8>,
}

impl Vtoc {
    fn from_bytes(b: &[u8]) -> Self {
        Self {
            track1: b[0x01],
            sector1: b[0x02],
            release: b[0x03],
            volume: b[0x06],
            max_t_s_pairs: b[0x27],
            last_track: b[0x30],
            last_direction: b[0x31] as i8,
            tracks: b[0x34],
            sectors: b[0x35],
            bitmap: b[0x38..0x38 + 50 * 4].to_vec(),
        }
    }

    fn to_bytes(&self) -> [u8; 256] {
        let mut b = [0u8; 256];
        b[0x01] = self.track1;
        b[0x02] = self.sector1;
        b[0x03] = self.release;
        b[0x06] = self.volume;
        b[0x27] = self.max_t_s_pairs;
        b[0x30] = self.last_track;
        b[0x31] = self.last_direction as u8;
        b[0x34] = self.tracks;
        b[0x35] = self.sectors;
        b[0x36] = 0x00;
        b[0x37] = 0x01;
        b[0x38..0x38 + self.bitmap.len()].copy_from_slice(&self.bitmap);
        b
    }

    /// DOS addresses a track's map with `sector + 32 - sectors_per_track`
    /// so that the low-order bit always lands on the highest-numbered
    /// sector regardless of 13- or 16-sector formatting.
    fn eff_sec(&self, sector: u8) -> u32 {
        (sector as i32 + 32 - self.sectors as i32) as u32
    }

    fn get_track_map(&self, track: u8) -> u32 {
        let base = track as usize * 4;
        u32::from_be_bytes([self.bitmap[base], self.bitmap[base + 1], self.bitmap[base + 2], self.bitmap[base + 3]])
    }

    fn save_track_map(&mut self, track: u8, map: u32) {
        let base = track as usize * 4;
        self.bitmap[base..base + 4].copy_from_slice(&map.to_be_bytes());
    }

    fn is_sector_free(&self, track: u8, sector: u8) -> bool {
        let map = self.get_track_map(track);
        let eff = self.eff_sec(sector);
        map & (1 << eff) != 0
    }

    fn allocate_sector(&mut self, track: u8, sector: u8) {
        let eff = self.eff_sec(sector);
        let map = self.get_track_map(track) & !(1 << eff);
        self.save_track_map(track, map);
    }

    fn deallocate_sector(&mut self, track: u8, sector: u8) {
        let eff = self.eff_sec(sector);
        let map = self.get_track_map(track) | (1 << eff);
        self.save_track_map(track, map);
    }

    fn num_free_sectors(&self) -> usize {
        let mut n = 0;
        for track in 0..self.tracks {
            for sector in 0..self.sectors {
                if self.is_sector_free(track, sector) {
                    n += 1;
                }
            }
        }
        n
    }
}

#[derive(Clone)]
struct DirEntry {
    tsl_track: u8,
    tsl_sector: u8,
    file_type: u8,
    name: [u8; NAME_LEN],
    sectors: u16,
}

impl DirEntry {
    fn empty() -> Self {
        Self { tsl_track: 0, tsl_sector: 0, file_type: 0, name: [0xa0; NAME_LEN], sectors: 0 }
    }
    fn from_bytes(b: &[u8]) -> Self {
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&b[0x03..0x03 + NAME_LEN]);
        Self {
            tsl_track: b[0x00],
            tsl_sector: b[0x01],
            file_type: b[0x02],
            name,
            sectors: u16::from_le_bytes([b[0x21], b[0x22]]),
        }
    }
    fn to_bytes(&self) -> [u8; ENTRY_LEN] {
        let mut b = [0u8; ENTRY_LEN];
        b[0x00] = self.tsl_track;
        b[0x01] = self.tsl_sector;
        b[0x02] = self.file_type;
        b[0x03..0x03 + NAME_LEN].copy_from_slice(&self.name);
        let s = self.sectors.to_le_bytes();
        b[0x21] = s[0];
        b[0x22] = s[1];
        b
    }
    fn is_unused(&self) -> bool {
        self.tsl_track == 0
    }
    fn is_deleted(&self) -> bool {
        self.tsl_track == 0xff
    }
    fn is_locked(&self) -> bool {
        self.file_type & 0x80 != 0
    }
}

struct DirSector {
    next_track: u8,
    next_sector: u8,
    entries: [DirEntry; 7],
}

impl DirSector {
    fn empty() -> Self {
        Self { next_track: 0, next_sector: 0, entries: std::array::from_fn(|_| DirEntry::empty()) }
    }
    fn from_bytes(b: &[u8]) -> Self {
        let mut entries: [DirEntry; 7] = std::array::from_fn(|_| DirEntry::empty());
        for (i, e) in entries.iter_mut().enumerate() {
            let base = 0x0b + i * ENTRY_LEN;
            *e = DirEntry::from_bytes(&b[base..base + ENTRY_LEN]);
        }
        Self { next_track: b[0x01], next_sector: b[0x02], entries }
    }
    fn to_bytes(&self) -> [u8; 256] {
        let mut b = [0u8; 256];
        b[0x01] = self.next_track;
        b[0x02] = self.next_sector;
        for (i, e) in self.entries.iter().enumerate() {
            let base = 0x0b + i * ENTRY_LEN;
            b[base..base + ENTRY_LEN].copy_from_slice(&e.to_bytes());
        }
        b
    }
}

struct TsList {
    next_track: u8,
    next_sector: u8,
    sector_base: u16,
    pairs: Vec<(u8, u8)>,
}

impl TsList {
    fn empty(max_pairs: usize) -> Self {
        Self { next_track: 0, next_sector: 0, sector_base: 0, pairs: vec![(0, 0); max_pairs] }
    }
    fn from_bytes(b: &[u8], max_pairs: usize) -> Self {
        let mut pairs = Vec::with_capacity(max_pairs);
        for p in 0..max_pairs {
            let base = TSLIST_HEADER_LEN + p * 2;
            pairs.push((b[base], b[base + 1]));
        }
        Self {
            next_track: b[0x01],
            next_sector: b[0x02],
            sector_base: u16::from_le_bytes([b[0x05], b[0x06]]),
            pairs,
        }
    }
    fn to_bytes(&self) -> [u8; 256] {
        let mut b = [0u8; 256];
        b[0x01] = self.next_track;
        b[0x02] = self.next_sector;
        let sb = self.sector_base.to_le_bytes();
        b[0x05] = sb[0];
        b[0x06] = sb[1];
        for (p, (t, s)) in self.pairs.iter().enumerate() {
            let base = TSLIST_HEADER_LEN + p * 2;
            b[base] = *t;
            b[base + 1] = *s;
        }
        b
    }
}

/// Where a catalog entry's bookkeeping lives on disk, kept alongside the
/// generic [`FileEntry`] so write-back knows where to go without
/// re-scanning the catalog chain.
struct Location {
    dir_track: u8,
    dir_sector: u8,
    slot: usize,
}

pub struct Dos3x {
    provider: ChunkProvider,
    vtoc: Vtoc,
    entries: Vec<FileEntry>,
    locations: HashMap<usize, Location>,
    notes: Notes,
    handles: HandleTable,
}

impl Dos3x {
    pub fn new(provider: ChunkProvider) -> Self {
        Self {
            provider,
            vtoc: Vtoc { track1: VTOC_TRACK as u8, sector1: 0, release: 3, volume: 254, max_t_s_pairs: 0x7a, last_track: VTOC_TRACK as u8, last_direction: 1, tracks: 35, sectors: 16, bitmap: vec![0; 50 * 4] },
            entries: Vec::new(),
            locations: HashMap::new(),
            notes: Notes::new(),
            handles: HandleTable::new(),
        }
    }

    fn read_vtoc(&mut self) -> Result<()> {
        let buf = self.provider.read_sector(VTOC_TRACK, 0)?;
        self.vtoc = Vtoc::from_bytes(&buf);
        Ok(())
    }

    fn write_vtoc(&mut self) -> Result<()> {
        self.provider.write_sector(VTOC_TRACK, 0, &self.vtoc.to_bytes())
    }

    fn get_next_free_sector(&mut self) -> Result<[u8; 2]> {
        let tvtoc = self.vtoc.track1;
        for track in (1..tvtoc).rev().chain(tvtoc + 1..self.vtoc.tracks) {
            for sector in (0..self.vtoc.sectors).rev() {
                if self.vtoc.is_sector_free(track, sector) {
                    return Ok([track, sector]);
                }
            }
        }
        Err(Error::DiskFull)
    }

    fn get_next_directory_slot(&mut self) -> Result<(u8, u8, usize)> {
        let mut ts = (self.vtoc.track1, self.vtoc.sector1);
        for _ in 0..MAX_DIRECTORY_REPS {
            let buf = self.provider.read_sector(ts.0 as usize, ts.1 as usize)?;
            let dir = DirSector::from_bytes(&buf);
            for (i, e) in dir.entries.iter().enumerate() {
                if e.is_unused() || e.is_deleted() {
                    return Ok((ts.0, ts.1, i));
                }
            }
            if dir.next_track == 0 {
                return Err(Error::DiskFull);
            }
            ts = (dir.next_track, dir.next_sector);
        }
        Err(Error::damaged("DOS 3.x catalog chain does not terminate"))
    }

    fn scan_catalog(&mut self) -> Result<()> {
        self.entries.clear();
        self.locations.clear();
        self.entries.push(FileEntry::new_file(EntryId(0), EntryId(0), "", FsKind::Dos3x));
        self.entries[0].is_directory = true;
        self.entries[0].containing_dir = None;

        let mut ts = (self.vtoc.track1, self.vtoc.sector1);
        for _ in 0..MAX_DIRECTORY_REPS {
            let buf = self.provider.read_sector(ts.0 as usize, ts.1 as usize)?;
            let dir = DirSector::from_bytes(&buf);
            for (slot, e) in dir.entries.iter().enumerate() {
                if e.is_unused() || e.is_deleted() {
                    continue;
                }
                let id = EntryId(self.entries.len());
                let mut entry = FileEntry::new_file(id, EntryId(0), &name_to_string(&e.name), FsKind::Dos3x);
                entry.file_type = (e.file_type & 0x7f) as u32;
                entry.access_flags = if e.is_locked() { 0x01 } else { 0 };
                entry.data_length = e.sectors as u64 * 256;
                entry.storage_size = e.sectors as u64 * 256;
                self.locations.insert(id.0, Location { dir_track: ts.0, dir_sector: ts.1, slot });
                self.entries.push(entry);
            }
            if dir.next_track == 0 {
                break;
            }
            ts = (dir.next_track, dir.next_sector);
        }
        Ok(())
    }

    fn read_file_bytes(&mut self, loc_slot: usize) -> Result<(Vec<u8>, u8)> {
        let location = self.locations.get(&loc_slot).ok_or_else(|| Error::not_found("file has no catalog entry"))?;
        let buf = self.provider.read_sector(location.dir_track as usize, location.dir_sector as usize)?;
        let dir = DirSector::from_bytes(&buf);
        let dir_entry = &dir.entries[location.slot % 7];
        let ftype = dir_entry.file_type;
        let mut next_tslist = (dir_entry.tsl_track, dir_entry.tsl_sector);
        let max_pairs = self.vtoc.max_t_s_pairs as usize;
        let mut out = Vec::new();
        for _ in 0..MAX_TSLIST_REPS {
            let tbuf = self.provider.read_sector(next_tslist.0 as usize, next_tslist.1 as usize)?;
            let tsl = TsList::from_bytes(&tbuf, max_pairs);
            for (t, s) in &tsl.pairs {
                if *t > 0 {
                    out.extend(self.provider.read_sector(*t as usize, *s as usize)?);
                }
            }
            if tsl.next_track == 0 {
                return Ok((out, ftype));
            }
            next_tslist = (tsl.next_track, tsl.next_sector);
        }
        Err(Error::damaged("DOS 3.x track/sector list does not terminate"))
    }

    fn free_file_chain(&mut self, loc_slot: usize) -> Result<()> {
        let location_track;
        let location_sector;
        let location_slot;
        {
            let location = self.locations.get(&loc_slot).ok_or_else(|| Error::not_found("file has no catalog entry"))?;
            location_track = location.dir_track;
            location_sector = location.dir_sector;
            location_slot = location.slot;
        }
        let buf = self.provider.read_sector(location_track as usize, location_sector as usize)?;
        let dir = DirSector::from_bytes(&buf);
        let dir_entry = dir.entries[location_slot % 7].clone();
        let max_pairs = self.vtoc.max_t_s_pairs as usize;
        let mut next_tslist = (dir_entry.tsl_track, dir_entry.tsl_sector);
        for _ in 0..MAX_TSLIST_REPS {
            if next_tslist == (0, 0) {
                break;
            }
            let tbuf = self.provider.read_sector(next_tslist.0 as usize, next_tslist.1 as usize)?;
            let tsl = TsList::from_bytes(&tbuf, max_pairs);
            for (t, s) in &tsl.pairs {
                if *t > 0 {
                    self.vtoc.deallocate_sector(*t, *s);
                }
            }
            self.vtoc.deallocate_sector(next_tslist.0, next_tslist.1);
            let advance = (tsl.next_track, tsl.next_sector);
            if tsl.next_track == 0 {
                break;
            }
            next_tslist = advance;
        }
        Ok(())
    }

    fn write_file_bytes(&mut self, loc_slot: usize, data: &[u8], file_type: u8) -> Result<()> {
        self.free_file_chain(loc_slot)?;

        let data_sectors = data.len().div_ceil(256).max(1);
        let max_pairs = self.vtoc.max_t_s_pairs as usize;
        let tslist_sectors = data_sectors.div_ceil(max_pairs).max(1);
        if data_sectors + tslist_sectors > self.vtoc.num_free_sectors() {
            return Err(Error::DiskFull);
        }

        let mut tslist_ts = self.get_next_free_sector()?;
        self.vtoc.allocate_sector(tslist_ts[0], tslist_ts[1]);
        let first_tslist = tslist_ts;
        let mut tslist = TsList::empty(max_pairs);
        let mut p = 0usize;
        let mut sector_base = 0usize;

        for s in 0..data_sectors {
            let start = s * 256;
            let end = (start + 256).min(data.len());
            let mut chunk = vec![0u8; 256];
            chunk[..end - start].copy_from_slice(&data[start..end]);
            let data_ts = self.get_next_free_sector()?;
            self.vtoc.allocate_sector(data_ts[0], data_ts[1]);
            tslist.pairs[p] = (data_ts[0], data_ts[1]);
            self.provider.write_sector(data_ts[0] as usize, data_ts[1] as usize, &chunk)?;
            p += 1;
            if p == max_pairs && s + 1 != data_sectors {
                let next_tslist_ts = self.get_next_free_sector()?;
                self.vtoc.allocate_sector(next_tslist_ts[0], next_tslist_ts[1]);
                tslist.next_track = next_tslist_ts[0];
                tslist.next_sector = next_tslist_ts[1];
                self.provider.write_sector(tslist_ts[0] as usize, tslist_ts[1] as usize, &tslist.to_bytes())?;
                sector_base += max_pairs;
                tslist_ts = next_tslist_ts;
                tslist = TsList::empty(max_pairs);
                tslist.sector_base = sector_base as u16;
                p = 0;
            }
        }
        self.provider.write_sector(tslist_ts[0] as usize, tslist_ts[1] as usize, &tslist.to_bytes())?;

        let location = self.locations.get(&loc_slot).ok_or_else(|| Error::not_found("file has no catalog entry"))?;
        let dbuf = self.provider.read_sector(location.dir_track as usize, location.dir_sector as usize)?;
        let mut dir = DirSector::from_bytes(&dbuf);
        let locked = dir.entries[location.slot % 7].is_locked();
        let entry = &mut dir.entries[location.slot % 7];
        entry.tsl_track = first_tslist[0];
        entry.tsl_sector = first_tslist[1];
        entry.file_type = file_type | if locked { 0x80 } else { 0 };
        entry.sectors = (data_sectors + tslist_sectors) as u16;
        let (dt, ds) = (location.dir_track, location.dir_sector);
        self.provider.write_sector(dt as usize, ds as usize, &dir.to_bytes())?;
        self.write_vtoc()?;
        Ok(())
    }
}

impl FileSystem for Dos3x {
    fn kind(&self) -> FsKind {
        FsKind::Dos3x
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { has_resource_forks: false, has_disk_images: false, case_sensitive_names: false }
    }

    fn format(&mut self, _volume_name: &str, volume_num: u8, make_bootable: bool) -> Result<()> {
        if volume_num == 0 {
            return Err(Error::arg("DOS 3.x volume numbers are 1-254"));
        }
        let tracks = 35u8;
        let sectors = 16u8;
        self.vtoc = Vtoc {
            track1: VTOC_TRACK as u8,
            sector1: sectors - 1,
            release: 3,
            volume: volume_num,
            max_t_s_pairs: 0x7a,
            last_track: VTOC_TRACK as u8,
            last_direction: 1,
            tracks,
            sectors,
            bitmap: vec![0; 50 * 4],
        };
        let all_free: u32 = 0xffff_0000;
        for track in 1..tracks {
            self.vtoc.save_track_map(track, all_free);
        }
        if make_bootable {
            for track in 1..3 {
                self.vtoc.save_track_map(track, 0);
            }
        }
        self.vtoc.save_track_map(VTOC_TRACK as u8, 0);
        self.write_vtoc()?;

        let mut dir = DirSector::empty();
        self.provider.write_sector(VTOC_TRACK, sectors as usize - 1, &dir.to_bytes())?;
        for sec in (1..sectors as usize - 1).rev() {
            dir.next_track = VTOC_TRACK as u8;
            dir.next_sector = (sec + 1) as u8;
            self.provider.write_sector(VTOC_TRACK, sec, &dir.to_bytes())?;
        }
        self.entries.clear();
        self.locations.clear();
        self.notes = Notes::new();
        self.notes.info("volume formatted");
        Ok(())
    }

    fn prepare_raw_access(&mut self) -> Result<()> {
        if !self.handles.is_empty() {
            return Err(Error::txn_state("cannot drop to raw access while a file handle is open"));
        }
        Ok(())
    }

    fn prepare_file_access(&mut self, _deep_scan: bool) -> Result<()> {
        self.read_vtoc()?;
        if self.vtoc.volume == 0 || self.vtoc.volume > 254 {
            self.notes.warn("VTOC volume number out of range; catalog may be damaged");
        }
        if self.vtoc.sectors != 13 && self.vtoc.sectors != 16 && self.vtoc.sectors != 32 {
            return Err(Error::format("VTOC declares an impossible sector count"));
        }
        self.scan_catalog()?;
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
            return Err(Error::arg("DOS 3.x has no subdirectories"));
        }
        if mode == CreateMode::Directory {
            return Err(Error::arg("DOS 3.x has no subdirectories"));
        }
        let raw_name = string_to_name(name)?;
        if self.find_file_entry(parent, name).is_ok() {
            return Err(Error::arg(format!("a file named {name} already exists")));
        }
        let max_pairs = self.vtoc.max_t_s_pairs as usize;
        if 2 > self.vtoc.num_free_sectors() {
            return Err(Error::DiskFull);
        }
        let tslist_ts = self.get_next_free_sector()?;
        self.vtoc.allocate_sector(tslist_ts[0], tslist_ts[1]);
        self.provider.write_sector(tslist_ts[0] as usize, tslist_ts[1] as usize, &TsList::empty(max_pairs).to_bytes())?;

        let (dt, ds, slot) = self.get_next_directory_slot()?;
        let dbuf = self.provider.read_sector(dt as usize, ds as usize)?;
        let mut dir = DirSector::from_bytes(&dbuf);
        dir.entries[slot] = DirEntry { tsl_track: tslist_ts[0], tsl_sector: tslist_ts[1], file_type: FileType::Binary as u8, name: raw_name, sectors: 1 };
        self.provider.write_sector(dt as usize, ds as usize, &dir.to_bytes())?;
        self.write_vtoc()?;

        let id = EntryId(self.entries.len());
        let mut entry = FileEntry::new_file(id, parent, name, FsKind::Dos3x);
        entry.file_type = FileType::Binary as u32;
        self.locations.insert(id.0, Location { dir_track: dt, dir_sector: ds, slot });
        self.entries.push(entry);
        Ok(id)
    }

    fn delete_file(&mut self, entry: EntryId) -> Result<()> {
        if self.entries.get(entry.0).map(|e| e.access_flags & 0x01 != 0).unwrap_or(false) {
            return Err(Error::arg("file is locked"));
        }
        self.free_file_chain(entry.0)?;
        let location = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("file has no catalog entry"))?;
        let (dt, ds, slot) = (location.dir_track, location.dir_sector, location.slot % 7);
        let dbuf = self.provider.read_sector(dt as usize, ds as usize)?;
        let mut dir = DirSector::from_bytes(&dbuf);
        dir.entries[slot].tsl_track = 0xff;
        self.provider.write_sector(dt as usize, ds as usize, &dir.to_bytes())?;
        self.write_vtoc()?;
        self.locations.remove(&entry.0);
        Ok(())
    }

    fn move_file(&mut self, entry: EntryId, new_parent: EntryId, new_name: &str) -> Result<()> {
        if new_parent != EntryId(0) {
            return Err(Error::arg("DOS 3.x has no subdirectories"));
        }
        if self.entries.get(entry.0).map(|e| e.access_flags & 0x01 != 0).unwrap_or(false) {
            return Err(Error::arg("file is locked"));
        }
        let raw_name = string_to_name(new_name)?;
        let location = self.locations.get(&entry.0).ok_or_else(|| Error::not_found("file has no catalog entry"))?;
        let (dt, ds, slot) = (location.dir_track, location.dir_sector, location.slot % 7);
        let dbuf = self.provider.read_sector(dt as usize, ds as usize)?;
        let mut dir = DirSector::from_bytes(&dbuf);
        dir.entries[slot].name = raw_name;
        self.provider.write_sector(dt as usize, ds as usize, &dir.to_bytes())?;
        if let Some(e) = self.entries.get_mut(entry.0) {
            e.filename = new_name.to_string();
            e.raw_filename = raw_name.to_vec();
        }
        Ok(())
    }

    fn find_file_entry(&self, parent: EntryId, name: &str) -> Result<EntryId> {
        if parent != EntryId(0) {
            return Err(Error::not_found("DOS 3.x has no subdirectories"));
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
            return Err(Error::arg("DOS 3.x files have only a data fork"));
        }
        if access == AccessMode::ReadWrite && self.entries.get(entry.0).map(|e| e.access_flags & 0x01 != 0).unwrap_or(false) {
            return Err(Error::arg("file is locked"));
        }
        self.handles.acquire(entry, part, access)?;
        let (bytes, _ftype) = self.read_file_bytes(entry.0).map_err(|e| {
            self.handles.release(entry, part, access);
            e
        })?;
        Ok(FileHandle::new(entry, part, access, bytes))
    }

    fn close_file(&mut self, mut handle: FileHandle) -> Result<()> {
        if handle.is_dirty() {
            let file_type = self.entries.get(handle.entry.0).map(|e| e.file_type as u8).unwrap_or(FileType::Binary as u8);
            let buf = std::mem::take(&mut handle.buf);
            self.write_file_bytes(handle.entry.0, &buf, file_type)?;
            if let Some(e) = self.entries.get_mut(handle.entry.0) {
                e.data_length = buf.len() as u64;
            }
        }
        self.handles.release(handle.entry, handle.fork, handle.mode);
        handle.mark_closed();
        Ok(())
    }

    fn add_rsrc_fork(&mut self, _entry: EntryId) -> Result<()> {
        Err(Error::arg("DOS 3.x files have no resource fork"))
    }

    fn free_space(&self) -> u64 {
        self.vtoc.num_free_sectors() as u64 * 256
    }

    fn notes(&self) -> &Notes {
        &self.notes
    }
}
