//! AppleSingle / AppleDouble archive engine.
//!
//! Both formats carry exactly one logical file as a small header plus a
//! handful of typed entries -- real name, timestamps, ProDOS/HFS type
//! info, and the data and resource forks themselves. AppleSingle inlines
//! every entry, including the data fork, into one stream. AppleDouble
//! splits the same information across a paired plain data file and a
//! header file that omits `DataFork`; this engine models the header
//! stream (the only one with structure worth parsing) and tracks the
//! data fork's bytes the same way the data fork of any other entry is
//! tracked, simply excluding it from what `commit_transaction` writes
//! when the variant is `AppleDouble`.
//!
//! On-disk layout follows the conventions already used for binary
//! container formats in this crate: `binrw` derives for the fixed and
//! variable-length records, with entry offsets recomputed on write the
//! same way the upstream implementation this was adapted from does it.

use std::io::Cursor;

use binrw::io::SeekFrom;
use binrw::{BinRead, BinWrite};
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Error, Result};
use crate::notes::Notes;

use super::{
    Archive, ArchiveCapabilities, ArchiveEntryId, ArchiveKind, CompressionFormat, PartKind, PartKindKey,
    PartMeta, PartReader, PartSource, Record, Transaction,
};

const SINGLE_MAGIC: u32 = 0x0005_1600;
const DOUBLE_MAGIC: u32 = 0x0005_1607;
const VERSION: u32 = 0x0002_0000;

// Epoch 2000-01-01T00:00:00Z, matching the original Apple file format spec.
const EPOCH: i64 = 946_684_800;

fn parse_time(raw: i32) -> Option<NaiveDateTime> {
    if raw == i32::MIN {
        return None;
    }
    DateTime::<Utc>::from_timestamp(EPOCH + raw as i64, 0).map(|d| d.naive_utc())
}

fn stamp_time(t: Option<NaiveDateTime>) -> i32 {
    match t {
        None => i32::MIN,
        Some(t) => (t.and_utc().timestamp() - EPOCH) as i32,
    }
}

fn fixed_len_str(s: &str, len: usize) -> Vec<u8> {
    let mut b = s.as_bytes().to_vec();
    b.resize(len, 0);
    b
}

#[derive(BinRead, BinWrite, PartialEq, Eq, Clone, Copy, Debug)]
#[brw(repr = u32)]
enum EntryType {
    DataFork = 1,
    ResourceFork = 2,
    RealName = 3,
    Comment = 4,
    FileDatesInfo = 8,
    MacintoshFileInfo = 10,
    ProdosFileInfo = 11,
}

#[derive(BinRead, BinWrite, Debug, Clone)]
#[brw(big)]
struct ProdosFileInfo {
    access: u16,
    file_type: u16,
    aux_type: u32,
}

#[derive(BinRead, BinWrite, Debug, Clone)]
#[brw(big)]
struct MacFileInfo {
    file_type: [u8; 4],
    creator: [u8; 4],
    finder_flags: u16,
}

#[derive(BinRead, BinWrite, Debug, Clone)]
#[brw(big)]
struct FileDatesInfo {
    create_raw: i32,
    mod_raw: i32,
    backup_raw: i32,
    access_raw: i32,
}

#[derive(BinRead, BinWrite, Debug, Clone)]
#[br(import { r#type: EntryType, length: u32 })]
#[bw(import { length: u32 })]
enum EntryData {
    #[br(pre_assert(r#type == EntryType::DataFork))]
    DataFork(#[br(count = length)] Vec<u8>),
    #[br(pre_assert(r#type == EntryType::ResourceFork))]
    ResourceFork(#[br(count = length)] Vec<u8>),
    #[br(pre_assert(r#type == EntryType::RealName))]
    RealName(
        #[br(count = length, map = |b: Vec<u8>| String::from_utf8_lossy(&b).trim_end_matches('\0').to_string())]
        #[bw(map = |s: &String| fixed_len_str(s, length as usize))]
        String,
    ),
    #[br(pre_assert(r#type == EntryType::Comment))]
    Comment(
        #[br(count = length, map = |b: Vec<u8>| String::from_utf8_lossy(&b).trim_end_matches('\0').to_string())]
        #[bw(map = |s: &String| fixed_len_str(s, length as usize))]
        String,
    ),
    #[br(pre_assert(r#type == EntryType::FileDatesInfo))]
    FileDatesInfo(FileDatesInfo),
    #[br(pre_assert(r#type == EntryType::MacintoshFileInfo))]
    MacintoshFileInfo(MacFileInfo),
    #[br(pre_assert(r#type == EntryType::ProdosFileInfo))]
    ProdosFileInfo(ProdosFileInfo),
}

#[derive(BinRead, BinWrite, Debug, Clone)]
#[brw(big)]
struct Entry {
    r#type: EntryType,
    offset: u32,
    length: u32,
    #[br(seek_before = SeekFrom::Start(offset as u64), restore_position, args { r#type, length })]
    #[bw(seek_before = SeekFrom::Start(*offset as u64), restore_position, args { length: *length })]
    data: EntryData,
}

#[derive(BinRead, Debug, Clone)]
struct OnDiskFile {
    #[br(temp)]
    magic: u32,
    #[br(assert(version == VERSION))]
    version: u32,
    #[br(count = 16, map = |b: Vec<u8>| String::from_utf8_lossy(&b).trim_end_matches('\0').to_string())]
    home_fs: String,
    num_entries: u16,
    #[br(count = num_entries)]
    entries: Vec<Entry>,
    #[br(calc = magic == DOUBLE_MAGIC)]
    variant_is_double: bool,
}

#[derive(BinWrite, Debug, Clone)]
#[bw(import { is_double: bool })]
struct OnDiskFileOut {
    #[bw(calc = if is_double { DOUBLE_MAGIC } else { SINGLE_MAGIC })]
    magic: u32,
    version: u32,
    #[bw(map = |s: &String| fixed_len_str(s, 16))]
    home_fs: String,
    num_entries: u16,
    entries: Vec<Entry>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Single,
    Double,
}

pub struct AppleDouble {
    variant: Variant,
    records: Vec<Option<Record>>,
    data: std::collections::HashMap<(usize, PartKindKey), Vec<u8>>,
    txn: Option<Transaction>,
    notes: Notes,
}

impl AppleDouble {
    pub fn create(variant: Variant) -> Self {
        Self { variant, records: Vec::new(), data: std::collections::HashMap::new(), txn: None, notes: Notes::new() }
    }

    pub fn open(variant: Variant, bytes: &[u8]) -> Result<Self> {
        let expect_magic = if variant == Variant::Double { DOUBLE_MAGIC } else { SINGLE_MAGIC };
        if bytes.len() < 4 || u32::from_be_bytes(bytes[0..4].try_into().unwrap()) != expect_magic {
            return Err(Error::format("AppleSingle/AppleDouble signature mismatch"));
        }
        let mut cursor = Cursor::new(bytes);
        let file: OnDiskFile =
            OnDiskFile::read(&mut cursor).map_err(|e| Error::format(format!("malformed AppleSingle/AppleDouble file: {e}")))?;

        let id = ArchiveEntryId(0);
        let mut rec = Record::new(id, "UNTITLED", '/');
        let mut data = std::collections::HashMap::new();
        let mut notes = Notes::new();

        for entry in &file.entries {
            match &entry.data {
                EntryData::DataFork(bytes) => {
                    rec.parts.push(PartMeta {
                        kind: PartKind::DataFork,
                        uncompressed_length: bytes.len() as u64,
                        stored_length: bytes.len() as u64,
                        compression_format: CompressionFormat::Uncompressed,
                    });
                    data.insert((0, PartKindKey::DataFork), bytes.clone());
                }
                EntryData::ResourceFork(bytes) => {
                    rec.parts.push(PartMeta {
                        kind: PartKind::RsrcFork,
                        uncompressed_length: bytes.len() as u64,
                        stored_length: bytes.len() as u64,
                        compression_format: CompressionFormat::Uncompressed,
                    });
                    data.insert((0, PartKindKey::RsrcFork), bytes.clone());
                }
                EntryData::RealName(name) => rec.filename = name.clone(),
                EntryData::Comment(c) => rec.comment = Some(c.clone()),
                EntryData::FileDatesInfo(d) => {
                    rec.create_when = parse_time(d.create_raw);
                    rec.mod_when = parse_time(d.mod_raw);
                }
                EntryData::MacintoshFileInfo(m) => {
                    rec.hfs_file_type = Some(m.file_type);
                    rec.hfs_creator = Some(m.creator);
                }
                EntryData::ProdosFileInfo(p) => {
                    rec.file_type = p.file_type as u32;
                    rec.aux_type = p.aux_type;
                    rec.access_flags = p.access as u32;
                }
            }
        }
        if variant == Variant::Double && rec.part(PartKind::DataFork).is_none() {
            notes.info("AppleDouble header carries no data fork; it lives in the companion plain file");
        }

        Ok(Self { variant, records: vec![Some(rec)], data, txn: None, notes })
    }

    fn require_txn(&mut self) -> Result<&mut Transaction> {
        self.txn.as_mut().ok_or_else(|| Error::txn_state("no transaction is open"))
    }
}

impl Archive for AppleDouble {
    fn kind(&self) -> ArchiveKind {
        match self.variant {
            Variant::Single => ArchiveKind::AppleSingle,
            Variant::Double => ArchiveKind::AppleDouble,
        }
    }

    fn capabilities(&self) -> ArchiveCapabilities {
        ArchiveCapabilities {
            can_write: true,
            supports_rsrc_fork: true,
            supports_disk_image: false,
            supports_comment: true,
        }
    }

    fn start_transaction(&mut self) -> Result<()> {
        if self.txn.is_some() {
            return Err(Error::txn_state("a transaction is already open"));
        }
        self.txn = Some(Transaction {
            saved_records: self.records.clone(),
            saved_part_data: self.data.clone(),
            created_since: Default::default(),
        });
        Ok(())
    }

    fn cancel_transaction(&mut self) -> Result<()> {
        let txn = self.txn.take().ok_or_else(|| Error::txn_state("no transaction is open"))?;
        self.records = txn.saved_records;
        self.data = txn.saved_part_data;
        Ok(())
    }

    fn commit_transaction(&mut self, output: &mut Vec<u8>) -> Result<()> {
        if self.txn.is_none() {
            return Err(Error::txn_state("no transaction is open"));
        }
        let rec = self.records.iter().flatten().next().cloned();
        let rec = match rec {
            Some(r) => r,
            None => {
                output.clear();
                self.txn = None;
                return Ok(());
            }
        };

        let mut entries = Vec::new();
        entries.push(Entry {
            r#type: EntryType::RealName,
            offset: 0,
            length: rec.filename.as_bytes().len() as u32,
            data: EntryData::RealName(rec.filename.clone()),
        });
        if let Some(c) = &rec.comment {
            entries.push(Entry { r#type: EntryType::Comment, offset: 0, length: c.as_bytes().len() as u32, data: EntryData::Comment(c.clone()) });
        }
        entries.push(Entry {
            r#type: EntryType::FileDatesInfo,
            offset: 0,
            length: 16,
            data: EntryData::FileDatesInfo(FileDatesInfo {
                create_raw: stamp_time(rec.create_when),
                mod_raw: stamp_time(rec.mod_when),
                backup_raw: stamp_time(None),
                access_raw: stamp_time(None),
            }),
        });
        if let (Some(ft), Some(cr)) = (rec.hfs_file_type, rec.hfs_creator) {
            entries.push(Entry {
                r#type: EntryType::MacintoshFileInfo,
                offset: 0,
                length: 10,
                data: EntryData::MacintoshFileInfo(MacFileInfo { file_type: ft, creator: cr, finder_flags: 0 }),
            });
        } else {
            entries.push(Entry {
                r#type: EntryType::ProdosFileInfo,
                offset: 0,
                length: 8,
                data: EntryData::ProdosFileInfo(ProdosFileInfo {
                    access: rec.access_flags as u16,
                    file_type: rec.file_type as u16,
                    aux_type: rec.aux_type,
                }),
            });
        }
        if self.variant == Variant::Single {
            let bytes = self.data.get(&(0, PartKindKey::DataFork)).cloned().unwrap_or_default();
            entries.push(Entry { r#type: EntryType::DataFork, offset: 0, length: bytes.len() as u32, data: EntryData::DataFork(bytes) });
        }
        if let Some(bytes) = self.data.get(&(0, PartKindKey::RsrcFork)).cloned() {
            entries.push(Entry { r#type: EntryType::ResourceFork, offset: 0, length: bytes.len() as u32, data: EntryData::ResourceFork(bytes) });
        }

        let file = OnDiskFileOut {
            version: VERSION,
            home_fs: String::new(),
            num_entries: entries.len() as u16,
            entries,
        };

        let mut buf = Cursor::new(Vec::new());
        let is_double = self.variant == Variant::Double;
        if let Err(e) = file.write_args(&mut buf, binrw::args! { is_double }) {
            output.clear();
            return Err(Error::io_failure(format!("failed to serialize AppleSingle/AppleDouble: {e}")));
        }
        output.clear();
        output.extend_from_slice(&buf.into_inner());
        self.txn = None;
        Ok(())
    }

    fn create_record(&mut self, filename: &str, dir_sep: char) -> Result<ArchiveEntryId> {
        self.require_txn()?;
        if self.records.iter().flatten().next().is_some() {
            return Err(Error::arg("AppleSingle/AppleDouble carries exactly one record"));
        }
        let id = ArchiveEntryId(0);
        self.records = vec![Some(Record::new(id, filename, dir_sep))];
        if let Some(txn) = &mut self.txn {
            txn.created_since.insert(0);
        }
        Ok(id)
    }

    fn delete_record(&mut self, entry: ArchiveEntryId) -> Result<()> {
        self.require_txn()?;
        if self.records.get(entry.0).and_then(|r| r.as_ref()).is_none() {
            return Err(Error::not_found("no such record"));
        }
        self.records[entry.0] = None;
        self.data.retain(|(idx, _), _| *idx != entry.0);
        Ok(())
    }

    fn find_file_entry(&self, filename: &str) -> Result<ArchiveEntryId> {
        self.records
            .iter()
            .flatten()
            .find(|r| r.names_match(filename))
            .map(|r| r.id)
            .ok_or_else(|| Error::not_found(format!("no record named {filename}")))
    }

    fn add_part(
        &mut self,
        entry: ArchiveEntryId,
        kind: PartKind,
        source: &mut dyn PartSource,
        compression: CompressionFormat,
    ) -> Result<()> {
        self.require_txn()?;
        if kind == PartKind::DiskImage {
            return Err(Error::arg("AppleSingle/AppleDouble has no disk-image part"));
        }
        if !matches!(compression, CompressionFormat::Default | CompressionFormat::Uncompressed) {
            return Err(Error::arg("AppleSingle/AppleDouble parts are always uncompressed"));
        }
        let rec = self.records.get_mut(entry.0).and_then(|r| r.as_mut()).ok_or_else(|| Error::not_found("no such record"))?;
        if rec.part(kind).is_some() {
            return Err(Error::arg("part already present on this record"));
        }
        let bytes = super::drain_source(source)?;
        rec.parts.push(PartMeta {
            kind,
            uncompressed_length: bytes.len() as u64,
            stored_length: bytes.len() as u64,
            compression_format: CompressionFormat::Uncompressed,
        });
        self.data.insert((entry.0, kind.into()), bytes);
        Ok(())
    }

    fn delete_part(&mut self, entry: ArchiveEntryId, kind: PartKind) -> Result<()> {
        self.require_txn()?;
        let rec = self.records.get_mut(entry.0).and_then(|r| r.as_mut()).ok_or_else(|| Error::not_found("no such record"))?;
        let before = rec.parts.len();
        rec.parts.retain(|p| p.kind != kind);
        if rec.parts.len() == before {
            return Err(Error::not_found("no such part"));
        }
        self.data.remove(&(entry.0, kind.into()));
        Ok(())
    }

    fn open_part(&mut self, entry: ArchiveEntryId, kind: PartKind) -> Result<PartReader> {
        if self.txn.is_some() {
            return Err(Error::txn_state("open_part is forbidden while a transaction is open"));
        }
        let bytes = self.data.get(&(entry.0, kind.into())).cloned().ok_or_else(|| Error::not_found("no such part"))?;
        Ok(PartReader::new(entry, kind, bytes))
    }

    fn close_part(&mut self, mut reader: PartReader) -> Result<()> {
        reader.mark_closed();
        Ok(())
    }

    fn record(&self, entry: ArchiveEntryId) -> Option<&Record> {
        self.records.get(entry.0).and_then(|r| r.as_ref())
    }
    fn records(&self) -> Vec<&Record> {
        self.records.iter().flatten().collect()
    }
    fn notes(&self) -> &Notes {
        &self.notes
    }
}
