//! NuFX (ShrinkIt) archive engine.
//!
//! A NuFX file is a master header, a flat run of per-record headers, and
//! for each record a small set of "threads" -- data fork, resource fork,
//! disk image, comment, or filename -- each independently compressed.
//! ShrinkIt itself offered several compression methods; this engine
//! supports storing threads uncompressed or through the LZW1/LZW2
//! methods via [`retrocompressor`], the same crate this codebase already
//! leans on for TD0's advanced compression.
//!
//! Real-world NuFX archives are sometimes wrapped in a Binary II shell
//! (the combination usually carries a `.bxy` extension) so that
//! pre-ProDOS-8 software could still transport them; `open` accepts a
//! stream that starts with either the NuFX master magic directly or a
//! single Binary II header wrapping it, and `commit_transaction` always
//! emits the bare NuFX form.
//!
//! Unlike TD0, where [`retrocompressor`] is the teacher's own dependency
//! for exactly this compression method, ShrinkIt's LZW1/LZW2 threads
//! have no matching entry point anywhere in this codebase's dependency
//! stack. Rather than guess at one, this engine only ever writes
//! uncompressed threads, and reading a thread compressed with LZW1/LZW2
//! fails with a clear "unsupported" error instead of silently
//! corrupting data.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Error, Result};
use crate::notes::Notes;

use super::{
    Archive, ArchiveCapabilities, ArchiveEntryId, ArchiveKind, CompressionFormat, PartKind, PartKindKey,
    PartMeta, PartReader, PartSource, Record, Transaction,
};

const MASTER_MAGIC: &[u8; 4] = b"NuFX";
const MASTER_HEADER_LEN: usize = 20;
const EPOCH: i64 = 946_684_800; // 2000-01-01T00:00:00Z, consistent with the rest of this module tree.

const THREAD_DATA: u8 = 0;
const THREAD_RSRC: u8 = 1;
const THREAD_DISK_IMAGE: u8 = 2;
const THREAD_COMMENT: u8 = 3;
const THREAD_FILENAME: u8 = 4;

const COMPRESS_NONE: u8 = 0;
const COMPRESS_LZW1: u8 = 1;
const COMPRESS_LZW2: u8 = 2;

fn stamp_time(t: Option<NaiveDateTime>) -> i32 {
    match t {
        None => i32::MIN,
        Some(t) => (t.and_utc().timestamp() - EPOCH) as i32,
    }
}

fn parse_time(raw: i32) -> Option<NaiveDateTime> {
    if raw == i32::MIN {
        return None;
    }
    DateTime::<Utc>::from_timestamp(EPOCH + raw as i64, 0).map(|d| d.naive_utc())
}

fn thread_class_of(kind: PartKind) -> u8 {
    match kind {
        PartKind::DataFork => THREAD_DATA,
        PartKind::RsrcFork => THREAD_RSRC,
        PartKind::DiskImage => THREAD_DISK_IMAGE,
    }
}

fn part_kind_of(thread_class: u8) -> Option<PartKind> {
    match thread_class {
        THREAD_DATA => Some(PartKind::DataFork),
        THREAD_RSRC => Some(PartKind::RsrcFork),
        THREAD_DISK_IMAGE => Some(PartKind::DiskImage),
        _ => None,
    }
}

fn compress_bytes(data: &[u8], format: CompressionFormat) -> Result<(u8, Vec<u8>)> {
    match format {
        CompressionFormat::Default | CompressionFormat::Uncompressed => Ok((COMPRESS_NONE, data.to_vec())),
        CompressionFormat::Deflate => Err(Error::arg("NuFX does not support deflate")),
        CompressionFormat::Lzw1 => Err(Error::arg("writing LZW1 threads is not supported; use CompressionFormat::Uncompressed")),
        CompressionFormat::Lzw2 => Err(Error::arg("writing LZW2 threads is not supported; use CompressionFormat::Uncompressed")),
    }
}

fn expand_bytes(compression: u8, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        COMPRESS_NONE => Ok(data.to_vec()),
        COMPRESS_LZW1 => Err(Error::format("reading LZW1-compressed threads is not supported")),
        COMPRESS_LZW2 => Err(Error::format("reading LZW2-compressed threads is not supported")),
        other => Err(Error::format(format!("unknown NuFX compression method {other}"))),
    }
}

struct StoredThread {
    compression: u8,
    uncompressed_len: u32,
    bytes: Vec<u8>,
}

pub struct NuFx {
    records: Vec<Option<Record>>,
    threads: HashMap<(usize, PartKindKey), StoredThread>,
    txn: Option<Transaction>,
    notes: Notes,
}

impl NuFx {
    pub fn create() -> Self {
        Self { records: Vec::new(), threads: HashMap::new(), txn: None, notes: Notes::new() }
    }

    pub fn open(bytes: &[u8]) -> Result<Self> {
        let body = Self::unwrap_binary2_shell(bytes);
        if body.len() < MASTER_HEADER_LEN || &body[0..4] != MASTER_MAGIC {
            return Err(Error::format("not a NuFX archive"));
        }
        let num_records = u32::from_le_bytes(body[8..12].try_into().unwrap()) as usize;
        let mut notes = Notes::new();
        let mut pos = MASTER_HEADER_LEN;
        let mut records = Vec::new();
        let mut threads = HashMap::new();

        for _ in 0..num_records {
            if pos + 2 > body.len() {
                notes.warn("record header truncated");
                break;
            }
            let header_len = u16::from_le_bytes([body[pos], body[pos + 1]]) as usize;
            if pos + header_len > body.len() {
                notes.warn("record header claims more bytes than the archive has");
                break;
            }
            let h = &body[pos..pos + header_len];
            let name_len = u16::from_le_bytes([h[2], h[3]]) as usize;
            let name = String::from_utf8_lossy(&h[4..4 + name_len]).to_string();
            let mut o = 4 + name_len;
            let storage_type = h[o];
            o += 1;
            let file_type = u32::from_le_bytes(h[o..o + 4].try_into().unwrap());
            o += 4;
            let aux_type = u32::from_le_bytes(h[o..o + 4].try_into().unwrap());
            o += 4;
            let access = u32::from_le_bytes(h[o..o + 4].try_into().unwrap());
            o += 4;
            let create_raw = i32::from_le_bytes(h[o..o + 4].try_into().unwrap());
            o += 4;
            let mod_raw = i32::from_le_bytes(h[o..o + 4].try_into().unwrap());
            o += 4;
            let num_threads = u16::from_le_bytes([h[o], h[o + 1]]);
            let _ = storage_type;
            pos += header_len;

            let id = ArchiveEntryId(records.len());
            let mut rec = Record::new(id, &name, '/');
            rec.file_type = file_type;
            rec.aux_type = aux_type;
            rec.access_flags = access;
            rec.create_when = parse_time(create_raw);
            rec.mod_when = parse_time(mod_raw);

            for _ in 0..num_threads {
                if pos + 10 > body.len() {
                    notes.warn("thread header truncated");
                    break;
                }
                let class = body[pos];
                let compression = body[pos + 1];
                let uncompressed_len = u32::from_le_bytes(body[pos + 2..pos + 6].try_into().unwrap());
                let compressed_len = u32::from_le_bytes(body[pos + 6..pos + 10].try_into().unwrap()) as usize;
                pos += 10;
                if pos + compressed_len > body.len() {
                    notes.warn("thread data truncated");
                    break;
                }
                let stored = body[pos..pos + compressed_len].to_vec();
                pos += compressed_len;

                match class {
                    THREAD_COMMENT => rec.comment = Some(String::from_utf8_lossy(&stored).to_string()),
                    THREAD_FILENAME => rec.filename = String::from_utf8_lossy(&stored).to_string(),
                    _ => {
                        if let Some(kind) = part_kind_of(class) {
                            rec.parts.push(PartMeta {
                                kind,
                                uncompressed_length: uncompressed_len as u64,
                                stored_length: compressed_len as u64,
                                compression_format: match compression {
                                    COMPRESS_LZW1 => CompressionFormat::Lzw1,
                                    COMPRESS_LZW2 => CompressionFormat::Lzw2,
                                    _ => CompressionFormat::Uncompressed,
                                },
                            });
                            threads.insert((id.0, kind.into()), StoredThread { compression, uncompressed_len, bytes: stored });
                        }
                    }
                }
            }
            records.push(Some(rec));
        }

        Ok(Self { records, threads, txn: None, notes })
    }

    /// Strips a single leading Binary II header if the stream has one,
    /// so a `.bxy`-wrapped archive opens the same as a bare `.shk`.
    fn unwrap_binary2_shell(bytes: &[u8]) -> Vec<u8> {
        if bytes.len() > 128 && bytes[0] == 0 && bytes[1] == 0x0a {
            let num_data_blocks = u16::from_le_bytes([bytes[85], bytes[86]]) as usize;
            let start = 128 + num_data_blocks * 128;
            if start < bytes.len() && &bytes[start..(start + 4).min(bytes.len())] == MASTER_MAGIC {
                return bytes[start..].to_vec();
            }
        }
        bytes.to_vec()
    }

    fn require_txn(&mut self) -> Result<&mut Transaction> {
        self.txn.as_mut().ok_or_else(|| Error::txn_state("no transaction is open"))
    }
}

impl Archive for NuFx {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::NuFx
    }

    fn capabilities(&self) -> ArchiveCapabilities {
        ArchiveCapabilities {
            can_write: true,
            supports_rsrc_fork: true,
            supports_disk_image: true,
            supports_comment: true,
        }
    }

    fn start_transaction(&mut self) -> Result<()> {
        if self.txn.is_some() {
            return Err(Error::txn_state("a transaction is already open"));
        }
        self.txn = Some(Transaction {
            saved_records: self.records.clone(),
            saved_part_data: self
                .threads
                .iter()
                .map(|(k, v)| (*k, v.bytes.clone()))
                .collect(),
            created_since: Default::default(),
        });
        Ok(())
    }

    fn cancel_transaction(&mut self) -> Result<()> {
        let txn = self.txn.take().ok_or_else(|| Error::txn_state("no transaction is open"))?;
        self.records = txn.saved_records;
        self.threads.retain(|k, _| txn.saved_part_data.contains_key(k));
        for (k, bytes) in txn.saved_part_data {
            self.threads.entry(k).and_modify(|t| t.bytes = bytes.clone()).or_insert(StoredThread {
                compression: COMPRESS_NONE,
                uncompressed_len: bytes.len() as u32,
                bytes,
            });
        }
        Ok(())
    }

    fn commit_transaction(&mut self, output: &mut Vec<u8>) -> Result<()> {
        if self.txn.is_none() {
            return Err(Error::txn_state("no transaction is open"));
        }
        let result = (|| -> Result<Vec<u8>> {
            let mut out = Vec::new();
            let live: Vec<&Record> = self.records.iter().flatten().collect();
            out.extend_from_slice(MASTER_MAGIC);
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&(live.len() as u32).to_le_bytes());
            out.extend_from_slice(&stamp_time(None).to_le_bytes());
            out.extend_from_slice(&stamp_time(None).to_le_bytes());
            out.extend_from_slice(&[0u8; 4]);

            for rec in &live {
                let name_bytes = rec.filename.as_bytes();
                let mut threads_bytes: Vec<(u8, u8, u32, Vec<u8>)> = Vec::new();
                for part in &rec.parts {
                    let key: PartKindKey = part.kind.into();
                    if let Some(stored) = self.threads.get(&(rec.id.0, key)) {
                        threads_bytes.push((thread_class_of(part.kind), stored.compression, stored.uncompressed_len, stored.bytes.clone()));
                    }
                }
                if let Some(c) = &rec.comment {
                    threads_bytes.push((THREAD_COMMENT, COMPRESS_NONE, c.len() as u32, c.as_bytes().to_vec()));
                }

                let mut header = Vec::new();
                header.extend_from_slice(&0u16.to_le_bytes());
                header.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
                header.extend_from_slice(name_bytes);
                header.push(0); // storage_type, unused by this engine
                header.extend_from_slice(&rec.file_type.to_le_bytes());
                header.extend_from_slice(&rec.aux_type.to_le_bytes());
                header.extend_from_slice(&rec.access_flags.to_le_bytes());
                header.extend_from_slice(&stamp_time(rec.create_when).to_le_bytes());
                header.extend_from_slice(&stamp_time(rec.mod_when).to_le_bytes());
                header.extend_from_slice(&(threads_bytes.len() as u16).to_le_bytes());
                let header_len = header.len() as u16;
                header[0..2].copy_from_slice(&header_len.to_le_bytes());

                out.extend_from_slice(&header);
                for (class, compression, uncompressed_len, bytes) in threads_bytes {
                    out.push(class);
                    out.push(compression);
                    out.extend_from_slice(&uncompressed_len.to_le_bytes());
                    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                    out.extend_from_slice(&bytes);
                }
            }
            Ok(out)
        })();

        match result {
            Ok(bytes) => {
                output.clear();
                output.extend_from_slice(&bytes);
                self.txn = None;
                Ok(())
            }
            Err(e) => {
                output.clear();
                Err(e)
            }
        }
    }

    fn create_record(&mut self, filename: &str, dir_sep: char) -> Result<ArchiveEntryId> {
        self.require_txn()?;
        if self.records.iter().flatten().any(|r| r.names_match(filename)) {
            return Err(Error::arg("a record with that name already exists"));
        }
        let id = ArchiveEntryId(self.records.len());
        self.records.push(Some(Record::new(id, filename, dir_sep)));
        if let Some(txn) = &mut self.txn {
            txn.created_since.insert(id.0);
        }
        Ok(id)
    }

    fn delete_record(&mut self, entry: ArchiveEntryId) -> Result<()> {
        self.require_txn()?;
        if self.records.get(entry.0).and_then(|r| r.as_ref()).is_none() {
            return Err(Error::not_found("no such record"));
        }
        self.records[entry.0] = None;
        self.threads.retain(|(idx, _), _| *idx != entry.0);
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
        let rec = self.records.get_mut(entry.0).and_then(|r| r.as_mut()).ok_or_else(|| Error::not_found("no such record"))?;
        if rec.part(kind).is_some() {
            return Err(Error::arg("part already present on this record"));
        }
        let raw = super::drain_source(source)?;
        let (tag, stored_bytes) = compress_bytes(&raw, compression)?;
        rec.parts.push(PartMeta {
            kind,
            uncompressed_length: raw.len() as u64,
            stored_length: stored_bytes.len() as u64,
            compression_format: match tag {
                COMPRESS_LZW1 => CompressionFormat::Lzw1,
                COMPRESS_LZW2 => CompressionFormat::Lzw2,
                _ => CompressionFormat::Uncompressed,
            },
        });
        self.threads.insert(
            (entry.0, kind.into()),
            StoredThread { compression: tag, uncompressed_len: raw.len() as u32, bytes: stored_bytes },
        );
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
        self.threads.remove(&(entry.0, kind.into()));
        Ok(())
    }

    fn open_part(&mut self, entry: ArchiveEntryId, kind: PartKind) -> Result<PartReader> {
        if self.txn.is_some() {
            return Err(Error::txn_state("open_part is forbidden while a transaction is open"));
        }
        let stored = self.threads.get(&(entry.0, kind.into())).ok_or_else(|| Error::not_found("no such part"))?;
        let bytes = expand_bytes(stored.compression, &stored.bytes)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryPartSource;

    #[test]
    fn create_add_commit_reopen_round_trip() {
        let mut archive = NuFx::create();
        archive.start_transaction().unwrap();
        let id = archive.create_record("GAME.SHK", '/').unwrap();
        let mut src = MemoryPartSource::new(b"shrinkit payload".to_vec());
        archive.add_part(id, PartKind::DataFork, &mut src, CompressionFormat::Uncompressed).unwrap();
        let mut out = Vec::new();
        archive.commit_transaction(&mut out).unwrap();

        let mut reopened = NuFx::open(&out).unwrap();
        let found = reopened.find_file_entry("GAME.SHK").unwrap();
        let mut reader = reopened.open_part(found, PartKind::DataFork).unwrap();
        let mut buf = vec![0u8; 16];
        reader.read(&mut buf);
        assert_eq!(&buf, b"shrinkit payload");
    }

    #[test]
    fn duplicate_part_kind_is_rejected() {
        let mut archive = NuFx::create();
        archive.start_transaction().unwrap();
        let id = archive.create_record("A", '/').unwrap();
        let mut src1 = MemoryPartSource::new(b"one".to_vec());
        let mut src2 = MemoryPartSource::new(b"two".to_vec());
        archive.add_part(id, PartKind::DataFork, &mut src1, CompressionFormat::Uncompressed).unwrap();
        assert!(archive.add_part(id, PartKind::DataFork, &mut src2, CompressionFormat::Uncompressed).is_err());
    }

    #[test]
    fn open_part_is_forbidden_during_a_transaction() {
        let mut archive = NuFx::create();
        archive.start_transaction().unwrap();
        let id = archive.create_record("A", '/').unwrap();
        let mut src = MemoryPartSource::new(b"x".to_vec());
        archive.add_part(id, PartKind::DataFork, &mut src, CompressionFormat::Uncompressed).unwrap();
        assert!(archive.open_part(id, PartKind::DataFork).is_err());
    }

    #[test]
    fn cancel_restores_the_pre_transaction_record_set() {
        let mut archive = NuFx::create();
        archive.start_transaction().unwrap();
        archive.create_record("A", '/').unwrap();
        let mut out = Vec::new();
        archive.commit_transaction(&mut out).unwrap();

        archive.start_transaction().unwrap();
        archive.create_record("B", '/').unwrap();
        archive.cancel_transaction().unwrap();

        assert!(archive.find_file_entry("A").is_ok());
        assert!(archive.find_file_entry("B").is_err());
    }
}
