//! ZIP archive engine.
//!
//! Wraps the `zip` crate the same way this crate's container-detection
//! code already does for reading: `zip::ZipArchive` over an in-memory
//! cursor, one entry per record's data fork. ZIP has no resource-fork or
//! disk-image concept, so those parts are rejected outright rather than
//! silently dropped.

use std::io::{Cursor, Read, Write};

use chrono::{Datelike, NaiveDateTime, Timelike};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};
use crate::notes::Notes;

use super::{
    Archive, ArchiveCapabilities, ArchiveEntryId, ArchiveKind, CompressionFormat, PartKind, PartKindKey,
    PartMeta, PartReader, PartSource, Record, Transaction,
};

fn dos_date_time(t: NaiveDateTime) -> zip::DateTime {
    zip::DateTime::from_date_and_time(
        t.year().clamp(1980, 2107) as u16,
        t.month() as u8,
        t.day() as u8,
        t.hour() as u8,
        t.minute() as u8,
        t.second() as u8,
    )
    .unwrap_or_default()
}

fn naive_date_time(d: zip::DateTime) -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(d.year() as i32, d.month() as u32, d.day() as u32)
        .and_then(|date| date.and_hms_opt(d.hour() as u32, d.minute() as u32, d.second() as u32))
        .unwrap_or_default()
}

pub struct Zip {
    records: Vec<Option<Record>>,
    data: std::collections::HashMap<(usize, PartKindKey), Vec<u8>>,
    txn: Option<Transaction>,
    notes: Notes,
}

impl Zip {
    pub fn create() -> Self {
        Self { records: Vec::new(), data: std::collections::HashMap::new(), txn: None, notes: Notes::new() }
    }

    pub fn open(bytes: &[u8]) -> Result<Self> {
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|e| Error::format(format!("not a ZIP archive: {e}")))?;
        let mut records = Vec::new();
        let mut data = std::collections::HashMap::new();
        let notes = Notes::new();

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(|e| Error::format(format!("corrupt ZIP entry: {e}")))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut body = Vec::new();
            entry.read_to_end(&mut body).map_err(|e| Error::io_failure(format!("failed to read ZIP entry: {e}")))?;

            let id = ArchiveEntryId(records.len());
            let mut rec = Record::new(id, &name, '/');
            rec.mod_when = Some(naive_date_time(entry.last_modified().unwrap_or_default()));
            if !entry.comment().is_empty() {
                rec.comment = Some(entry.comment().to_string());
            }
            rec.parts.push(PartMeta {
                kind: PartKind::DataFork,
                uncompressed_length: entry.size(),
                stored_length: entry.compressed_size(),
                compression_format: match entry.compression() {
                    CompressionMethod::Stored => CompressionFormat::Uncompressed,
                    _ => CompressionFormat::Deflate,
                },
            });
            data.insert((id.0, PartKindKey::DataFork), body);
            records.push(Some(rec));
        }

        Ok(Self { records, data, txn: None, notes })
    }

    fn require_txn(&mut self) -> Result<&mut Transaction> {
        self.txn.as_mut().ok_or_else(|| Error::txn_state("no transaction is open"))
    }
}

impl Archive for Zip {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Zip
    }

    fn capabilities(&self) -> ArchiveCapabilities {
        ArchiveCapabilities {
            can_write: true,
            supports_rsrc_fork: false,
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
        let result = (|| -> Result<Vec<u8>> {
            let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
            for rec in self.records.iter().flatten() {
                let bytes = self.data.get(&(rec.id.0, PartKindKey::DataFork)).cloned().unwrap_or_default();
                let method = match rec.parts.first().map(|p| p.compression_format) {
                    Some(CompressionFormat::Uncompressed) => CompressionMethod::Stored,
                    _ => CompressionMethod::Deflated,
                };
                let mut options = SimpleFileOptions::default().compression_method(method);
                if let Some(when) = rec.mod_when {
                    options = options.last_modified_time(dos_date_time(when));
                }
                writer
                    .start_file(&rec.filename, options)
                    .map_err(|e| Error::io_failure(format!("failed to start ZIP entry: {e}")))?;
                writer.write_all(&bytes).map_err(|e| Error::io_failure(format!("failed to write ZIP entry: {e}")))?;
            }
            let cursor = writer.finish().map_err(|e| Error::io_failure(format!("failed to finalize ZIP archive: {e}")))?;
            Ok(cursor.into_inner())
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
        self.data.remove(&(entry.0, PartKindKey::DataFork));
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
        if kind != PartKind::DataFork {
            return Err(Error::arg("ZIP records only carry a data fork"));
        }
        let rec = self.records.get_mut(entry.0).and_then(|r| r.as_mut()).ok_or_else(|| Error::not_found("no such record"))?;
        if rec.part(kind).is_some() {
            return Err(Error::arg("part already present on this record"));
        }
        if matches!(compression, CompressionFormat::Lzw1 | CompressionFormat::Lzw2) {
            return Err(Error::arg("ZIP only supports store or deflate"));
        }
        let bytes = super::drain_source(source)?;
        rec.parts.push(PartMeta {
            kind,
            uncompressed_length: bytes.len() as u64,
            stored_length: bytes.len() as u64,
            compression_format: if compression == CompressionFormat::Uncompressed {
                CompressionFormat::Uncompressed
            } else {
                CompressionFormat::Deflate
            },
        });
        self.data.insert((entry.0, PartKindKey::DataFork), bytes);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryPartSource;

    #[test]
    fn create_add_commit_reopen_round_trip() {
        let mut archive = Zip::create();
        archive.start_transaction().unwrap();
        let id = archive.create_record("readme.txt", '/').unwrap();
        let mut src = MemoryPartSource::new(b"hello zip".to_vec());
        archive.add_part(id, PartKind::DataFork, &mut src, CompressionFormat::Deflate).unwrap();
        let mut out = Vec::new();
        archive.commit_transaction(&mut out).unwrap();

        let mut reopened = Zip::open(&out).unwrap();
        let found = reopened.find_file_entry("readme.txt").unwrap();
        let mut reader = reopened.open_part(found, PartKind::DataFork).unwrap();
        let mut buf = vec![0u8; 9];
        reader.read(&mut buf);
        assert_eq!(&buf, b"hello zip");
    }

    #[test]
    fn resource_fork_parts_are_rejected() {
        let mut archive = Zip::create();
        archive.start_transaction().unwrap();
        let id = archive.create_record("a", '/').unwrap();
        let mut src = MemoryPartSource::new(b"x".to_vec());
        assert!(archive.add_part(id, PartKind::RsrcFork, &mut src, CompressionFormat::Deflate).is_err());
    }

    #[test]
    fn stored_compression_round_trips_uncompressed() {
        let mut archive = Zip::create();
        archive.start_transaction().unwrap();
        let id = archive.create_record("plain.bin", '/').unwrap();
        let mut src = MemoryPartSource::new(vec![1, 2, 3, 4]);
        archive.add_part(id, PartKind::DataFork, &mut src, CompressionFormat::Uncompressed).unwrap();
        let mut out = Vec::new();
        archive.commit_transaction(&mut out).unwrap();

        let mut reopened = Zip::open(&out).unwrap();
        let found = reopened.find_file_entry("plain.bin").unwrap();
        let mut reader = reopened.open_part(found, PartKind::DataFork).unwrap();
        let mut buf = vec![0u8; 4];
        reader.read(&mut buf);
        assert_eq!(buf, vec![1, 2, 3, 4]);
    }
}
