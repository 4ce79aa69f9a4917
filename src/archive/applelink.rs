//! AppleLink ACU archive engine.
//!
//! The AppleLink Conversion Utility packaged files for the AppleLink
//! online service as a short master header followed by one fixed-size
//! entry header per file and that file's raw data immediately after --
//! no compression, no resource fork, no directory. Like Binary II this
//! is read-only: nothing produced it after AppleLink itself shut down,
//! so there is no reason to ever write one.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::notes::Notes;

use super::{
    Archive, ArchiveCapabilities, ArchiveEntryId, ArchiveKind, CompressionFormat, PartKind, PartReader,
    PartSource, Record,
};

const MASTER_MAGIC: &[u8; 4] = b"ACU\x01";
const ENTRY_HEADER_LEN: usize = 52;

pub struct AppleLink {
    records: Vec<Option<Record>>,
    data: HashMap<usize, Vec<u8>>,
    notes: Notes,
}

impl AppleLink {
    pub fn open(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 || &bytes[0..4] != MASTER_MAGIC {
            return Err(Error::format("not an AppleLink ACU archive"));
        }
        let mut records = Vec::new();
        let mut data = HashMap::new();
        let notes = Notes::new();
        let mut pos = 4usize;
        while pos + ENTRY_HEADER_LEN <= bytes.len() {
            let h = &bytes[pos..pos + ENTRY_HEADER_LEN];
            let name_len = h[0] as usize;
            if name_len == 0 {
                break;
            }
            let name = String::from_utf8_lossy(&h[1..1 + name_len.min(31)]).to_string();
            let file_type = h[33] as u32;
            let aux_type = u16::from_le_bytes([h[34], h[35]]) as u32;
            let length = u32::from_le_bytes([h[36], h[37], h[38], h[39]]) as usize;
            pos += ENTRY_HEADER_LEN;
            if pos + length > bytes.len() {
                break;
            }
            let body = bytes[pos..pos + length].to_vec();
            pos += length;

            let id = ArchiveEntryId(records.len());
            let mut rec = Record::new(id, &name, '/');
            rec.file_type = file_type;
            rec.aux_type = aux_type;
            rec.parts.push(super::PartMeta {
                kind: PartKind::DataFork,
                uncompressed_length: body.len() as u64,
                stored_length: body.len() as u64,
                compression_format: CompressionFormat::Uncompressed,
            });
            data.insert(id.0, body);
            records.push(Some(rec));
        }
        Ok(Self { records, data, notes })
    }
}

impl Archive for AppleLink {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::AppleLink
    }

    fn capabilities(&self) -> ArchiveCapabilities {
        ArchiveCapabilities {
            can_write: false,
            supports_rsrc_fork: false,
            supports_disk_image: false,
            supports_comment: false,
        }
    }

    fn start_transaction(&mut self) -> Result<()> {
        Err(Error::arg("AppleLink archives are read-only"))
    }
    fn cancel_transaction(&mut self) -> Result<()> {
        Err(Error::txn_state("no transaction is open"))
    }
    fn commit_transaction(&mut self, _output: &mut Vec<u8>) -> Result<()> {
        Err(Error::txn_state("no transaction is open"))
    }
    fn create_record(&mut self, _filename: &str, _dir_sep: char) -> Result<ArchiveEntryId> {
        Err(Error::arg("AppleLink archives are read-only"))
    }
    fn delete_record(&mut self, _entry: ArchiveEntryId) -> Result<()> {
        Err(Error::arg("AppleLink archives are read-only"))
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
        _entry: ArchiveEntryId,
        _kind: PartKind,
        _source: &mut dyn PartSource,
        _compression: CompressionFormat,
    ) -> Result<()> {
        Err(Error::arg("AppleLink archives are read-only"))
    }
    fn delete_part(&mut self, _entry: ArchiveEntryId, _kind: PartKind) -> Result<()> {
        Err(Error::arg("AppleLink archives are read-only"))
    }

    fn open_part(&mut self, entry: ArchiveEntryId, kind: PartKind) -> Result<PartReader> {
        if kind != PartKind::DataFork {
            return Err(Error::arg("AppleLink records have only a data fork"));
        }
        let bytes = self.data.get(&entry.0).ok_or_else(|| Error::not_found("no such part"))?.clone();
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

    fn sample_acu(name: &str, body: &[u8]) -> Vec<u8> {
        let mut out = MASTER_MAGIC.to_vec();
        let mut h = vec![0u8; ENTRY_HEADER_LEN];
        h[0] = name.len() as u8;
        h[1..1 + name.len()].copy_from_slice(name.as_bytes());
        h[33] = 0x04;
        h[36..40].copy_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend(h);
        out.extend(body);
        out
    }

    #[test]
    fn reads_a_single_entry_archive() {
        let bytes = sample_acu("NOTES.TXT", b"acu payload");
        let mut archive = AppleLink::open(&bytes).unwrap();
        let entry = archive.find_file_entry("NOTES.TXT").unwrap();
        let mut reader = archive.open_part(entry, PartKind::DataFork).unwrap();
        let mut buf = vec![0u8; 11];
        reader.read(&mut buf);
        assert_eq!(&buf, b"acu payload");
        archive.close_part(reader).unwrap();
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(AppleLink::open(b"not-acu-data").is_err());
    }
}
