//! Binary II (BNY) archive engine.
//!
//! A Binary II file is simply a concatenation of 128-byte header blocks
//! each followed by that entry's data, padded up to the next 128-byte
//! boundary. There is no directory, no compression, and no resource
//! fork -- just a flat run of entries read in file order, which is why
//! the engine only ever supports opening an existing archive.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::notes::Notes;

use super::{
    Archive, ArchiveCapabilities, ArchiveEntryId, ArchiveKind, CompressionFormat, PartKind, PartReader,
    PartSource, Record,
};

const HEADER_LEN: usize = 128;
const ID_BYTE: u8 = 0x0a;
const DIRECTORY_FLAG: u8 = 0x10;

fn unpack_name(b: &[u8]) -> String {
    let len = b[0] as usize;
    String::from_utf8_lossy(&b[1..1 + len.min(64)]).to_string()
}

pub struct Binary2 {
    records: Vec<Option<Record>>,
    data: HashMap<usize, Vec<u8>>,
    notes: Notes,
}

impl Binary2 {
    pub fn open(bytes: &[u8]) -> Result<Self> {
        let mut records = Vec::new();
        let mut data = HashMap::new();
        let mut notes = Notes::new();
        let mut pos = 0usize;
        while pos + HEADER_LEN <= bytes.len() {
            let h = &bytes[pos..pos + HEADER_LEN];
            if h[0] != 0 || h[1] != ID_BYTE {
                break;
            }
            let name = unpack_name(&h[2..67]);
            let access = h[67] as u32;
            let file_type = h[68] as u32;
            let aux_type = u16::from_le_bytes([h[69], h[70]]) as u32;
            let storage_type = h[71];
            let eof = u32::from_le_bytes([h[82], h[83], h[84], 0]);
            let num_data_blocks = u16::from_le_bytes([h[85], h[86]]) as usize;
            let flags = h[127];
            let is_dir = storage_type == 0x0d || flags & DIRECTORY_FLAG != 0;

            let stored_len = num_data_blocks * HEADER_LEN;
            pos += HEADER_LEN;
            if pos + stored_len > bytes.len() {
                notes.warn(format!("entry {name} claims more data than the archive has remaining"));
                break;
            }
            let mut body = bytes[pos..pos + stored_len].to_vec();
            if !is_dir {
                body.truncate(eof as usize);
            } else {
                body.clear();
            }
            pos += stored_len;

            let id = ArchiveEntryId(records.len());
            let mut rec = Record::new(id, &name, '/');
            rec.file_type = file_type;
            rec.aux_type = aux_type;
            rec.access_flags = access;
            if !is_dir {
                rec.parts.push(super::PartMeta {
                    kind: PartKind::DataFork,
                    uncompressed_length: body.len() as u64,
                    stored_length: body.len() as u64,
                    compression_format: CompressionFormat::Uncompressed,
                });
                data.insert(id.0, body);
            }
            records.push(Some(rec));
        }
        Ok(Self { records, data, notes })
    }
}

impl Archive for Binary2 {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Binary2
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
        Err(Error::arg("Binary II archives are read-only"))
    }
    fn cancel_transaction(&mut self) -> Result<()> {
        Err(Error::txn_state("no transaction is open"))
    }
    fn commit_transaction(&mut self, _output: &mut Vec<u8>) -> Result<()> {
        Err(Error::txn_state("no transaction is open"))
    }
    fn create_record(&mut self, _filename: &str, _dir_sep: char) -> Result<ArchiveEntryId> {
        Err(Error::arg("Binary II archives are read-only"))
    }
    fn delete_record(&mut self, _entry: ArchiveEntryId) -> Result<()> {
        Err(Error::arg("Binary II archives are read-only"))
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
        Err(Error::arg("Binary II archives are read-only"))
    }
    fn delete_part(&mut self, _entry: ArchiveEntryId, _kind: PartKind) -> Result<()> {
        Err(Error::arg("Binary II archives are read-only"))
    }

    fn open_part(&mut self, entry: ArchiveEntryId, kind: PartKind) -> Result<PartReader> {
        if kind != PartKind::DataFork {
            return Err(Error::arg("Binary II records have only a data fork"));
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

    fn sample_bny(name: &str, body: &[u8]) -> Vec<u8> {
        let mut h = vec![0u8; HEADER_LEN];
        h[0] = 0;
        h[1] = ID_BYTE;
        h[2] = name.len() as u8;
        h[3..3 + name.len()].copy_from_slice(name.as_bytes());
        let blocks = body.len().div_ceil(HEADER_LEN).max(1);
        h[82..85].copy_from_slice(&(body.len() as u32).to_le_bytes()[0..3]);
        h[85..87].copy_from_slice(&(blocks as u16).to_le_bytes());
        let mut out = h;
        let mut padded = body.to_vec();
        padded.resize(blocks * HEADER_LEN, 0);
        out.extend(padded);
        out
    }

    #[test]
    fn reads_a_single_entry_archive() {
        let bytes = sample_bny("GREETING.TXT", b"hello binary ii");
        let archive = Binary2::open(&bytes).unwrap();
        assert_eq!(archive.records().len(), 1);
        let entry = archive.find_file_entry("GREETING.TXT").unwrap();
        assert_eq!(archive.record(entry).unwrap().filename, "GREETING.TXT");
    }

    #[test]
    fn reading_a_part_returns_its_bytes() {
        let bytes = sample_bny("A", b"payload");
        let mut archive = Binary2::open(&bytes).unwrap();
        let entry = archive.find_file_entry("A").unwrap();
        let mut reader = archive.open_part(entry, PartKind::DataFork).unwrap();
        let mut buf = vec![0u8; 7];
        reader.read(&mut buf);
        assert_eq!(&buf, b"payload");
        archive.close_part(reader).unwrap();
    }

    #[test]
    fn writes_are_rejected() {
        let bytes = sample_bny("A", b"x");
        let mut archive = Binary2::open(&bytes).unwrap();
        assert!(archive.start_transaction().is_err());
    }
}
