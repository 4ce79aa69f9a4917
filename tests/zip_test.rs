//! ZIP archive scenarios.

use orchard::archive::zip::Zip;
use orchard::archive::{Archive, CompressionFormat, MemoryPartSource, PartKind};

#[test]
fn round_trip_deflated_entry() {
    let mut archive = Zip::create();
    archive.start_transaction().unwrap();
    let id = archive.create_record("notes.txt", '/').unwrap();
    let mut src = MemoryPartSource::new(b"zip round trip".to_vec());
    archive.add_part(id, PartKind::DataFork, &mut src, CompressionFormat::Deflate).unwrap();
    let mut out = Vec::new();
    archive.commit_transaction(&mut out).unwrap();

    let mut reopened = Zip::open(&out).unwrap();
    let found = reopened.find_file_entry("notes.txt").unwrap();
    let mut reader = reopened.open_part(found, PartKind::DataFork).unwrap();
    let mut buf = vec![0u8; reader.len() as usize];
    reader.read(&mut buf);
    reopened.close_part(reader).unwrap();
    assert_eq!(buf, b"zip round trip");
}

#[test]
fn deleting_a_record_drops_it_from_the_next_commit() {
    let mut archive = Zip::create();
    archive.start_transaction().unwrap();
    let keep = archive.create_record("keep.bin", '/').unwrap();
    let drop_me = archive.create_record("drop.bin", '/').unwrap();
    let mut s1 = MemoryPartSource::new(vec![1, 2, 3]);
    archive.add_part(keep, PartKind::DataFork, &mut s1, CompressionFormat::Deflate).unwrap();
    let mut s2 = MemoryPartSource::new(vec![4, 5, 6]);
    archive.add_part(drop_me, PartKind::DataFork, &mut s2, CompressionFormat::Deflate).unwrap();
    archive.delete_record(drop_me).unwrap();
    let mut out = Vec::new();
    archive.commit_transaction(&mut out).unwrap();

    let reopened = Zip::open(&out).unwrap();
    assert!(reopened.find_file_entry("keep.bin").is_ok());
    assert!(reopened.find_file_entry("drop.bin").is_err());
}

#[test]
fn resource_fork_parts_are_rejected() {
    let mut archive = Zip::create();
    archive.start_transaction().unwrap();
    let id = archive.create_record("a", '/').unwrap();
    let mut src = MemoryPartSource::new(b"x".to_vec());
    assert!(archive.add_part(id, PartKind::RsrcFork, &mut src, CompressionFormat::Deflate).is_err());
}
