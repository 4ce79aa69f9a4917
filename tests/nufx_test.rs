//! NuFX (ShrinkIt) archive scenarios.

use orchard::archive::nufx::NuFx;
use orchard::archive::{Archive, CompressionFormat, MemoryPartSource, PartKind};

#[test]
fn round_trip_uncompressed_data_fork() {
    let mut shk = NuFx::create();
    shk.start_transaction().unwrap();
    let rec = shk.create_record("HELLO", '/').unwrap();
    let mut source = MemoryPartSource::new(b"hello from shrinkit".to_vec());
    shk.add_part(rec, PartKind::DataFork, &mut source, CompressionFormat::Uncompressed).unwrap();
    let mut bytes = Vec::new();
    shk.commit_transaction(&mut bytes).unwrap();

    let mut reopened = NuFx::open(&bytes).unwrap();
    let found = reopened.find_file_entry("HELLO").unwrap();
    let mut reader = reopened.open_part(found, PartKind::DataFork).unwrap();
    let mut buf = vec![0u8; reader.len() as usize];
    reader.read(&mut buf);
    reopened.close_part(reader).unwrap();
    assert_eq!(buf, b"hello from shrinkit");
}

#[test]
fn requesting_lzw2_compression_is_rejected_rather_than_silently_stored() {
    let mut shk = NuFx::create();
    shk.start_transaction().unwrap();
    let rec = shk.create_record("BIG", '/').unwrap();
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let mut source = MemoryPartSource::new(payload);
    assert!(shk.add_part(rec, PartKind::DataFork, &mut source, CompressionFormat::Lzw2).is_err());
}

#[test]
fn deleting_a_record_drops_it_from_the_next_commit() {
    let mut shk = NuFx::create();
    shk.start_transaction().unwrap();
    let keep = shk.create_record("KEEP", '/').unwrap();
    let drop_me = shk.create_record("DROPME", '/').unwrap();
    let mut s1 = MemoryPartSource::new(b"keep me".to_vec());
    shk.add_part(keep, PartKind::DataFork, &mut s1, CompressionFormat::Uncompressed).unwrap();
    let mut s2 = MemoryPartSource::new(b"drop me".to_vec());
    shk.add_part(drop_me, PartKind::DataFork, &mut s2, CompressionFormat::Uncompressed).unwrap();
    shk.delete_record(drop_me).unwrap();
    let mut bytes = Vec::new();
    shk.commit_transaction(&mut bytes).unwrap();

    let reopened = NuFx::open(&bytes).unwrap();
    assert!(reopened.find_file_entry("KEEP").is_ok());
    assert!(reopened.find_file_entry("DROPME").is_err());
}

#[test]
fn cancel_transaction_discards_staged_records() {
    let mut shk = NuFx::create();
    shk.start_transaction().unwrap();
    shk.create_record("GHOST", '/').unwrap();
    shk.cancel_transaction().unwrap();
    shk.start_transaction().unwrap();
    let mut bytes = Vec::new();
    shk.commit_transaction(&mut bytes).unwrap();
    let reopened = NuFx::open(&bytes).unwrap();
    assert!(reopened.find_file_entry("GHOST").is_err());
}
