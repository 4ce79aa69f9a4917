//! End-to-end DOS 3.3 scenarios (spec.md §8 scenario 1 and 2).

use orchard::chunk::{ChunkProvider, Order};
use orchard::fs::dos3x::Dos3x;
use orchard::fs::{AccessMode, CreateMode, FileSystem, ForkKind};

fn blank(bootable: bool) -> Dos3x {
    let provider = ChunkProvider::new_ordered(vec![0u8; 35 * 16 * 256], Order::DosSector, true);
    let mut fs = Dos3x::new(provider);
    fs.format("", 254, bootable).unwrap();
    fs.prepare_file_access(false).unwrap();
    fs
}

#[test]
fn bootable_140k_volume_reserves_four_tracks() {
    let fs = blank(true);
    assert_eq!(fs.free_space(), (35 - 4) * 16 * 256);
}

#[test]
fn non_bootable_140k_volume_reserves_two_tracks() {
    let fs = blank(false);
    assert_eq!(fs.free_space(), (35 - 2) * 16 * 256);
}

#[test]
fn filename_length_boundary() {
    let mut fs = blank(false);
    let too_long = "Q12345678901234567890123456789A";
    assert_eq!(too_long.len(), 32);
    assert!(fs.create_file(fs.get_vol_dir(), too_long, CreateMode::File).is_err());

    let fits = "Q".to_string() + &"1".repeat(29);
    assert_eq!(fits.len(), 30);
    assert!(fs.create_file(fs.get_vol_dir(), &fits, CreateMode::File).is_ok());
}

#[test]
fn round_trip_format_create_close_reopen_deep_scan() {
    let mut fs = blank(false);
    let id = fs.create_file(fs.get_vol_dir(), "HELLO", CreateMode::File).unwrap();
    let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
    handle.write(b"hello, dos").unwrap();
    fs.close_file(handle).unwrap();

    fs.prepare_file_access(true).unwrap();
    assert!(!fs.notes().has_errors());
    let found = fs.find_file_entry(fs.get_vol_dir(), "HELLO").unwrap();
    let mut handle = fs.open_file(found, AccessMode::ReadOnly, ForkKind::Data).unwrap();
    let mut buf = vec![0u8; 10];
    handle.read(&mut buf);
    assert_eq!(&buf, b"hello, dos");
}

#[test]
fn allocation_conservation_after_delete() {
    let mut fs = blank(false);
    let before = fs.free_space();
    let id = fs.create_file(fs.get_vol_dir(), "TEMP", CreateMode::File).unwrap();
    let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
    handle.write(&vec![0xaau8; 2048]).unwrap();
    fs.close_file(handle).unwrap();
    assert!(fs.free_space() < before);
    fs.delete_file(id).unwrap();
    assert_eq!(fs.free_space(), before);
}
