//! CP/M filesystem scenarios.

use orchard::chunk::{ChunkProvider, Order};
use orchard::fs::cpm::Cpm;
use orchard::fs::{AccessMode, CreateMode, FileSystem, ForkKind};

const BLOCK: usize = 2048;

fn blank(total_blocks: u16) -> Cpm {
    let provider = ChunkProvider::new_ordered(vec![0u8; total_blocks as usize * BLOCK], Order::CpmKBlock, true);
    let mut fs = Cpm::new(provider, total_blocks);
    fs.format("", 0, false).unwrap();
    fs.prepare_file_access(false).unwrap();
    fs
}

#[test]
fn round_trip_create_write_read() {
    let mut fs = blank(200);
    let id = fs.create_file(fs.get_vol_dir(), "HELLO.TXT", CreateMode::File).unwrap();
    let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
    handle.write(b"hello cpm").unwrap();
    fs.close_file(handle).unwrap();

    fs.prepare_file_access(true).unwrap();
    let found = fs.find_file_entry(fs.get_vol_dir(), "hello.txt").unwrap();
    let mut handle = fs.open_file(found, AccessMode::ReadOnly, ForkKind::Data).unwrap();
    let mut buf = vec![0u8; 9];
    handle.read(&mut buf);
    assert_eq!(&buf, b"hello cpm");
}

#[test]
fn large_file_spans_multiple_extents() {
    let mut fs = blank(200);
    let id = fs.create_file(fs.get_vol_dir(), "BIG.DAT", CreateMode::File).unwrap();
    let payload = vec![0x42u8; 60_000];
    let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
    handle.write(&payload).unwrap();
    fs.close_file(handle).unwrap();

    let found = fs.find_file_entry(fs.get_vol_dir(), "big.dat").unwrap();
    assert_eq!(fs.entry(found).unwrap().data_length as usize, payload.len());
    let mut handle = fs.open_file(found, AccessMode::ReadOnly, ForkKind::Data).unwrap();
    let mut readback = vec![0u8; payload.len()];
    handle.read(&mut readback);
    assert_eq!(readback, payload);
}

#[test]
fn delete_frees_blocks() {
    let mut fs = blank(200);
    let id = fs.create_file(fs.get_vol_dir(), "A.TXT", CreateMode::File).unwrap();
    let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
    handle.write(&vec![1u8; 5000]).unwrap();
    fs.close_file(handle).unwrap();
    let before_free = fs.free_space();
    fs.delete_file(id).unwrap();
    assert!(fs.free_space() > before_free);
    assert!(fs.find_file_entry(fs.get_vol_dir(), "A.TXT").is_err());
}

#[test]
fn invalid_names_are_rejected() {
    let mut fs = blank(200);
    assert!(fs.create_file(fs.get_vol_dir(), "WAYTOOLONGNAME.TXT", CreateMode::File).is_err());
    assert!(fs.create_file(fs.get_vol_dir(), "OK.TOOLONG", CreateMode::File).is_err());
}
