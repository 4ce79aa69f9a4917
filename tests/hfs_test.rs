//! HFS filesystem scenarios.

use orchard::chunk::{ChunkProvider, Order};
use orchard::fs::hfs::Hfs;
use orchard::fs::{AccessMode, CreateMode, FileSystem, ForkKind};

const BLOCK: usize = 512;

fn blank(blocks: u16) -> Hfs {
    let provider = ChunkProvider::new_ordered(vec![0u8; blocks as usize * BLOCK], Order::ProdosBlock, true);
    let mut fs = Hfs::new(provider, blocks);
    fs.format("MyDisk", 0, false).unwrap();
    fs.prepare_file_access(false).unwrap();
    fs
}

#[test]
fn round_trip_create_write_read() {
    let mut fs = blank(1600);
    let id = fs.create_file(fs.get_vol_dir(), "Hello", CreateMode::File).unwrap();
    let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
    handle.write(b"hfs data fork").unwrap();
    fs.close_file(handle).unwrap();

    fs.prepare_file_access(true).unwrap();
    let found = fs.find_file_entry(fs.get_vol_dir(), "hello").unwrap();
    let mut handle = fs.open_file(found, AccessMode::ReadOnly, ForkKind::Data).unwrap();
    let mut buf = vec![0u8; 13];
    handle.read(&mut buf);
    assert_eq!(&buf, b"hfs data fork");
}

#[test]
fn resource_fork_is_independent_of_data_fork() {
    let mut fs = blank(1600);
    let id = fs.create_file(fs.get_vol_dir(), "Icon", CreateMode::File).unwrap();
    fs.add_rsrc_fork(id).unwrap();
    let mut dh = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
    dh.write(b"data").unwrap();
    fs.close_file(dh).unwrap();
    let mut rh = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Rsrc).unwrap();
    rh.write(b"rsrc-bytes").unwrap();
    fs.close_file(rh).unwrap();

    let fid = fs.find_file_entry(fs.get_vol_dir(), "icon").unwrap();
    let mut dh = fs.open_file(fid, AccessMode::ReadOnly, ForkKind::Data).unwrap();
    let mut dbuf = vec![0u8; 4];
    dh.read(&mut dbuf);
    assert_eq!(&dbuf, b"data");
    let mut rh = fs.open_file(fid, AccessMode::ReadOnly, ForkKind::Rsrc).unwrap();
    let mut rbuf = vec![0u8; 10];
    rh.read(&mut rbuf);
    assert_eq!(&rbuf, b"rsrc-bytes");
}

#[test]
fn nested_directory_create_and_delete() {
    let mut fs = blank(1600);
    let dir = fs.create_file(fs.get_vol_dir(), "Folder", CreateMode::Directory).unwrap();
    let file = fs.create_file(dir, "Inner", CreateMode::File).unwrap();
    assert!(fs.delete_file(dir).is_err());
    fs.delete_file(file).unwrap();
    fs.delete_file(dir).unwrap();
    assert!(fs.find_file_entry(fs.get_vol_dir(), "folder").is_err());
}

#[test]
fn colon_in_name_is_rejected() {
    let mut fs = blank(1600);
    assert!(fs.create_file(fs.get_vol_dir(), "bad:name", CreateMode::File).is_err());
}

#[test]
fn corrupt_master_directory_block_signature_fails_reopen() {
    let provider = ChunkProvider::new_ordered(vec![0u8; 1600 * BLOCK], Order::ProdosBlock, true);
    let mut fs = Hfs::new(provider, 1600);
    fs.format("MyDisk", 0, false).unwrap();
    fs.prepare_file_access(false).unwrap();
    fs.prepare_raw_access().unwrap();

    let mut corrupted = fs.provider_mut().read_block(2).unwrap();
    corrupted[0] = 0;
    corrupted[1] = 0;
    fs.provider_mut().write_block(2, &corrupted).unwrap();

    assert!(fs.prepare_file_access(false).is_err());
}
