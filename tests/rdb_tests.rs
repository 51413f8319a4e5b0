use std::fs;

use kvnode::redis::storage::Keyspace;

const OP_SELECTDB: u8 = 0xFE;
const OP_RESIZEDB: u8 = 0xFB;
const OP_EXPIRETIME_MS: u8 = 0xFC;
const OP_STRING: u8 = 0x00;
const OP_EOF: u8 = 0xFF;

fn header() -> Vec<u8> {
    b"REDIS0011".to_vec()
}

fn write_fixture(dir: &std::path::Path, name: &str, bytes: &[u8]) {
    fs::write(dir.join(name), bytes).unwrap();
}

#[test]
fn loads_a_snapshot_file_from_disk_into_the_keyspace() {
    let tmp = tempfile::tempdir().unwrap();
    let mut buf = header();
    buf.push(OP_SELECTDB);
    buf.push(0);
    buf.push(OP_RESIZEDB);
    buf.push(2);
    buf.push(2);
    buf.push(OP_STRING);
    buf.push(3);
    buf.extend_from_slice(b"foo");
    buf.push(3);
    buf.extend_from_slice(b"bar");
    buf.push(OP_STRING);
    buf.push(3);
    buf.extend_from_slice(b"baz");
    buf.push(3);
    buf.extend_from_slice(b"qux");
    buf.push(OP_EOF);
    write_fixture(tmp.path(), "dump.rdb", &buf);

    let keyspace = Keyspace::new();
    kvnode::redis::rdb::load_into(&keyspace, tmp.path().to_str().unwrap(), "dump.rdb");

    assert_eq!(keyspace.get(b"foo"), Some(b"bar".to_vec()));
    assert_eq!(keyspace.get(b"baz"), Some(b"qux".to_vec()));
    assert_eq!(keyspace.len(), 2);
}

#[test]
fn drops_entries_whose_expiry_has_already_passed() {
    let tmp = tempfile::tempdir().unwrap();
    let mut buf = header();
    buf.push(OP_EXPIRETIME_MS);
    buf.extend_from_slice(&1_u64.to_le_bytes()); // 1ms after the epoch: long expired
    buf.push(OP_STRING);
    buf.push(4);
    buf.extend_from_slice(b"gone");
    buf.push(1);
    buf.extend_from_slice(b"x");
    buf.push(OP_STRING);
    buf.push(4);
    buf.extend_from_slice(b"here");
    buf.push(1);
    buf.extend_from_slice(b"y");
    buf.push(OP_EOF);
    write_fixture(tmp.path(), "dump.rdb", &buf);

    let keyspace = Keyspace::new();
    kvnode::redis::rdb::load_into(&keyspace, tmp.path().to_str().unwrap(), "dump.rdb");

    assert_eq!(keyspace.get(b"gone"), None);
    assert_eq!(keyspace.get(b"here"), Some(b"y".to_vec()));
}

#[test]
fn missing_snapshot_file_leaves_the_keyspace_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let keyspace = Keyspace::new();
    kvnode::redis::rdb::load_into(&keyspace, tmp.path().to_str().unwrap(), "does-not-exist.rdb");
    assert_eq!(keyspace.len(), 0);
}

#[test]
fn corrupt_snapshot_file_clears_the_keyspace_instead_of_aborting() {
    let tmp = tempfile::tempdir().unwrap();
    write_fixture(tmp.path(), "dump.rdb", b"not-an-rdb-file");

    let keyspace = Keyspace::new();
    keyspace.set(b"preexisting".to_vec(), b"value".to_vec(), None);
    kvnode::redis::rdb::load_into(&keyspace, tmp.path().to_str().unwrap(), "dump.rdb");

    assert_eq!(keyspace.len(), 0);
}
