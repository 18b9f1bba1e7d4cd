//! End-to-end coverage: build synthetic zip byte strings, explode them,
//! and verify the reconstitution cursor reproduces the original bytes
//! exactly, including under random seeks and across archives that share
//! entry payloads.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;
use xzip::blobstore::BlobStore;
use xzip::cursor::{ExplodedInfo, ReconstitutionCursor};
use xzip::exploder::{explode, ExplodeOutcome};
use xzip::paths::archive_name;

fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &b in data {
        crc ^= b as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

struct Entry {
    name: &'static str,
    content: &'static [u8],
    use_descriptor: bool,
}

/// Builds a multi-entry zip, optionally streaming sizes via a trailing
/// Data Descriptor per entry, and optionally appending a trailing comment
/// after the End of Central Directory record (pushing the EOCD marker
/// away from the very end of the file).
fn build_zip(entries: &[Entry], comment: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut cd_entries = Vec::new();

    for entry in entries {
        let lfh_offset = buf.len() as u32;
        let crc = crc32(entry.content);
        let flag: u16 = if entry.use_descriptor { 0x08 } else { 0 };

        buf.extend_from_slice(b"PK\x03\x04");
        buf.extend_from_slice(&20u16.to_le_bytes());
        buf.extend_from_slice(&flag.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // stored
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        if entry.use_descriptor {
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
        } else {
            buf.extend_from_slice(&crc.to_le_bytes());
            buf.extend_from_slice(&(entry.content.len() as u32).to_le_bytes());
            buf.extend_from_slice(&(entry.content.len() as u32).to_le_bytes());
        }
        buf.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(entry.name.as_bytes());
        buf.extend_from_slice(entry.content);

        if entry.use_descriptor {
            buf.extend_from_slice(b"PK\x07\x08");
            buf.extend_from_slice(&crc.to_le_bytes());
            buf.extend_from_slice(&(entry.content.len() as u32).to_le_bytes());
            buf.extend_from_slice(&(entry.content.len() as u32).to_le_bytes());
        }

        cd_entries.push((lfh_offset, entry, crc, flag));
    }

    let cd_offset = buf.len() as u32;
    for (lfh_offset, entry, crc, flag) in &cd_entries {
        buf.extend_from_slice(b"PK\x01\x02");
        buf.extend_from_slice(&20u16.to_le_bytes());
        buf.extend_from_slice(&20u16.to_le_bytes());
        buf.extend_from_slice(&flag.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&(entry.content.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(entry.content.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&lfh_offset.to_le_bytes());
        buf.extend_from_slice(entry.name.as_bytes());
    }
    let cd_size = buf.len() as u32 - cd_offset;

    buf.extend_from_slice(b"PK\x05\x06");
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    buf.extend_from_slice(&cd_size.to_le_bytes());
    buf.extend_from_slice(&cd_offset.to_le_bytes());
    buf.extend_from_slice(&(comment.len() as u16).to_le_bytes());
    buf.extend_from_slice(comment);

    buf
}

fn explode_and_read_all(archive_path: &Path, base: &Path, depth: u32) -> Vec<u8> {
    let outcome = explode(archive_path, base, depth).unwrap();
    assert!(matches!(outcome, ExplodeOutcome::Exploded { .. }));

    let name = archive_name(archive_path);
    let info = Arc::new(ExplodedInfo::load(base, &name).unwrap());
    let mut cursor = ReconstitutionCursor::open(base, &name, depth, info).unwrap();

    let mut out = Vec::new();
    cursor.read_to_end(&mut out).unwrap();
    out
}

#[test]
fn reconstitutes_a_simple_multi_entry_archive_byte_exact() {
    let dir = tempdir().unwrap();
    let entries = [
        Entry { name: "a.txt", content: b"first entry payload", use_descriptor: false },
        Entry { name: "b.txt", content: b"second entry, different bytes", use_descriptor: false },
    ];
    let zip_bytes = build_zip(&entries, b"");
    let archive_path = dir.path().join("multi.zip");
    fs::write(&archive_path, &zip_bytes).unwrap();

    let base = dir.path().join("pool");
    let reconstructed = explode_and_read_all(&archive_path, &base, 0);
    assert_eq!(reconstructed, zip_bytes);
}

#[test]
fn reconstitutes_entries_using_data_descriptors() {
    let dir = tempdir().unwrap();
    let entries = [
        Entry { name: "streamed.bin", content: b"streamed sizes via descriptor", use_descriptor: true },
    ];
    let zip_bytes = build_zip(&entries, b"");
    let archive_path = dir.path().join("streamed.zip");
    fs::write(&archive_path, &zip_bytes).unwrap();

    let base = dir.path().join("pool");
    let reconstructed = explode_and_read_all(&archive_path, &base, 0);
    assert_eq!(reconstructed, zip_bytes);
}

#[test]
fn reconstitutes_archive_with_trailing_comment() {
    let dir = tempdir().unwrap();
    let entries = [
        Entry { name: "only.txt", content: b"content before a long comment", use_descriptor: false },
    ];
    let zip_bytes = build_zip(&entries, b"a trailing archive comment, pushing EOCD back");
    let archive_path = dir.path().join("commented.zip");
    fs::write(&archive_path, &zip_bytes).unwrap();

    let base = dir.path().join("pool");
    let reconstructed = explode_and_read_all(&archive_path, &base, 0);
    assert_eq!(reconstructed, zip_bytes);
}

#[test]
fn random_seeks_reproduce_the_same_bytes_as_a_linear_read() {
    let dir = tempdir().unwrap();
    let entries = [
        Entry { name: "one.txt", content: b"abcdefghij0123456789", use_descriptor: false },
        Entry { name: "two.txt", content: b"the quick brown fox jumps", use_descriptor: true },
        Entry { name: "three.txt", content: b"zz", use_descriptor: false },
    ];
    let zip_bytes = build_zip(&entries, b"short comment");
    let archive_path = dir.path().join("seek.zip");
    fs::write(&archive_path, &zip_bytes).unwrap();

    let base = dir.path().join("pool");
    explode(&archive_path, &base, 0).unwrap();
    let name = archive_name(&archive_path);
    let info = Arc::new(ExplodedInfo::load(&base, &name).unwrap());

    assert_eq!(info.filesize as usize, zip_bytes.len());

    let mut cursor = ReconstitutionCursor::open(&base, &name, 0, info).unwrap();

    for &(offset, len) in &[(0usize, 10usize), (5, 20), (zip_bytes.len() - 8, 8), (1, 1)] {
        cursor.seek(SeekFrom::Start(offset as u64)).unwrap();
        let mut buf = vec![0u8; len];
        let mut total = 0;
        while total < len {
            let n = cursor.read(&mut buf[total..]).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        buf.truncate(total);
        assert_eq!(buf, zip_bytes[offset..offset + total]);
    }
}

#[test]
fn identical_entry_payloads_across_archives_share_one_blob() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("pool");

    let entries_a = [Entry { name: "shared.bin", content: b"this payload repeats", use_descriptor: false }];
    let zip_a = build_zip(&entries_a, b"");
    let path_a = dir.path().join("archive_a.zip");
    fs::write(&path_a, &zip_a).unwrap();

    let entries_b = [
        Entry { name: "other_name.bin", content: b"this payload repeats", use_descriptor: false },
        Entry { name: "unique.bin", content: b"not shared at all", use_descriptor: false },
    ];
    let zip_b = build_zip(&entries_b, b"");
    let path_b = dir.path().join("archive_b.zip");
    fs::write(&path_b, &zip_b).unwrap();

    explode(&path_a, &base, 0).unwrap();
    explode(&path_b, &base, 0).unwrap();

    let blob_count = fs::read_dir(base.join("data")).unwrap().count();
    assert_eq!(blob_count, 2);

    let reconstructed_a = {
        let name = archive_name(&path_a);
        let info = Arc::new(ExplodedInfo::load(&base, &name).unwrap());
        let mut cursor = ReconstitutionCursor::open(&base, &name, 0, info).unwrap();
        let mut out = Vec::new();
        cursor.read_to_end(&mut out).unwrap();
        out
    };
    assert_eq!(reconstructed_a, zip_a);

    let reconstructed_b = {
        let name = archive_name(&path_b);
        let info = Arc::new(ExplodedInfo::load(&base, &name).unwrap());
        let mut cursor = ReconstitutionCursor::open(&base, &name, 0, info).unwrap();
        let mut out = Vec::new();
        cursor.read_to_end(&mut out).unwrap();
        out
    };
    assert_eq!(reconstructed_b, zip_b);
}

#[test]
fn blob_store_depth_is_honored_end_to_end() {
    let dir = tempdir().unwrap();
    let entries = [Entry { name: "sharded.bin", content: b"some content to shard", use_descriptor: false }];
    let zip_bytes = build_zip(&entries, b"");
    let archive_path = dir.path().join("sharded.zip");
    fs::write(&archive_path, &zip_bytes).unwrap();

    let base = dir.path().join("pool");
    explode(&archive_path, &base, 2).unwrap();

    let mut hasher = sha1_smol::Sha1::new();
    hasher.update(entries[0].content);
    let hex = hasher.digest().to_string();

    let blobs = BlobStore::new(base.clone(), 2);
    assert!(blobs.contains(&hex));
    let expected_shard = base
        .join("data")
        .join(&hex[0..1])
        .join(&hex[1..2])
        .join(&hex);
    assert!(expected_shard.is_file());
}
