//! Cpio "newc" ramdisk codec (§4.1).
//!
//! Grounded on `examples/original_source/libmbp/src/cpiofile.cpp`: every
//! mutation zeroes uid/gid/mtime/devmajor/devminor, entries are kept sorted
//! by pathname after each mutation, `add_file`/`add_symlink` refuse to
//! overwrite, and `rename`/`write`/`read` distinguish AlreadyExists from
//! NotFound. Unlike the C++ original this never attempts partial recovery
//! on malformed input, per the design's fail-fast rule for codecs.
//!
//! The "newc" header itself (110-byte ASCII-hex fields, 4-byte alignment
//! padding, trailing `TRAILER!!!` entry) is hand-rolled rather than pulled
//! from a crate: this is core, bit-exact domain logic the design calls out
//! by name, not ambient plumbing, and there was no way to confirm an
//! external crate's exact byte layout without running the toolchain.

mod compress;

pub use compress::Compression;

use std::collections::BTreeMap;

use crate::error::{MbtoolError, Result};

const NEWC_MAGIC: &[u8; 6] = b"070701";
const TRAILER_NAME: &str = "TRAILER!!!";
const HEADER_LEN: usize = 110;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Regular,
    Symlink,
    Directory,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub kind: EntryType,
    pub mode_bits: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u32,
    pub devmajor: u32,
    pub devminor: u32,
    pub rdevmajor: u32,
    pub rdevminor: u32,
    /// File contents, or the symlink target encoded as bytes for `Symlink`.
    pub data: Vec<u8>,
}

impl Entry {
    fn file_mode(&self) -> u32 {
        let type_bits = match self.kind {
            EntryType::Regular => 0o100_000,
            EntryType::Symlink => 0o120_000,
            EntryType::Directory => 0o040_000,
        };
        type_bits | (self.mode_bits & 0o7777)
    }
}

/// An in-memory cpio ramdisk: a path-keyed, always-sorted entry table plus
/// the compression algorithm detected on `load` (reused on `store`).
#[derive(Debug, Clone, Default)]
pub struct Ramdisk {
    entries: BTreeMap<String, Entry>,
    compression: Option<Compression>,
}

impl Ramdisk {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn compression(&self) -> Compression {
        self.compression.unwrap_or(Compression::None)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn remove(&mut self, path: &str) -> Result<()> {
        self.entries
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    pub fn read(&self, path: &str) -> Result<&[u8]> {
        self.entries
            .get(path)
            .map(|e| e.data.as_slice())
            .ok_or_else(|| not_found(path))
    }

    pub fn write(&mut self, path: &str, contents: Vec<u8>) -> Result<()> {
        let entry = self.entries.get_mut(path).ok_or_else(|| not_found(path))?;
        entry.data = contents;
        entry.uid = 0;
        entry.gid = 0;
        entry.mtime = 0;
        entry.devmajor = 0;
        entry.devminor = 0;
        Ok(())
    }

    pub fn add_file(&mut self, path: &str, mode: u32, contents: Vec<u8>) -> Result<()> {
        if self.exists(path) {
            return Err(already_exists(path));
        }
        self.entries.insert(
            path.to_owned(),
            Entry {
                kind: EntryType::Regular,
                mode_bits: mode,
                uid: 0,
                gid: 0,
                mtime: 0,
                devmajor: 0,
                devminor: 0,
                rdevmajor: 0,
                rdevminor: 0,
                data: contents,
            },
        );
        Ok(())
    }

    pub fn add_symlink(&mut self, path: &str, target: &str) -> Result<()> {
        if self.exists(path) {
            return Err(already_exists(path));
        }
        self.entries.insert(
            path.to_owned(),
            Entry {
                kind: EntryType::Symlink,
                mode_bits: 0o777,
                uid: 0,
                gid: 0,
                mtime: 0,
                devmajor: 0,
                devminor: 0,
                rdevmajor: 0,
                rdevminor: 0,
                data: target.as_bytes().to_vec(),
            },
        );
        Ok(())
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        if self.exists(new) {
            return Err(already_exists(new));
        }
        let entry = self.entries.remove(old).ok_or_else(|| not_found(old))?;
        self.entries.insert(new.to_owned(), entry);
        Ok(())
    }

    pub fn entry(&self, path: &str) -> Result<&Entry> {
        self.entries.get(path).ok_or_else(|| not_found(path))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Parse a (possibly compressed) archive, remembering the detected
    /// compression so `store` reproduces it.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let compression = Compression::detect(bytes);
        let raw = compression.decompress(bytes)?;
        let entries = parse_newc(&raw)?;
        Ok(Self {
            entries,
            compression: Some(compression),
        })
    }

    /// Serialise in lexicographic pathname order and recompress with the
    /// algorithm remembered from `load` (or `None` for a fresh `Ramdisk`).
    pub fn store(&self) -> Result<Vec<u8>> {
        let raw = write_newc(&self.entries);
        self.compression().compress(&raw)
    }
}

fn not_found(path: &str) -> MbtoolError {
    MbtoolError::ProtocolViolation(format!("cpio entry not found: {path}"))
}

fn already_exists(path: &str) -> MbtoolError {
    MbtoolError::ProtocolViolation(format!("cpio entry already exists: {path}"))
}

fn malformed(reason: &str) -> MbtoolError {
    MbtoolError::ProtocolViolation(format!("malformed cpio archive: {reason}"))
}

fn parse_hex_field(field: &[u8]) -> Result<u32> {
    let text = std::str::from_utf8(field).map_err(|_| malformed("non-ASCII header field"))?;
    u32::from_str_radix(text, 16).map_err(|_| malformed("non-hex header field"))
}

fn round_up_4(n: usize) -> usize {
    (n + 3) & !3
}

fn parse_newc(data: &[u8]) -> Result<BTreeMap<String, Entry>> {
    let mut entries = BTreeMap::new();
    let mut pos = 0usize;

    loop {
        let header = data
            .get(pos..pos + HEADER_LEN)
            .ok_or_else(|| malformed("truncated header"))?;
        if &header[0..6] != NEWC_MAGIC {
            return Err(malformed("bad magic"));
        }

        let mode = parse_hex_field(&header[14..22])?;
        let uid = parse_hex_field(&header[22..30])?;
        let gid = parse_hex_field(&header[30..38])?;
        let mtime = parse_hex_field(&header[46..54])?;
        let filesize = parse_hex_field(&header[54..62])? as usize;
        let devmajor = parse_hex_field(&header[62..70])?;
        let devminor = parse_hex_field(&header[70..78])?;
        let rdevmajor = parse_hex_field(&header[78..86])?;
        let rdevminor = parse_hex_field(&header[86..94])?;
        let namesize = parse_hex_field(&header[94..102])? as usize;

        pos += HEADER_LEN;
        let name_bytes = data
            .get(pos..pos + namesize)
            .ok_or_else(|| malformed("truncated filename"))?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| malformed("non-UTF8 filename"))?
            .trim_end_matches('\0')
            .to_owned();
        pos += round_up_4(namesize);

        if name == TRAILER_NAME {
            break;
        }

        let file_data = data
            .get(pos..pos + filesize)
            .ok_or_else(|| malformed("truncated file data"))?
            .to_vec();
        pos += round_up_4(filesize);

        let file_type = mode & 0o170_000;
        let kind = match file_type {
            0o120_000 => EntryType::Symlink,
            0o040_000 => EntryType::Directory,
            _ => EntryType::Regular,
        };

        entries.insert(
            name,
            Entry {
                kind,
                mode_bits: mode & 0o7777,
                uid,
                gid,
                mtime,
                devmajor,
                devminor,
                rdevmajor,
                rdevminor,
                data: file_data,
            },
        );
    }

    Ok(entries)
}

fn write_header(out: &mut Vec<u8>, entry_mode: u32, entry: &Entry, namesize: usize, inode: u32) {
    out.extend_from_slice(NEWC_MAGIC);
    let fields = [
        inode,
        entry_mode,
        entry.uid,
        entry.gid,
        1u32, // nlink
        entry.mtime,
        entry.data.len() as u32,
        entry.devmajor,
        entry.devminor,
        entry.rdevmajor,
        entry.rdevminor,
        namesize as u32,
        0, // check
    ];
    for field in fields {
        out.extend_from_slice(format!("{field:08x}").as_bytes());
    }
}

fn pad_to_4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn write_newc(entries: &BTreeMap<String, Entry>) -> Vec<u8> {
    let mut out = Vec::new();
    for (inode, (name, entry)) in entries.iter().enumerate() {
        let namesize = name.len() + 1;
        write_header(&mut out, entry.file_mode(), entry, namesize, inode as u32 + 1);
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        pad_to_4(&mut out);
        out.extend_from_slice(&entry.data);
        pad_to_4(&mut out);
    }

    let trailer = Entry {
        kind: EntryType::Regular,
        mode_bits: 0,
        uid: 0,
        gid: 0,
        mtime: 0,
        devmajor: 0,
        devminor: 0,
        rdevmajor: 0,
        rdevminor: 0,
        data: Vec::new(),
    };
    let namesize = TRAILER_NAME.len() + 1;
    write_header(&mut out, 0, &trailer, namesize, 0);
    out.extend_from_slice(TRAILER_NAME.as_bytes());
    out.push(0);
    pad_to_4(&mut out);

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_uncompressed() {
        let mut rd = Ramdisk::new();
        rd.add_file("init", 0o755, b"#!/bin/sh\n".to_vec()).unwrap();
        rd.add_file("default.prop", 0o644, b"ro.multiboot=1\n".to_vec()).unwrap();
        let bytes = rd.store().unwrap();

        let loaded = Ramdisk::load(&bytes).unwrap();
        assert_eq!(loaded.compression(), Compression::None);
        assert_eq!(loaded.read("init").unwrap(), b"#!/bin/sh\n");
        assert_eq!(loaded.read("default.prop").unwrap(), b"ro.multiboot=1\n");
    }

    #[test]
    fn entries_come_back_sorted_regardless_of_insertion_order() {
        let mut rd = Ramdisk::new();
        rd.add_file("zzz", 0o644, Vec::new()).unwrap();
        rd.add_file("aaa", 0o644, Vec::new()).unwrap();
        rd.add_file("mmm", 0o644, Vec::new()).unwrap();
        let paths: Vec<_> = rd.paths().collect();
        assert_eq!(paths, vec!["aaa", "mmm", "zzz"]);
    }

    #[test]
    fn add_symlink_scenario() {
        let mut rd = Ramdisk::new();
        rd.add_symlink("sbin/sh", "busybox").unwrap();
        let bytes = rd.store().unwrap();
        let loaded = Ramdisk::load(&bytes).unwrap();

        let entry = loaded.entry("sbin/sh").unwrap();
        assert_eq!(entry.kind, EntryType::Symlink);
        assert_eq!(entry.data, b"busybox");
        assert_eq!(entry.mode_bits, 0o777);
        assert_eq!(entry.uid, 0);
        assert_eq!(entry.gid, 0);
        assert_eq!(entry.mtime, 0);
    }

    #[test]
    fn add_file_rejects_duplicate_path() {
        let mut rd = Ramdisk::new();
        rd.add_file("init", 0o755, Vec::new()).unwrap();
        assert!(rd.add_file("init", 0o755, Vec::new()).is_err());
    }

    #[test]
    fn write_and_read_require_existing_entry() {
        let mut rd = Ramdisk::new();
        assert!(rd.write("missing", Vec::new()).is_err());
        assert!(rd.read("missing").is_err());
    }

    #[test]
    fn rename_checks_both_endpoints() {
        let mut rd = Ramdisk::new();
        rd.add_file("a", 0o644, Vec::new()).unwrap();
        rd.add_file("b", 0o644, Vec::new()).unwrap();
        assert!(rd.rename("a", "b").is_err());
        assert!(rd.rename("missing", "c").is_err());
        rd.rename("a", "c").unwrap();
        assert!(!rd.exists("a"));
        assert!(rd.exists("c"));
    }

    #[test]
    fn gzip_compression_round_trips_through_store_load() {
        let mut rd = Ramdisk::new();
        rd.add_file("init", 0o755, b"hello".repeat(50)).unwrap();
        let plain = rd.store().unwrap();
        let gz = Compression::Gzip.compress(&plain).unwrap();

        let loaded = Ramdisk::load(&gz).unwrap();
        assert_eq!(loaded.compression(), Compression::Gzip);
        let restored = loaded.store().unwrap();
        assert_eq!(Compression::detect(&restored), Compression::Gzip);
    }
}
