//! ChecksumStore (§4.3): the persisted `rom/file → sha512:hex` gate on
//! `RomSwitcher::switch`.
//!
//! Grounded on `examples/original_source/mbtool/switcher.cpp`'s
//! `checksums_get`/`checksums_update`/`checksums_read`/`checksums_write` —
//! same flat `key=value` property-file shape, same fixed path under
//! `/data/multiboot`, same replace-then-rename save discipline — adapted
//! from the original's md5/sha1 mix to the spec's single sha512 algorithm.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::error::{MbtoolError, Result};

pub const CHECKSUMS_PATH: &str = "/data/multiboot/checksums.prop";
const ALGORITHM_PREFIX: &str = "sha512:";
const DIGEST_HEX_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(String),
    NotFound,
    Malformed,
}

/// Flat `rom_id/basename=sha512:<hex>` property file at [`CHECKSUMS_PATH`].
pub struct ChecksumStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl ChecksumStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn at_default_path() -> Self {
        Self::new(CHECKSUMS_PATH)
    }

    fn key(rom_id: &str, file: &str) -> String {
        format!("{rom_id}/{file}")
    }

    /// Load the on-disk file, replacing in-memory state. A missing file is
    /// equivalent to an empty store.
    pub fn load(&mut self) -> Result<()> {
        self.entries.clear();
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(MbtoolError::io("read checksums.prop", e)),
        };
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                self.entries.insert(key.to_owned(), value.to_owned());
            } else {
                // A line with no '=' is recorded under its own text so a
                // later get() for the key it was meant to hold reports
                // Malformed rather than silently vanishing.
                self.entries.insert(line.to_owned(), String::new());
            }
        }
        Ok(())
    }

    /// Atomically replace the on-disk file: write a sibling temp file,
    /// fsync, rename over the target. Mode 0700, owner root.
    pub fn save(&self) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| MbtoolError::io("create multiboot dir", e))?;

        let mut body = String::new();
        for (key, value) in &self.entries {
            body.push_str(key);
            body.push('=');
            body.push_str(value);
            body.push('\n');
        }

        let tmp_path = parent.join(format!(
            ".{}.tmp",
            self.path.file_name().and_then(|n| n.to_str()).unwrap_or("checksums.prop")
        ));

        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(0o700)
                .open(&tmp_path)
                .map_err(|e| MbtoolError::io("open checksums.prop.tmp", e))?;
            file.write_all(body.as_bytes())
                .map_err(|e| MbtoolError::io("write checksums.prop.tmp", e))?;
            file.sync_all().map_err(|e| MbtoolError::io("fsync checksums.prop.tmp", e))?;
        }

        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| MbtoolError::io("rename checksums.prop", e))?;
        Ok(())
    }

    pub fn get(&self, rom_id: &str, file: &str) -> Lookup {
        match self.entries.get(&Self::key(rom_id, file)) {
            None => Lookup::NotFound,
            Some(value) => match value.strip_prefix(ALGORITHM_PREFIX) {
                Some(hex) if hex.len() == DIGEST_HEX_LEN && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
                    Lookup::Found(hex.to_owned())
                }
                _ => Lookup::Malformed,
            },
        }
    }

    pub fn put(&mut self, rom_id: &str, file: &str, hex: &str) {
        self.entries
            .insert(Self::key(rom_id, file), format!("{ALGORITHM_PREFIX}{hex}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(byte: u8) -> String {
        format!("{byte:02x}").repeat(64)
    }

    #[test]
    fn put_save_load_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checksums.prop");

        let hash = digest(0xab);
        {
            let mut store = ChecksumStore::new(&path);
            store.put("primary", "boot.img", &hash);
            store.save().unwrap();
        }

        let mut store = ChecksumStore::new(&path);
        store.load().unwrap();
        assert_eq!(store.get("primary", "boot.img"), Lookup::Found(hash));
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.prop");
        let mut store = ChecksumStore::new(&path);
        store.load().unwrap();
        assert_eq!(store.get("primary", "boot.img"), Lookup::NotFound);
    }

    #[test]
    fn missing_algorithm_prefix_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checksums.prop");
        std::fs::write(&path, "primary/boot.img=deadbeef\n").unwrap();

        let mut store = ChecksumStore::new(&path);
        store.load().unwrap();
        assert_eq!(store.get("primary", "boot.img"), Lookup::Malformed);
    }

    #[test]
    fn wrong_hex_length_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checksums.prop");
        std::fs::write(&path, "primary/boot.img=sha512:abcd\n").unwrap();

        let mut store = ChecksumStore::new(&path);
        store.load().unwrap();
        assert_eq!(store.get("primary", "boot.img"), Lookup::Malformed);
    }

    #[test]
    fn truncated_file_is_malformed_for_every_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checksums.prop");
        std::fs::write(&path, "this is not a properties file at all").unwrap();

        let mut store = ChecksumStore::new(&path);
        store.load().unwrap();
        assert_eq!(
            store.get("this is not a properties file at all", ""),
            Lookup::Malformed
        );
        assert_eq!(store.get("primary", "boot.img"), Lookup::NotFound);
    }
}
