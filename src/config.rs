//! Device definitions and the flat Android `key=value` property format
//! shared by `build.prop`/`info.prop` scraping (§4.9 CheckDevice, §4.10
//! `get_installed_roms`).
//!
//! Loading as a `serde_json`-backed struct follows the teacher's
//! `Manifest`/`PartitionLayout` shape in the original `config.rs` (derive
//! `Deserialize`/`Serialize`, a `load` associated function reading from
//! disk) — swapped from the teacher's YAML manifest to JSON, since
//! device-definition JSON loading is explicitly out of scope (§1) and the
//! crate doesn't otherwise need a templating/YAML stack.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_derive::{Deserialize, Serialize};

use crate::error::{MbtoolError, Result};

/// Everything CheckDevice and the chroot's block-device remapping need to
/// know about one supported device.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceDefinition {
    /// Accepted `ro.product.device` / `ro.build.product` / `ro.patcher.device` values.
    pub codenames: Vec<String>,
    pub boot_devs: Vec<String>,
    #[serde(default)]
    pub recovery_devs: Vec<String>,
    pub system_devs: Vec<String>,
    /// Extra flashable/copyable partitions, e.g. `"modem" -> "/dev/block/bootdevice/by-name/modem"`.
    #[serde(default)]
    pub extra_devs: BTreeMap<String, String>,
    #[serde(default)]
    pub vendor: String,
}

impl DeviceDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| MbtoolError::io("read device definition", e))?;
        serde_json::from_str(&text)
            .map_err(|e| MbtoolError::Configuration(format!("invalid device definition: {e}")))
    }

    #[must_use]
    pub fn matches_codename(&self, codename: &str) -> bool {
        self.codenames.iter().any(|c| c == codename)
    }

    /// First candidate path that exists on disk, or `None` if none do.
    #[must_use]
    pub fn resolve_first_existing(candidates: &[String]) -> Option<PathBuf> {
        candidates.iter().map(PathBuf::from).find(|p| p.exists())
    }
}

/// Parse a flat `key=value` Android properties file (`build.prop`,
/// `info.prop`). Blank lines and `#`-comments are ignored; a malformed line
/// (no `=`) is skipped rather than rejected, matching the tolerant style of
/// the files this parses in the wild.
#[must_use]
pub fn parse_properties(text: &str) -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            props.insert(key.trim().to_owned(), value.trim().to_owned());
        }
    }
    props
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_properties_skips_comments_and_blanks() {
        let text = "# comment\n\nro.product.device=bacon\nro.build.version.release=5.1.1\n";
        let props = parse_properties(text);
        assert_eq!(props.get("ro.product.device").map(String::as_str), Some("bacon"));
        assert_eq!(props.len(), 2);
    }

    #[test]
    fn device_definition_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        std::fs::write(
            &path,
            r#"{"codenames":["bacon"],"boot_devs":["/dev/block/boot"],"system_devs":["/dev/block/system"]}"#,
        )
        .unwrap();

        let def = DeviceDefinition::load(&path).unwrap();
        assert!(def.matches_codename("bacon"));
        assert!(!def.matches_codename("hammerhead"));
    }
}
