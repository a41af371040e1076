//! Installer helper sub-commands (§6): `mount`/`unmount`/`format`, invoked
//! from inside the chroot by the updater through the wrapped busybox rather
//! than called directly by a user. Mountpoints are restricted to `/system`,
//! `/cache`, `/data`; a stamp file per mountpoint makes repeated `mount`
//! calls idempotent, mirroring the original's busybox applet table exposing
//! these as three one-word commands rather than a full `mount(8)`.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{MbtoolError, Result};
use crate::image::ImageManager;
use crate::rom::Rom;

const ALLOWED_MOUNTPOINTS: &[&str] = &["/system", "/cache", "/data"];
const STAMP_DIR: &str = "/dev/.mbtool-mount-stamps";

fn validate_mountpoint(mountpoint: &str) -> Result<&'static str> {
    ALLOWED_MOUNTPOINTS
        .iter()
        .find(|&&m| m == mountpoint)
        .copied()
        .ok_or_else(|| MbtoolError::Configuration(format!("mountpoint not allowed: {mountpoint}")))
}

fn stamp_path(mountpoint: &str) -> PathBuf {
    Path::new(STAMP_DIR).join(mountpoint.trim_start_matches('/'))
}

/// Resolve the backing path for one of the three allowed mountpoints against
/// the currently active ROM (read from `/romid`, falling back to primary —
/// the same resolution the Installer's MountFilesystems stage uses for
/// redirect decisions).
fn backing_path(mountpoint: &str) -> PathBuf {
    let rom = match crate::rom::get_booted_rom_id() {
        Ok(id) if !id.is_primary() => Rom::secondary(id, true),
        _ => Rom::primary(),
    };
    match mountpoint {
        "/system" => rom.system.full_path(),
        "/cache" => rom.cache.full_path(),
        _ => rom.data.full_path(),
    }
}

/// Bind/loop-mount the resolved backing path onto `mountpoint`. A no-op if
/// the stamp file already exists.
pub fn mount(mountpoint: &str) -> Result<()> {
    let mountpoint = validate_mountpoint(mountpoint)?;
    let stamp = stamp_path(mountpoint);
    if stamp.exists() {
        info!(mountpoint, "already mounted, skipping");
        return Ok(());
    }

    let backing = backing_path(mountpoint);
    std::fs::create_dir_all(STAMP_DIR).map_err(|e| MbtoolError::io("create stamp dir", e))?;

    let manager = ImageManager::new();
    let attached = manager.attach(&backing)?;
    let mounted = manager.mount_image(attached.path(), Path::new(mountpoint), false)?;

    // This process exits right after the helper call returns, but the
    // kernel mount and loop attachment must outlive it, so the RAII guards
    // are deliberately forgotten rather than let their Drop impls tear the
    // mount back down before exit.
    std::mem::forget(mounted);
    std::mem::forget(attached);

    std::fs::write(&stamp, b"").map_err(|e| MbtoolError::io("write mount stamp", e))?;
    info!(mountpoint, "mounted");
    Ok(())
}

/// Unmount `mountpoint` and drop its stamp file. A no-op if the stamp file
/// doesn't exist.
pub fn unmount(mountpoint: &str) -> Result<()> {
    let mountpoint = validate_mountpoint(mountpoint)?;
    let stamp = stamp_path(mountpoint);
    if !stamp.exists() {
        info!(mountpoint, "not mounted, skipping");
        return Ok(());
    }

    let status = std::process::Command::new("umount")
        .arg(mountpoint)
        .status()
        .map_err(|e| MbtoolError::io("spawn umount", e))?;
    if !status.success() {
        warn!(mountpoint, ?status, "umount reported failure");
    }
    let _ = std::fs::remove_file(&stamp);
    Ok(())
}

/// Recreate the backing image for `mountpoint` as a fresh sparse ext4
/// filesystem, clearing any stamp so a subsequent `mount` re-attaches it.
pub fn format(mountpoint: &str) -> Result<()> {
    let mountpoint = validate_mountpoint(mountpoint)?;
    let backing = backing_path(mountpoint);
    ImageManager::new().create_image(&backing, default_size_bytes(mountpoint))?;
    let _ = std::fs::remove_file(stamp_path(mountpoint));
    info!(mountpoint, "formatted");
    Ok(())
}

fn default_size_bytes(mountpoint: &str) -> u64 {
    const GIB: u64 = 1024 * 1024 * 1024;
    match mountpoint {
        "/system" => 2 * GIB,
        "/cache" => GIB / 2,
        _ => 4 * GIB,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mountpoints_outside_the_allowlist() {
        assert!(validate_mountpoint("/efs").is_err());
        assert!(validate_mountpoint("/system").is_ok());
        assert!(validate_mountpoint("/cache").is_ok());
        assert!(validate_mountpoint("/data").is_ok());
    }

    #[test]
    fn stamp_path_is_scoped_under_the_stamp_dir() {
        let p = stamp_path("/system");
        assert!(p.starts_with(STAMP_DIR));
        assert_eq!(p.file_name().unwrap(), "system");
    }
}
