//! ChrootBuilder / ChrootSession (§4.6): the sealed namespace an unmodified
//! OTA updater runs inside.
//!
//! The "enter a directory as a private root, run a closure, leave" shape
//! reuses the teacher's own `tiffin::Container::new(path).run(closure)`
//! idiom from `builder.rs` (used there around `dnf install`/`dracut`
//! invocations); here it backs [`ChrootSession::enter`], invoked once per
//! stage that must act from inside the sealed tree (most notably
//! `UpdaterRunner::run`). The directory/device layout and block-device
//! remapping rules are new — grounded directly on the design's §4.6 table,
//! since the teacher builds a plain OS root, not an Android recovery
//! sandbox.

use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sys::stat::{makedev, mknod, Mode, SFlag};
use tracing::{debug, warn};

use crate::error::{MbtoolError, Result};
use crate::image::AttachedLoop;

struct MountRecord {
    target: PathBuf,
    /// Best-effort hint for logging only; unmount always uses `target`.
    label: &'static str,
}

/// A process-local, owned bundle: the chroot root, every mount performed
/// inside it (in creation order, unwound in reverse), and every loop device
/// attached on its behalf. Only one active session per process.
pub struct ChrootSession {
    root: PathBuf,
    mounts: Vec<MountRecord>,
    loops: Vec<AttachedLoop>,
    torn_down: bool,
}

impl ChrootSession {
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn track_loop(&mut self, loop_dev: AttachedLoop) {
        self.loops.push(loop_dev);
    }

    /// Run `f` with this session's root as the process's root directory for
    /// the duration of the call; the previous root is restored afterward
    /// regardless of outcome.
    pub fn enter<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        tiffin::Container::new(self.root.clone())
            .run(f)
            .map_err(|e| MbtoolError::io("enter chroot", std::io::Error::other(e.to_string())))?
    }

    /// Teardown invariants (§4.6): force-detach loops found under
    /// `/dev/block`, unmount every tracked mount in reverse order
    /// (best-effort — logged, not propagated), delete the root. Runs
    /// exactly once; a second call is a no-op.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        sweep_stray_loop_devices(&self.root.join("dev/block"));

        while let Some(record) = self.mounts.pop() {
            if let Err(e) = umount2(&record.target, MntFlags::MNT_DETACH) {
                warn!(target = %record.target.display(), label = record.label, error = %e, "unmount failed during teardown");
            }
        }

        self.loops.clear();

        if let Err(e) = fs::remove_dir_all(&self.root) {
            warn!(root = %self.root.display(), error = %e, "failed to remove chroot root");
        }
    }
}

impl Drop for ChrootSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn sweep_stray_loop_devices(dev_block: &Path) {
    let Ok(entries) = fs::read_dir(dev_block) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with("loop") {
            continue;
        }
        if let Ok(device) = loopdev_fyra::LoopDevice::open(entry.path()) {
            if let Err(e) = device.detach() {
                debug!(device = name, error = %e, "no stray loop device to detach");
            }
        }
    }
}

/// One host block device made reachable inside the chroot, either by
/// device-number clone (`mknod` with the host's major/minor) or by symlink
/// to a loop device bound to this ROM's image.
pub enum BlockSource {
    /// Copy the host device node's major/minor so the updater can open it
    /// directly (boot, recovery, and any device-listed extra partition).
    HostDevice(PathBuf),
    /// Point at a private loop device instead of the real partition (used
    /// for the system device so writes never reach the host's `/system`).
    LoopDevice(PathBuf),
}

pub struct ChrootBuilder;

impl ChrootBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build the layout described in §4.6 at `root`. `vendor` gates the
    /// `/efs` bind mount (samsung-only); `block_devices` maps logical names
    /// (`boot`, `recovery`, `system`, plus any device-defined extras) to
    /// their source.
    pub fn build(&self, root: PathBuf, vendor: &str, block_devices: &[(&str, BlockSource)]) -> Result<ChrootSession> {
        let mut session = ChrootSession {
            root: root.clone(),
            mounts: Vec::new(),
            loops: Vec::new(),
            torn_down: false,
        };

        fs::create_dir_all(&root).map_err(|e| MbtoolError::io("create chroot root", e))?;
        fs::set_permissions(&root, fs::Permissions::from_mode(0o700))
            .map_err(|e| MbtoolError::io("chmod chroot root", e))?;
        mount_tmpfs(&mut session, &root, "root", 0o700)?;

        make_dir(&root, "mb", 0o755)?;
        make_dir(&root, "dev", 0o755)?;
        mount_tmpfs(&mut session, &root.join("dev"), "dev", 0o755)?;
        make_device_nodes(&root.join("dev"))?;

        make_dir(&root, "dev/pts", 0o755)?;
        mount_devpts(&mut session, &root.join("dev/pts"))?;

        make_dir(&root, "dev/block", 0o755)?;
        make_loop_control_nodes(&root.join("dev/block"))?;
        for (name, source) in block_devices {
            remap_block_device(&root.join("dev/block").join(name), source)?;
        }

        bind_copy_tree(&mut session, Path::new("/dev/input"), &root.join("dev/input"), "dev/input")?;
        bind_copy_tree(&mut session, Path::new("/dev/graphics"), &root.join("dev/graphics"), "dev/graphics")?;

        make_dir(&root, "proc", 0o555)?;
        mount_simple(&mut session, &root.join("proc"), "proc", "proc", "proc")?;
        make_dir(&root, "sys", 0o555)?;
        mount_simple(&mut session, &root.join("sys"), "sysfs", "sys", "sysfs")?;

        make_dir(&root, "sys/fs/selinux", 0o755)?;
        if Path::new("/sys/fs/selinux").is_dir() {
            if let Err(e) = bind_mount(&mut session, Path::new("/sys/fs/selinux"), &root.join("sys/fs/selinux"), "selinuxfs") {
                debug!(error = %e, "selinuxfs unavailable, continuing without it");
            }
        }

        make_dir(&root, "tmp", 0o755)?;
        mount_tmpfs(&mut session, &root.join("tmp"), "tmp", 0o755)?;

        make_dir(&root, "sbin", 0o755)?;
        mount_tmpfs(&mut session, &root.join("sbin"), "sbin", 0o755)?;
        copy_sbin_minus_reboot(&root.join("sbin"))?;

        for name in ["system", "cache", "data", "efs"] {
            make_dir(&root, name, 0o755)?;
        }
        if vendor.eq_ignore_ascii_case("samsung") && Path::new("/efs").is_dir() {
            bind_mount_read_only(&mut session, Path::new("/efs"), &root.join("efs"), "efs")?;
        }

        Ok(session)
    }
}

impl Default for ChrootBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn make_dir(root: &Path, relative: &str, mode: u32) -> Result<()> {
    let path = root.join(relative);
    fs::create_dir_all(&path).map_err(|e| MbtoolError::io(format!("mkdir {relative}"), e))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(mode))
        .map_err(|e| MbtoolError::io(format!("chmod {relative}"), e))?;
    Ok(())
}

fn mount_tmpfs(session: &mut ChrootSession, target: &Path, label: &'static str, mode: u32) -> Result<()> {
    mount(
        Some("tmpfs"),
        target,
        Some("tmpfs"),
        MsFlags::MS_NOSUID,
        Some(format!("mode={mode:o}").as_str()),
    )
    .map_err(|e| MbtoolError::io(format!("mount tmpfs at {}", target.display()), std::io::Error::from_raw_os_error(e as i32)))?;
    session.mounts.push(MountRecord {
        target: target.to_path_buf(),
        label,
    });
    Ok(())
}

fn mount_devpts(session: &mut ChrootSession, target: &Path) -> Result<()> {
    mount(Some("devpts"), target, Some("devpts"), MsFlags::empty(), None::<&str>)
        .map_err(|e| MbtoolError::io("mount devpts", std::io::Error::from_raw_os_error(e as i32)))?;
    session.mounts.push(MountRecord {
        target: target.to_path_buf(),
        label: "dev/pts",
    });
    Ok(())
}

fn mount_simple(session: &mut ChrootSession, target: &Path, source: &str, label: &'static str, fstype: &str) -> Result<()> {
    mount(Some(source), target, Some(fstype), MsFlags::empty(), None::<&str>)
        .map_err(|e| MbtoolError::io(format!("mount {fstype}"), std::io::Error::from_raw_os_error(e as i32)))?;
    session.mounts.push(MountRecord {
        target: target.to_path_buf(),
        label,
    });
    Ok(())
}

fn bind_mount(session: &mut ChrootSession, source: &Path, target: &Path, label: &'static str) -> Result<()> {
    mount(Some(source), target, None::<&str>, MsFlags::MS_BIND | MsFlags::MS_REC, None::<&str>)
        .map_err(|e| MbtoolError::io(format!("bind mount {}", source.display()), std::io::Error::from_raw_os_error(e as i32)))?;
    session.mounts.push(MountRecord {
        target: target.to_path_buf(),
        label,
    });
    Ok(())
}

fn bind_mount_read_only(session: &mut ChrootSession, source: &Path, target: &Path, label: &'static str) -> Result<()> {
    bind_mount(session, source, target, label)?;
    mount(
        None::<&str>,
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
        None::<&str>,
    )
    .map_err(|e| MbtoolError::io("remount read-only", std::io::Error::from_raw_os_error(e as i32)))?;
    Ok(())
}

/// Best-effort recursive bind mount; absence of the host directory is not
/// fatal (on-screen installers that need `/dev/input`/`/dev/graphics` are
/// the exception, not every device).
fn bind_copy_tree(session: &mut ChrootSession, source: &Path, target: &Path, label: &'static str) -> Result<()> {
    if !source.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(target).map_err(|e| MbtoolError::io(format!("mkdir {label}"), e))?;
    bind_mount(session, source, target, label)
}

fn make_device_nodes(dev: &Path) -> Result<()> {
    let char_nodes: &[(&str, u64, u64)] = &[
        ("console", 5, 1),
        ("null", 1, 3),
        ("ptmx", 5, 2),
        ("random", 1, 8),
        ("tty", 5, 0),
        ("urandom", 1, 9),
        ("zero", 1, 5),
        ("loop-control", 10, 237),
        ("fuse", 10, 229),
    ];
    for (name, major, minor) in char_nodes {
        let path = dev.join(name);
        mknod(&path, SFlag::S_IFCHR, Mode::from_bits_truncate(0o666), makedev(*major, *minor))
            .map_err(|e| MbtoolError::io(format!("mknod /dev/{name}"), std::io::Error::from_raw_os_error(e as i32)))?;
    }
    Ok(())
}

fn make_loop_control_nodes(dev_block: &Path) -> Result<()> {
    for i in 0..8u64 {
        let path = dev_block.join(format!("loop{i}"));
        mknod(&path, SFlag::S_IFBLK, Mode::from_bits_truncate(0o660), makedev(7, i))
            .map_err(|e| MbtoolError::io(format!("mknod loop{i}"), std::io::Error::from_raw_os_error(e as i32)))?;
    }
    Ok(())
}

fn remap_block_device(target: &Path, source: &BlockSource) -> Result<()> {
    match source {
        BlockSource::HostDevice(host_path) => {
            let meta = fs::metadata(host_path).map_err(|e| MbtoolError::io(format!("stat {}", host_path.display()), e))?;
            let rdev = std::os::unix::fs::MetadataExt::rdev(&meta);
            mknod(target, SFlag::S_IFBLK, Mode::from_bits_truncate(0o660), rdev)
                .map_err(|e| MbtoolError::io(format!("mknod {}", target.display()), std::io::Error::from_raw_os_error(e as i32)))?;
        }
        BlockSource::LoopDevice(loop_path) => {
            symlink(loop_path, target).map_err(|e| MbtoolError::io(format!("symlink {}", target.display()), e))?;
        }
    }
    Ok(())
}

fn copy_sbin_minus_reboot(target: &Path) -> Result<()> {
    let host_sbin = Path::new("/sbin");
    if !host_sbin.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(host_sbin).map_err(|e| MbtoolError::io("read host /sbin", e))? {
        let entry = entry.map_err(|e| MbtoolError::io("read host /sbin entry", e))?;
        if entry.file_name() == "reboot" {
            continue;
        }
        let dest = target.join(entry.file_name());
        fs::copy(entry.path(), &dest).map_err(|e| MbtoolError::io("copy /sbin entry", e))?;
        if let Ok(meta) = entry.metadata() {
            let _ = fs::set_permissions(&dest, meta.permissions());
        }
    }
    Ok(())
}
