//! Installer (§4.9): the eleven-stage top-level state machine driving one
//! OTA install from zip to commit.
//!
//! The stage order, hook veto points, and per-stage bodies are grounded on
//! `examples/original_source/mbtool/installer.cpp`'s
//! `install_stage_*`/`Installer::start_installation` sequence (extraction
//! in `extract_multiboot_files`, mount-or-create-image in
//! `mount_dir_or_image`, the chrooted updater fork in `run_real_updater`,
//! temp-system-image copy in `system_image_copy`) and
//! `update_binary_tool.cpp`'s mount/unmount/format helper for the chroot
//! side. The ordered-stages-with-tri-state-outcome shape mirrors the
//! teacher's own `RootBuilder`/`ImageBuilder` trait-plus-pipeline structure
//! in `builder.rs`, adapted from a linear build pipeline to one with
//! explicit hook veto points and an unconditional cleanup stage.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use tracing::{info, warn};

use crate::bootimage::BootImage;
use crate::checksum::ChecksumStore;
use crate::chroot::{BlockSource, ChrootBuilder, ChrootSession};
use crate::config::{parse_properties, DeviceDefinition};
use crate::error::{MbtoolError, Result};
use crate::image::ImageManager;
use crate::rom::{Rom, RomId, StorageSlot};
use crate::updater::{UpdaterEvent, UpdaterRunner};

/// Fallback size for a freshly created cache/data/system image (§4.9 step
/// 7) — installer.cpp queries the real system partition size and falls
/// back to one constant for everything else; this crate uses that same
/// constant uniformly rather than threading a partition-size probe through.
const DEFAULT_IMAGE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Continue,
    Fail,
    Cancel,
}

/// Veto points a caller (e.g. a boot-UI frontend) may hook into. Only
/// `on_pre_install` and `on_post_install` may return anything other than
/// `Continue`; every other stage boundary is purely observational.
pub trait InstallerHooks {
    fn on_pre_install(&mut self) -> StageOutcome {
        StageOutcome::Continue
    }

    fn on_post_install(&mut self, _succeeded: bool) -> StageOutcome {
        StageOutcome::Continue
    }

    fn on_progress(&mut self, _stage: &str) {}

    /// Where `GetInstallType` gets its target ROM id; `"cancelled"` is the
    /// sentinel that propagates `Cancel`.
    fn choose_rom_id(&mut self) -> String;
}

pub struct NoOpHooks {
    pub rom_id: String,
}

impl InstallerHooks for NoOpHooks {
    fn choose_rom_id(&mut self) -> String {
        self.rom_id.clone()
    }
}

pub struct InstallerConfig {
    pub zip_path: PathBuf,
    pub scratch_dir: PathBuf,
    pub device_definition_path: PathBuf,
    pub boot_block_device_current: PathBuf,
    pub interface_version: u32,
    pub vendor: String,
}

struct InitializeResult {
    has_block_image: bool,
    copy_to_temp_image: bool,
}

/// Accumulated state threaded through the eleven stages; fields are filled
/// in as each stage completes so `Cleanup` can always find what it needs
/// regardless of which stage failed.
pub struct Installer<H: InstallerHooks> {
    config: InstallerConfig,
    hooks: H,
    device: Option<DeviceDefinition>,
    rom: Option<Rom>,
    chroot: Option<ChrootSession>,
    boot_backup_path: Option<PathBuf>,
    temp_image_path: Option<PathBuf>,
    init: Option<InitializeResult>,
    /// Chroot-relative paths mounted by `MountFilesystems`, in mount order,
    /// so `UnmountFilesystems` can tear them down in reverse.
    mounted_slots: Vec<PathBuf>,
    /// `info.prop` properties scraped during `CheckDevice`, reused to seed
    /// the updater's legacy property workspace in `Install`.
    properties: Vec<(String, String)>,
}

impl<H: InstallerHooks> Installer<H> {
    pub fn new(config: InstallerConfig, hooks: H) -> Self {
        Self {
            config,
            hooks,
            device: None,
            rom: None,
            chroot: None,
            boot_backup_path: None,
            temp_image_path: None,
            init: None,
            mounted_slots: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Drive all eleven stages. Cleanup always runs, even on early failure
    /// or cancellation.
    pub fn run(&mut self) -> Result<bool> {
        let outcome = self.drive();
        let succeeded = matches!(outcome, Ok(StageOutcome::Continue));
        self.cleanup(succeeded);
        match outcome {
            Ok(StageOutcome::Cancel) => Ok(false),
            Ok(_) => Ok(succeeded),
            Err(e) => Err(e),
        }
    }

    fn drive(&mut self) -> Result<StageOutcome> {
        let stages: [(&str, fn(&mut Self) -> Result<StageOutcome>); 10] = [
            ("Initialize", Self::initialize),
            ("CreateChroot", Self::create_chroot),
            ("SetUpEnvironment", Self::set_up_environment),
            ("CheckDevice", Self::check_device),
            ("GetInstallType", Self::get_install_type),
            ("SetUpChroot", Self::set_up_chroot),
            ("MountFilesystems", Self::mount_filesystems),
            ("Install", Self::install),
            ("UnmountFilesystems", Self::unmount_filesystems),
            ("Finish", Self::finish),
        ];
        for (name, stage) in stages {
            self.hooks.on_progress(name);
            match stage(self) {
                Ok(StageOutcome::Continue) => {}
                other => return other,
            }
        }
        Ok(StageOutcome::Continue)
    }

    fn initialize(&mut self) -> Result<StageOutcome> {
        let archive = zip::ZipArchive::new(
            std::fs::File::open(&self.config.zip_path).map_err(|e| MbtoolError::io("open OTA zip", e))?,
        )
        .map_err(|e| MbtoolError::Configuration(format!("invalid OTA zip: {e}")))?;

        let names: Vec<String> = archive.file_names().map(str::to_owned).collect();
        let has_block_image = names.iter().any(|n| {
            n == "system.img" || n == "system.new.dat" || n == "system.transfer.list" || n == "system.img.sparse"
        });
        // Odin-style sparse flashes overwrite /system wholesale; copying the
        // current contents into the temp image first would be wasted work.
        let sparse_only = names.iter().any(|n| n == "system.img.sparse")
            && !names.iter().any(|n| n == "system.img" || n == "system.new.dat" || n == "system.transfer.list");
        self.init = Some(InitializeResult {
            has_block_image,
            copy_to_temp_image: has_block_image && !sparse_only,
        });
        Ok(StageOutcome::Continue)
    }

    fn create_chroot(&mut self) -> Result<StageOutcome> {
        let root = self.config.scratch_dir.join("chroot");
        let block_devices: Vec<(&str, BlockSource)> = vec![
            ("boot", BlockSource::HostDevice(self.config.boot_block_device_current.clone())),
        ];
        let session = ChrootBuilder::new().build(root, &self.config.vendor, &block_devices)?;
        self.chroot = Some(session);
        Ok(StageOutcome::Continue)
    }

    fn set_up_environment(&mut self) -> Result<StageOutcome> {
        let _ = std::fs::remove_dir_all(&self.config.scratch_dir);
        std::fs::create_dir_all(&self.config.scratch_dir).map_err(|e| MbtoolError::io("recreate scratch dir", e))?;

        let zip_file = std::fs::File::open(&self.config.zip_path).map_err(|e| MbtoolError::io("open OTA zip", e))?;
        let mut archive =
            zip::ZipArchive::new(zip_file).map_err(|e| MbtoolError::Configuration(format!("invalid OTA zip: {e}")))?;

        let updater_path = self.config.scratch_dir.join("updater");
        if extract_zip_member(&mut archive, "META-INF/com/google/android/update-binary", &updater_path).is_ok() {
            std::fs::set_permissions(&updater_path, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| MbtoolError::io("chmod extracted updater", e))?;
        } else {
            warn!("OTA zip has no update-binary; Install stage will have nothing to run");
        }

        let _ = extract_zip_member(&mut archive, "multiboot/bb-wrapper.sh", &self.config.scratch_dir.join("bb-wrapper.sh"));

        if extract_zip_member(&mut archive, "multiboot/info.prop", &self.config.scratch_dir.join("info.prop")).is_err() {
            warn!("multiboot/info.prop missing from OTA zip; device check will fail");
        }

        Ok(StageOutcome::Continue)
    }

    fn check_device(&mut self) -> Result<StageOutcome> {
        let device = DeviceDefinition::load(&self.config.device_definition_path)?;

        let info_prop_path = self.config.scratch_dir.join("info.prop");
        let info_text = std::fs::read_to_string(&info_prop_path).unwrap_or_default();
        let props = parse_properties(&info_text);
        let codename = ["ro.product.device", "ro.build.product", "ro.patcher.device"]
            .iter()
            .find_map(|key| props.get(*key).cloned())
            .unwrap_or_default();

        if !device.matches_codename(&codename) {
            warn!(codename, allowed = ?device.codenames, "device codename mismatch");
            return Ok(StageOutcome::Fail);
        }
        self.properties = props.into_iter().collect();

        if DeviceDefinition::resolve_first_existing(&device.boot_devs).is_none() {
            warn!("no boot device found among candidates");
            return Ok(StageOutcome::Fail);
        }
        if DeviceDefinition::resolve_first_existing(&device.recovery_devs).is_none() {
            warn!("no recovery device found among candidates (non-fatal)");
        }
        if DeviceDefinition::resolve_first_existing(&device.system_devs).is_none() {
            warn!("no system device found among candidates");
            return Ok(StageOutcome::Fail);
        }

        self.device = Some(device);
        Ok(StageOutcome::Continue)
    }

    fn get_install_type(&mut self) -> Result<StageOutcome> {
        if self.hooks.on_pre_install() != StageOutcome::Continue {
            return Ok(StageOutcome::Fail);
        }

        let chosen = self.hooks.choose_rom_id();
        if chosen == "cancelled" {
            return Ok(StageOutcome::Cancel);
        }
        let rom_id = RomId::try_from(chosen.as_str())?;
        let rom = if rom_id.is_primary() {
            Rom::primary()
        } else {
            Rom::secondary(rom_id, true)
        };

        self.rom = Some(rom);
        Ok(StageOutcome::Continue)
    }

    fn set_up_chroot(&mut self) -> Result<StageOutcome> {
        let backup = self.config.scratch_dir.join("boot.img.orig");
        std::fs::copy(&self.config.boot_block_device_current, &backup)
            .map_err(|e| MbtoolError::io("back up current boot image", e))?;
        self.boot_backup_path = Some(backup);
        Ok(StageOutcome::Continue)
    }

    /// Bind-mount or image-attach each of system/cache/data per §4.9 step
    /// 7, grounded on `install_stage_mount_filesystems`/`mount_dir_or_image`
    /// in installer.cpp: directory-backed slots are bind mounted, image slots
    /// are loop-attached and mounted, and system is redirected onto a fresh
    /// temp image when it isn't already image-backed but the zip carries a
    /// block-style system payload (or this is the primary ROM).
    fn mount_filesystems(&mut self) -> Result<StageOutcome> {
        let rom = self
            .rom
            .clone()
            .ok_or_else(|| MbtoolError::Configuration("no ROM selected before MountFilesystems".to_owned()))?;
        let root = self
            .chroot
            .as_ref()
            .ok_or_else(|| MbtoolError::Configuration("chroot not set up before MountFilesystems".to_owned()))?
            .root()
            .to_path_buf();

        self.mount_slot(&rom.cache, &root.join("cache"))?;
        std::fs::create_dir_all(root.join("cache/recovery"))
            .map_err(|e| MbtoolError::io("create /cache/recovery in chroot", e))?;

        self.mount_slot(&rom.data, &root.join("data"))?;

        let redirect_system = !rom.system.is_image
            && (self.init.as_ref().is_some_and(|i| i.has_block_image) || rom.id.is_primary());
        let (system_source, system_is_image) = if redirect_system {
            let temp_image = self.config.scratch_dir.join("system.temp.img");
            let _ = std::fs::remove_file(&temp_image);
            ImageManager::new().create_image(&temp_image, DEFAULT_IMAGE_SIZE)?;
            if self.init.as_ref().is_some_and(|i| i.copy_to_temp_image) {
                copy_directory_into_image(&rom.system.full_path(), &temp_image)?;
            }
            self.temp_image_path = Some(temp_image.clone());
            (temp_image, true)
        } else {
            (rom.system.full_path(), rom.system.is_image)
        };
        self.mount_path(&system_source, system_is_image, &root.join("system"))?;

        // Bind-mount the OTA zip itself into the chroot for the updater to
        // read from (installer.cpp binds it at `/mb/install.zip`).
        let zip_target = root.join("mb/install.zip");
        std::fs::create_dir_all(zip_target.parent().unwrap_or(Path::new("/")))
            .map_err(|e| MbtoolError::io("create /mb in chroot", e))?;
        std::fs::write(&zip_target, []).map_err(|e| MbtoolError::io("create install.zip placeholder", e))?;
        mount(Some(self.config.zip_path.as_path()), &zip_target, None::<&str>, MsFlags::MS_BIND, None::<&str>)
            .map_err(|e| MbtoolError::io("bind-mount OTA zip into chroot", std::io::Error::from_raw_os_error(e as i32)))?;
        self.mounted_slots.push(zip_target);

        Ok(StageOutcome::Continue)
    }

    fn mount_slot(&mut self, slot: &StorageSlot, target: &Path) -> Result<()> {
        self.mount_path(&slot.full_path(), slot.is_image, target)
    }

    /// Bind-mount a directory, or loop-attach-and-mount an image, at
    /// `target` inside the chroot; the attachment/mount is tracked so
    /// `UnmountFilesystems`/chroot teardown can unwind it.
    fn mount_path(&mut self, source: &Path, is_image: bool, target: &Path) -> Result<()> {
        std::fs::create_dir_all(target).map_err(|e| MbtoolError::io(format!("mkdir {}", target.display()), e))?;
        if is_image {
            if !source.exists() {
                ImageManager::new().create_image(source, DEFAULT_IMAGE_SIZE)?;
            }
            let manager = ImageManager::new();
            let attached = manager.attach(source)?;
            let mounted = manager.mount_image(attached.path(), target, false)?;
            // Must outlive this stage; UnmountFilesystems tears the mount
            // down explicitly and the chroot teardown sweeps the loop.
            std::mem::forget(mounted);
            if let Some(chroot) = self.chroot.as_mut() {
                chroot.track_loop(attached);
            }
        } else {
            mount(Some(source), target, None::<&str>, MsFlags::MS_BIND | MsFlags::MS_REC, None::<&str>)
                .map_err(|e| MbtoolError::io(format!("bind mount {}", source.display()), std::io::Error::from_raw_os_error(e as i32)))?;
        }
        self.mounted_slots.push(target.to_path_buf());
        Ok(())
    }

    /// Copy the extracted updater into the chroot and fork it chrooted, per
    /// `run_real_updater` in installer.cpp: the updater only ever sees the
    /// sealed tree, never the host filesystem.
    fn install(&mut self) -> Result<StageOutcome> {
        if self.chroot.as_ref().is_some_and(|s| s.root().join(".skip-install").exists()) {
            info!("/.skip-install present, skipping updater invocation");
            return Ok(StageOutcome::Continue);
        }

        let updater_src = self.config.scratch_dir.join("updater");
        if !updater_src.exists() {
            info!("no updater was extracted from the OTA zip, nothing to run");
            return Ok(StageOutcome::Continue);
        }

        let chroot = self
            .chroot
            .as_ref()
            .ok_or_else(|| MbtoolError::Configuration("chroot not set up before Install".to_owned()))?;

        let chroot_updater = chroot.root().join("mb/updater");
        std::fs::create_dir_all(chroot_updater.parent().unwrap_or(Path::new("/")))
            .map_err(|e| MbtoolError::io("create /mb in chroot", e))?;
        std::fs::copy(&updater_src, &chroot_updater).map_err(|e| MbtoolError::io("copy updater into chroot", e))?;
        std::fs::set_permissions(&chroot_updater, std::fs::Permissions::from_mode(0o555))
            .map_err(|e| MbtoolError::io("chmod chroot updater", e))?;

        let interface_version = self.config.interface_version;
        let properties = self.properties.clone();
        let started = std::time::Instant::now();
        let success = chroot.enter(|| {
            let runner = UpdaterRunner::new();
            runner.run(Path::new("/mb/updater"), Path::new("/mb/install.zip"), interface_version, &properties, |event| {
                if let UpdaterEvent::UiPrint(text) = event {
                    info!(updater_output = %text);
                }
            })
        })?;
        info!(elapsed_ms = started.elapsed().as_millis() as u64, success, "updater finished");

        Ok(if success { StageOutcome::Continue } else { StageOutcome::Fail })
    }

    /// Tear down everything `MountFilesystems` set up, in reverse order,
    /// then fold a redirected system image back onto the real partition
    /// (`system_image_copy` in installer.cpp), or fsck it in place if it was
    /// already image-backed.
    fn unmount_filesystems(&mut self) -> Result<StageOutcome> {
        for target in self.mounted_slots.drain(..).rev() {
            if let Err(e) = umount2(&target, MntFlags::MNT_DETACH) {
                warn!(target = %target.display(), error = %e, "unmount failed during UnmountFilesystems");
            }
        }

        if let Some(temp_image) = self.temp_image_path.clone() {
            if let Some(rom) = &self.rom {
                if rom.system.is_image {
                    ImageManager::new().fsck_image(&rom.system.full_path());
                } else if self.init.as_ref().is_some_and(|i| i.has_block_image) || rom.id.is_primary() {
                    let real_system = rom.system.full_path();
                    if real_system.is_dir() {
                        let _ = std::fs::remove_dir_all(&real_system);
                        std::fs::create_dir_all(&real_system).map_err(|e| MbtoolError::io("recreate /system", e))?;
                    }
                    copy_image_into_directory(&temp_image, &real_system)?;
                }
            }
        }
        Ok(StageOutcome::Continue)
    }

    fn finish(&mut self) -> Result<StageOutcome> {
        let Some(rom) = &self.rom else {
            return Ok(StageOutcome::Fail);
        };

        let updated_boot_path = self.config.boot_block_device_current.clone();
        if let Ok(bytes) = std::fs::read(&updated_boot_path) {
            if let Ok(mut image) = BootImage::parse(&bytes) {
                let mut ramdisk = crate::cpio::Ramdisk::load(image.ramdisk()).unwrap_or_default();
                let _ = ramdisk.add_file("romid", 0o644, rom.id.as_str().as_bytes().to_vec());
                if let Ok(new_ramdisk_bytes) = ramdisk.store() {
                    image.set_ramdisk(new_ramdisk_bytes);
                    if let Ok(serialised) = image.serialise() {
                        let _ = std::fs::write(&updated_boot_path, &serialised);
                        let _ = std::fs::create_dir_all(rom.boot_image_path().parent().unwrap_or(Path::new("/")));
                        let _ = std::fs::write(rom.boot_image_path(), &serialised);

                        let mut checksums = ChecksumStore::at_default_path();
                        let _ = checksums.load();
                        let digest = hex_sha512(&serialised);
                        checksums.put(rom.id.as_str(), "boot.img", &digest);
                        let _ = checksums.save();
                    }
                }
            }
        }

        let outcome = self.hooks.on_post_install(true);
        Ok(outcome)
    }

    /// Always runs: deletes the temp image, restores the saved boot image
    /// on failure, tears down the chroot.
    fn cleanup(&mut self, succeeded: bool) {
        if let Some(temp_image) = self.temp_image_path.take() {
            let _ = std::fs::remove_file(temp_image);
        }
        if !succeeded {
            if let (Some(backup), current) = (&self.boot_backup_path, &self.config.boot_block_device_current) {
                if let Err(e) = std::fs::copy(backup, current) {
                    warn!(error = %e, "failed to restore boot image backup after failed install");
                }
            }
        }
        if let Some(mut chroot) = self.chroot.take() {
            chroot.teardown();
        }
    }
}

/// Hex-encoded digest for the boot image `ChecksumStore` entry `Finish`
/// writes after a successful install; mirrors `rom::hex_sha512` (private to
/// that module) since this is the only other call site that needs it.
fn hex_sha512(data: &[u8]) -> String {
    use sha2::Digest;
    sha2::Sha512::digest(data).iter().map(|b| format!("{b:02x}")).collect()
}

/// Extract one member of the OTA zip to `dest`, grounded on
/// `extract_multiboot_files`'s `util::extract_files2` call in installer.cpp.
fn extract_zip_member(archive: &mut zip::ZipArchive<std::fs::File>, name: &str, dest: &Path) -> Result<()> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| MbtoolError::Configuration(format!("{name} missing from zip: {e}")))?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| MbtoolError::io("create extraction parent dir", e))?;
    }
    let mut out = std::fs::File::create(dest).map_err(|e| MbtoolError::io("create extracted file", e))?;
    std::io::copy(&mut entry, &mut out).map_err(|e| MbtoolError::io("extract zip member", e))?;
    Ok(())
}

fn copy_directory_into_image(source: &Path, image: &Path) -> Result<()> {
    copy_between_image_and_directory(image, source, true)
}

fn copy_image_into_directory(image: &Path, dest: &Path) -> Result<()> {
    copy_between_image_and_directory(image, dest, false)
}

/// Mount `image` at a scratch mountpoint and shell out to `cp -a` to/from
/// `directory`, mirroring `system_image_copy` in installer.cpp (mount, copy,
/// unmount) rather than reimplementing an ext4 reader/writer.
fn copy_between_image_and_directory(image: &Path, directory: &Path, directory_to_image: bool) -> Result<()> {
    let manager = ImageManager::new();
    let attached = manager.attach(image)?;
    let scratch_mount = tempfile::Builder::new()
        .prefix("mbtool-sysimg-")
        .tempdir()
        .map_err(|e| MbtoolError::io("create temp mount dir", e))?;
    let mounted = manager.mount_image(attached.path(), scratch_mount.path(), false)?;

    std::fs::create_dir_all(directory).map_err(|e| MbtoolError::io("create copy target dir", e))?;
    let (from, to) = if directory_to_image {
        (directory, scratch_mount.path())
    } else {
        (scratch_mount.path(), directory)
    };
    let status = std::process::Command::new("cp")
        .arg("-a")
        .arg(format!("{}/.", from.display()))
        .arg(to)
        .status()
        .map_err(|e| MbtoolError::io("spawn cp", e))?;

    mounted.unmount()?;
    manager.detach(attached)?;

    if !status.success() {
        return Err(MbtoolError::Configuration(format!(
            "failed to copy between {} and {}",
            from.display(),
            to.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CancellingHooks;
    impl InstallerHooks for CancellingHooks {
        fn choose_rom_id(&mut self) -> String {
            "cancelled".to_owned()
        }
    }

    struct VetoingHooks;
    impl InstallerHooks for VetoingHooks {
        fn on_pre_install(&mut self) -> StageOutcome {
            StageOutcome::Fail
        }
        fn choose_rom_id(&mut self) -> String {
            "primary".to_owned()
        }
    }

    fn config(dir: &std::path::Path) -> InstallerConfig {
        InstallerConfig {
            zip_path: dir.join("ota.zip"),
            scratch_dir: dir.join("scratch"),
            device_definition_path: dir.join("device.json"),
            boot_block_device_current: dir.join("boot.img"),
            interface_version: 3,
            vendor: String::new(),
        }
    }

    #[test]
    fn cancelled_rom_choice_propagates_without_running_later_stages() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(config(dir.path()).zip_path, b"").unwrap_or(());
        let mut installer = Installer::new(config(dir.path()), CancellingHooks);
        installer.init = Some(InitializeResult { has_block_image: false, copy_to_temp_image: false });
        let outcome = installer.get_install_type().unwrap();
        assert_eq!(outcome, StageOutcome::Cancel);
        assert!(installer.rom.is_none());
    }

    #[test]
    fn pre_install_veto_fails_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut installer = Installer::new(config(dir.path()), VetoingHooks);
        let outcome = installer.get_install_type().unwrap();
        assert_eq!(outcome, StageOutcome::Fail);
    }

    #[test]
    fn primary_rom_choice_constructs_primary_rom() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = NoOpHooks { rom_id: "primary".to_owned() };
        let mut installer = Installer::new(config(dir.path()), hooks);
        let outcome = installer.get_install_type().unwrap();
        assert_eq!(outcome, StageOutcome::Continue);
        assert!(installer.rom.unwrap().id.is_primary());
    }
}
