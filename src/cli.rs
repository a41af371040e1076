//! Multi-call dispatch (§1): one binary, three entrypoints selected by the
//! first argument — `update-binary` (OTA recovery context), `daemon`
//! (long-running service on the booted device), and `boot-ui` (the
//! recovery-replacement picker, out of scope per §1 Non-goals beyond a
//! stub that reports the booted ROM).
//!
//! The `clap` derive shape and the `sudo::escalate_if_needed` + `color_eyre`
//! top-level error handling follow the teacher's own `cli.rs`/`main.rs`
//! almost verbatim; what changes is the subcommand set, since `katsu` is a
//! single-purpose image builder and this is a three-context multi-call tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result, WrapErr};
use tracing::{info, warn};

use crate::installer::{Installer, InstallerConfig, NoOpHooks};
use crate::rom;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-boot manager for Android devices")]
pub struct MbtoolCli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run as the recovery OTA `update-binary`, per the standard Android
    /// recovery applier convention: `update-binary <interface_version>
    /// <output_fd> <zip_path>`.
    UpdateBinary {
        interface_version: u32,
        output_fd: i32,
        zip_path: PathBuf,

        /// Target ROM id; "primary" replaces the factory install, anything
        /// else lands under `/data/multiboot/<id>`.
        #[arg(long, default_value = "primary")]
        rom_id: String,

        #[arg(long, default_value = "/mb/device.json")]
        device_definition: PathBuf,

        #[arg(long, default_value = "/dev/block/bootdevice/by-name/boot")]
        boot_device: PathBuf,

        #[arg(long, default_value = "/mb/scratch")]
        scratch_dir: PathBuf,
    },

    /// Run as the long-running root daemon (§4.10), serving RPC on the
    /// abstract socket `mbtool.daemon`.
    Daemon {
        #[arg(long, default_value = "/dev/block/bootdevice/by-name/boot")]
        boot_device: PathBuf,
    },

    /// Recovery-replacement boot UI stub (§1 Non-goals: the UI itself is
    /// out of scope). Reports the currently booted ROM and exits.
    BootUi,

    /// Installer helper sub-commands (§6), invoked from inside the chroot
    /// by the updater's wrapped busybox rather than by a user.
    Mount { mountpoint: String },
    Unmount { mountpoint: String },
    Format { mountpoint: String },
}

pub fn run(cli: MbtoolCli) -> Result<()> {
    sudo::escalate_if_needed().map_err(|e| eyre!("failed to escalate privileges: {e}"))?;

    match cli.command {
        Command::UpdateBinary { interface_version, output_fd, zip_path, rom_id, device_definition, boot_device, scratch_dir } => {
            info!(output_fd, zip = %zip_path.display(), "starting update-binary install");
            let config = InstallerConfig {
                zip_path,
                scratch_dir,
                device_definition_path: device_definition,
                boot_block_device_current: boot_device,
                interface_version,
                vendor: String::new(),
            };
            let hooks = NoOpHooks { rom_id };
            let mut installer = Installer::new(config, hooks);
            let succeeded = installer.run().wrap_err("installer run failed")?;
            if !succeeded {
                return Err(eyre!("installation did not complete successfully"));
            }
            Ok(())
        }

        Command::Daemon { boot_device } => {
            let daemon = crate::daemon::Daemon::new(crate::daemon::RootOnlyPolicy, boot_device);
            daemon.listen().wrap_err("daemon exited")
        }

        Command::BootUi => {
            match rom::get_booted_rom_id() {
                Ok(id) => println!("{id}"),
                Err(e) => {
                    warn!(error = %e, "couldn't determine booted ROM id");
                    println!("primary");
                }
            }
            Ok(())
        }

        Command::Mount { mountpoint } => crate::helper::mount(&mountpoint).wrap_err("mount helper failed"),
        Command::Unmount { mountpoint } => crate::helper::unmount(&mountpoint).wrap_err("unmount helper failed"),
        Command::Format { mountpoint } => crate::helper::format(&mountpoint).wrap_err("format helper failed"),
    }
}
