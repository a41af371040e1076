//! Multi-boot manager for Android devices.
//!
//! The binary (`src/main.rs`) is a multi-call entrypoint dispatched by
//! `cli`: an OTA `update-binary` invocation, a long-running `daemon`, or the
//! recovery boot-UI stub. Library modules below are the components named in
//! the design: codecs for the on-disk formats, the image/chroot/updater
//! machinery the installer drives, and the ROM model the switcher and daemon
//! share.

pub mod bootimage;
pub mod checksum;
pub mod chroot;
pub mod cli;
pub mod config;
pub mod cpio;
pub mod daemon;
pub mod error;
pub mod helper;
pub mod image;
pub mod installer;
pub mod rom;
pub mod signed_exec;
pub mod updater;
