//! UpdaterRunner (§4.7): supervises the third-party OTA updater subprocess.
//!
//! The command-pipe grammar and AROMA SIGSTOP/SIGCONT dance are read
//! directly off §4.7's prose (no C++ source survived for this file, per
//! `_INDEX.md` — `mbtool/installer.cpp`'s invocation of the real updater
//! binary wasn't in the kept set). The two-pipe, two-reader-thread wiring
//! follows §9's sanctioned redesign: the original forked a dedicated
//! reader *process* because the updater could stomp on a shared FD table;
//! this crate isn't going to fork a second copy of itself just to read two
//! pipes, so each pipe gets its own thread instead, exactly the concurrency
//! model already used for relaying output in [`crate::signed_exec`].

use std::io::{BufRead, BufReader, Read};
use std::os::fd::AsRawFd;
use std::os::unix::io::FromRawFd;
use std::path::Path;
use std::process::{Command, Stdio};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::error::{MbtoolError, Result};

const AROMA_MARKERS: &[&str] = &["AROMA", "aroma-fe", "AROMA Installer"];

#[derive(Debug, Clone)]
pub enum UpdaterEvent {
    UiPrint(String),
    Unknown(String),
}

pub struct UpdaterRunner;

impl UpdaterRunner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Run `updater_path` against `zip_path`, forwarding `ui_print` lines to
    /// `on_event`. `properties` seeds the legacy property workspace (§4.7)
    /// when the updater binary references `ANDROID_PROPERTY_WORKSPACE`.
    /// Returns whether the subprocess exited with status 0.
    pub fn run(
        &self,
        updater_path: &Path,
        zip_path: &Path,
        interface_version: u32,
        properties: &[(String, String)],
        mut on_event: impl FnMut(UpdaterEvent),
    ) -> Result<bool> {
        let updater_bytes = std::fs::read(updater_path).map_err(|e| MbtoolError::io("read updater binary", e))?;
        let is_aroma = AROMA_MARKERS
            .iter()
            .any(|marker| contains_bytes(&updater_bytes, marker.as_bytes()));

        let workspace = if needs_property_workspace(&updater_bytes) {
            Some(PropertyWorkspace::seed(properties)?)
        } else {
            None
        };

        let (cmd_read, cmd_write) = os_pipe().map_err(|e| MbtoolError::io("create command pipe", e))?;
        let (stdio_read, stdio_write) = os_pipe().map_err(|e| MbtoolError::io("create stdio pipe", e))?;

        if is_aroma {
            info!("AROMA updater detected, suspending parent for the duration of the install");
            let _ = kill(Pid::from_raw(std::process::id() as i32), Signal::SIGSTOP);
        }

        let devnull = std::fs::File::open("/dev/null").map_err(|e| MbtoolError::io("open /dev/null", e))?;
        let mut command = Command::new(updater_path);
        command
            .arg(interface_version.to_string())
            .arg(cmd_write.as_raw_fd().to_string())
            .arg(zip_path)
            .stdin(Stdio::from(devnull))
            .stdout(Stdio::from(stdio_write))
            .stderr(Stdio::piped());
        if let Some(workspace) = &workspace {
            command.env("ANDROID_PROPERTY_WORKSPACE", workspace.env_value());
        }
        let mut child = command.spawn().map_err(|e| MbtoolError::io("spawn updater", e))?;
        drop(cmd_write);

        let cmd_thread = std::thread::spawn(move || read_command_pipe(cmd_read));
        let stdio_thread = std::thread::spawn(move || drain_stdio_pipe(stdio_read));

        let status = child.wait();

        if is_aroma {
            let _ = kill(Pid::from_raw(std::process::id() as i32), Signal::SIGCONT);
            info!("resumed parent after AROMA install");
        }

        for event in cmd_thread.join().unwrap_or_default() {
            on_event(event);
        }
        stdio_thread.join().ok();

        let status = status.map_err(|e| MbtoolError::io("wait on updater", e))?;
        Ok(status.success())
    }
}

impl Default for UpdaterRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len().max(1)).any(|w| w == needle)
}

fn os_pipe() -> std::io::Result<(std::fs::File, std::fs::File)> {
    let (read_fd, write_fd) = nix::unistd::pipe().map_err(std::io::Error::from)?;
    // SAFETY: `pipe()` just handed us two freshly created, uniquely owned
    // file descriptors; wrapping each exactly once in a `File` is the only
    // safe way to give them an owner that closes them on drop.
    #[allow(unsafe_code)]
    let pair = unsafe {
        (
            std::fs::File::from_raw_fd(std::os::fd::IntoRawFd::into_raw_fd(read_fd)),
            std::fs::File::from_raw_fd(std::os::fd::IntoRawFd::into_raw_fd(write_fd)),
        )
    };
    Ok(pair)
}

/// Parse one command-pipe line (§4.7 grammar: fields space-separated).
/// Only `ui_print` and unrecognised commands surface to the caller.
fn parse_command_line(line: &str) -> Option<UpdaterEvent> {
    let mut parts = line.splitn(2, ' ');
    match parts.next().unwrap_or("") {
        "ui_print" => Some(UpdaterEvent::UiPrint(parts.next().unwrap_or("").to_owned())),
        "progress" | "set_progress" | "wipe_cache" | "clear_display" | "enable_reboot" | "" => None,
        other => {
            debug!(command = other, "unknown updater command");
            Some(UpdaterEvent::Unknown(line.to_owned()))
        }
    }
}

fn read_command_pipe(pipe: std::fs::File) -> Vec<UpdaterEvent> {
    BufReader::new(pipe)
        .lines()
        .map_while(std::result::Result::ok)
        .filter_map(|line| parse_command_line(&line))
        .collect()
}

fn drain_stdio_pipe(pipe: std::fs::File) {
    let mut buf = [0u8; 4096];
    let mut reader = pipe;
    loop {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(text) = std::str::from_utf8(&buf[..n]) {
                    for line in text.lines() {
                        debug!(updater_stdout = line);
                    }
                }
            }
        }
    }
}

/// Legacy Android property workspace (§4.7): a fixed-size shared memory
/// region the updater resolves `ro.*` properties from via the
/// `ANDROID_PROPERTY_WORKSPACE` environment variable, formatted
/// `"<fd>,<size>"`.
pub struct PropertyWorkspace {
    backing: std::fs::File,
    size: usize,
}

impl PropertyWorkspace {
    const DEFAULT_SIZE: usize = 32 * 1024;

    pub fn seed(properties: &[(String, String)]) -> Result<Self> {
        let backing = tempfile::tempfile().map_err(|e| MbtoolError::io("create property workspace", e))?;
        let mut body = String::new();
        for (key, value) in properties {
            body.push_str(key);
            body.push('=');
            body.push_str(value);
            body.push('\n');
        }
        if body.len() > Self::DEFAULT_SIZE {
            warn!("property workspace seed exceeds default size, truncating");
            body.truncate(Self::DEFAULT_SIZE);
        }
        std::io::Write::write_all(&mut { backing.try_clone().map_err(|e| MbtoolError::io("clone workspace fd", e))? }, body.as_bytes())
            .map_err(|e| MbtoolError::io("seed property workspace", e))?;
        Ok(Self {
            backing,
            size: Self::DEFAULT_SIZE,
        })
    }

    /// The value for `ANDROID_PROPERTY_WORKSPACE`.
    #[must_use]
    pub fn env_value(&self) -> String {
        format!("{},{}", self.backing.as_raw_fd(), self.size)
    }
}

/// Does `updater_bytes` reference the legacy property workspace, meaning
/// the chroot builder must stand one up before exec (§4.6)?
#[must_use]
pub fn needs_property_workspace(updater_bytes: &[u8]) -> bool {
    contains_bytes(updater_bytes, b"ANDROID_PROPERTY_WORKSPACE")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_pipe_parses_ui_print() {
        let events = parse_lines("ui_print Installing...\nprogress 0.5 10\nwipe_cache\n");
        assert_eq!(events.len(), 1);
        match &events[0] {
            UpdaterEvent::UiPrint(text) => assert_eq!(text, "Installing..."),
            UpdaterEvent::Unknown(_) => panic!("expected UiPrint"),
        }
    }

    #[test]
    fn command_pipe_flags_unknown_commands() {
        let events = parse_lines("frobnicate something\n");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], UpdaterEvent::Unknown(_)));
    }

    #[test]
    fn bare_ui_print_is_blank_line() {
        let events = parse_lines("ui_print\n");
        match &events[0] {
            UpdaterEvent::UiPrint(text) => assert!(text.is_empty()),
            UpdaterEvent::Unknown(_) => panic!("expected UiPrint"),
        }
    }

    #[test]
    fn detects_aroma_marker() {
        assert!(contains_bytes(b"...aroma-fe...", b"aroma-fe"));
        assert!(!contains_bytes(b"plain updater", b"aroma-fe"));
    }

    fn parse_lines(text: &str) -> Vec<UpdaterEvent> {
        text.lines().filter_map(parse_command_line).collect()
    }
}
