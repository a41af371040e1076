//! DaemonRpc (§4.10): the long-running root-privileged service a boot-picker
//! UI or companion app talks to over an abstract Unix socket.
//!
//! Grounded on `examples/original_source/mbtool/daemon_v3.cpp`'s
//! `connection_version_3`: a length-prefixed buffer per request, a request
//! type dispatched through a lookup table, and — the detail that matters
//! here — an unrecognised `request_type` gets `v3_send_response_unsupported`
//! and the loop keeps serving, while only a genuinely malformed buffer
//! (`VerifyRequestBuffer` failing) drops the connection. `read_request`
//! below reproduces that split: it checks the JSON request tag against the
//! known operation list before decoding, so an unknown op answers
//! `Response::Unsupported` instead of erroring the connection closed. The
//! length-prefixed-binary-blob framing daemon_v3.cpp gets from flatbuffers is
//! carried as length-prefixed JSON instead — `serde`/`serde_json` are
//! already the teacher's configuration-serialisation stack (`config.rs`),
//! and pulling in a schema compiler for one RPC module would be new
//! ceremony for no behavioural gain. Thread-per-connection and the abstract
//! socket follow §5's process model directly.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::AsFd;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
use serde_derive::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checksum::ChecksumStore;
use crate::error::{MbtoolError, Result};
use crate::rom::{self, Rom, RomId, RomSwitcher, SwitchResult, WipeTarget};
use crate::signed_exec::{RunOutcome, SignedExec, VerifyOutcome};

const SOCKET_NAME: &str = "mbtool.daemon";
const PROTOCOL_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteMode {
    Unlink,
    Rmdir,
    Remove,
    Recursive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    OpenFile { path: String, write: bool, create: bool },
    CloseFile { handle: u32 },
    ReadFile { handle: u32, len: u64 },
    WriteFile { handle: u32, data: Vec<u8> },
    SeekFile { handle: u32, offset: i64, whence: SeekWhence },
    StatFile { handle: u32 },
    ChmodFile { handle: u32, mode: u32 },
    SelinuxGetLabelFile { handle: u32 },
    SelinuxSetLabelFile { handle: u32, label: String },

    ChmodPath { path: String, mode: u32 },
    CopyPath { source: String, dest: String },
    DeletePath { path: String, mode: DeleteMode },
    MkdirPath { path: String, mode: u32 },
    SelinuxGetLabelPath { path: String },
    SelinuxSetLabelPath { path: String, label: String },
    GetDirectorySize { path: String, exclude: Vec<String> },

    SignedExec { binary: Vec<u8>, signature: Vec<u8>, display_name: String, argv: Vec<String> },

    GetBootedRomId,
    GetInstalledRoms,
    SwitchRom { rom_id: String, force_update_checksums: bool },
    SetKernel { rom_id: String },
    WipeRom { rom_id: String, target: WipeTargetWire },
    GetPackagesCount { rom_id: String },
    Reboot,
    Shutdown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum SeekWhence {
    Start,
    Current,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WipeTargetWire {
    System,
    Cache,
    Data,
    DalvikCache,
    Multiboot,
}

impl From<WipeTargetWire> for WipeTarget {
    fn from(value: WipeTargetWire) -> Self {
        match value {
            WipeTargetWire::System => Self::System,
            WipeTargetWire::Cache => Self::Cache,
            WipeTargetWire::Data => Self::Data,
            WipeTargetWire::DalvikCache => Self::DalvikCache,
            WipeTargetWire::Multiboot => Self::Multiboot,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub mode: u32,
    pub is_dir: bool,
    pub is_symlink: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledRom {
    pub id: String,
    pub version: Option<String>,
    pub build: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Handle(u32),
    Data(Vec<u8>),
    Offset(u64),
    Stat(FileStat),
    Label(String),
    Size(u64),
    RomId(String),
    InstalledRoms(Vec<InstalledRom>),
    SwitchOutcome(SwitchResultWire),
    Bool(bool),
    Count(u64),

    /// Recognised request, but the arguments failed validation (e.g. a
    /// `chmod` carrying setuid/setgid bits).
    Invalid(String),
    /// Discriminant not recognised by this protocol version.
    Unsupported,
    /// Operation was valid but failed at the OS/integrity level.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchResultWire {
    Succeeded,
    Failed,
    ChecksumInvalid,
    ChecksumNotFound,
}

impl From<SwitchResult> for SwitchResultWire {
    fn from(value: SwitchResult) -> Self {
        match value {
            SwitchResult::Succeeded => Self::Succeeded,
            SwitchResult::Failed => Self::Failed,
            SwitchResult::ChecksumInvalid => Self::ChecksumInvalid,
            SwitchResult::ChecksumNotFound => Self::ChecksumNotFound,
        }
    }
}

/// Deployment-specific authorization policy: given the peer's uid/gid,
/// decide ALLOW or DENY. Left pluggable since "policy lives above this
/// spec" (§4.10); the default only allows root, matching the daemon's own
/// privilege level.
pub trait PeerPolicy: Clone + Send + 'static {
    fn allow(&self, uid: u32, gid: u32) -> bool;
}

#[derive(Clone, Copy)]
pub struct RootOnlyPolicy;

impl PeerPolicy for RootOnlyPolicy {
    fn allow(&self, uid: u32, _gid: u32) -> bool {
        uid == 0
    }
}

pub struct Daemon<P: PeerPolicy> {
    policy: P,
    multiboot_extra_search_dirs: Vec<PathBuf>,
    signed_exec: Option<std::sync::Arc<SignedExec>>,
    boot_block_device: PathBuf,
}

impl<P: PeerPolicy> Daemon<P> {
    #[must_use]
    pub fn new(policy: P, boot_block_device: PathBuf) -> Self {
        Self {
            policy,
            multiboot_extra_search_dirs: vec![PathBuf::from("/dev/block/bootdevice/by-name")],
            signed_exec: None,
            boot_block_device,
        }
    }

    #[must_use]
    pub fn with_signed_exec(mut self, signed_exec: SignedExec) -> Self {
        self.signed_exec = Some(std::sync::Arc::new(signed_exec));
        self
    }

    /// Bind the abstract socket and serve forever, one thread per
    /// connection. `SIGPIPE` is ignored process-wide per §5 so a write to a
    /// dead peer surfaces as an `Err` instead of killing the daemon.
    pub fn listen(&self) -> Result<()> {
        ignore_sigpipe();

        let addr = SocketAddr::from_abstract_name(SOCKET_NAME.as_bytes())
            .map_err(|e| MbtoolError::io("build abstract socket address", e))?;
        let listener = UnixListener::bind_addr(&addr).map_err(|e| MbtoolError::io("bind daemon socket", e))?;
        info!(socket = SOCKET_NAME, "daemon listening");

        loop {
            let (stream, _) = listener.accept().map_err(|e| MbtoolError::io("accept daemon connection", e))?;
            let policy = self.policy.clone();
            let extra_search_dirs = self.multiboot_extra_search_dirs.clone();
            let boot_block_device = self.boot_block_device.clone();
            let signed_exec = self.signed_exec.clone();
            std::thread::spawn(move || {
                if let Err(e) = serve_connection(stream, &policy, &extra_search_dirs, &boot_block_device, signed_exec.as_deref()) {
                    warn!(error = %e, "daemon connection ended with an error");
                }
            });
        }
    }
}

fn ignore_sigpipe() {
    // SAFETY: SIG_IGN is a valid disposition and this runs once at daemon
    // start, before any other thread touches signal state.
    #[allow(unsafe_code)]
    unsafe {
        let _ = nix::sys::signal::signal(nix::sys::signal::Signal::SIGPIPE, nix::sys::signal::SigHandler::SigIgn);
    }
}

fn peer_credentials(stream: &UnixStream) -> Option<(u32, u32)> {
    getsockopt(&stream.as_fd(), PeerCredentials).ok().map(|c| (c.uid(), c.gid()))
}

fn serve_connection(
    mut stream: UnixStream,
    policy: &impl PeerPolicy,
    extra_search_dirs: &[PathBuf],
    boot_block_device: &Path,
    signed_exec: Option<&SignedExec>,
) -> Result<()> {
    let Some((uid, gid)) = peer_credentials(&stream) else {
        return write_line(&mut stream, "DENY");
    };
    if !policy.allow(uid, gid) {
        return write_line(&mut stream, "DENY");
    }
    write_line(&mut stream, "ALLOW")?;

    let mut version_buf = [0u8; 4];
    stream.read_exact(&mut version_buf).map_err(|e| MbtoolError::io("read protocol version", e))?;
    let client_version = u32::from_be_bytes(version_buf);
    if client_version != PROTOCOL_VERSION {
        write_line(&mut stream, "UNSUPPORTED")?;
        return Ok(());
    }
    write_line(&mut stream, "OK")?;

    let mut connection = Connection::default();
    loop {
        let parsed = match read_request(&mut stream) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "malformed request buffer, closing connection");
                break;
            }
        };
        let response = match parsed {
            ParsedRequest::Known(request) => connection.dispatch(&request, extra_search_dirs, boot_block_device, signed_exec),
            ParsedRequest::Unsupported => {
                warn!("received request with unrecognised discriminant");
                Response::Unsupported
            }
        };
        write_response(&mut stream, &response)?;
    }

    connection.close_all();
    Ok(())
}

fn write_line(stream: &mut UnixStream, line: &str) -> Result<()> {
    stream
        .write_all(format!("{line}\n").as_bytes())
        .map_err(|e| MbtoolError::io("write handshake line", e))
}

/// A decoded request buffer, or a recognised-but-unsupported discriminant —
/// mirrors daemon_v3.cpp's `request_map` lookup coming back empty.
enum ParsedRequest {
    Known(Request),
    Unsupported,
}

/// Request tags this protocol version understands, checked against the
/// JSON discriminant before full decoding (the JSON-framing analogue of
/// daemon_v3.cpp's `request_map` walk).
const KNOWN_REQUEST_TAGS: &[&str] = &[
    "OpenFile",
    "CloseFile",
    "ReadFile",
    "WriteFile",
    "SeekFile",
    "StatFile",
    "ChmodFile",
    "SelinuxGetLabelFile",
    "SelinuxSetLabelFile",
    "ChmodPath",
    "CopyPath",
    "DeletePath",
    "MkdirPath",
    "SelinuxGetLabelPath",
    "SelinuxSetLabelPath",
    "GetDirectorySize",
    "SignedExec",
    "GetBootedRomId",
    "GetInstalledRoms",
    "SwitchRom",
    "SetKernel",
    "WipeRom",
    "GetPackagesCount",
    "Reboot",
    "Shutdown",
];

fn read_request(stream: &mut UnixStream) -> Result<Option<ParsedRequest>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(MbtoolError::io("read request length prefix", e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).map_err(|e| MbtoolError::io("read request body", e))?;

    // A truncated or non-JSON buffer is the equivalent of daemon_v3.cpp's
    // VerifyRequestBuffer failing: the connection is in an unrecoverable
    // state and gets dropped.
    let value: serde_json::Value =
        serde_json::from_slice(&body).map_err(|e| MbtoolError::ProtocolViolation(format!("malformed request buffer: {e}")))?;

    let tag = value
        .as_str()
        .or_else(|| value.as_object().and_then(|obj| obj.keys().next()).map(String::as_str));
    if !tag.is_some_and(|tag| KNOWN_REQUEST_TAGS.contains(&tag)) {
        return Ok(Some(ParsedRequest::Unsupported));
    }

    serde_json::from_value(value)
        .map(|request| Some(ParsedRequest::Known(request)))
        .map_err(|e| MbtoolError::ProtocolViolation(format!("malformed request: {e}")))
}

fn write_response(stream: &mut UnixStream, response: &Response) -> Result<()> {
    let body = serde_json::to_vec(response).map_err(|e| MbtoolError::ProtocolViolation(e.to_string()))?;
    let len = u32::try_from(body.len())
        .map_err(|_| MbtoolError::ProtocolViolation("response body too large to frame".to_owned()))?;
    stream.write_all(&len.to_be_bytes()).map_err(|e| MbtoolError::io("write response length prefix", e))?;
    stream.write_all(&body).map_err(|e| MbtoolError::io("write response body", e))
}

/// Per-connection file-handle table; handles are assigned monotonically and
/// never reused within one connection's lifetime.
#[derive(Default)]
struct Connection {
    handles: BTreeMap<u32, (File, PathBuf)>,
    next_handle: u32,
}

impl Connection {
    fn dispatch(
        &mut self,
        request: &Request,
        extra_search_dirs: &[PathBuf],
        boot_block_device: &Path,
        signed_exec: Option<&SignedExec>,
    ) -> Response {
        match request {
            Request::OpenFile { path, write, create } => self.open_file(path, *write, *create),
            Request::CloseFile { handle } => self.close_file(*handle),
            Request::ReadFile { handle, len } => self.read_file(*handle, *len),
            Request::WriteFile { handle, data } => self.write_file(*handle, data),
            Request::SeekFile { handle, offset, whence } => self.seek_file(*handle, *offset, *whence),
            Request::StatFile { handle } => self.stat_file(*handle),
            Request::ChmodFile { handle, mode } => self.chmod_file(*handle, *mode),
            Request::SelinuxGetLabelFile { handle } => self.selinux_get_file(*handle),
            Request::SelinuxSetLabelFile { handle, label } => self.selinux_set_file(*handle, label),

            Request::ChmodPath { path, mode } => chmod_path(path, *mode),
            Request::CopyPath { source, dest } => copy_path(source, dest),
            Request::DeletePath { path, mode } => delete_path(path, *mode),
            Request::MkdirPath { path, mode } => mkdir_path(path, *mode),
            Request::SelinuxGetLabelPath { path } => selinux_get_path(path),
            Request::SelinuxSetLabelPath { path, label } => selinux_set_path(path, label),
            Request::GetDirectorySize { path, exclude } => get_directory_size(path, exclude),

            Request::SignedExec { binary, signature, display_name, argv } => match signed_exec {
                Some(signed_exec) => run_signed_exec(signed_exec, binary, signature, display_name, argv),
                None => Response::Failed("signed_exec not configured on this daemon instance".to_owned()),
            },

            Request::GetBootedRomId => get_booted_rom_id(),
            Request::GetInstalledRoms => get_installed_roms(),
            Request::SwitchRom { rom_id, force_update_checksums } => {
                switch_rom(rom_id, *force_update_checksums, extra_search_dirs, boot_block_device)
            }
            Request::SetKernel { rom_id } => set_kernel(rom_id, boot_block_device),
            Request::WipeRom { rom_id, target } => wipe_rom(rom_id, *target),
            Request::GetPackagesCount { rom_id } => get_packages_count(rom_id),
            Request::Reboot => Response::Ok,
            Request::Shutdown => Response::Ok,
        }
    }

    fn open_file(&mut self, path: &str, write: bool, create: bool) -> Response {
        let mut options = OpenOptions::new();
        options.read(true).write(write).create(create);
        match options.open(path) {
            Ok(file) => {
                let handle = self.next_handle;
                self.next_handle = self.next_handle.wrapping_add(1);
                self.handles.insert(handle, (file, PathBuf::from(path)));
                Response::Handle(handle)
            }
            Err(e) => Response::Failed(e.to_string()),
        }
    }

    fn close_file(&mut self, handle: u32) -> Response {
        match self.handles.remove(&handle) {
            Some(_) => Response::Ok,
            None => invalid_handle(),
        }
    }

    fn read_file(&mut self, handle: u32, len: u64) -> Response {
        let Some((file, _)) = self.handles.get_mut(&handle) else {
            return invalid_handle();
        };
        let mut buf = vec![0u8; len as usize];
        match file.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Response::Data(buf)
            }
            Err(e) => Response::Failed(e.to_string()),
        }
    }

    fn write_file(&mut self, handle: u32, data: &[u8]) -> Response {
        let Some((file, _)) = self.handles.get_mut(&handle) else {
            return invalid_handle();
        };
        match file.write_all(data) {
            Ok(()) => Response::Ok,
            Err(e) => Response::Failed(e.to_string()),
        }
    }

    fn seek_file(&mut self, handle: u32, offset: i64, whence: SeekWhence) -> Response {
        let Some((file, _)) = self.handles.get_mut(&handle) else {
            return invalid_handle();
        };
        let position = match whence {
            SeekWhence::Start => SeekFrom::Start(offset.max(0) as u64),
            SeekWhence::Current => SeekFrom::Current(offset),
            SeekWhence::End => SeekFrom::End(offset),
        };
        match file.seek(position) {
            Ok(new_offset) => Response::Offset(new_offset),
            Err(e) => Response::Failed(e.to_string()),
        }
    }

    fn stat_file(&mut self, handle: u32) -> Response {
        let Some((file, _)) = self.handles.get_mut(&handle) else {
            return invalid_handle();
        };
        match file.metadata() {
            Ok(meta) => Response::Stat(stat_from_metadata(&meta)),
            Err(e) => Response::Failed(e.to_string()),
        }
    }

    fn chmod_file(&mut self, handle: u32, mode: u32) -> Response {
        if has_setuid_or_setgid(mode) {
            return Response::Invalid("setuid/setgid bits are not permitted".to_owned());
        }
        let Some((file, _)) = self.handles.get(&handle) else {
            return invalid_handle();
        };
        match file.set_permissions(std::os::unix::fs::PermissionsExt::from_mode(mode)) {
            Ok(()) => Response::Ok,
            Err(e) => Response::Failed(e.to_string()),
        }
    }

    fn selinux_get_file(&mut self, handle: u32) -> Response {
        let Some((_, path)) = self.handles.get(&handle) else {
            return invalid_handle();
        };
        selinux_get_path(&path.to_string_lossy())
    }

    fn selinux_set_file(&mut self, handle: u32, label: &str) -> Response {
        let Some((_, path)) = self.handles.get(&handle) else {
            return invalid_handle();
        };
        selinux_set_path(&path.to_string_lossy(), label)
    }

    fn close_all(&mut self) {
        self.handles.clear();
    }
}

/// Relay a `signed_exec` request to [`crate::signed_exec::SignedExec`];
/// output is buffered rather than streamed, since the RPC framing here has
/// no notion of a partial/streamed response.
fn run_signed_exec(signed_exec: &SignedExec, binary: &[u8], signature: &[u8], display_name: &str, argv: &[String]) -> Response {
    match signed_exec.verify(binary, signature) {
        Ok(VerifyOutcome::Valid) => {}
        Ok(VerifyOutcome::Invalid) => return Response::Invalid("signature verification failed".to_owned()),
        Err(e) => return Response::Failed(e.to_string()),
    }
    let env: Vec<(String, String)> = Vec::new();
    match signed_exec.run_trusted(binary, signature, display_name, argv, &env, |_| {}) {
        Ok(RunOutcome::ExitStatus(code)) => Response::Count(code as u64),
        Ok(RunOutcome::SignalTermination(signal)) => Response::Failed(format!("terminated by signal {signal}")),
        Err(e) => Response::Failed(e.to_string()),
    }
}

fn invalid_handle() -> Response {
    Response::Invalid("unknown file handle".to_owned())
}

fn has_setuid_or_setgid(mode: u32) -> bool {
    mode & 0o6000 != 0
}

fn stat_from_metadata(meta: &std::fs::Metadata) -> FileStat {
    FileStat {
        size: meta.len(),
        mode: std::os::unix::fs::PermissionsExt::mode(&meta.permissions()),
        is_dir: meta.is_dir(),
        is_symlink: meta.file_type().is_symlink(),
    }
}

fn chmod_path(path: &str, mode: u32) -> Response {
    if has_setuid_or_setgid(mode) {
        return Response::Invalid("setuid/setgid bits are not permitted".to_owned());
    }
    match std::fs::set_permissions(path, std::os::unix::fs::PermissionsExt::from_mode(mode)) {
        Ok(()) => Response::Ok,
        Err(e) => Response::Failed(e.to_string()),
    }
}

fn copy_path(source: &str, dest: &str) -> Response {
    match std::fs::copy(source, dest) {
        Ok(_) => Response::Ok,
        Err(e) => Response::Failed(e.to_string()),
    }
}

fn delete_path(path: &str, mode: DeleteMode) -> Response {
    let result = match mode {
        DeleteMode::Unlink => std::fs::remove_file(path),
        DeleteMode::Rmdir => std::fs::remove_dir(path),
        DeleteMode::Remove => std::fs::remove_file(path).or_else(|_| std::fs::remove_dir(path)),
        DeleteMode::Recursive => std::fs::remove_dir_all(path).or_else(|_| std::fs::remove_file(path)),
    };
    match result {
        Ok(()) => Response::Ok,
        Err(e) => Response::Failed(e.to_string()),
    }
}

fn mkdir_path(path: &str, mode: u32) -> Response {
    match std::fs::create_dir_all(path) {
        Ok(()) => {
            let _ = std::fs::set_permissions(path, std::os::unix::fs::PermissionsExt::from_mode(mode));
            Response::Ok
        }
        Err(e) => Response::Failed(e.to_string()),
    }
}

const SELINUX_XATTR: &str = "security.selinux";

fn selinux_get_path(path: &str) -> Response {
    match xattr::get(path, SELINUX_XATTR) {
        Ok(Some(value)) => Response::Label(String::from_utf8_lossy(&value).trim_end_matches('\0').to_owned()),
        Ok(None) => Response::Label(String::new()),
        Err(e) => Response::Failed(e.to_string()),
    }
}

fn selinux_set_path(path: &str, label: &str) -> Response {
    match xattr::set(path, SELINUX_XATTR, label.as_bytes()) {
        Ok(()) => Response::Ok,
        Err(e) => Response::Failed(e.to_string()),
    }
}

/// Walk `path`, skipping any top-level child named in `exclude`, and
/// de-duplicate by `(device, inode)` so hard-linked files are only charged
/// once (§4.10).
fn get_directory_size(path: &str, exclude: &[String]) -> Response {
    let mut seen = std::collections::BTreeSet::new();
    let mut total = 0u64;
    let mut stack = vec![PathBuf::from(path)];
    let mut first_level = true;
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            first_level = false;
            continue;
        };
        for entry in entries.flatten() {
            if first_level {
                if let Some(name) = entry.file_name().to_str() {
                    if exclude.iter().any(|e| e == name) {
                        continue;
                    }
                }
            }
            let Ok(meta) = entry.metadata() else { continue };
            let key = (std::os::unix::fs::MetadataExt::dev(&meta), std::os::unix::fs::MetadataExt::ino(&meta));
            if !seen.insert(key) {
                continue;
            }
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total += meta.len();
            }
        }
        first_level = false;
    }
    Response::Size(total)
}

fn rom_from_id(rom_id: &str) -> Result<Rom> {
    let id = RomId::try_from(rom_id)?;
    Ok(if id.is_primary() { Rom::primary() } else { Rom::secondary(id, true) })
}

fn get_booted_rom_id() -> Response {
    match rom::get_booted_rom_id() {
        Ok(id) => Response::RomId(id.as_str().to_owned()),
        Err(e) => Response::Failed(e.to_string()),
    }
}

fn get_installed_roms() -> Response {
    let roms = rom::scan_installed()
        .into_iter()
        .map(|id| {
            if id.is_primary() {
                return InstalledRom { id: id.as_str().to_owned(), version: None, build: None };
            }
            let rom = Rom::secondary(id.clone(), true);
            let props = rom.scrape_build_props().unwrap_or_default();
            InstalledRom {
                id: id.as_str().to_owned(),
                version: props.get("ro.build.version.release").cloned(),
                build: props.get("ro.build.display.id").cloned(),
            }
        })
        .collect();
    Response::InstalledRoms(roms)
}

fn switch_rom(rom_id: &str, force_update_checksums: bool, extra_search_dirs: &[PathBuf], boot_block_device: &Path) -> Response {
    let rom = match rom_from_id(rom_id) {
        Ok(rom) => rom,
        Err(e) => return Response::Invalid(e.to_string()),
    };
    let mut checksums = ChecksumStore::at_default_path();
    if let Err(e) = checksums.load() {
        return Response::Failed(e.to_string());
    }
    let switcher = RomSwitcher::new();
    match switcher.switch(&rom, boot_block_device, extra_search_dirs, force_update_checksums, &mut checksums) {
        Ok(result) => Response::SwitchOutcome(result.into()),
        Err(e) => Response::Failed(e.to_string()),
    }
}

fn set_kernel(rom_id: &str, boot_block_device: &Path) -> Response {
    let rom = match rom_from_id(rom_id) {
        Ok(rom) => rom,
        Err(e) => return Response::Invalid(e.to_string()),
    };
    let mut checksums = ChecksumStore::at_default_path();
    if let Err(e) = checksums.load() {
        return Response::Failed(e.to_string());
    }
    let switcher = RomSwitcher::new();
    match switcher.set_kernel(&rom, boot_block_device, &mut checksums) {
        Ok(ok) => Response::Bool(ok),
        Err(e) => Response::Failed(e.to_string()),
    }
}

fn wipe_rom(rom_id: &str, target: WipeTargetWire) -> Response {
    let rom = match rom_from_id(rom_id) {
        Ok(rom) => rom,
        Err(e) => return Response::Invalid(e.to_string()),
    };
    match rom::wipe(&rom, target.into()) {
        Ok(()) => Response::Ok,
        Err(e) => Response::Failed(e.to_string()),
    }
}

fn get_packages_count(rom_id: &str) -> Response {
    let rom = match rom_from_id(rom_id) {
        Ok(rom) => rom,
        Err(e) => return Response::Invalid(e.to_string()),
    };
    Response::Count(rom::get_packages_count(&rom))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chmod_refuses_setuid_and_setgid() {
        assert!(has_setuid_or_setgid(0o4755));
        assert!(has_setuid_or_setgid(0o2755));
        assert!(!has_setuid_or_setgid(0o0755));
    }

    #[test]
    fn directory_size_skips_excluded_top_level_children_and_dedupes_hardlinks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.bin"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("skip.bin"), vec![0u8; 999]).unwrap();
        std::fs::hard_link(dir.path().join("keep.bin"), dir.path().join("keep-link.bin")).unwrap();

        let response = get_directory_size(dir.path().to_str().unwrap(), &["skip.bin".to_owned()]);
        match response {
            Response::Size(size) => assert_eq!(size, 100),
            other => panic!("expected Size, got {other:?}"),
        }
    }

    #[test]
    fn unknown_handle_is_invalid_not_a_panic() {
        let mut connection = Connection::default();
        assert!(matches!(connection.close_file(42), Response::Invalid(_)));
        assert!(matches!(connection.read_file(42, 10), Response::Invalid(_)));
    }

    #[test]
    fn open_read_write_close_round_trips_through_handle_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.bin");
        std::fs::write(&path, b"hello").unwrap();

        let mut connection = Connection::default();
        let Response::Handle(handle) = connection.open_file(path.to_str().unwrap(), true, false) else {
            panic!("expected Handle");
        };
        let Response::Data(data) = connection.read_file(handle, 5) else {
            panic!("expected Data");
        };
        assert_eq!(data, b"hello");
        assert!(matches!(connection.close_file(handle), Response::Ok));
        assert!(matches!(connection.close_file(handle), Response::Invalid(_)));
    }
}
