//! SignedExec (§4.5): detached-signature verification and sandboxed
//! execution of uploaded helper binaries.
//!
//! RSA + SHA-2 detached signatures are grounded on the `rsa`/`sha2` crate
//! pairing used for exactly this purpose (a `test-signature` binary
//! verifying a detached signature before running untrusted payload) in
//! `examples/other_examples/manifests/NeroReflex-embuer/Cargo.toml`'s
//! sibling source. The tmpfs isolation step follows the ChrootBuilder's own
//! private-mount-namespace discipline (§4.6) at a much smaller scale: one
//! mount, one file, one exec.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::Sha256;
use tracing::{info, warn};

use crate::error::{MbtoolError, Result};

const TRUSTED_EXEC_DIR: &str = "/dev/mbtool-signed-exec";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid,
    Invalid,
}

#[derive(Debug)]
pub enum RunOutcome {
    ExitStatus(i32),
    SignalTermination(i32),
}

/// Output relayed line-by-line from the supervised child, in the order it
/// was produced (stdout/stderr tagged separately).
#[derive(Debug)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

pub struct SignedExec {
    trust_anchor: RsaPublicKey,
}

impl SignedExec {
    #[must_use]
    pub fn new(trust_anchor: RsaPublicKey) -> Self {
        Self { trust_anchor }
    }

    pub fn verify(&self, binary: &[u8], signature: &[u8]) -> Result<VerifyOutcome> {
        let sig = Signature::try_from(signature)
            .map_err(|_| MbtoolError::ProtocolViolation("malformed detached signature".to_owned()))?;
        let verifying_key = VerifyingKey::<Sha256>::new(self.trust_anchor.clone());
        match verifying_key.verify(binary, &sig) {
            Ok(()) => Ok(VerifyOutcome::Valid),
            Err(_) => Ok(VerifyOutcome::Invalid),
        }
    }

    /// Write `binary` into a freshly mounted private tmpfs, re-verify after
    /// the copy (closing the race against a caller who could substitute the
    /// file), then fork/exec with argv[0] set to `display_name`. The tmpfs
    /// is unmounted unconditionally on return.
    pub fn run_trusted(
        &self,
        binary: &[u8],
        signature: &[u8],
        display_name: &str,
        argv: &[String],
        env: &[(String, String)],
        mut on_output: impl FnMut(OutputLine),
    ) -> Result<RunOutcome> {
        let mount_dir = PathBuf::from(TRUSTED_EXEC_DIR);
        std::fs::create_dir_all(&mount_dir).map_err(|e| MbtoolError::io("create signed-exec mountpoint", e))?;
        std::fs::set_permissions(
            mount_dir.parent().unwrap_or(Path::new("/")),
            std::os::unix::fs::PermissionsExt::from_mode(0o000),
        )
        .map_err(|e| MbtoolError::io("lock down signed-exec parent", e))?;

        sys_mount::Mount::builder()
            .fstype(sys_mount::FilesystemType::Manual("tmpfs"))
            .mount("tmpfs", &mount_dir)
            .map_err(|e| MbtoolError::io("mount signed-exec tmpfs", e))?;

        let result = self.run_in_tmpfs(&mount_dir, binary, signature, display_name, argv, env, &mut on_output);

        if let Err(e) = sys_mount::unmount(&mount_dir, sys_mount::UnmountFlags::DETACH) {
            warn!(error = %e, "failed to unmount signed-exec tmpfs");
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_in_tmpfs(
        &self,
        mount_dir: &Path,
        binary: &[u8],
        signature: &[u8],
        display_name: &str,
        argv: &[String],
        env: &[(String, String)],
        on_output: &mut impl FnMut(OutputLine),
    ) -> Result<RunOutcome> {
        let binary_path = mount_dir.join("payload");
        std::fs::write(&binary_path, binary).map_err(|e| MbtoolError::io("write signed-exec payload", e))?;

        if self.verify(binary, signature)? != VerifyOutcome::Valid {
            return Err(MbtoolError::SignatureInvalid {
                file: display_name.to_owned(),
            });
        }

        std::fs::set_permissions(&binary_path, std::os::unix::fs::PermissionsExt::from_mode(0o700))
            .map_err(|e| MbtoolError::io("chmod signed-exec payload", e))?;

        info!(display_name, "executing signed helper");
        let mut child = Command::new(&binary_path)
            .arg0(display_name)
            .args(&argv[argv.len().min(1)..])
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MbtoolError::io("spawn signed helper", e))?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        // Two reader threads so a chatty stderr can't block stdout (or vice
        // versa) behind a full pipe buffer while the child is still running.
        let (tx, rx) = std::sync::mpsc::channel::<OutputLine>();
        let stdout_tx = tx.clone();
        let stdout_thread = std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(std::result::Result::ok) {
                let _ = stdout_tx.send(OutputLine::Stdout(line));
            }
        });
        let stderr_thread = std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(std::result::Result::ok) {
                let _ = tx.send(OutputLine::Stderr(line));
            }
        });

        for line in rx {
            on_output(line);
        }
        let _ = stdout_thread.join();
        let _ = stderr_thread.join();

        let status = child.wait().map_err(|e| MbtoolError::io("wait on signed helper", e))?;
        use std::os::unix::process::ExitStatusExt;
        match status.code() {
            Some(code) => Ok(RunOutcome::ExitStatus(code)),
            None => Ok(RunOutcome::SignalTermination(status.signal().unwrap_or(-1))),
        }
    }
}

trait CommandArg0Ext {
    fn arg0(&mut self, name: &str) -> &mut Self;
}

impl CommandArg0Ext for Command {
    fn arg0(&mut self, name: &str) -> &mut Self {
        std::os::unix::process::CommandExt::arg0(self, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::SigningKey;
    use rsa::signature::{RandomizedSigner, SignatureEncoding};
    use rsa::RsaPrivateKey;

    fn keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);
        (private, public)
    }

    #[test]
    fn verify_accepts_matching_signature() {
        let (private, public) = keypair();
        let signing_key = SigningKey::<Sha256>::new(private);
        let mut rng = rand::thread_rng();
        let data = b"helper binary contents";
        let signature = signing_key.sign_with_rng(&mut rng, data);

        let signed_exec = SignedExec::new(public);
        let outcome = signed_exec.verify(data, &signature.to_bytes()).unwrap();
        assert_eq!(outcome, VerifyOutcome::Valid);
    }

    #[test]
    fn verify_rejects_tampered_binary() {
        let (private, public) = keypair();
        let signing_key = SigningKey::<Sha256>::new(private);
        let mut rng = rand::thread_rng();
        let signature = signing_key.sign_with_rng(&mut rng, b"original contents");

        let signed_exec = SignedExec::new(public);
        let outcome = signed_exec.verify(b"tampered contents", &signature.to_bytes()).unwrap();
        assert_eq!(outcome, VerifyOutcome::Invalid);
    }
}
