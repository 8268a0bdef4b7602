//! Signing orchestrator — runs the CA signing program on a staged public key.
//!
//! Each call gets its own private staging directory (mode `0700`, random
//! name). The public key is written into it and the signing program writes
//! the certificate next to it as `<keyfile>-cert.pub`. The directory is a
//! [`tempfile::TempDir`], so both files are removed when the call returns,
//! whichever way it returns.
//!
//! # Failure mapping
//!
//! | Situation | Error |
//! |-----------|-------|
//! | program exits non-zero | [`Error::Signing`] with its output |
//! | program exceeds the timeout (and is killed) | [`Error::Signing`] |
//! | program missing, I/O error, no certificate produced | [`Error::Internal`] / [`Error::Io`] |

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cert_policy::ValidatedRequest;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::SignerConfig;
use crate::{Error, Result};

/// File name of the staged public key inside the staging directory.
///
/// No `.pub` extension: `ssh-keygen` strips one before appending its suffix,
/// so only a bare name makes `<keyfile>-cert.pub` the actual output path.
const STAGED_KEY_NAME: &str = "request";

/// Suffix the signing program appends to the input path for its output.
const CERT_SUFFIX: &str = "-cert.pub";

/// A signed certificate ready to hand back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// Certificate text as written by the signing program.
    pub cert: String,
    /// Key identity embedded in the certificate.
    pub key_id: String,
}

/// Trait abstracting the CA signing primitive.
#[async_trait::async_trait]
pub trait CertSigner: Send + Sync + 'static {
    /// Sign the request's public key for its principal and TTL.
    async fn sign(&self, request: &ValidatedRequest) -> Result<IssuedCertificate>;
}

/// Signer that shells out to `ssh-keygen -s` (or a compatible program).
#[derive(Debug, Clone)]
pub struct SshKeygenSigner {
    program: String,
    ca_key: PathBuf,
    work_dir: Option<PathBuf>,
    timeout: Duration,
}

impl SshKeygenSigner {
    /// Build the signer from configuration.
    #[must_use]
    pub fn new(config: &SignerConfig) -> Self {
        Self {
            program: config.program.clone(),
            ca_key: config.ca_key.clone(),
            work_dir: config.work_dir.clone(),
            timeout: config.timeout,
        }
    }

    fn staging_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("cert-signer-");
        let dir = match &self.work_dir {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    fn command(&self, key_id: &str, request: &ValidatedRequest, key_path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-s")
            .arg(&self.ca_key)
            .arg("-I")
            .arg(key_id)
            .arg("-n")
            .arg(request.principal())
            .arg("-V")
            .arg(format!("+{}s", request.ttl()))
            .arg(key_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl CertSigner for SshKeygenSigner {
    async fn sign(&self, request: &ValidatedRequest) -> Result<IssuedCertificate> {
        let staging = self.staging_dir()?;
        let key_path = staging.path().join(STAGED_KEY_NAME);
        tokio::fs::write(&key_path, format!("{}\n", request.pubkey())).await?;

        let key_id = key_identity(request.principal(), unix_now());
        debug!(key_id = %key_id, staging = %staging.path().display(), "Invoking signer");

        let child = self
            .command(&key_id, request, &key_path)
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to start {}: {e}", self.program)))?;

        // On timeout the child future is dropped and kill_on_drop reaps the process
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(key_id = %key_id, timeout = ?self.timeout, "Signer timed out");
                return Err(Error::Signing(format!(
                    "signing timed out after {:?}",
                    self.timeout
                )));
            }
        };

        if !output.status.success() {
            let mut detail = String::from_utf8_lossy(&output.stdout).into_owned();
            detail.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(Error::Signing(detail));
        }

        let cert = tokio::fs::read_to_string(cert_path(&key_path))
            .await
            .map_err(|e| Error::Internal(format!("signer produced no certificate: {e}")))?;
        if cert.trim().is_empty() {
            return Err(Error::Internal("signer produced an empty certificate".into()));
        }

        Ok(IssuedCertificate { cert, key_id })
    }
}

/// Path the signing program writes its certificate to.
fn cert_path(key_path: &Path) -> PathBuf {
    let mut path = OsString::from(key_path.as_os_str());
    path.push(CERT_SUFFIX);
    PathBuf::from(path)
}

/// `issued-<principal>-<unix seconds>-<random>`.
///
/// The random suffix keeps identities distinct when the same principal is
/// signed twice within one second.
fn key_identity(principal: &str, timestamp: u64) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("issued-{principal}-{timestamp}-{}", &suffix[..8])
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cert_policy::{PolicyLimits, SignRequest, TokenEntry, validate};

    fn validated(principal: &str, ttl: i64) -> ValidatedRequest {
        let entry = TokenEntry {
            principals: vec![principal.to_string()],
            max_ttl: Some(7200),
            ..TokenEntry::default()
        };
        validate(
            &entry,
            SignRequest::new("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAItest user@host", principal, ttl),
            PolicyLimits::default(),
        )
        .unwrap()
    }

    #[test]
    fn key_identity_has_expected_shape() {
        let id = key_identity("alice", 1_700_000_000);
        assert!(id.starts_with("issued-alice-1700000000-"));
        assert_eq!(id.len(), "issued-alice-1700000000-".len() + 8);
    }

    #[test]
    fn key_identities_differ_within_one_second() {
        assert_ne!(key_identity("alice", 1), key_identity("alice", 1));
    }

    #[test]
    fn cert_path_appends_suffix() {
        assert_eq!(
            cert_path(Path::new("/tmp/x/request")),
            PathBuf::from("/tmp/x/request-cert.pub")
        );
    }

    #[test]
    fn staged_key_name_has_no_pub_extension() {
        // ssh-keygen would write `request-cert.pub` for `request.pub`
        assert!(!STAGED_KEY_NAME.ends_with(".pub"));
        assert_eq!(
            cert_path(&Path::new("/tmp/x").join(STAGED_KEY_NAME)),
            PathBuf::from("/tmp/x/request-cert.pub")
        );
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn script(dir: &Path, name: &str, body: &str) -> String {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().into_owned()
        }

        fn signer(program: String, work_dir: &Path, timeout: Duration) -> SshKeygenSigner {
            SshKeygenSigner::new(&SignerConfig {
                program,
                ca_key: PathBuf::from("/etc/ssh/ca/ssh_ca"),
                work_dir: Some(work_dir.to_path_buf()),
                timeout,
            })
        }

        fn is_empty(dir: &Path) -> bool {
            std::fs::read_dir(dir).unwrap().next().is_none()
        }

        #[tokio::test]
        async fn success_returns_cert_and_cleans_up() {
            // GIVEN: a fake signer that writes a certificate next to its last argument
            let bin = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let program = script(
                bin.path(),
                "fake-keygen",
                r#"for last; do :; done
echo "ssh-ed25519-cert-v01@openssh.com AAAAfakecert $*" > "${last%.pub}-cert.pub""#,
            );
            let signer = signer(program, work.path(), Duration::from_secs(10));

            // WHEN: signing
            let issued = signer.sign(&validated("alice", 3600)).await.unwrap();

            // THEN: the cert came back with the expected arguments and nothing is left behind
            assert!(issued.cert.starts_with("ssh-ed25519-cert-v01@openssh.com"));
            assert!(issued.cert.contains("-s /etc/ssh/ca/ssh_ca"));
            assert!(issued.cert.contains(&format!("-I {}", issued.key_id)));
            assert!(issued.cert.contains("-n alice"));
            assert!(issued.cert.contains("-V +3600s"));
            assert!(issued.key_id.starts_with("issued-alice-"));
            assert!(is_empty(work.path()));
        }

        #[tokio::test]
        async fn staged_key_has_trailing_newline() {
            let bin = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let program = script(
                bin.path(),
                "echo-keygen",
                r#"for last; do :; done
cat "$last" > "${last%.pub}-cert.pub""#,
            );
            let signer = signer(program, work.path(), Duration::from_secs(10));

            let issued = signer.sign(&validated("alice", 60)).await.unwrap();

            assert_eq!(
                issued.cert,
                "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAItest user@host\n"
            );
        }

        #[tokio::test]
        async fn non_zero_exit_is_signing_error_with_detail() {
            // GIVEN: a signer that fails loudly
            let bin = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let program = script(
                bin.path(),
                "failing-keygen",
                "echo 'Load key \"/etc/ssh/ca/ssh_ca\": invalid format' >&2\nexit 255",
            );
            let signer = signer(program, work.path(), Duration::from_secs(10));

            // WHEN: signing
            let err = signer.sign(&validated("alice", 3600)).await.unwrap_err();

            // THEN: the diagnostic is carried and the staged key is gone
            match err {
                Error::Signing(detail) => assert!(detail.contains("invalid format")),
                other => panic!("expected signing error, got {other:?}"),
            }
            assert!(is_empty(work.path()));
        }

        #[tokio::test]
        async fn timeout_is_signing_error() {
            let bin = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let program = script(bin.path(), "slow-keygen", "sleep 10");
            let signer = signer(program, work.path(), Duration::from_millis(200));

            let err = signer.sign(&validated("alice", 3600)).await.unwrap_err();

            match err {
                Error::Signing(detail) => assert!(detail.contains("timed out")),
                other => panic!("expected signing error, got {other:?}"),
            }
            assert!(is_empty(work.path()));
        }

        #[tokio::test]
        async fn missing_program_is_internal_error() {
            let work = tempfile::tempdir().unwrap();
            let signer = signer(
                "/nonexistent/ssh-keygen".to_string(),
                work.path(),
                Duration::from_secs(10),
            );

            let err = signer.sign(&validated("alice", 3600)).await.unwrap_err();

            assert!(matches!(err, Error::Internal(_)));
            assert!(is_empty(work.path()));
        }

        /// Generate an ed25519 key pair with the system `ssh-keygen`.
        /// `None` when the program is not installed.
        fn generate_key(path: &Path) -> Option<()> {
            let status = std::process::Command::new("ssh-keygen")
                .args(["-q", "-t", "ed25519", "-N", "", "-C", "", "-f"])
                .arg(path)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .ok()?;
            status.success().then_some(())
        }

        #[tokio::test]
        async fn real_ssh_keygen_produces_certificate() {
            // GIVEN: a throwaway CA and user key made by the real ssh-keygen
            let keys = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let ca_key = keys.path().join("ca");
            let user_key = keys.path().join("user");
            if generate_key(&ca_key).is_none() || generate_key(&user_key).is_none() {
                eprintln!("ssh-keygen not available, skipping");
                return;
            }
            let pubkey = std::fs::read_to_string(keys.path().join("user.pub")).unwrap();
            let entry = TokenEntry {
                principals: vec!["alice".to_string()],
                max_ttl: Some(7200),
                ..TokenEntry::default()
            };
            let request = validate(
                &entry,
                SignRequest::new(pubkey.trim(), "alice", 3600),
                PolicyLimits::default(),
            )
            .unwrap();
            let signer = SshKeygenSigner::new(&SignerConfig {
                program: "ssh-keygen".to_string(),
                ca_key,
                work_dir: Some(work.path().to_path_buf()),
                timeout: Duration::from_secs(10),
            });

            // WHEN: signing
            let issued = signer.sign(&request).await.unwrap();

            // THEN: an OpenSSH certificate comes back and nothing is left staged
            assert!(
                issued
                    .cert
                    .starts_with("ssh-ed25519-cert-v01@openssh.com "),
                "unexpected output: {}",
                issued.cert
            );
            assert!(is_empty(work.path()));
        }

        #[tokio::test]
        async fn success_without_certificate_is_internal_error() {
            let bin = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let program = script(bin.path(), "silent-keygen", "exit 0");
            let signer = signer(program, work.path(), Duration::from_secs(10));

            let err = signer.sign(&validated("alice", 3600)).await.unwrap_err();

            assert!(matches!(err, Error::Internal(_)));
            assert!(is_empty(work.path()));
        }
    }
}
