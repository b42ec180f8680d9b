//! Key and certificate files.
//!
//! Artifacts of one operation are first written to temporary files in the
//! target directory and only then renamed into place, so a failure while
//! writing leaves no new files behind. A failure during the renames is
//! reported as [`Error::PartialWrite`] naming what was already committed.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::pki::{Certificate, KeyPair};

/// One file to be committed.
pub struct Artifact {
    /// File name inside the target directory
    pub name: String,
    /// File contents
    pub contents: Zeroizing<Vec<u8>>,
    /// Private key material: keep owner-only permissions
    pub secret: bool,
}

impl Artifact {
    /// A world-readable artifact such as a certificate.
    pub fn public(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            contents: Zeroizing::new(contents.into()),
            secret: false,
        }
    }

    /// An owner-only artifact such as a private key.
    pub fn secret(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            contents: Zeroizing::new(contents.into()),
            secret: true,
        }
    }
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("name", &self.name)
            .field("len", &self.contents.len())
            .field("secret", &self.secret)
            .finish()
    }
}

/// Write all `artifacts` into `dir`, returning the committed paths.
pub fn commit_artifacts(dir: &Path, artifacts: Vec<Artifact>) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;

    let mut staged = Vec::with_capacity(artifacts.len());
    for artifact in &artifacts {
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&artifact.contents)?;
        file.as_file().sync_all()?;
        #[cfg(unix)]
        if !artifact.secret {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))?;
        }
        staged.push((file, dir.join(&artifact.name)));
    }

    let mut committed = Vec::with_capacity(staged.len());
    for (file, target) in staged {
        if let Err(e) = file.persist(&target) {
            return Err(Error::PartialWrite {
                committed,
                failed: target,
                source: e.error,
            });
        }
        log::debug!("Wrote {}", target.display());
        committed.push(target);
    }
    Ok(committed)
}

/// Atomically replace `path` with `contents`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Read a PEM or DER certificate.
pub fn read_certificate(path: &Path) -> Result<Certificate> {
    Certificate::from_bytes(&std::fs::read(path)?)
}

/// Read several certificates, one per file.
pub fn read_certificates(paths: &[PathBuf]) -> Result<Vec<Certificate>> {
    paths.iter().map(|p| read_certificate(p)).collect()
}

/// Read a PKCS#8 PEM private key, decrypting it with `passphrase` if needed.
pub fn read_key(path: &Path, passphrase: Option<&str>) -> Result<KeyPair> {
    let pem = Zeroizing::new(std::fs::read_to_string(path)?);
    KeyPair::import(&pem, passphrase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let paths = commit_artifacts(
            dir.path(),
            vec![
                Artifact::public("a.pem", b"public".to_vec()),
                Artifact::secret("b.pem", b"secret".to_vec()),
            ],
        )
        .unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(std::fs::read(dir.path().join("a.pem")).unwrap(), b"public");
        assert_eq!(std::fs::read(dir.path().join("b.pem")).unwrap(), b"secret");
        // Only the committed files remain.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        commit_artifacts(
            dir.path(),
            vec![
                Artifact::public("cert.pem", b"c".to_vec()),
                Artifact::secret("key.pem", b"k".to_vec()),
            ],
        )
        .unwrap();
        let mode = |name: &str| {
            std::fs::metadata(dir.path().join(name))
                .unwrap()
                .permissions()
                .mode()
                & 0o777
        };
        assert_eq!(mode("cert.pem"), 0o644);
        assert_eq!(mode("key.pem"), 0o600);
    }

    #[test]
    fn test_partial_write_reports_committed() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in the way makes the second rename fail.
        std::fs::create_dir(dir.path().join("blocked.pem")).unwrap();
        std::fs::write(dir.path().join("blocked.pem").join("x"), b"x").unwrap();
        let err = commit_artifacts(
            dir.path(),
            vec![
                Artifact::public("first.pem", b"1".to_vec()),
                Artifact::public("blocked.pem", b"2".to_vec()),
            ],
        )
        .unwrap_err();
        match err {
            Error::PartialWrite {
                committed, failed, ..
            } => {
                assert_eq!(committed, vec![dir.path().join("first.pem")]);
                assert_eq!(failed, dir.path().join("blocked.pem"));
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }
}
