//! Certificate store shared with marathon-lb
//!
//! Certificates live as `certs/<domain>.pem` (private key followed by the
//! chain) under the storage directory, next to the ACME account credentials
//! (`client.key`) and a self-signed fallback certificate (`default.pem`).
//! marathon-lb reads the same directory, so every write goes through a
//! temp-file-then-rename so a partial file is never observable.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use x509_parser::prelude::*;

/// File name of the stored ACME account credentials.
const ACCOUNT_FILE: &str = "client.key";

/// File name of the self-signed fallback certificate.
const DEFAULT_CERT_FILE: &str = "default.pem";

/// Errors raised by the certificate store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to generate fallback certificate: {0}")]
    Generation(String),
}

/// Filesystem-backed certificate store.
#[derive(Debug, Clone)]
pub struct CertStore {
    root: PathBuf,
}

impl CertStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory layout and tighten permissions.
    pub fn init(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.certs_dir())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.root, fs::Permissions::from_mode(0o700))?;
        }

        tracing::info!(storage = %self.root.display(), "Initialized certificate store");
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn certs_dir(&self) -> PathBuf {
        self.root.join("certs")
    }

    fn cert_path(&self, domain: &str) -> PathBuf {
        self.certs_dir().join(format!("{domain}.pem"))
    }

    /// Domains that currently have a certificate on disk.
    pub fn list(&self) -> Result<BTreeSet<String>, StoreError> {
        let mut domains = BTreeSet::new();

        for entry in fs::read_dir(self.certs_dir())? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "pem")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && !stem.starts_with('.')
            {
                domains.insert(stem.to_string());
            }
        }

        Ok(domains)
    }

    /// PEM bundle for a domain, or `None` when no certificate is installed.
    pub fn get(&self, domain: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.cert_path(domain)) {
            Ok(pem) => Ok(Some(pem)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically install or replace a domain's PEM bundle.
    pub fn put(&self, domain: &str, pem: &str) -> Result<(), StoreError> {
        let target = self.cert_path(domain);
        self.write_atomic(&target, pem.as_bytes())?;
        tracing::info!(domain = %domain, path = %target.display(), "Stored certificate");
        Ok(())
    }

    /// `notAfter` of the installed certificate, `None` when the bundle holds
    /// no parseable certificate.
    pub fn cert_expiry(&self, domain: &str) -> Result<Option<SystemTime>, StoreError> {
        let Some(pem) = self.get(domain)? else {
            return Ok(None);
        };

        for block in Pem::iter_from_buffer(pem.as_bytes()).flatten() {
            if block.label == "CERTIFICATE"
                && let Ok((_, cert)) = X509Certificate::from_der(&block.contents)
            {
                let timestamp = cert.validity().not_after.timestamp();
                return Ok(UNIX_EPOCH.checked_add(Duration::from_secs(timestamp.max(0) as u64)));
            }
        }

        Ok(None)
    }

    /// Stored ACME account credentials, if an account was registered before.
    pub fn load_account_credentials(&self) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.root.join(ACCOUNT_FILE)) {
            Ok(json) => Ok(Some(json)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_account_credentials(&self, json: &str) -> Result<(), StoreError> {
        let path = self.root.join(ACCOUNT_FILE);
        self.write_atomic(&path, json.as_bytes())?;
        tracing::info!(path = %path.display(), "Stored ACME account credentials");
        Ok(())
    }

    /// Write the self-signed wildcard fallback certificate unless it already
    /// exists. Returns whether a new one was generated.
    pub fn ensure_default(&self) -> Result<bool, StoreError> {
        let path = self.root.join(DEFAULT_CERT_FILE);
        if path.exists() {
            return Ok(false);
        }

        use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "marathon-acme");
        params.distinguished_name = dn;
        params.subject_alt_names = vec![SanType::DnsName(
            "*".try_into()
                .map_err(|e| StoreError::Generation(format!("{e}")))?,
        )];

        let key_pair =
            KeyPair::generate().map_err(|e| StoreError::Generation(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| StoreError::Generation(e.to_string()))?;

        let bundle = format!("{}{}", key_pair.serialize_pem(), cert.pem());
        self.write_atomic(&path, bundle.as_bytes())?;

        tracing::info!(path = %path.display(), "Generated self-signed fallback certificate");
        Ok(true)
    }

    /// Write `bytes` to a hidden sibling temp file, fsync and rename over
    /// `target`. The rename is what makes the replacement atomic; if the
    /// filesystem cannot rename, the error surfaces as [`StoreError::Io`].
    fn write_atomic(&self, target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let dir = target.parent().unwrap_or(&self.root);
        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("cert");
        let tmp = dir.join(format!(".{file_name}.tmp"));

        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }

        if let Err(e) = fs::rename(&tmp, target) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, CertStore) {
        let temp = TempDir::new().unwrap();
        let store = CertStore::new(temp.path());
        store.init().unwrap();
        (temp, store)
    }

    /// Key + certificate bundle expiring `days` from now.
    fn bundle_expiring_in(domain: &str, days: i64) -> String {
        let mut params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
        params.not_after = ::time::OffsetDateTime::now_utc() + ::time::Duration::days(days);
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        format!("{}{}", key_pair.serialize_pem(), cert.pem())
    }

    #[test]
    fn init_creates_layout() {
        let (temp, _store) = setup();
        assert!(temp.path().join("certs").is_dir());
    }

    #[test]
    fn put_get_list_roundtrip() {
        let (_temp, store) = setup();

        assert!(store.list().unwrap().is_empty());
        assert!(store.get("a.example.com").unwrap().is_none());

        store.put("a.example.com", "PEM DATA").unwrap();

        assert_eq!(store.get("a.example.com").unwrap().unwrap(), "PEM DATA");
        assert_eq!(
            store.list().unwrap(),
            BTreeSet::from(["a.example.com".to_string()])
        );
    }

    #[test]
    fn put_replaces_existing_bundle() {
        let (_temp, store) = setup();

        store.put("a.example.com", "OLD").unwrap();
        store.put("a.example.com", "NEW").unwrap();

        assert_eq!(store.get("a.example.com").unwrap().unwrap(), "NEW");
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn put_leaves_no_temp_files() {
        let (temp, store) = setup();
        store.put("a.example.com", "PEM DATA").unwrap();

        let names: Vec<String> = fs::read_dir(temp.path().join("certs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.example.com.pem".to_string()]);
    }

    #[test]
    fn list_ignores_foreign_files() {
        let (temp, store) = setup();
        fs::write(temp.path().join("certs").join("README"), "not a cert").unwrap();
        fs::write(temp.path().join("certs").join(".partial.pem.tmp"), "junk").unwrap();

        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn ensure_default_is_idempotent() {
        let (temp, store) = setup();

        assert!(store.ensure_default().unwrap());
        let first = fs::read_to_string(temp.path().join("default.pem")).unwrap();
        assert!(first.contains("BEGIN CERTIFICATE"));
        assert!(first.contains("BEGIN PRIVATE KEY"));

        assert!(!store.ensure_default().unwrap());
        let second = fs::read_to_string(temp.path().join("default.pem")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn account_credentials_roundtrip() {
        let (temp, store) = setup();

        assert!(store.load_account_credentials().unwrap().is_none());

        store.save_account_credentials(r#"{"id":"test"}"#).unwrap();
        assert_eq!(
            store.load_account_credentials().unwrap().unwrap(),
            r#"{"id":"test"}"#
        );
        assert!(temp.path().join("client.key").exists());
    }

    #[test]
    fn cert_expiry_reads_not_after() {
        let (_temp, store) = setup();

        store
            .put("a.example.com", &bundle_expiring_in("a.example.com", 20))
            .unwrap();

        let expiry = store.cert_expiry("a.example.com").unwrap().unwrap();
        let days = expiry
            .duration_since(SystemTime::now())
            .unwrap()
            .as_secs()
            / 86400;
        assert!((19..=20).contains(&days), "expected ~20 days, got {days}");
    }

    #[test]
    fn cert_expiry_of_unparseable_bundle_is_none() {
        let (_temp, store) = setup();
        store.put("a.example.com", "not a pem").unwrap();
        assert!(store.cert_expiry("a.example.com").unwrap().is_none());
    }

    #[test]
    fn cert_expiry_of_missing_domain_is_none() {
        let (_temp, store) = setup();
        assert!(store.cert_expiry("missing.example.com").unwrap().is_none());
    }
}
