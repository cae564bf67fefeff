//! Per-state credentials and the read-mostly cache in front of them.
//!
//! A credential supplies the state's RSA public key, used both to verify the state's bearer
//! tokens and to wrap export session keys. The cache hands out an `Arc` snapshot to readers;
//! refreshing loads a new snapshot without holding the lock and swaps it in.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FormatResult};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use openssl::asn1::Asn1Time;
use openssl::pkey::{PKey, Public};
use openssl::x509::X509;
use serde::Deserialize;

define_error!(CredentialError; NotFound="state credential not found", Expired="state certificate expired", Invalid="invalid state credentials", Unavailable="state credentials unavailable");

pub const DEFAULT_CACHE_TTL_SECONDS: i64 = 7200;

#[derive(Clone)]
enum KeyMaterial {
    Certificate(X509),
    PublicKey(PKey<Public>),
    Unusable,
}

impl KeyMaterial {
    fn from_pem(pem: &[u8]) -> KeyMaterial {
        if let Ok(certificate) = X509::from_pem(pem) {
            return KeyMaterial::Certificate(certificate);
        }
        if let Ok(public_key) = PKey::public_key_from_pem(pem) {
            return KeyMaterial::PublicKey(public_key);
        }
        KeyMaterial::Unusable
    }
}

#[derive(Clone)]
pub struct StateCredential {
    pub state_code: String,
    pub account_id: String,
    pub export_enabled: bool,
    pub accepted_only: bool,
    /// Archived accounts can neither request nor receive exports.
    pub archived: bool,
    pub certificate_expires_at: Option<DateTime<Utc>>,
    material: KeyMaterial,
}

impl StateCredential {
    /// Accepts a PEM X.509 certificate or a bare PEM public key.
    pub fn new<S, A>(state_code: S, account_id: A, certificate_pem: &[u8]) -> StateCredential where S: Into<String>, A: Into<String> {
        StateCredential {
            state_code: state_code.into(),
            account_id: account_id.into(),
            export_enabled: true,
            accepted_only: false,
            archived: false,
            certificate_expires_at: None,
            material: KeyMaterial::from_pem(certificate_pem),
        }
    }

    pub fn has_certificate(&self) -> bool {
        match self.material {
            KeyMaterial::Unusable => false,
            _ => true,
        }
    }

    pub fn public_key(&self, now: DateTime<Utc>) -> Result<PKey<Public>, CredentialError> {
        if let Some(expires_at) = self.certificate_expires_at {
            if now >= expires_at {
                return Err(CredentialError::Expired);
            }
        }
        match self.material {
            KeyMaterial::Certificate(ref certificate) => {
                let now = Asn1Time::from_unix(now.timestamp())
                    .or(Err(CredentialError::NotFound))?;
                if certificate.not_after() < &*now {
                    return Err(CredentialError::Expired);
                }
                certificate.public_key().or(Err(CredentialError::NotFound))
            },
            KeyMaterial::PublicKey(ref public_key) => Ok(public_key.clone()),
            KeyMaterial::Unusable => Err(CredentialError::NotFound),
        }
    }
}

impl Debug for StateCredential {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "StateCredential({} {})", &self.state_code, &self.account_id)
    }
}

pub trait CredentialSource: Send + Sync {
    fn load(&self) -> Result<Vec<StateCredential>, CredentialError>;
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CredentialRecord {
    state_code: String,
    account_id: String,
    certificate: Option<String>,
    certificate_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    export_enabled: bool,
    #[serde(default)]
    accepted_only: bool,
    #[serde(default)]
    archived: bool,
    certificate_expires_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// JSON list of credential records; `certificatePath` entries resolve against the list's directory.
pub struct FileCredentialSource {
    path: PathBuf,
}

impl FileCredentialSource {
    pub fn new<P>(path: P) -> FileCredentialSource where P: Into<PathBuf> {
        FileCredentialSource { path: path.into() }
    }

    fn read_certificate(&self, record: &CredentialRecord) -> Vec<u8> {
        if let Some(ref certificate) = record.certificate {
            return certificate.as_bytes().to_vec();
        }
        let path = match record.certificate_path {
            Some(ref path) => self.path.parent().unwrap_or_else(|| Path::new(".")).join(path),
            None => {
                warn!("No certificate configured for {}", record.state_code);
                return Vec::new();
            },
        };
        let mut pem = Vec::new();
        if let Err(e) = File::open(&path).and_then(|mut file| file.read_to_end(&mut pem)) {
            warn!("Cannot read certificate {} for {}: {}", path.display(), record.state_code, e);
        }
        pem
    }
}

impl CredentialSource for FileCredentialSource {
    fn load(&self) -> Result<Vec<StateCredential>, CredentialError> {
        let file = File::open(&self.path)
            .map_err(|e| {
                error!("Cannot open state credentials {}: {}", self.path.display(), e);
                CredentialError::Unavailable
            })?;
        let records: Vec<CredentialRecord> = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| {
                error!("Cannot parse state credentials {}: {}", self.path.display(), e);
                CredentialError::Invalid
            })?;
        Ok(records.into_iter()
            .map(|record| {
                let pem = self.read_certificate(&record);
                let mut credential = StateCredential::new(record.state_code, record.account_id, &pem);
                credential.export_enabled = record.export_enabled;
                credential.accepted_only = record.accepted_only;
                credential.archived = record.archived;
                credential.certificate_expires_at = record.certificate_expires_at;
                if !credential.has_certificate() {
                    warn!("Unusable certificate for {}", credential.state_code);
                }
                credential
            })
            .collect())
    }
}

/// Fixed list of credentials, mostly useful in tests.
pub struct StaticCredentialSource {
    credentials: Vec<StateCredential>,
}

impl StaticCredentialSource {
    pub fn new(credentials: Vec<StateCredential>) -> StaticCredentialSource {
        StaticCredentialSource { credentials }
    }
}

impl CredentialSource for StaticCredentialSource {
    fn load(&self) -> Result<Vec<StateCredential>, CredentialError> {
        Ok(self.credentials.clone())
    }
}

struct Snapshot {
    loaded_at: DateTime<Utc>,
    by_account_id: HashMap<String, Arc<StateCredential>>,
    by_state_code: HashMap<String, Arc<StateCredential>>,
}

impl Snapshot {
    fn new(credentials: Vec<StateCredential>, loaded_at: DateTime<Utc>) -> Snapshot {
        let mut by_account_id = HashMap::with_capacity(credentials.len());
        let mut by_state_code = HashMap::with_capacity(credentials.len());
        for credential in credentials {
            let credential = Arc::new(credential);
            if by_account_id.insert(credential.account_id.clone(), Arc::clone(&credential)).is_some() {
                warn!("Duplicate account id {} in state credentials", credential.account_id);
            }
            if by_state_code.insert(credential.state_code.clone(), credential).is_some() {
                warn!("Duplicate state code in state credentials");
            }
        }
        Snapshot { loaded_at, by_account_id, by_state_code }
    }
}

pub struct CredentialCache {
    source: Box<dyn CredentialSource>,
    ttl: Duration,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    refreshing: Mutex<()>,
}

impl CredentialCache {
    pub fn new(source: Box<dyn CredentialSource>, ttl: Duration) -> Result<CredentialCache, CredentialError> {
        let cache = CredentialCache { source, ttl, snapshot: RwLock::new(None), refreshing: Mutex::new(()) };
        cache.refresh(Utc::now())?;
        Ok(cache)
    }

    pub fn len(&self) -> usize {
        self.current()
            .map_or(0, |snapshot| snapshot.by_account_id.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.read().ok()
            .and_then(|snapshot| snapshot.as_ref().map(Arc::clone))
    }

    fn is_fresh(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> bool {
        now - snapshot.loaded_at < self.ttl
    }

    /// Loads credentials from the source and swaps them in. On failure the previous snapshot is
    /// dropped so nothing is served beyond its TTL.
    pub fn refresh(&self, now: DateTime<Utc>) -> Result<(), CredentialError> {
        let _guard = self.refreshing.lock()
            .or(Err(CredentialError::Unavailable))?;
        self.reload(now)
    }

    /// Refreshes only if the current snapshot has outlived the TTL.
    pub fn refresh_if_stale(&self, now: DateTime<Utc>) -> Result<(), CredentialError> {
        self.refresh_older_than(now, self.ttl)
    }

    /// Refreshes once the snapshot is within `lead` of its TTL, so that lookups on the request
    /// path rarely find it stale and have to load it themselves.
    pub fn refresh_ahead(&self, now: DateTime<Utc>, lead: Duration) -> Result<(), CredentialError> {
        self.refresh_older_than(now, self.ttl - lead)
    }

    fn refresh_older_than(&self, now: DateTime<Utc>, max_age: Duration) -> Result<(), CredentialError> {
        let _guard = self.refreshing.lock()
            .or(Err(CredentialError::Unavailable))?;
        // another caller may have refreshed while this one waited
        match self.current() {
            Some(ref snapshot) if now - snapshot.loaded_at < max_age => Ok(()),
            _ => self.reload(now),
        }
    }

    fn reload(&self, now: DateTime<Utc>) -> Result<(), CredentialError> {
        let loaded = self.source.load();
        let mut snapshot = self.snapshot.write()
            .or(Err(CredentialError::Unavailable))?;
        match loaded {
            Ok(credentials) => {
                debug!("Loaded {} state credentials", credentials.len());
                *snapshot = Some(Arc::new(Snapshot::new(credentials, now)));
                Ok(())
            },
            Err(e) => {
                error!("Cannot refresh state credentials: {}", e);
                *snapshot = None;
                Err(e)
            },
        }
    }

    fn snapshot_at(&self, now: DateTime<Utc>) -> Result<Arc<Snapshot>, CredentialError> {
        if let Some(snapshot) = self.current() {
            if self.is_fresh(&snapshot, now) {
                return Ok(snapshot);
            }
        }
        self.refresh_if_stale(now)?;
        self.current().ok_or(CredentialError::Unavailable)
    }

    pub fn by_account_id(&self, account_id: &str, now: DateTime<Utc>) -> Result<Arc<StateCredential>, CredentialError> {
        self.snapshot_at(now)?
            .by_account_id.get(account_id)
            .map(Arc::clone)
            .ok_or(CredentialError::NotFound)
    }

    pub fn by_state_code(&self, state_code: &str, now: DateTime<Utc>) -> Result<Arc<StateCredential>, CredentialError> {
        self.snapshot_at(now)?
            .by_state_code.get(state_code)
            .map(Arc::clone)
            .ok_or(CredentialError::NotFound)
    }
}

impl Debug for CredentialCache {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "CredentialCache({} credentials)", self.len())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempdir::TempDir;
    use crate::test_support::{certificate_pem, key_pair};

    struct CountingSource {
        loads: Arc<AtomicUsize>,
        fail_after: usize,
    }

    impl CredentialSource for CountingSource {
        fn load(&self) -> Result<Vec<StateCredential>, CredentialError> {
            let load = self.loads.fetch_add(1, Ordering::SeqCst);
            if load >= self.fail_after {
                return Err(CredentialError::Unavailable);
            }
            let (_, public_key) = key_pair();
            Ok(vec![StateCredential::new("MA", "ma-account", &public_key.public_key_to_pem().unwrap())])
        }
    }

    #[test]
    fn certificate_material() {
        let (private_key, public_key) = key_pair();
        let now = Utc::now();

        let credential = StateCredential::new("MA", "ma-account", &certificate_pem(&private_key, now - Duration::days(1), now + Duration::days(30)));
        assert!(credential.has_certificate());
        let key = credential.public_key(now).unwrap();
        assert!(key.public_eq(&public_key));
        assert_eq!(credential.public_key(now + Duration::days(31)).err(), Some(CredentialError::Expired));

        let mut credential = StateCredential::new("MA", "ma-account", &public_key.public_key_to_pem().unwrap());
        assert!(credential.public_key(now).is_ok());
        credential.certificate_expires_at = Some(now);
        assert_eq!(credential.public_key(now).err(), Some(CredentialError::Expired));

        let credential = StateCredential::new("MA", "ma-account", b"-----BEGIN CERTIFICATE-----\nnope\n");
        assert!(!credential.has_certificate());
        assert_eq!(credential.public_key(now).err(), Some(CredentialError::NotFound));
    }

    #[test]
    fn lookups() {
        let (_, public_key) = key_pair();
        let pem = public_key.public_key_to_pem().unwrap();
        let source = StaticCredentialSource::new(vec![
            StateCredential::new("MA", "ma-account", &pem),
            StateCredential::new("NY", "ny-account", &pem),
        ]);
        let cache = CredentialCache::new(Box::new(source), Duration::hours(2)).unwrap();
        let now = Utc::now();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.by_account_id("ny-account", now).unwrap().state_code, "NY");
        assert_eq!(cache.by_state_code("MA", now).unwrap().account_id, "ma-account");
        assert_eq!(cache.by_account_id("MA", now).err(), Some(CredentialError::NotFound));
        assert_eq!(cache.by_state_code("CA", now).err(), Some(CredentialError::NotFound));
    }

    #[test]
    fn reloads_after_ttl() {
        let loads = Arc::new(AtomicUsize::new(0));
        let source = CountingSource { loads: Arc::clone(&loads), fail_after: 10 };
        let cache = CredentialCache::new(Box::new(source), Duration::minutes(5)).unwrap();
        let now = Utc::now();
        cache.by_account_id("ma-account", now).unwrap();
        cache.by_account_id("ma-account", now + Duration::minutes(4)).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        cache.by_account_id("ma-account", now + Duration::minutes(6)).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn refreshes_ahead_of_expiry() {
        let loads = Arc::new(AtomicUsize::new(0));
        let source = CountingSource { loads: Arc::clone(&loads), fail_after: 10 };
        let cache = CredentialCache::new(Box::new(source), Duration::minutes(5)).unwrap();
        let now = Utc::now();
        cache.refresh_ahead(now + Duration::minutes(2), Duration::minutes(2)).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        cache.refresh_ahead(now + Duration::minutes(4), Duration::minutes(2)).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        // the reloaded snapshot is still fresh for lookups past the original TTL
        cache.by_account_id("ma-account", now + Duration::minutes(6)).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn never_serves_stale() {
        let loads = Arc::new(AtomicUsize::new(0));
        let source = CountingSource { loads: Arc::clone(&loads), fail_after: 1 };
        let cache = CredentialCache::new(Box::new(source), Duration::minutes(5)).unwrap();
        let now = Utc::now();
        assert!(cache.by_account_id("ma-account", now).is_ok());
        assert_eq!(cache.by_account_id("ma-account", now + Duration::minutes(6)).err(), Some(CredentialError::Unavailable));
        assert!(cache.is_empty());
    }

    #[test]
    fn file_source() {
        let (private_key, public_key) = key_pair();
        let now = Utc::now();
        let dir = TempDir::new("state-export").unwrap();
        fs::write(dir.path().join("ma.pem"), certificate_pem(&private_key, now - Duration::days(1), now + Duration::days(30))).unwrap();
        let list = serde_json::json!([
            {"stateCode": "MA", "accountId": "ma-account", "certificatePath": "ma.pem", "acceptedOnly": true},
            {
                "stateCode": "NY", "accountId": "ny-account", "exportEnabled": false,
                "certificate": String::from_utf8(public_key.public_key_to_pem().unwrap()).unwrap(),
            },
            {"stateCode": "CA", "accountId": "ca-account", "certificatePath": "missing.pem", "archived": true},
        ]);
        let path = dir.path().join("credentials.json");
        fs::write(&path, serde_json::to_vec(&list).unwrap()).unwrap();

        let credentials = FileCredentialSource::new(&path).load().unwrap();
        assert_eq!(credentials.len(), 3);
        assert!(credentials[0].accepted_only);
        assert!(credentials[0].export_enabled);
        assert!(credentials[0].public_key(now).is_ok());
        assert!(!credentials[1].export_enabled);
        assert!(credentials[1].public_key(now).is_ok());
        assert!(!credentials[0].archived);
        assert!(!credentials[2].has_certificate());
        assert!(credentials[2].archived);

        fs::write(&path, b"{\"stateCode\": 1}").unwrap();
        assert_eq!(FileCredentialSource::new(&path).load().err(), Some(CredentialError::Invalid));
        assert_eq!(FileCredentialSource::new(dir.path().join("absent.json")).load().err(), Some(CredentialError::Unavailable));
    }
}
